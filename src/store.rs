//! Local persistence of the player credential and the current-room pointer.
//!
//! [`IdentityStore`] is a thin typed layer over an injected [`KeyValueStore`].
//! Reads never fail: an unavailable store behaves like an empty one, which
//! sends the user back to nickname entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::protocol::{PlayerId, RoomCode};

/// Key holding the player's nickname.
pub const NICKNAME_KEY: &str = "nickname";
/// Key holding the server-assigned player id.
pub const PLAYER_ID_KEY: &str = "playerId";
/// Key holding the code of the room the player was last in.
pub const ROOM_CODE_KEY: &str = "currentRoomCode";

/// String key-value persistence. Absence of a key means "unset".
pub trait KeyValueStore: Send + Sync {
    /// Read `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the medium is unavailable.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] or [`SessionError::Io`] on failure.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Deleting an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] or [`SessionError::Io`] on failure.
    fn remove(&self, key: &str) -> Result<()>;
}

fn poisoned() -> SessionError {
    SessionError::Storage("store lock poisoned".into())
}

// ── MemoryStore ─────────────────────────────────────────────────────

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().map_err(|_| poisoned())?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }
}

// ── FileStore ───────────────────────────────────────────────────────

/// Store backed by a JSON object file, rewritten on every change.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// original, so a crash mid-write leaves the previous contents intact. The
/// in-memory view only changes once the file has been replaced.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the file exists but cannot be read, or
    /// [`SessionError::Serialization`] if it is not a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = entries.len(), "opened file store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().map_err(|_| poisoned())?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}

// ── IdentityStore ───────────────────────────────────────────────────

/// Locally cached player credential. `id` is `None` until the server assigns one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity {
    pub id: Option<PlayerId>,
    pub name: String,
}

/// Typed access to the persisted nickname, player id and room pointer.
#[derive(Clone)]
pub struct IdentityStore {
    store: Arc<dyn KeyValueStore>,
}

impl IdentityStore {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Share an existing store, e.g. with another component of the application.
    pub fn from_shared(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The persisted credential, or `None` if no nickname is stored.
    pub fn load(&self) -> Option<PlayerIdentity> {
        let name = self.read(NICKNAME_KEY)?;
        Some(PlayerIdentity {
            id: self.read(PLAYER_ID_KEY),
            name,
        })
    }

    /// Persist `identity`. A `None` id removes any stored id.
    ///
    /// # Errors
    ///
    /// Returns the underlying storage error.
    pub fn save(&self, identity: &PlayerIdentity) -> Result<()> {
        self.write(NICKNAME_KEY, Some(&identity.name))?;
        self.write(PLAYER_ID_KEY, identity.id.as_deref())
    }

    /// Forget the credential and the room pointer that belongs to it.
    ///
    /// # Errors
    ///
    /// Returns the underlying storage error.
    pub fn clear(&self) -> Result<()> {
        self.write(NICKNAME_KEY, None)?;
        self.write(PLAYER_ID_KEY, None)?;
        self.write(ROOM_CODE_KEY, None)
    }

    pub fn nickname(&self) -> Option<String> {
        self.read(NICKNAME_KEY)
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.read(PLAYER_ID_KEY)
    }

    /// # Errors
    ///
    /// Returns the underlying storage error.
    pub fn set_player_id(&self, player_id: &str) -> Result<()> {
        self.write(PLAYER_ID_KEY, Some(player_id))
    }

    /// Raw persisted room pointer. Not validated: it may predate a format change.
    pub fn room_code(&self) -> Option<String> {
        self.read(ROOM_CODE_KEY)
    }

    /// # Errors
    ///
    /// Returns the underlying storage error.
    pub fn save_room_code(&self, code: &RoomCode) -> Result<()> {
        self.write(ROOM_CODE_KEY, Some(code.as_str()))
    }

    /// # Errors
    ///
    /// Returns the underlying storage error.
    pub fn clear_room_code(&self) -> Result<()> {
        self.write(ROOM_CODE_KEY, None)
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, "identity store unavailable, treating key as unset: {e}");
                None
            }
        }
    }

    fn write(&self, key: &str, value: Option<&str>) -> Result<()> {
        let result = match value {
            Some(value) => self.store.set(key, value),
            None => self.store.remove(key),
        };
        if let Err(e) = &result {
            warn!(key, "failed to persist identity key: {e}");
        }
        result
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore")
            .field("nickname", &self.nickname())
            .field("player_id", &self.player_id())
            .field("room_code", &self.room_code())
            .finish()
    }
}
