//! Player credential verification at startup.
//!
//! The [`SessionBootstrapper`] turns a persisted nickname (and optional player
//! id) into a server-verified player id, creating or recreating the player
//! when needed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::api::RoomApi;
use crate::error::{Result, SessionError};
use crate::latch::SingleFlight;
use crate::protocol::{PlayerCreateResponse, PlayerId};
use crate::store::{IdentityStore, PlayerIdentity};

/// Stands in for the player id in the dedup key when none is persisted.
const NO_PLAYER: &str = "\u{0}none";

fn dedup_key(nickname: &str, player_id: Option<&str>) -> String {
    format!("{nickname}\u{1f}{}", player_id.unwrap_or(NO_PLAYER))
}

/// Result of one bootstrap attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// No nickname is persisted; the user must enter one.
    NicknameRequired,
    /// Already completed for this credential in this process. Nothing was sent.
    Duplicate { player_id: Option<PlayerId> },
    /// Another creation for this credential is outstanding. Nothing was sent.
    CreationInFlight,
    /// The persisted player still exists on the server.
    Verified(PlayerId),
    /// No player id was persisted; a new player was created.
    Created(PlayerId),
    /// The persisted player had expired; a replacement was created.
    Recreated {
        previous: PlayerId,
        player_id: PlayerId,
    },
}

impl BootstrapOutcome {
    /// The player id this outcome leaves the session with, if any.
    pub fn player_id(&self) -> Option<&str> {
        match self {
            Self::Verified(id) | Self::Created(id) | Self::Recreated { player_id: id, .. } => {
                Some(id)
            }
            Self::Duplicate { player_id } => player_id.as_deref(),
            Self::NicknameRequired | Self::CreationInFlight => None,
        }
    }
}

/// Verifies or establishes the player credential.
///
/// Repeat calls for an unchanged (nickname, player id) pair are no-ops for the
/// lifetime of the bootstrapper, and at most one `player:create` per pair can
/// be outstanding at a time.
pub struct SessionBootstrapper {
    api: Arc<dyn RoomApi>,
    identity: IdentityStore,
    completed: Mutex<HashSet<String>>,
    creating: SingleFlight,
}

impl SessionBootstrapper {
    pub fn new(api: Arc<dyn RoomApi>, identity: IdentityStore) -> Self {
        Self {
            api,
            identity,
            completed: Mutex::new(HashSet::new()),
            creating: SingleFlight::new(),
        }
    }

    /// Verify the persisted credential, creating a player if there is none or
    /// the stored one has expired.
    ///
    /// # Errors
    ///
    /// Transport failures and server rejections are returned as-is. A failed
    /// `player:get` never triggers recreation.
    pub async fn bootstrap(&self) -> Result<BootstrapOutcome> {
        let Some(nickname) = self.identity.nickname() else {
            debug!("no nickname persisted");
            return Ok(BootstrapOutcome::NicknameRequired);
        };
        let stored_id = self.identity.player_id();
        let key = dedup_key(&nickname, stored_id.as_deref());
        if self.is_completed(&key) {
            debug!(nickname = %nickname, "bootstrap already completed for this credential");
            return Ok(BootstrapOutcome::Duplicate {
                player_id: stored_id,
            });
        }

        let outcome = match stored_id {
            None => self.create_player(&nickname, &key).await?,
            Some(previous) => self.verify_player(&nickname, previous, &key).await?,
        };
        if let Some(player_id) = outcome.player_id() {
            self.mark_completed(dedup_key(&nickname, Some(player_id)));
            self.mark_completed(key);
        }
        Ok(outcome)
    }

    /// Register `name` as the nickname and create a fresh player for it.
    ///
    /// Any previously stored player id is dropped first.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidNickname`] for blank input, otherwise the
    /// storage, transport or rejection error of the attempt.
    pub async fn submit_nickname(&self, name: &str) -> Result<BootstrapOutcome> {
        let nickname = name.trim();
        if nickname.is_empty() {
            return Err(SessionError::InvalidNickname);
        }
        self.identity.save(&PlayerIdentity {
            id: None,
            name: nickname.to_string(),
        })?;

        let key = dedup_key(nickname, None);
        let outcome = self.create_player(nickname, &key).await?;
        if let Some(player_id) = outcome.player_id() {
            self.mark_completed(dedup_key(nickname, Some(player_id)));
            self.mark_completed(key);
        }
        Ok(outcome)
    }

    async fn verify_player(
        &self,
        nickname: &str,
        previous: PlayerId,
        key: &str,
    ) -> Result<BootstrapOutcome> {
        let response = self.api.get_player(&previous).await.inspect_err(|e| {
            warn!(player_id = %previous, "could not verify player: {e}");
        })?;
        response.ensure_success().inspect_err(|e| {
            warn!(player_id = %previous, "player lookup rejected: {e}");
        })?;

        if !response.exists {
            info!(player_id = %previous, "stored player expired, creating a new one");
            return Ok(match self.create_player(nickname, key).await? {
                BootstrapOutcome::Created(player_id) => BootstrapOutcome::Recreated {
                    previous,
                    player_id,
                },
                other => other,
            });
        }

        let player_id = response.player.map_or(previous, |player| player.id);
        self.identity.set_player_id(&player_id)?;
        debug!(player_id = %player_id, "player verified");
        Ok(BootstrapOutcome::Verified(player_id))
    }

    async fn create_player(&self, nickname: &str, key: &str) -> Result<BootstrapOutcome> {
        let Some(_latch) = self.creating.try_acquire(key) else {
            debug!(nickname, "player creation already in flight");
            return Ok(BootstrapOutcome::CreationInFlight);
        };

        info!(nickname, "creating player");
        let player = self
            .api
            .create_player(nickname)
            .await
            .and_then(PlayerCreateResponse::into_player)
            .inspect_err(|e| warn!(nickname, "player creation failed: {e}"))?;

        self.identity.set_player_id(&player.id)?;
        info!(nickname, player_id = %player.id, "player created");
        Ok(BootstrapOutcome::Created(player.id))
    }

    fn is_completed(&self, key: &str) -> bool {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn mark_completed(&self, key: String) {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
    }
}

impl std::fmt::Debug for SessionBootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBootstrapper")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::ClientRequest;
    use crate::store::MemoryStore;
    use crate::testing::{created, found, missing_player, ScriptedApi};

    fn identity(name: Option<&str>, id: Option<&str>) -> IdentityStore {
        let identity = IdentityStore::new(MemoryStore::new());
        if let Some(name) = name {
            identity
                .save(&PlayerIdentity {
                    id: id.map(str::to_string),
                    name: name.into(),
                })
                .unwrap();
        }
        identity
    }

    fn bootstrapper(api: &Arc<ScriptedApi>, identity: &IdentityStore) -> SessionBootstrapper {
        SessionBootstrapper::new(Arc::clone(api) as Arc<dyn RoomApi>, identity.clone())
    }

    #[tokio::test]
    async fn no_nickname_requires_entry() {
        let api = Arc::new(ScriptedApi::new());
        let boot = bootstrapper(&api, &identity(None, None));

        assert_eq!(
            boot.bootstrap().await.unwrap(),
            BootstrapOutcome::NicknameRequired
        );
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn nickname_without_id_creates_player() {
        let api = Arc::new(ScriptedApi::new());
        api.on_create_player(created("p1", "Ana"));
        let identity = identity(Some("Ana"), None);
        let boot = bootstrapper(&api, &identity);

        assert_eq!(
            boot.bootstrap().await.unwrap(),
            BootstrapOutcome::Created("p1".into())
        );
        assert_eq!(
            api.calls(),
            vec![ClientRequest::CreatePlayer { name: "Ana".into() }]
        );
        assert_eq!(identity.player_id().as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn repeat_bootstrap_sends_nothing() {
        let api = Arc::new(ScriptedApi::new());
        api.on_create_player(created("p1", "Ana"));
        let boot = bootstrapper(&api, &identity(Some("Ana"), None));

        boot.bootstrap().await.unwrap();
        assert_eq!(
            boot.bootstrap().await.unwrap(),
            BootstrapOutcome::Duplicate {
                player_id: Some("p1".into())
            }
        );
        assert_eq!(api.count("player:create"), 1);
        assert_eq!(api.count("player:get"), 0);
    }

    #[tokio::test]
    async fn concurrent_creation_is_single_flight() {
        let api = Arc::new(ScriptedApi::gated());
        api.on_create_player(created("p1", "Ana"));
        let boot = Arc::new(bootstrapper(&api, &identity(Some("Ana"), None)));

        let first = tokio::spawn({
            let boot = Arc::clone(&boot);
            async move { boot.bootstrap().await }
        });
        while api.calls().is_empty() {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            boot.bootstrap().await.unwrap(),
            BootstrapOutcome::CreationInFlight
        );
        api.open_gate();
        assert_eq!(
            first.await.unwrap().unwrap(),
            BootstrapOutcome::Created("p1".into())
        );
        assert_eq!(api.count("player:create"), 1);
    }

    #[tokio::test]
    async fn failed_creation_can_be_retried() {
        let api = Arc::new(ScriptedApi::new());
        api.on_create_player(Ok(PlayerCreateResponse {
            success: false,
            player: None,
            error: Some("name taken".into()),
        }))
        .on_create_player(created("p2", "Ana"));
        let identity = identity(Some("Ana"), None);
        let boot = bootstrapper(&api, &identity);

        let err = boot.bootstrap().await.unwrap_err();
        assert_eq!(err.to_string(), "player:create failed: name taken");
        assert_eq!(identity.player_id(), None);

        assert_eq!(
            boot.bootstrap().await.unwrap(),
            BootstrapOutcome::Created("p2".into())
        );
    }

    #[tokio::test]
    async fn existing_player_is_verified() {
        let api = Arc::new(ScriptedApi::new());
        api.on_get_player(found("p1", "Ana"));
        let identity = identity(Some("Ana"), Some("p1"));
        let boot = bootstrapper(&api, &identity);

        assert_eq!(
            boot.bootstrap().await.unwrap(),
            BootstrapOutcome::Verified("p1".into())
        );
        assert_eq!(api.count("player:create"), 0);
        assert_eq!(identity.player_id().as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn expired_player_is_recreated() {
        let api = Arc::new(ScriptedApi::new());
        api.on_get_player(missing_player())
            .on_create_player(created("p9", "Ana"));
        let identity = identity(Some("Ana"), Some("p1"));
        let boot = bootstrapper(&api, &identity);

        assert_eq!(
            boot.bootstrap().await.unwrap(),
            BootstrapOutcome::Recreated {
                previous: "p1".into(),
                player_id: "p9".into()
            }
        );
        assert_eq!(identity.player_id().as_deref(), Some("p9"));
    }

    #[tokio::test]
    async fn lookup_failure_does_not_recreate() {
        let api = Arc::new(ScriptedApi::new());
        api.on_get_player(Err(SessionError::Timeout));
        let identity = identity(Some("Ana"), Some("p1"));
        let boot = bootstrapper(&api, &identity);

        assert!(matches!(boot.bootstrap().await, Err(SessionError::Timeout)));
        assert_eq!(api.count("player:create"), 0);
        assert_eq!(identity.player_id().as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn submitted_nickname_replaces_identity() {
        let api = Arc::new(ScriptedApi::new());
        api.on_create_player(created("p5", "Bea"));
        let identity = identity(Some("Ana"), Some("p1"));
        let boot = bootstrapper(&api, &identity);

        assert_eq!(
            boot.submit_nickname("  Bea ").await.unwrap(),
            BootstrapOutcome::Created("p5".into())
        );
        assert_eq!(identity.nickname().as_deref(), Some("Bea"));
        assert_eq!(identity.player_id().as_deref(), Some("p5"));
        assert_eq!(
            boot.bootstrap().await.unwrap(),
            BootstrapOutcome::Duplicate {
                player_id: Some("p5".into())
            }
        );
    }

    #[tokio::test]
    async fn blank_nickname_is_rejected() {
        let api = Arc::new(ScriptedApi::new());
        let boot = bootstrapper(&api, &identity(None, None));

        assert!(matches!(
            boot.submit_nickname("   ").await,
            Err(SessionError::InvalidNickname)
        ));
        assert!(api.calls().is_empty());
    }
}
