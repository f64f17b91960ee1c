//! Reconnects a returning player to the room they were last in.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::RoomApi;
use crate::error::{Result, SessionError};
use crate::protocol::{RoomCode, RoomResponse, RoomState};
use crate::store::IdentityStore;

/// How a recovery attempt ended.
///
/// Every variant other than [`Adopted`](Self::Adopted) and
/// [`Rejoined`](Self::Rejoined) leaves the room pointer cleared.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// No room pointer was persisted.
    NoPointer,
    /// The room no longer exists.
    Stale { code: String },
    /// The player is still a member; the server's room is used as-is.
    Adopted(RoomState),
    /// The player was re-added to the room.
    Rejoined(RoomState),
    /// The room could not be recovered.
    Abandoned { code: String, reason: String },
}

impl RecoveryOutcome {
    /// The recovered room, if any.
    pub fn room(&self) -> Option<&RoomState> {
        match self {
            Self::Adopted(room) | Self::Rejoined(room) => Some(room),
            _ => None,
        }
    }

    pub fn into_room(self) -> Option<RoomState> {
        match self {
            Self::Adopted(room) | Self::Rejoined(room) => Some(room),
            _ => None,
        }
    }
}

/// Reconciles the persisted room pointer with the server.
///
/// Recovery converges: either the local view ends up equal to the server's
/// room with the player in it, or there is no room and no pointer.
pub struct RoomRecoveryAgent {
    api: Arc<dyn RoomApi>,
    identity: IdentityStore,
}

impl RoomRecoveryAgent {
    pub fn new(api: Arc<dyn RoomApi>, identity: IdentityStore) -> Self {
        Self { api, identity }
    }

    /// Recover the room for `player_id` from the persisted pointer.
    ///
    /// Failures are folded into the outcome rather than returned; the only
    /// side effect besides the requests is updating or clearing the pointer.
    pub async fn recover(&self, player_id: &str) -> RecoveryOutcome {
        let Some(raw) = self.identity.room_code() else {
            debug!("no room pointer persisted");
            return RecoveryOutcome::NoPointer;
        };
        let code = match RoomCode::parse(&raw) {
            Ok(code) => code,
            Err(e) => return self.abandon(raw, &e),
        };

        let response = match self.api.get_room(&code).await {
            Ok(response) => response,
            Err(e) => return self.abandon(raw, &e),
        };
        let room = match response {
            RoomResponse {
                success: true,
                room: Some(room),
                ..
            } => room,
            RoomResponse { error, .. } => {
                info!(
                    room_code = %code,
                    reason = error.as_deref().unwrap_or("room not found"),
                    "persisted room is gone"
                );
                self.clear_pointer();
                return RecoveryOutcome::Stale { code: raw };
            }
        };
        if let Err(e) = room.validate() {
            return self.abandon(raw, &e);
        }

        if room.contains_player(player_id) {
            info!(room_code = %code, player_id, "still a member, adopting room");
            return RecoveryOutcome::Adopted(room);
        }

        info!(room_code = %code, player_id, "not a member any more, rejoining");
        match self.rejoin(&code, player_id).await {
            Ok(room) => {
                if let Err(e) = self.identity.save_room_code(&room.code) {
                    warn!(room_code = %room.code, "could not refresh room pointer: {e}");
                }
                info!(room_code = %room.code, player_id, "rejoined room");
                RecoveryOutcome::Rejoined(room)
            }
            Err(e) => self.abandon(raw, &e),
        }
    }

    async fn rejoin(&self, code: &RoomCode, player_id: &str) -> Result<RoomState> {
        let response = self.api.join_room(code, player_id).await?;
        response.ensure_success("room:join")?;
        let room = response
            .room
            .ok_or_else(|| SessionError::InvalidRoom("join acknowledged without a room".into()))?;
        room.validate()?;
        Ok(room)
    }

    fn abandon(&self, code: String, error: &SessionError) -> RecoveryOutcome {
        warn!(room_code = %code, "room recovery failed: {error}");
        self.clear_pointer();
        RecoveryOutcome::Abandoned {
            code,
            reason: error.to_string(),
        }
    }

    fn clear_pointer(&self) {
        if let Err(e) = self.identity.clear_room_code() {
            warn!("could not clear room pointer: {e}");
        }
    }
}

impl std::fmt::Debug for RoomRecoveryAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRecoveryAgent")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
