//! Room lifecycle: create, join and leave, reconciled with server pushes.
//!
//! Acknowledgements and pushes arrive in no particular order. For create and
//! join the push is the source of truth: an acknowledged room is only adopted
//! if no push for that code got there first. For leave the acknowledgement is
//! authoritative, and later pushes about the departed room are dropped.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::RoomApi;
use crate::error::{Result, SessionError};
use crate::error_codes::ErrorCode;
use crate::protocol::{PlayerRecord, RoomCode, RoomState, ServerPush};
use crate::store::IdentityStore;

/// Whether the player currently holds a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    NoRoom,
    InRoom,
}

/// Point-in-time view of the controller, for rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomSnapshot {
    pub room: Option<RoomState>,
    pub creating_room: bool,
    pub joining_room: bool,
    pub leaving_room: bool,
    pub creating_player: bool,
    /// Message of the most recent failure, until the next success or dismissal.
    pub last_error: Option<String>,
}

impl RoomSnapshot {
    pub fn phase(&self) -> RoomPhase {
        if self.room.is_some() {
            RoomPhase::InRoom
        } else {
            RoomPhase::NoRoom
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Create,
    Join,
}

impl Entry {
    fn operation(self) -> &'static str {
        match self {
            Self::Create => "room:create",
            Self::Join => "room:join",
        }
    }

    fn pending(self, view: &mut RoomSnapshot) -> &mut bool {
        match self {
            Self::Create => &mut view.creating_room,
            Self::Join => &mut view.joining_room,
        }
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    view: RoomSnapshot,
    /// Code of the room most recently left, whose late pushes are ignored.
    departed: Option<RoomCode>,
    /// Room being recovered at startup, while its `room:get`/`room:join` is out.
    recovering: Option<RoomCode>,
    /// Latest `room:updated` for `recovering` received while no room was held.
    recovered_update: Option<RoomState>,
}

/// Owns the local room state and the in-progress flags.
pub struct RoomLifecycleController {
    api: Arc<dyn RoomApi>,
    identity: IdentityStore,
    state: Mutex<ControllerState>,
}

impl RoomLifecycleController {
    pub fn new(api: Arc<dyn RoomApi>, identity: IdentityStore) -> Self {
        Self {
            api,
            identity,
            state: Mutex::new(ControllerState::default()),
        }
    }

    /// Ask the server for a new room hosted by `player_id`.
    ///
    /// The room becomes active once either the acknowledgement carries it or
    /// a `room:created` push arrives.
    ///
    /// # Errors
    ///
    /// [`SessionError::MissingPlayerId`], [`SessionError::OperationPending`],
    /// or the transport or rejection error of the request. Failures are also
    /// recorded as the snapshot's `last_error`.
    pub async fn create_room(&self, player_id: &str, max_players: Option<u32>) -> Result<()> {
        self.begin(Entry::Create, player_id).await?;
        info!(player_id, ?max_players, "creating room");
        let result = self.api.create_room(player_id, max_players).await;
        self.finish_entry(Entry::Create, result.and_then(|response| {
            response.ensure_success("room:create")?;
            Ok(response.room)
        }))
        .await
    }

    /// Join the room with the user-entered code `room_code`.
    ///
    /// The code is normalized before sending; a malformed code is rejected
    /// without contacting the server.
    ///
    /// # Errors
    ///
    /// As [`create_room`](Self::create_room), plus
    /// [`SessionError::InvalidRoomCode`].
    pub async fn join_room(&self, room_code: &str, player_id: &str) -> Result<()> {
        let code = match RoomCode::parse(room_code) {
            Ok(code) => code,
            Err(e) => return Err(self.record_failure(e).await),
        };
        self.begin(Entry::Join, player_id).await?;
        {
            let mut state = self.state.lock().await;
            if state.departed.as_ref() == Some(&code) {
                state.departed = None;
            }
        }

        info!(room_code = %code, player_id, "joining room");
        let result = self.api.join_room(&code, player_id).await;
        self.finish_entry(Entry::Join, result.and_then(|response| {
            response.ensure_success("room:join")?;
            Ok(response.room)
        }))
        .await
    }

    /// Leave `room_code`. On acknowledgement the room and the pointer are
    /// dropped immediately, without waiting for any push.
    ///
    /// # Errors
    ///
    /// [`SessionError::MissingPlayerId`], [`SessionError::OperationPending`],
    /// or the transport or rejection error of the request.
    pub async fn leave_room(&self, room_code: &RoomCode, player_id: &str) -> Result<()> {
        if player_id.is_empty() {
            return Err(self.record_failure(SessionError::MissingPlayerId).await);
        }
        {
            let mut state = self.state.lock().await;
            if state.view.leaving_room {
                return Err(SessionError::OperationPending("room:leave"));
            }
            state.view.leaving_room = true;
        }

        info!(room_code = %room_code, player_id, "leaving room");
        let result = self
            .api
            .leave_room(room_code, player_id)
            .await
            .and_then(|response| response.ensure_success().map(|()| response));

        let mut state = self.state.lock().await;
        state.view.leaving_room = false;
        match result {
            Ok(response) => {
                if state.view.room.as_ref().is_some_and(|room| room.code == *room_code) {
                    state.view.room = None;
                }
                state.view.last_error = None;
                state.departed = Some(room_code.clone());
                self.clear_pointer();
                info!(room_code = %room_code, was_deleted = ?response.was_deleted, "left room");
                Ok(())
            }
            Err(e) => {
                warn!(room_code = %room_code, "leave failed: {e}");
                state.view.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Apply a server push.
    pub async fn handle_push(&self, push: &ServerPush) {
        match push {
            ServerPush::RoomCreated { room } => self.on_entry_push(Entry::Create, room).await,
            ServerPush::RoomJoined { room } => self.on_entry_push(Entry::Join, room).await,
            ServerPush::RoomUpdated { room } => self.on_room_updated(room).await,
            ServerPush::PlayerCreated { player } => self.on_player_created(player).await,
            ServerPush::Error { message, code } => self.on_error(message, code.as_ref()).await,
        }
    }

    /// Open the recovery window for the persisted pointer `raw_code`.
    ///
    /// Until [`adopt_recovered`](Self::adopt_recovered) or
    /// [`abandon_room`](Self::abandon_room) closes it, updates for that room
    /// are held back instead of dropped, since no room is held yet.
    pub async fn begin_recovery(&self, raw_code: &str) {
        let Ok(code) = RoomCode::parse(raw_code) else {
            return;
        };
        let mut state = self.state.lock().await;
        state.recovering = Some(code);
        state.recovered_update = None;
    }

    /// Install a room produced by startup recovery.
    ///
    /// Pushes received while recovery was in flight are newer than the
    /// acknowledgement it read: a room of the same code already adopted from a
    /// push is kept, and a held-back update replaces `room`.
    pub async fn adopt_recovered(&self, room: RoomState) {
        let mut state = self.state.lock().await;
        state.recovering = None;
        let update = state
            .recovered_update
            .take()
            .filter(|update| update.code == room.code);
        if state.view.room.as_ref().is_some_and(|held| held.code == room.code) {
            debug!(room_code = %room.code, "keeping room pushed during recovery");
            return;
        }
        self.adopt(&mut state, update.unwrap_or(room), "recovery");
    }

    /// Drop the current room and its pointer, e.g. after failed recovery.
    pub async fn abandon_room(&self) {
        let mut state = self.state.lock().await;
        state.recovering = None;
        state.recovered_update = None;
        if let Some(room) = state.view.room.take() {
            info!(room_code = %room.code, "room abandoned");
        }
        self.clear_pointer();
    }

    pub async fn begin_player_creation(&self) {
        self.state.lock().await.view.creating_player = true;
    }

    /// Settle the `creating_player` flag after a creation attempt.
    pub async fn finish_player_creation(&self, failure: Option<&SessionError>) {
        let mut state = self.state.lock().await;
        state.view.creating_player = false;
        state.view.last_error = failure.map(ToString::to_string);
    }

    pub async fn dismiss_error(&self) {
        self.state.lock().await.view.last_error = None;
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        self.state.lock().await.view.clone()
    }

    pub async fn phase(&self) -> RoomPhase {
        self.state.lock().await.view.phase()
    }

    async fn begin(&self, entry: Entry, player_id: &str) -> Result<()> {
        if player_id.is_empty() {
            return Err(self.record_failure(SessionError::MissingPlayerId).await);
        }
        let mut state = self.state.lock().await;
        let pending = entry.pending(&mut state.view);
        if *pending {
            return Err(SessionError::OperationPending(entry.operation()));
        }
        *pending = true;
        Ok(())
    }

    async fn finish_entry(&self, entry: Entry, result: Result<Option<RoomState>>) -> Result<()> {
        let mut state = self.state.lock().await;
        *entry.pending(&mut state.view) = false;
        let room = match result {
            Ok(room) => room,
            Err(e) => {
                warn!(operation = entry.operation(), "room request failed: {e}");
                state.view.last_error = Some(e.to_string());
                return Err(e);
            }
        };
        state.view.last_error = None;

        let Some(room) = room else {
            debug!(operation = entry.operation(), "acknowledged without a room, waiting for push");
            return Ok(());
        };
        if let Err(e) = room.validate() {
            warn!(operation = entry.operation(), "ignoring acknowledged room: {e}");
            return Ok(());
        }
        if state.view.room.as_ref().is_some_and(|held| held.code == room.code) {
            debug!(room_code = %room.code, "room already adopted from push");
            return Ok(());
        }
        self.adopt(&mut state, room, entry.operation());
        Ok(())
    }

    async fn on_entry_push(&self, entry: Entry, room: &RoomState) {
        if let Err(e) = room.validate() {
            warn!(operation = entry.operation(), "ignoring pushed room: {e}");
            return;
        }
        let mut state = self.state.lock().await;
        let pending = entry.pending(&mut state.view);
        let was_pending = *pending;
        *pending = false;
        if !was_pending && state.departed.as_ref() == Some(&room.code) {
            debug!(room_code = %room.code, "ignoring push for a room already left");
            return;
        }
        state.view.last_error = None;
        self.adopt(&mut state, room.clone(), "push");
    }

    async fn on_room_updated(&self, room: &RoomState) {
        if let Err(e) = room.validate() {
            warn!("ignoring room update: {e}");
            return;
        }
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        match &mut state.view.room {
            Some(held) if held.code == room.code => {
                debug!(room_code = %room.code, players = room.player_ids.len(), "room updated");
                *held = room.clone();
            }
            None if state.recovering.as_ref() == Some(&room.code) => {
                debug!(room_code = %room.code, "holding update until recovery settles");
                state.recovered_update = Some(room.clone());
            }
            _ => debug!(room_code = %room.code, "ignoring update for a room not held"),
        }
    }

    async fn on_player_created(&self, player: &PlayerRecord) {
        if let Err(e) = self.identity.set_player_id(&player.id) {
            warn!(player_id = %player.id, "could not persist pushed player id: {e}");
        }
        info!(player_id = %player.id, "player id updated by server");
        self.state.lock().await.view.creating_player = false;
    }

    async fn on_error(&self, message: &str, code: Option<&ErrorCode>) {
        let mut state = self.state.lock().await;
        let view = &mut state.view;
        let pending = match code {
            Some(ErrorCode::CreateRoomError) => &mut view.creating_room,
            Some(ErrorCode::JoinRoomError) => &mut view.joining_room,
            Some(ErrorCode::CreatePlayerError) => &mut view.creating_player,
            Some(ErrorCode::Other(raw)) => {
                debug!(code = %raw, reason = message, "ignoring error push with unhandled code");
                return;
            }
            None => {
                debug!(reason = message, "ignoring uncoded error push");
                return;
            }
        };
        *pending = false;
        view.last_error = Some(message.to_string());
        warn!(code = ?code, reason = message, "server reported an error");
    }

    fn adopt(&self, state: &mut ControllerState, room: RoomState, source: &str) {
        if let Err(e) = self.identity.save_room_code(&room.code) {
            warn!(room_code = %room.code, "could not persist room pointer: {e}");
        }
        info!(room_code = %room.code, players = room.player_ids.len(), source, "room adopted");
        state.departed = None;
        state.recovered_update = None;
        state.view.room = Some(room);
    }

    async fn record_failure(&self, error: SessionError) -> SessionError {
        warn!("room operation rejected locally: {error}");
        self.state.lock().await.view.last_error = Some(error.to_string());
        error
    }

    fn clear_pointer(&self) {
        if let Err(e) = self.identity.clear_room_code() {
            warn!("could not clear room pointer: {e}");
        }
    }
}

impl std::fmt::Debug for RoomLifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomLifecycleController")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
