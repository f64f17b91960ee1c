//! High-level session: one connection, one identity, at most one room.
//!
//! [`Session`] wires the bootstrapper, recovery agent and lifecycle controller
//! to a [`RoomClient`] and keeps exactly one push subscription alive for the
//! current player.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::RoomApi;
use crate::bootstrap::{BootstrapOutcome, SessionBootstrapper};
use crate::client::RoomClient;
use crate::controller::{RoomLifecycleController, RoomPhase, RoomSnapshot};
use crate::error::{Result, SessionError};
use crate::event::{ClientEvent, PushFilter};
use crate::protocol::{PlayerId, ServerPush};
use crate::recovery::{RecoveryOutcome, RoomRecoveryAgent};
use crate::store::IdentityStore;

/// Room size requested when the caller does not pick one.
pub const DEFAULT_MAX_PLAYERS: u32 = 8;

/// Session-level settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `maxPlayers` sent with `room:create` when none is given.
    pub default_max_players: u32,
}

impl SessionConfig {
    /// Set the default room size. Clamped to at least 1.
    pub fn with_default_max_players(mut self, max_players: u32) -> Self {
        self.default_max_players = max_players.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_max_players: DEFAULT_MAX_PLAYERS,
        }
    }
}

/// What [`Session::start`] found and did.
#[derive(Debug, Clone, PartialEq)]
pub struct StartupReport {
    pub bootstrap: BootstrapOutcome,
    /// `None` when there was no player to recover a room for, or startup had
    /// already completed for this credential.
    pub recovery: Option<RecoveryOutcome>,
}

/// Forwards pushes from one subscription into the controller.
///
/// Keyed by the player it serves; a `player:created` push re-keys it. Dropping
/// the pump aborts the task, which releases the subscription.
struct PushPump {
    owner: Arc<StdMutex<PlayerId>>,
    task: Option<JoinHandle<()>>,
}

impl PushPump {
    fn spawn(
        client: &RoomClient,
        controller: Arc<RoomLifecycleController>,
        player_id: &str,
    ) -> Self {
        let mut subscription = client.subscribe(PushFilter::all());
        let owner = Arc::new(StdMutex::new(player_id.to_string()));
        let task = tokio::spawn({
            let owner = Arc::clone(&owner);
            async move {
                while let Some(event) = subscription.recv().await {
                    match event {
                        ClientEvent::Push(push) => {
                            if let ServerPush::PlayerCreated { player } = &push {
                                *owner.lock().unwrap_or_else(PoisonError::into_inner) =
                                    player.id.clone();
                            }
                            controller.handle_push(&push).await;
                        }
                        ClientEvent::Disconnected { reason } => {
                            warn!(?reason, "connection lost, push pump stopping");
                        }
                    }
                }
                subscription.dispose();
            }
        });
        debug!(player_id, "push pump attached");
        Self {
            owner,
            task: Some(task),
        }
    }

    fn owner(&self) -> PlayerId {
        self.owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Abort the task and wait until its subscription is released.
    async fn dispose(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        debug!(player_id = %self.owner(), "push pump detached");
    }
}

impl Drop for PushPump {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A player's connection to the lobby.
///
/// ```rust,no_run
/// use room_session_client::{
///     ClientConfig, FileStore, IdentityStore, RoomClient, Session, SessionConfig,
///     WebSocketTransport,
/// };
///
/// # async fn run() -> room_session_client::error::Result<()> {
/// let transport = WebSocketTransport::connect("ws://localhost:3000/ws").await?;
/// let client = RoomClient::start(transport, ClientConfig::default());
/// let identity = IdentityStore::new(FileStore::open("session.json")?);
/// let session = Session::new(client, identity, SessionConfig::default());
///
/// let report = session.start().await?;
/// if report.bootstrap.player_id().is_none() {
///     session.submit_nickname("Ana").await?;
/// }
/// session.create_room(None).await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    client: Arc<RoomClient>,
    identity: IdentityStore,
    bootstrapper: SessionBootstrapper,
    recovery: RoomRecoveryAgent,
    controller: Arc<RoomLifecycleController>,
    pump: Mutex<Option<PushPump>>,
    config: SessionConfig,
}

impl Session {
    pub fn new(client: RoomClient, identity: IdentityStore, config: SessionConfig) -> Self {
        let client = Arc::new(client);
        let api: Arc<dyn RoomApi> = Arc::clone(&client) as Arc<dyn RoomApi>;
        Self {
            bootstrapper: SessionBootstrapper::new(Arc::clone(&api), identity.clone()),
            recovery: RoomRecoveryAgent::new(Arc::clone(&api), identity.clone()),
            controller: Arc::new(RoomLifecycleController::new(api, identity.clone())),
            client,
            identity,
            pump: Mutex::new(None),
            config,
        }
    }

    /// Verify the credential, subscribe to pushes for it, then recover the
    /// room the player was last in.
    ///
    /// # Errors
    ///
    /// Only bootstrap failures are returned. Recovery failures end in the
    /// `NoRoom` phase and are reported in [`StartupReport::recovery`].
    pub async fn start(&self) -> Result<StartupReport> {
        let has_nickname = self.identity.nickname().is_some();
        let bootstrap = self
            .establish(has_nickname, self.bootstrapper.bootstrap())
            .await?;
        let Some(player_id) = bootstrap.player_id().map(str::to_string) else {
            info!(?bootstrap, "no player yet, waiting for nickname");
            return Ok(StartupReport {
                bootstrap,
                recovery: None,
            });
        };
        self.attach(&player_id).await;

        if matches!(bootstrap, BootstrapOutcome::Duplicate { .. }) {
            return Ok(StartupReport {
                bootstrap,
                recovery: None,
            });
        }

        if let Some(pointer) = self.identity.room_code() {
            self.controller.begin_recovery(&pointer).await;
        }
        let recovery = self.recovery.recover(&player_id).await;
        match &recovery {
            RecoveryOutcome::Adopted(room) | RecoveryOutcome::Rejoined(room) => {
                self.controller.adopt_recovered(room.clone()).await;
            }
            RecoveryOutcome::NoPointer => {}
            RecoveryOutcome::Stale { .. } | RecoveryOutcome::Abandoned { .. } => {
                self.controller.abandon_room().await;
            }
        }
        let phase = self.controller.phase().await;
        info!(player_id = %player_id, ?phase, "session started");
        Ok(StartupReport {
            bootstrap,
            recovery: Some(recovery),
        })
    }

    /// Register a nickname and create a fresh player for it.
    ///
    /// The new identity starts outside any room: a room held by the previous
    /// player is left first. If that `room:leave` fails the room is dropped
    /// locally anyway, and the server keeps the old player as a member until
    /// the player record expires.
    ///
    /// # Errors
    ///
    /// See [`SessionBootstrapper::submit_nickname`].
    pub async fn submit_nickname(&self, name: &str) -> Result<BootstrapOutcome> {
        if name.trim().is_empty() {
            return Err(SessionError::InvalidNickname);
        }
        self.leave_held_room().await;
        let outcome = self
            .establish(true, self.bootstrapper.submit_nickname(name))
            .await?;
        if let Some(player_id) = outcome.player_id() {
            self.attach(player_id).await;
        }
        Ok(outcome)
    }

    /// Create a room, of `max_players` or the configured default size.
    ///
    /// # Errors
    ///
    /// See [`RoomLifecycleController::create_room`].
    pub async fn create_room(&self, max_players: Option<u32>) -> Result<()> {
        let player_id = self.identity.player_id().unwrap_or_default();
        let max_players = max_players.unwrap_or(self.config.default_max_players);
        self.controller
            .create_room(&player_id, Some(max_players))
            .await
    }

    /// # Errors
    ///
    /// See [`RoomLifecycleController::join_room`].
    pub async fn join_room(&self, room_code: &str) -> Result<()> {
        let player_id = self.identity.player_id().unwrap_or_default();
        self.controller.join_room(room_code, &player_id).await
    }

    /// Leave the current room.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidRoom`] if no room is held, otherwise see
    /// [`RoomLifecycleController::leave_room`].
    pub async fn leave_room(&self) -> Result<()> {
        let Some(room) = self.controller.snapshot().await.room else {
            return Err(SessionError::InvalidRoom("not in a room".into()));
        };
        let player_id = self.identity.player_id().unwrap_or_default();
        self.controller.leave_room(&room.code, &player_id).await
    }

    pub async fn dismiss_error(&self) {
        self.controller.dismiss_error().await;
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        self.controller.snapshot().await
    }

    pub async fn phase(&self) -> RoomPhase {
        self.controller.phase().await
    }

    /// The persisted player id.
    pub fn player_id(&self) -> Option<PlayerId> {
        self.identity.player_id()
    }

    pub fn client(&self) -> &RoomClient {
        &self.client
    }

    /// Detach from pushes and close the connection.
    pub async fn shutdown(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.dispose().await;
        }
        self.client.shutdown().await;
        info!("session shut down");
    }

    async fn leave_held_room(&self) {
        let held = self.controller.snapshot().await.room;
        if let (Some(room), Some(player_id)) = (held, self.identity.player_id()) {
            if let Err(e) = self.controller.leave_room(&room.code, &player_id).await {
                warn!(room_code = %room.code, "could not leave room before identity change: {e}");
            }
        }
        self.controller.abandon_room().await;
    }

    /// Run a credential attempt with the `creating_player` flag raised.
    async fn establish(
        &self,
        creating: bool,
        attempt: impl std::future::Future<Output = Result<BootstrapOutcome>>,
    ) -> Result<BootstrapOutcome> {
        if creating {
            self.controller.begin_player_creation().await;
        }
        let outcome = attempt.await;
        if creating {
            self.controller
                .finish_player_creation(outcome.as_ref().err())
                .await;
        }
        outcome
    }

    /// Ensure the push pump belongs to `player_id`, replacing any other.
    async fn attach(&self, player_id: &str) {
        let mut pump = self.pump.lock().await;
        if pump.as_ref().is_some_and(|p| p.owner() == player_id) {
            return;
        }
        if let Some(previous) = pump.take() {
            previous.dispose().await;
        }
        *pump = Some(PushPump::spawn(
            &self.client,
            Arc::clone(&self.controller),
            player_id,
        ));
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client", &self.client)
            .field("identity", &self.identity)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
