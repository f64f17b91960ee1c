//! Async client for the lobby protocol.
//!
//! [`RoomClient`] is a handle onto a background transport loop. Requests are
//! queued over an unbounded MPSC channel and each caller awaits its own
//! acknowledgement through a oneshot continuation keyed by ack id. Push
//! notifications fan out over a broadcast channel to every live
//! [`Subscription`].
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = connect_somehow().await;
//! let client = RoomClient::start(transport, ClientConfig::default());
//! let mut pushes = client.subscribe(PushFilter::all());
//!
//! let player = client.create_player("Ana").await?.into_player()?;
//! client.create_room(&player.id, Some(8)).await?.ensure_success("room:create")?;
//!
//! while let Some(event) = pushes.recv().await {
//!     match event {
//!         ClientEvent::Push(ServerPush::RoomCreated { room }) => { /* … */ }
//!         ClientEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::api::RoomApi;
use crate::error::{Result, SessionError};
use crate::event::{ClientEvent, PushFilter};
use crate::protocol::{
    AckId, ClientRequest, PlayerCreateResponse, PlayerGetResponse, RequestFrame, RoomCode,
    RoomLeaveResponse, RoomResponse, ServerFrame,
};
use crate::transport::Transport;

/// Default capacity of the push broadcast channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default time to wait for an acknowledgement.
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`RoomClient`].
///
/// ```
/// use room_session_client::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_ack_timeout(Duration::from_secs(3))
///     .with_event_channel_capacity(0);
/// assert_eq!(config.ack_timeout, Duration::from_secs(3));
/// assert_eq!(config.event_channel_capacity, 1);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Capacity of the push broadcast channel.
    ///
    /// A subscriber that falls further behind than this loses the oldest
    /// pushes (with a warning logged). Defaults to **256**; values below 1
    /// are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long a request waits for its acknowledgement before failing with
    /// [`SessionError::Timeout`]. An acknowledgement arriving later is
    /// dropped. Defaults to **10 seconds**.
    pub ack_timeout: Duration,
    /// How long [`RoomClient::shutdown`] waits for the transport loop before
    /// aborting it. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl ClientConfig {
    /// Set the push channel capacity (clamped to at least 1).
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the acknowledgement timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// A serialized request on its way to the transport loop.
struct OutboundFrame {
    id: AckId,
    json: String,
}

/// State shared between the client handle and the transport loop.
struct ClientState {
    connected: AtomicBool,
    next_ack: AtomicU64,
    pending: Mutex<HashMap<AckId, oneshot::Sender<serde_json::Value>>>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            next_ack: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }
}

// ── Subscription ────────────────────────────────────────────────────

/// A live attachment to the client's push notifications.
///
/// Detach with [`dispose`](Subscription::dispose); dropping detaches too.
/// Ownership guarantees a subscription is detached exactly once.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ClientEvent>,
    filter: PushFilter,
    finished: bool,
}

impl Subscription {
    /// Wait for the next push accepted by the filter.
    ///
    /// Yields [`ClientEvent::Disconnected`] once when the connection ends and
    /// `None` afterwards.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(ClientEvent::Push(push)) => {
                    if self.filter.accepts(push.kind()) {
                        return Some(ClientEvent::Push(push));
                    }
                }
                Ok(event @ ClientEvent::Disconnected { .. }) => {
                    self.finished = true;
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "push subscriber fell behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Detach from the push channel.
    pub fn dispose(self) {
        debug!("push subscription disposed");
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Async client handle for the lobby protocol.
///
/// Created via [`RoomClient::start`], which spawns the background transport
/// loop. All request methods await the matching acknowledgement.
pub struct RoomClient {
    cmd_tx: mpsc::UnboundedSender<OutboundFrame>,
    events: broadcast::Sender<ClientEvent>,
    state: Arc<ClientState>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    ack_timeout: Duration,
    shutdown_timeout: Duration,
}

impl RoomClient {
    /// Spawn the transport loop over `transport` and return the handle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(transport: impl Transport, config: ClientConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        // tokio panics on a zero-capacity broadcast channel.
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(ClientState::new());
        let task = tokio::spawn(transport_loop(
            transport,
            cmd_rx,
            events.clone(),
            Arc::clone(&state),
            shutdown_rx,
        ));

        Self {
            cmd_tx,
            events,
            state,
            task: Mutex::new(Some(task)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            ack_timeout: config.ack_timeout,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Send `request` and wait for its raw acknowledgement payload.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotConnected`] if the connection is already gone.
    /// - [`SessionError::TransportClosed`] if it drops before the answer.
    /// - [`SessionError::Timeout`] if no answer arrives within `ack_timeout`.
    pub async fn request(&self, request: ClientRequest) -> Result<serde_json::Value> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let name = request.name();
        let id = self.state.next_ack.fetch_add(1, Ordering::Relaxed);
        let json = serde_json::to_string(&RequestFrame { id, request })?;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.state.pending.lock().await.insert(id, ack_tx);
        // The loop flips `connected` before draining `pending`, so a request
        // registered after the drain is caught here.
        if !self.is_connected() || self.cmd_tx.send(OutboundFrame { id, json }).is_err() {
            self.state.pending.lock().await.remove(&id);
            return Err(SessionError::NotConnected);
        }
        debug!(id, request = name, "request sent");

        match tokio::time::timeout(self.ack_timeout, ack_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                debug!(id, request = name, "connection ended before acknowledgement");
                Err(SessionError::TransportClosed)
            }
            Err(_) => {
                self.state.pending.lock().await.remove(&id);
                warn!(id, request = name, "no acknowledgement within {:?}", self.ack_timeout);
                Err(SessionError::Timeout)
            }
        }
    }

    /// Send `request` and decode its acknowledgement as `R`.
    async fn call<R: DeserializeOwned>(&self, request: ClientRequest) -> Result<R> {
        let response = self.request(request).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Attach to push notifications accepted by `filter`.
    pub fn subscribe(&self, filter: PushFilter) -> Subscription {
        Subscription {
            rx: self.events.subscribe(),
            filter,
            finished: !self.is_connected(),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Close the transport and stop the background task.
    ///
    /// Outstanding requests fail with [`SessionError::TransportClosed`] and
    /// subscribers receive a final `Disconnected`.
    pub async fn shutdown(&self) {
        debug!("RoomClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }

        let task = self.task.lock().await.take();
        if let Some(mut task) = task {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("transport loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
    }

    /// Returns `true` while the transport loop is running.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }
}

#[async_trait]
impl RoomApi for RoomClient {
    async fn create_player(&self, name: &str) -> Result<PlayerCreateResponse> {
        self.call(ClientRequest::CreatePlayer {
            name: name.to_string(),
        })
        .await
    }

    async fn get_player(&self, player_id: &str) -> Result<PlayerGetResponse> {
        self.call(ClientRequest::GetPlayer {
            player_id: player_id.to_string(),
        })
        .await
    }

    async fn create_room(
        &self,
        player_id: &str,
        max_players: Option<u32>,
    ) -> Result<RoomResponse> {
        self.call(ClientRequest::CreateRoom {
            max_players,
            player_id: player_id.to_string(),
        })
        .await
    }

    async fn get_room(&self, room_code: &RoomCode) -> Result<RoomResponse> {
        self.call(ClientRequest::GetRoom {
            room_code: room_code.clone(),
        })
        .await
    }

    async fn join_room(&self, room_code: &RoomCode, player_id: &str) -> Result<RoomResponse> {
        self.call(ClientRequest::JoinRoom {
            room_code: room_code.clone(),
            player_id: player_id.to_string(),
        })
        .await
    }

    async fn leave_room(
        &self,
        room_code: &RoomCode,
        player_id: &str,
    ) -> Result<RoomLeaveResponse> {
        self.call(ClientRequest::LeaveRoom {
            room_code: room_code.clone(),
            player_id: player_id.to_string(),
        })
        .await
    }
}

impl std::fmt::Debug for RoomClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomClient")
            .field("connected", &self.is_connected())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Drop for RoomClient {
    fn drop(&mut self) {
        // No executor is available to drive a graceful close here; aborting
        // drops the loop future and with it the transport.
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Multiplex outgoing requests and incoming frames until the connection ends.
async fn transport_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    events: broadcast::Sender<ClientEvent>,
    state: Arc<ClientState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("transport loop started");

    let reason = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(frame) => {
                        if let Err(e) = transport.send(frame.json).await {
                            error!(id = frame.id, "transport send error: {e}");
                            break Some(format!("transport send error: {e}"));
                        }
                    }
                    None => {
                        debug!("command channel closed, shutting down transport loop");
                        let _ = transport.close().await;
                        break Some("client shut down".to_string());
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                break Some("client shut down".to_string());
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => dispatch_frame(&text, &state, &events).await,
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        break Some(format!("transport receive error: {e}"));
                    }
                    None => {
                        debug!("transport closed by server");
                        break None;
                    }
                }
            }
        }
    };

    state.connected.store(false, Ordering::Release);
    let abandoned = {
        let mut pending = state.pending.lock().await;
        let count = pending.len();
        pending.clear();
        count
    };
    if abandoned > 0 {
        debug!(abandoned, "failing requests still waiting for acknowledgement");
    }
    let _ = events.send(ClientEvent::Disconnected { reason });
    debug!("transport loop exited");
}

/// Route one server frame: acknowledgements to their waiter, pushes to subscribers.
async fn dispatch_frame(
    text: &str,
    state: &ClientState,
    events: &broadcast::Sender<ClientEvent>,
) {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(ServerFrame::Ack { id, response }) => {
            let waiter = state.pending.lock().await.remove(&id);
            match waiter {
                Some(tx) => {
                    if tx.send(response).is_err() {
                        debug!(id, "requester gone, dropping acknowledgement");
                    }
                }
                None => debug!(id, "acknowledgement for unknown request ignored"),
            }
        }
        Ok(ServerFrame::Push(push)) => {
            debug!(kind = ?push.kind(), "push received");
            // An error here only means nobody is subscribed.
            let _ = events.send(ClientEvent::Push(push));
        }
        Err(e) => {
            warn!("failed to decode server frame: {e} (raw: {text})");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{PushKind, RoomStatus, ServerPush};
    use serde_json::json;

    // ── Channel transport ───────────────────────────────────────────

    /// Client half of an in-process connection.
    struct ChannelTransport {
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    }

    /// Server half: read what the client sent, write frames back.
    struct ServerEnd {
        rx: mpsc::UnboundedReceiver<String>,
        tx: mpsc::UnboundedSender<String>,
    }

    impl ServerEnd {
        async fn next_request(&mut self) -> RequestFrame {
            let text = self.rx.recv().await.expect("client sent a frame");
            serde_json::from_str(&text).expect("valid request frame")
        }

        fn ack(&self, id: AckId, response: serde_json::Value) {
            let frame = json!({"type": "ack", "data": {"id": id, "response": response}});
            self.tx.send(frame.to_string()).unwrap();
        }

        fn push(&self, push: &ServerPush) {
            let frame = serde_json::to_string(&ServerFrame::Push(push.clone())).unwrap();
            self.tx.send(frame).unwrap();
        }
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn send(&mut self, frame: String) -> std::result::Result<(), SessionError> {
            self.outbound
                .send(frame)
                .map_err(|e| SessionError::TransportSend(e.to_string()))
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SessionError>> {
            self.inbound.recv().await.map(Ok)
        }

        async fn close(&mut self) -> std::result::Result<(), SessionError> {
            self.inbound.close();
            Ok(())
        }
    }

    fn connect(config: ClientConfig) -> (RoomClient, ServerEnd) {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let transport = ChannelTransport {
            outbound: client_tx,
            inbound: client_rx,
        };
        let client = RoomClient::start(transport, config);
        (
            client,
            ServerEnd {
                rx: server_rx,
                tx: server_tx,
            },
        )
    }

    fn error_push(code: &str) -> ServerPush {
        serde_json::from_value(json!({
            "event": "error",
            "data": {"message": "boom", "code": code}
        }))
        .unwrap()
    }

    fn updated_push() -> ServerPush {
        serde_json::from_value(json!({
            "event": "room:updated",
            "data": {"room": {
                "id": "r1", "code": "AB12CD", "status": "waiting", "hostId": "p1",
                "playerIds": ["p1"], "players": [{"id": "p1", "name": "Ana"}],
                "maxPlayers": 8, "createdAt": 1, "startedAt": null
            }}
        }))
        .unwrap()
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn request_resolves_with_its_acknowledgement() {
        let (client, mut server) = connect(ClientConfig::default());

        let pending = tokio::spawn(async move {
            let resp = client.create_player("Ana").await;
            (client, resp)
        });

        let frame = server.next_request().await;
        assert_eq!(
            frame.request,
            ClientRequest::CreatePlayer { name: "Ana".into() }
        );
        server.ack(
            frame.id,
            json!({"success": true, "player": {
                "id": "p1", "name": "Ana", "currentRoomCode": null,
                "createdAt": 1, "expiresAt": 2
            }}),
        );

        let (client, resp) = pending.await.unwrap();
        let player = resp.unwrap().into_player().unwrap();
        assert_eq!(player.id, "p1");
        client.shutdown().await;
    }

    #[tokio::test]
    async fn acknowledgements_match_by_id_not_order() {
        let (client, mut server) = connect(ClientConfig::default());
        let client = Arc::new(client);

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get_player("p1").await })
        };
        let frame_a = server.next_request().await;
        let second = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get_player("p2").await })
        };
        let frame_b = server.next_request().await;

        server.ack(frame_b.id, json!({"success": true, "exists": false}));
        server.ack(frame_a.id, json!({"success": true, "exists": true}));

        assert!(first.await.unwrap().unwrap().exists);
        assert!(!second.await.unwrap().unwrap().exists);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn pushes_respect_subscription_filters() {
        let (client, server) = connect(ClientConfig::default());
        let mut everything = client.subscribe(PushFilter::all());
        let mut rooms = client.subscribe(PushFilter::only(&[PushKind::RoomUpdated]));

        server.push(&error_push("JOIN_ROOM_ERROR"));
        server.push(&updated_push());

        assert_eq!(
            everything.recv().await,
            Some(ClientEvent::Push(error_push("JOIN_ROOM_ERROR")))
        );
        match rooms.recv().await {
            Some(ClientEvent::Push(ServerPush::RoomUpdated { room })) => {
                assert_eq!(room.code.as_str(), "AB12CD");
                assert_eq!(room.status, RoomStatus::Waiting);
            }
            other => panic!("expected room:updated, got {other:?}"),
        }
        client.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_frames_and_unknown_events_are_skipped() {
        let (client, server) = connect(ClientConfig::default());
        let mut sub = client.subscribe(PushFilter::all());

        server.tx.send("not json".into()).unwrap();
        server
            .tx
            .send(json!({"type": "push", "data": {"event": "room:deleted", "data": {}}}).to_string())
            .unwrap();
        server.push(&updated_push());

        assert!(matches!(
            sub.recv().await,
            Some(ClientEvent::Push(ServerPush::RoomUpdated { .. }))
        ));
        assert!(client.is_connected());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn server_close_fails_pending_requests() {
        let (client, mut server) = connect(ClientConfig::default());
        let client = Arc::new(client);
        let mut sub = client.subscribe(PushFilter::all());

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get_room(&RoomCode::parse("AB12CD").unwrap()).await })
        };
        let _ = server.next_request().await;
        drop(server);

        assert!(matches!(
            pending.await.unwrap(),
            Err(SessionError::TransportClosed)
        ));
        assert_eq!(sub.recv().await, Some(ClientEvent::Disconnected { reason: None }));
        assert_eq!(sub.recv().await, None);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn late_acknowledgement_after_timeout_is_ignored() {
        let config = ClientConfig::default().with_ack_timeout(Duration::from_millis(50));
        let (client, mut server) = connect(config);
        let client = Arc::new(client);

        let timed_out = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get_player("p1").await })
        };
        let stale = server.next_request().await;
        assert!(matches!(
            timed_out.await.unwrap(),
            Err(SessionError::Timeout)
        ));

        server.ack(stale.id, json!({"success": true, "exists": true}));

        let fresh = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get_player("p1").await })
        };
        let frame = server.next_request().await;
        assert!(frame.id > stale.id);
        server.ack(frame.id, json!({"success": true, "exists": false}));
        assert!(!fresh.await.unwrap().unwrap().exists);
        assert!(client.is_connected());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn requests_after_shutdown_are_rejected() {
        let (client, _server) = connect(ClientConfig::default());
        client.shutdown().await;
        assert!(!client.is_connected());
        assert!(matches!(
            client.create_player("Ana").await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn dispose_detaches_subscriber() {
        let (client, _server) = connect(ClientConfig::default());
        let first = client.subscribe(PushFilter::all());
        let second = client.subscribe(PushFilter::all());
        assert_eq!(client.subscriber_count(), 2);

        first.dispose();
        assert_eq!(client.subscriber_count(), 1);
        drop(second);
        assert_eq!(client.subscriber_count(), 0);
        client.shutdown().await;
    }

    #[test]
    fn config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.ack_timeout, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }
}
