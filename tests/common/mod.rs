#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the room session integration tests.
//!
//! Provides an in-memory [`LoopbackTransport`] and a [`FakeServer`] task that
//! answers requests the way the lobby server does, with knobs for the edge
//! cases (expired players, rejected joins, acknowledgements without rooms).

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use room_session_client::protocol::{
    ClientRequest, PlayerRecord, RequestFrame, RoomCode, RoomPlayer, RoomState, RoomStatus,
    ServerFrame, ServerPush,
};
use room_session_client::{
    ClientConfig, IdentityStore, KeyValueStore, MemoryStore, RoomClient, SessionError, Transport,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ── LoopbackTransport ───────────────────────────────────────────────

/// Client side of an in-memory connection.
pub struct LoopbackTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, frame: String) -> Result<(), SessionError> {
        self.outbound
            .send(frame)
            .map_err(|e| SessionError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.inbound.close();
        Ok(())
    }
}

// ── FakeServer ──────────────────────────────────────────────────────

#[derive(Default)]
struct ServerState {
    players: HashMap<String, PlayerRecord>,
    rooms: HashMap<String, RoomState>,
    requests: Vec<ClientRequest>,
    next_player: u32,
    next_room: u32,
    join_error: Option<String>,
    omit_ack_rooms: bool,
    pushes_first: bool,
    /// `(request name, player)`: the player joins the room that request
    /// targets, right after it is handled.
    late_member: Option<(String, String)>,
}

/// In-process lobby server bound to one [`LoopbackTransport`].
pub struct FakeServer {
    state: Arc<StdMutex<ServerState>>,
    to_client: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl FakeServer {
    /// Start a server and a client connected to it.
    pub fn start() -> (RoomClient, FakeServer) {
        let (client_tx, mut server_rx) = mpsc::unbounded_channel::<String>();
        let (server_tx, client_rx) = mpsc::unbounded_channel::<String>();
        let state = Arc::new(StdMutex::new(ServerState::default()));

        let task = tokio::spawn({
            let state = Arc::clone(&state);
            let to_client = server_tx.clone();
            async move {
                while let Some(text) = server_rx.recv().await {
                    let frame: RequestFrame = serde_json::from_str(&text).expect("request frame");
                    let (ack, pushes, pushes_first) = {
                        let mut state = state.lock().unwrap();
                        let (response, mut pushes) = handle(&mut state, frame.request.clone());
                        pushes.extend(admit_late_member(&mut state, &frame.request));
                        let ack = ServerFrame::Ack {
                            id: frame.id,
                            response,
                        };
                        (ack, pushes, state.pushes_first)
                    };
                    let ack = serde_json::to_string(&ack).unwrap();
                    let pushes: Vec<String> = pushes
                        .into_iter()
                        .map(|push| serde_json::to_string(&ServerFrame::Push(push)).unwrap())
                        .collect();
                    if pushes_first {
                        for push in pushes {
                            let _ = to_client.send(push);
                        }
                        let _ = to_client.send(ack);
                    } else {
                        let _ = to_client.send(ack);
                        for push in pushes {
                            let _ = to_client.send(push);
                        }
                    }
                }
            }
        });

        let transport = LoopbackTransport {
            outbound: client_tx,
            inbound: client_rx,
        };
        let client = RoomClient::start(
            transport,
            ClientConfig::default().with_ack_timeout(Duration::from_secs(2)),
        );
        (
            client,
            FakeServer {
                state,
                to_client: server_tx,
                task,
            },
        )
    }

    pub fn add_player(&self, id: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .players
            .insert(id.into(), player(id, name));
    }

    /// Forget a player, as the server does once `expiresAt` passes.
    pub fn expire_player(&self, id: &str) {
        self.state.lock().unwrap().players.remove(id);
    }

    /// Create a room with `members`, who must already be registered.
    pub fn add_room(&self, code: &str, members: &[&str]) -> RoomState {
        let mut state = self.state.lock().unwrap();
        let room = build_room(&state, code, members, 8);
        state.rooms.insert(code.into(), room.clone());
        room
    }

    pub fn room(&self, code: &str) -> Option<RoomState> {
        self.state.lock().unwrap().rooms.get(code).cloned()
    }

    /// Refuse every subsequent `room:join` with `message`.
    pub fn reject_joins(&self, message: &str) {
        self.state.lock().unwrap().join_error = Some(message.into());
    }

    /// Acknowledge `room:create` without the room; it only arrives by push.
    pub fn omit_rooms_from_acks(&self) {
        self.state.lock().unwrap().omit_ack_rooms = true;
    }

    /// Send a request's pushes before its acknowledgement.
    pub fn push_before_ack(&self) {
        self.state.lock().unwrap().pushes_first = true;
    }

    /// Add `player_id` to the room targeted by the next `event` request, right
    /// after answering it, and push the resulting `room:updated`.
    pub fn admit_after(&self, event: &str, player_id: &str) {
        self.state.lock().unwrap().late_member = Some((event.into(), player_id.into()));
    }

    pub fn requests(&self) -> Vec<ClientRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.requests().iter().filter(|r| r.name() == event).count()
    }

    /// Send an unsolicited push to the client.
    pub fn push(&self, push: ServerPush) {
        let frame = serde_json::to_string(&ServerFrame::Push(push)).unwrap();
        self.to_client.send(frame).unwrap();
    }

    /// Send a raw text frame to the client.
    pub fn push_raw(&self, text: &str) {
        self.to_client.send(text.to_string()).unwrap();
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn handle(state: &mut ServerState, request: ClientRequest) -> (Value, Vec<ServerPush>) {
    state.requests.push(request.clone());
    match request {
        ClientRequest::CreatePlayer { name } => {
            state.next_player += 1;
            let record = player(&format!("p{}", state.next_player), &name);
            state.players.insert(record.id.clone(), record.clone());
            (json!({ "success": true, "player": record }), Vec::new())
        }
        ClientRequest::GetPlayer { player_id } => match state.players.get(&player_id) {
            Some(record) => (
                json!({ "success": true, "exists": true, "player": record }),
                Vec::new(),
            ),
            None => (json!({ "success": true, "exists": false }), Vec::new()),
        },
        ClientRequest::CreateRoom {
            max_players,
            player_id,
        } => {
            if !state.players.contains_key(&player_id) {
                return (
                    json!({ "success": false, "error": "Player not found" }),
                    Vec::new(),
                );
            }
            state.next_room += 1;
            let code = format!("RM{:04}", state.next_room);
            let room = build_room(state, &code, &[player_id.as_str()], max_players.unwrap_or(8));
            state.rooms.insert(code, room.clone());
            let ack = if state.omit_ack_rooms {
                json!({ "success": true })
            } else {
                json!({ "success": true, "room": room })
            };
            (ack, vec![ServerPush::RoomCreated { room }])
        }
        ClientRequest::GetRoom { room_code } => match state.rooms.get(room_code.as_str()) {
            Some(room) => (json!({ "success": true, "room": room }), Vec::new()),
            None => (
                json!({ "success": false, "error": "Room not found" }),
                Vec::new(),
            ),
        },
        ClientRequest::JoinRoom {
            room_code,
            player_id,
        } => {
            if let Some(message) = &state.join_error {
                return (json!({ "success": false, "error": message }), Vec::new());
            }
            let Some(existing) = state.rooms.get(room_code.as_str()).cloned() else {
                return (
                    json!({ "success": false, "error": "Room not found" }),
                    Vec::new(),
                );
            };
            let mut members: Vec<&str> = existing.player_ids.iter().map(String::as_str).collect();
            if !members.contains(&player_id.as_str()) {
                if members.len() >= existing.max_players as usize {
                    return (
                        json!({ "success": false, "error": "Room is full" }),
                        Vec::new(),
                    );
                }
                members.push(&player_id);
            }
            let room = build_room(state, room_code.as_str(), &members, existing.max_players);
            state.rooms.insert(room_code.to_string(), room.clone());
            (
                json!({ "success": true, "room": room }),
                vec![ServerPush::RoomJoined { room }],
            )
        }
        ClientRequest::LeaveRoom {
            room_code,
            player_id,
        } => {
            let Some(existing) = state.rooms.get(room_code.as_str()).cloned() else {
                return (
                    json!({ "success": false, "error": "Room not found" }),
                    Vec::new(),
                );
            };
            let members: Vec<&str> = existing
                .player_ids
                .iter()
                .map(String::as_str)
                .filter(|id| *id != player_id)
                .collect();
            if members.is_empty() {
                state.rooms.remove(room_code.as_str());
                return (json!({ "success": true, "wasDeleted": true }), Vec::new());
            }
            let room = build_room(state, room_code.as_str(), &members, existing.max_players);
            state.rooms.insert(room_code.to_string(), room);
            (json!({ "success": true, "wasDeleted": false }), Vec::new())
        }
    }
}

fn admit_late_member(state: &mut ServerState, request: &ClientRequest) -> Option<ServerPush> {
    let room_code = match request {
        ClientRequest::GetRoom { room_code } | ClientRequest::JoinRoom { room_code, .. } => {
            room_code.as_str()
        }
        _ => return None,
    };
    if state.late_member.as_ref()?.0 != request.name() {
        return None;
    }
    let (_, player_id) = state.late_member.take()?;
    let existing = state.rooms.get(room_code).cloned()?;
    let mut members: Vec<&str> = existing.player_ids.iter().map(String::as_str).collect();
    members.push(&player_id);
    let room = build_room(state, room_code, &members, existing.max_players);
    state.rooms.insert(room_code.to_string(), room.clone());
    Some(ServerPush::RoomUpdated { room })
}

fn build_room(state: &ServerState, code: &str, members: &[&str], max_players: u32) -> RoomState {
    RoomState {
        id: format!("room-{code}"),
        code: RoomCode::parse(code).unwrap(),
        status: RoomStatus::Waiting,
        host_id: members.first().map(|id| id.to_string()),
        player_ids: members.iter().map(|id| id.to_string()).collect(),
        players: members
            .iter()
            .map(|id| RoomPlayer {
                id: id.to_string(),
                name: state
                    .players
                    .get(*id)
                    .map_or_else(|| id.to_string(), |p| p.name.clone()),
            })
            .collect(),
        max_players,
        created_at: 1_700_000_000_000,
        started_at: None,
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn player(id: &str, name: &str) -> PlayerRecord {
    PlayerRecord {
        id: id.into(),
        name: name.into(),
        current_room_code: None,
        created_at: 1_700_000_000_000,
        expires_at: 1_700_003_600_000,
    }
}

/// An identity store seeded with the given keys.
pub fn identity(entries: &[(&str, &str)]) -> IdentityStore {
    let store = MemoryStore::new();
    for (key, value) in entries {
        store.set(key, value).unwrap();
    }
    IdentityStore::new(store)
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
