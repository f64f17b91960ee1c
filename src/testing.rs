//! Scripted [`RoomApi`], a push-only channel transport, and fixtures for the
//! component unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use crate::api::RoomApi;
use crate::error::{Result, SessionError};
use crate::protocol::{
    ClientRequest, PlayerCreateResponse, PlayerGetResponse, PlayerRecord, RoomCode,
    RoomLeaveResponse, RoomPlayer, RoomResponse, RoomState, RoomStatus,
};
use crate::transport::Transport;

/// Answers each operation from its own queue and records every call.
///
/// An empty queue answers with [`SessionError::TransportClosed`].
#[derive(Default)]
pub(crate) struct ScriptedApi {
    calls: Mutex<Vec<ClientRequest>>,
    create_player: Mutex<VecDeque<Result<PlayerCreateResponse>>>,
    get_player: Mutex<VecDeque<Result<PlayerGetResponse>>>,
    create_room: Mutex<VecDeque<Result<RoomResponse>>>,
    get_room: Mutex<VecDeque<Result<RoomResponse>>>,
    join_room: Mutex<VecDeque<Result<RoomResponse>>>,
    leave_room: Mutex<VecDeque<Result<RoomLeaveResponse>>>,
    /// When set, `create_player` waits for a permit before answering.
    create_gate: Option<Semaphore>,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn gated() -> Self {
        Self {
            create_gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.create_gate {
            gate.add_permits(1);
        }
    }

    pub(crate) fn calls(&self) -> Vec<ClientRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.name() == name).count()
    }

    pub(crate) fn on_create_player(&self, resp: Result<PlayerCreateResponse>) -> &Self {
        self.create_player.lock().unwrap().push_back(resp);
        self
    }

    pub(crate) fn on_get_player(&self, resp: Result<PlayerGetResponse>) -> &Self {
        self.get_player.lock().unwrap().push_back(resp);
        self
    }

    pub(crate) fn on_create_room(&self, resp: Result<RoomResponse>) -> &Self {
        self.create_room.lock().unwrap().push_back(resp);
        self
    }

    pub(crate) fn on_get_room(&self, resp: Result<RoomResponse>) -> &Self {
        self.get_room.lock().unwrap().push_back(resp);
        self
    }

    pub(crate) fn on_join_room(&self, resp: Result<RoomResponse>) -> &Self {
        self.join_room.lock().unwrap().push_back(resp);
        self
    }

    pub(crate) fn on_leave_room(&self, resp: Result<RoomLeaveResponse>) -> &Self {
        self.leave_room.lock().unwrap().push_back(resp);
        self
    }

    fn record(&self, request: ClientRequest) {
        self.calls.lock().unwrap().push(request);
    }

    fn next<T>(queue: &Mutex<VecDeque<Result<T>>>) -> Result<T> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(SessionError::TransportClosed))
    }
}

#[async_trait]
impl RoomApi for ScriptedApi {
    async fn create_player(&self, name: &str) -> Result<PlayerCreateResponse> {
        self.record(ClientRequest::CreatePlayer {
            name: name.to_string(),
        });
        if let Some(gate) = &self.create_gate {
            gate.acquire().await.expect("gate open").forget();
        }
        Self::next(&self.create_player)
    }

    async fn get_player(&self, player_id: &str) -> Result<PlayerGetResponse> {
        self.record(ClientRequest::GetPlayer {
            player_id: player_id.to_string(),
        });
        Self::next(&self.get_player)
    }

    async fn create_room(
        &self,
        player_id: &str,
        max_players: Option<u32>,
    ) -> Result<RoomResponse> {
        self.record(ClientRequest::CreateRoom {
            max_players,
            player_id: player_id.to_string(),
        });
        Self::next(&self.create_room)
    }

    async fn get_room(&self, room_code: &RoomCode) -> Result<RoomResponse> {
        self.record(ClientRequest::GetRoom {
            room_code: room_code.clone(),
        });
        Self::next(&self.get_room)
    }

    async fn join_room(&self, room_code: &RoomCode, player_id: &str) -> Result<RoomResponse> {
        self.record(ClientRequest::JoinRoom {
            room_code: room_code.clone(),
            player_id: player_id.to_string(),
        });
        Self::next(&self.join_room)
    }

    async fn leave_room(
        &self,
        room_code: &RoomCode,
        player_id: &str,
    ) -> Result<RoomLeaveResponse> {
        self.record(ClientRequest::LeaveRoom {
            room_code: room_code.clone(),
            player_id: player_id.to_string(),
        });
        Self::next(&self.leave_room)
    }
}

// ── Channel transport ───────────────────────────────────────────────

/// Client half of an in-process connection whose server never answers.
pub(crate) struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, _frame: String) -> Result<()> {
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.inbound.close();
        Ok(())
    }
}

/// A transport plus the sender that writes server frames into it.
pub(crate) fn channel_transport() -> (ChannelTransport, mpsc::UnboundedSender<String>) {
    let (tx, inbound) = mpsc::unbounded_channel();
    (ChannelTransport { inbound }, tx)
}

// ── Fixtures ────────────────────────────────────────────────────────

pub(crate) fn player(id: &str, name: &str) -> PlayerRecord {
    PlayerRecord {
        id: id.into(),
        name: name.into(),
        current_room_code: None,
        created_at: 1_700_000_000_000,
        expires_at: 1_700_003_600_000,
    }
}

pub(crate) fn room(code: &str, members: &[&str]) -> RoomState {
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
                name: format!("player {id}"),
            })
            .collect(),
        max_players: 8,
        created_at: 1_700_000_000_000,
        started_at: None,
    }
}

pub(crate) fn created(id: &str, name: &str) -> Result<PlayerCreateResponse> {
    Ok(PlayerCreateResponse {
        success: true,
        player: Some(player(id, name)),
        error: None,
    })
}

pub(crate) fn found(id: &str, name: &str) -> Result<PlayerGetResponse> {
    Ok(PlayerGetResponse {
        success: true,
        exists: true,
        player: Some(player(id, name)),
        error: None,
    })
}

pub(crate) fn missing_player() -> Result<PlayerGetResponse> {
    Ok(PlayerGetResponse {
        success: true,
        exists: false,
        player: None,
        error: None,
    })
}

pub(crate) fn room_ok(room: Option<RoomState>) -> Result<RoomResponse> {
    Ok(RoomResponse {
        success: true,
        room,
        error: None,
    })
}

pub(crate) fn room_rejected(message: &str) -> Result<RoomResponse> {
    Ok(RoomResponse {
        success: false,
        room: None,
        error: Some(message.into()),
    })
}

pub(crate) fn left() -> Result<RoomLeaveResponse> {
    Ok(RoomLeaveResponse {
        success: true,
        was_deleted: Some(false),
        error: None,
    })
}
