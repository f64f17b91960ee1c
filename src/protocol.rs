//! Wire-compatible protocol types for the lobby server.
//!
//! Every frame is a JSON text message. Requests carry a client-allocated
//! acknowledgement id; the server answers each one with exactly one `ack` frame
//! and independently sends `push` frames that are not tied to any request.
//!
//! ```text
//! client → server   {"id":7,"request":{"event":"room:join","data":{"roomCode":"AB12CD","playerId":"p1"}}}
//! server → client   {"type":"ack","data":{"id":7,"response":{"success":true,"room":{…}}}}
//! server → client   {"type":"push","data":{"event":"room:updated","data":{"room":{…}}}}
//! ```
//!
//! Field names are camelCase and timestamps are epoch milliseconds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::error_codes::ErrorCode;

// ── Type aliases ────────────────────────────────────────────────────

/// Opaque server-assigned player identifier.
pub type PlayerId = String;

/// Opaque server-assigned room identifier.
pub type RoomId = String;

/// Client-allocated id correlating a request with its acknowledgement.
pub type AckId = u64;

// ── Room code ───────────────────────────────────────────────────────

/// Human-shareable 6-character room token, always uppercase.
///
/// Input is case-insensitive and surrounding whitespace is ignored:
///
/// ```
/// use room_session_client::protocol::RoomCode;
///
/// let code = RoomCode::parse(" ab12cd ").unwrap();
/// assert_eq!(code.as_str(), "AB12CD");
/// assert!(RoomCode::parse("AB12").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Number of characters in every room code.
    pub const LEN: usize = 6;

    /// Normalize and validate a room code.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidRoomCode`] unless the trimmed input is
    /// exactly [`RoomCode::LEN`] ASCII alphanumeric characters.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.len() != Self::LEN || !normalized.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(SessionError::InvalidRoomCode(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    /// The normalized code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomCode {
    type Error = SessionError;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Data model ──────────────────────────────────────────────────────

/// Lifecycle stage of a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    #[default]
    Waiting,
    InProgress,
    Finished,
}

/// A member of a room as listed in room payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPlayer {
    pub id: PlayerId,
    pub name: String,
}

/// Server-authoritative room snapshot.
///
/// Every payload is a complete replacement for whatever the client held
/// before; there is no partial merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub id: RoomId,
    pub code: RoomCode,
    #[serde(default)]
    pub status: RoomStatus,
    pub host_id: Option<PlayerId>,
    pub player_ids: Vec<PlayerId>,
    pub players: Vec<RoomPlayer>,
    pub max_players: u32,
    pub created_at: i64,
    pub started_at: Option<i64>,
}

impl RoomState {
    /// Returns `true` if `player_id` is a member of this room.
    pub fn contains_player(&self, player_id: &str) -> bool {
        self.player_ids.iter().any(|id| id == player_id)
    }

    /// Check the membership invariants of this payload.
    ///
    /// `player_ids` and `players` must list the same ids in the same order,
    /// the host (if any) must be a member, and the member count must not
    /// exceed `max_players`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidRoom`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.player_ids.len() != self.players.len() {
            return Err(SessionError::InvalidRoom(format!(
                "room {} lists {} player ids but {} players",
                self.code,
                self.player_ids.len(),
                self.players.len()
            )));
        }
        for (position, (id, player)) in self.player_ids.iter().zip(&self.players).enumerate() {
            if *id != player.id {
                return Err(SessionError::InvalidRoom(format!(
                    "room {} has player {:?} at position {position} but id {id:?}",
                    self.code, player.id
                )));
            }
        }
        if let Some(host_id) = &self.host_id {
            if !self.contains_player(host_id) {
                return Err(SessionError::InvalidRoom(format!(
                    "room {} host {host_id:?} is not a member",
                    self.code
                )));
            }
        }
        if self.player_ids.len() > self.max_players as usize {
            return Err(SessionError::InvalidRoom(format!(
                "room {} holds {} players but allows {}",
                self.code,
                self.player_ids.len(),
                self.max_players
            )));
        }
        Ok(())
    }
}

/// Server-authoritative player record. May vanish after `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    pub current_room_code: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

// ── Acknowledgement payloads ────────────────────────────────────────

/// Build the rejection error for a `success: false` acknowledgement.
fn rejected(operation: &'static str, error: Option<&str>) -> SessionError {
    SessionError::Rejected {
        operation,
        message: error.unwrap_or("unknown error").to_string(),
    }
}

/// Acknowledgement of `player:create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerCreateResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlayerCreateResponse {
    /// Extract the created player.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Rejected`] if the server refused or sent no player.
    pub fn into_player(self) -> Result<PlayerRecord> {
        match self.player {
            Some(player) if self.success => Ok(player),
            Some(_) => Err(rejected("player:create", self.error.as_deref())),
            None if self.success => Err(rejected("player:create", Some("no player returned"))),
            None => Err(rejected("player:create", self.error.as_deref())),
        }
    }
}

/// Acknowledgement of `player:get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerGetResponse {
    pub success: bool,
    #[serde(default)]
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlayerGetResponse {
    /// # Errors
    ///
    /// Returns [`SessionError::Rejected`] if `success` is `false`.
    pub fn ensure_success(&self) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(rejected("player:get", self.error.as_deref()))
        }
    }
}

/// Acknowledgement of `room:create`, `room:get` and `room:join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RoomResponse {
    /// # Errors
    ///
    /// Returns [`SessionError::Rejected`] tagged with `operation` if `success`
    /// is `false`.
    pub fn ensure_success(&self, operation: &'static str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(rejected(operation, self.error.as_deref()))
        }
    }
}

/// Acknowledgement of `room:leave`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomLeaveResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub was_deleted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RoomLeaveResponse {
    /// # Errors
    ///
    /// Returns [`SessionError::Rejected`] if `success` is `false`.
    pub fn ensure_success(&self) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(rejected("room:leave", self.error.as_deref()))
        }
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// Requests sent from client to server. Each expects one acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientRequest {
    /// Register a new player under a nickname.
    #[serde(rename = "player:create")]
    CreatePlayer { name: String },
    /// Look up a player record; expired players report `exists: false`.
    #[serde(rename = "player:get")]
    GetPlayer { player_id: PlayerId },
    /// Create a room hosted by `player_id`.
    #[serde(rename = "room:create")]
    CreateRoom {
        #[serde(skip_serializing_if = "Option::is_none")]
        max_players: Option<u32>,
        player_id: PlayerId,
    },
    /// Fetch a room by code.
    #[serde(rename = "room:get")]
    GetRoom { room_code: RoomCode },
    /// Add `player_id` to a room.
    #[serde(rename = "room:join")]
    JoinRoom {
        room_code: RoomCode,
        player_id: PlayerId,
    },
    /// Remove `player_id` from a room.
    #[serde(rename = "room:leave")]
    LeaveRoom {
        room_code: RoomCode,
        player_id: PlayerId,
    },
}

impl ClientRequest {
    /// Wire name of the request, used in logs and rejection errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreatePlayer { .. } => "player:create",
            Self::GetPlayer { .. } => "player:get",
            Self::CreateRoom { .. } => "room:create",
            Self::GetRoom { .. } => "room:get",
            Self::JoinRoom { .. } => "room:join",
            Self::LeaveRoom { .. } => "room:leave",
        }
    }
}

/// A request together with its acknowledgement id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: AckId,
    pub request: ClientRequest,
}

/// Notifications pushed by the server, not correlated with any request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerPush {
    /// A room this client asked to create now exists.
    #[serde(rename = "room:created")]
    RoomCreated { room: RoomState },
    /// This client was added to a room.
    #[serde(rename = "room:joined")]
    RoomJoined { room: RoomState },
    /// Membership or status of the current room changed.
    #[serde(rename = "room:updated")]
    RoomUpdated { room: RoomState },
    /// The server (re)announced this client's player record.
    #[serde(rename = "player:created")]
    PlayerCreated { player: PlayerRecord },
    /// A coded failure, routed by [`ErrorCode`].
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

/// Discriminant of a [`ServerPush`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushKind {
    RoomCreated,
    RoomJoined,
    RoomUpdated,
    PlayerCreated,
    Error,
}

impl ServerPush {
    /// The kind of this notification.
    pub fn kind(&self) -> PushKind {
        match self {
            Self::RoomCreated { .. } => PushKind::RoomCreated,
            Self::RoomJoined { .. } => PushKind::RoomJoined,
            Self::RoomUpdated { .. } => PushKind::RoomUpdated,
            Self::PlayerCreated { .. } => PushKind::PlayerCreated,
            Self::Error { .. } => PushKind::Error,
        }
    }
}

/// Frames sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Answer to the request with the same `id`.
    Ack {
        id: AckId,
        #[serde(default)]
        response: serde_json::Value,
    },
    /// Unsolicited notification.
    Push(ServerPush),
}
