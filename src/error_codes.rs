//! Codes carried by the server's `error` push notification.
//!
//! The server sends these as `SCREAMING_SNAKE_CASE` strings. Codes this client
//! does not know are kept verbatim in [`ErrorCode::Other`] so newer servers can
//! add codes without breaking decoding.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error code attached to an `error` push notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    /// A `room:create` request failed after it was acknowledged.
    CreateRoomError,
    /// A `room:join` request failed after it was acknowledged.
    JoinRoomError,
    /// A `player:create` request failed after it was acknowledged.
    CreatePlayerError,
    /// Any code this client does not route.
    Other(String),
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateRoomError => "CREATE_ROOM_ERROR",
            Self::JoinRoomError => "JOIN_ROOM_ERROR",
            Self::CreatePlayerError => "CREATE_PLAYER_ERROR",
            Self::Other(raw) => raw,
        }
    }

    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::CreateRoomError => "The server could not create the room. Please try again.",
            Self::JoinRoomError => {
                "The server could not add you to the room. It may be full or closed."
            }
            Self::CreatePlayerError => {
                "The server could not register your nickname. Please try again."
            }
            Self::Other(_) => "The server reported an error this client does not recognize.",
        }
    }
}

impl From<String> for ErrorCode {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "CREATE_ROOM_ERROR" => Self::CreateRoomError,
            "JOIN_ROOM_ERROR" => Self::JoinRoomError,
            "CREATE_PLAYER_ERROR" => Self::CreatePlayerError,
            _ => Self::Other(raw),
        }
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
