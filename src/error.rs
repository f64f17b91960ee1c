//! Error types for the room session client.

use thiserror::Error;

/// Errors that can occur while talking to the lobby server or reconciling
/// local session state.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The connection closed before the request was acknowledged.
    #[error("connection closed before the server answered")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted a request but the client is no longer connected.
    #[error("not connected to server")]
    NotConnected,

    /// The server did not acknowledge a request in time.
    #[error("operation timed out")]
    Timeout,

    /// The server acknowledged a request with `success: false`.
    #[error("{operation} failed: {message}")]
    Rejected {
        /// Wire name of the rejected request (e.g. `room:join`).
        operation: &'static str,
        /// Human-readable reason reported by the server.
        message: String,
    },

    /// A room code did not have the 6-character alphanumeric shape.
    #[error("invalid room code: {0:?}")]
    InvalidRoomCode(String),

    /// A nickname was empty after trimming.
    #[error("nickname must not be empty")]
    InvalidNickname,

    /// A room operation was attempted without a player id.
    #[error("no player id available; create a player first")]
    MissingPlayerId,

    /// A room payload violated the membership invariants.
    #[error("invalid room payload: {0}")]
    InvalidRoom(String),

    /// The same operation is already waiting for the server.
    #[error("{0} is already in progress")]
    OperationPending(&'static str),

    /// The local key-value store could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Returns `true` for failures where the server never answered.
    ///
    /// These are transient: they are not evidence that a player or room is gone.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::TransportSend(_)
                | Self::TransportReceive(_)
                | Self::TransportClosed
                | Self::NotConnected
                | Self::Timeout
                | Self::Io(_)
        )
    }
}

/// A specialized [`Result`] type for room session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
