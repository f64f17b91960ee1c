//! Transport abstraction for the lobby protocol.
//!
//! A [`Transport`] moves whole JSON text frames between client and server. It
//! knows nothing about acknowledgements or pushes; [`RoomClient`] layers the
//! request/acknowledge correlation on top.
//!
//! Connection setup is not part of the trait: build a connected transport
//! (WebSocket URL, in-process channel, test double) and hand it to
//! [`RoomClient::start`].
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use room_session_client::error::SessionError;
//! use room_session_client::transport::Transport;
//! use tokio::sync::mpsc;
//!
//! struct ChannelTransport {
//!     outbound: mpsc::UnboundedSender<String>,
//!     inbound: mpsc::UnboundedReceiver<String>,
//! }
//!
//! #[async_trait]
//! impl Transport for ChannelTransport {
//!     async fn send(&mut self, frame: String) -> Result<(), SessionError> {
//!         self.outbound
//!             .send(frame)
//!             .map_err(|e| SessionError::TransportSend(e.to_string()))
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SessionError>> {
//!         self.inbound.recv().await.map(Ok)
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SessionError> {
//!         self.inbound.close();
//!         Ok(())
//!     }
//! }
//! ```
//!
//! [`RoomClient`]: crate::client::RoomClient
//! [`RoomClient::start`]: crate::client::RoomClient::start

use async_trait::async_trait;

use crate::error::SessionError;

/// A bidirectional text frame channel to the lobby server.
///
/// Object-safe, so `Box<dyn Transport>` works where dynamic dispatch is needed.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **must** be cancel-safe: the client's transport
/// loop polls it inside `tokio::select!` and may drop the future between
/// frames. Channel-backed implementations satisfy this naturally.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportSend`] (or
    /// [`SessionError::TransportClosed`]) if the frame could not be written.
    async fn send(&mut self, frame: String) -> Result<(), SessionError>;

    /// Receive the next JSON frame.
    ///
    /// `Some(Ok(text))` is a frame, `Some(Err(_))` a transport failure, and
    /// `None` a clean close by the server.
    async fn recv(&mut self) -> Option<Result<String, SessionError>>;

    /// Close the connection. Implementations should release resources even
    /// when the close handshake fails, and tolerate repeated calls.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails.
    async fn close(&mut self) -> Result<(), SessionError>;
}
