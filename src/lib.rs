//! # Room Session Client
//!
//! Client-side session and room reconciliation for a lobby server that speaks
//! a request/acknowledge plus push protocol in JSON text frames.
//!
//! A returning player is restored without user intervention: the persisted
//! credential is verified (or the player recreated), and the room they were
//! last in is adopted or rejoined. Local room state then follows the server,
//! whichever order acknowledgements and pushes arrive in.
//!
//! ## Layers
//!
//! - [`Transport`]: moves text frames; [`WebSocketTransport`] is built in
//!   behind the default `transport-websocket` feature.
//! - [`RoomClient`]: acknowledgement correlation and push fan-out over one
//!   connection. Implements [`RoomApi`].
//! - [`IdentityStore`]: persisted nickname, player id and room pointer over any
//!   [`KeyValueStore`].
//! - [`bootstrap`], [`recovery`] and [`controller`]: the startup and room
//!   lifecycle logic, each driven through [`RoomApi`].
//! - [`Session`]: ties it together for an application.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use room_session_client::{
//!     ClientConfig, IdentityStore, MemoryStore, RoomClient, Session, SessionConfig,
//!     WebSocketTransport,
//! };
//!
//! # async fn run() -> room_session_client::error::Result<()> {
//! let transport = WebSocketTransport::connect("ws://localhost:3000/ws").await?;
//! let client = RoomClient::start(transport, ClientConfig::default());
//! let session = Session::new(
//!     client,
//!     IdentityStore::new(MemoryStore::new()),
//!     SessionConfig::default(),
//! );
//!
//! session.start().await?;
//! session.submit_nickname("Ana").await?;
//! session.join_room("ab12cd").await?;
//! println!("{:?}", session.snapshot().await.room);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod bootstrap;
pub mod client;
pub mod controller;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod latch;
pub mod protocol;
pub mod recovery;
pub mod session;
pub mod store;
pub mod transport;
pub mod transports;

#[cfg(test)]
mod testing;

// Re-export primary types for ergonomic imports.
pub use api::RoomApi;
pub use bootstrap::{BootstrapOutcome, SessionBootstrapper};
pub use client::{ClientConfig, RoomClient, Subscription};
pub use controller::{RoomLifecycleController, RoomPhase, RoomSnapshot};
pub use error::SessionError;
pub use error_codes::ErrorCode;
pub use event::{ClientEvent, PushFilter};
pub use protocol::{RoomCode, RoomState};
pub use recovery::{RecoveryOutcome, RoomRecoveryAgent};
pub use session::{Session, SessionConfig, StartupReport};
pub use store::{FileStore, IdentityStore, KeyValueStore, MemoryStore, PlayerIdentity};
pub use transport::Transport;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
