//! # Rejoin Lobby Example
//!
//! Demonstrates how a returning player is restored across restarts:
//!
//! 1. Connect to the lobby server via WebSocket
//! 2. Verify the player stored on disk, or register a nickname
//! 3. Recover the room from the previous run, or create/join one
//! 4. Print room changes as the server pushes them
//! 5. Shut down on Ctrl+C, keeping the room pointer for the next run
//!
//! ## Running
//!
//! ```sh
//! # Start a lobby server on localhost:3000, then:
//! cargo run --example rejoin_lobby
//!
//! # Run it again: the same player and room are restored.
//! cargo run --example rejoin_lobby
//!
//! # Join a specific room instead of creating one:
//! ROOM_SESSION_JOIN=AB12CD cargo run --example rejoin_lobby
//! ```
//!
//! | Variable                | Default                  |
//! |-------------------------|--------------------------|
//! | `ROOM_SESSION_URL`      | `ws://localhost:3000/ws` |
//! | `ROOM_SESSION_STORE`    | `room-session.json`      |
//! | `ROOM_SESSION_NICKNAME` | `Player`                 |
//! | `ROOM_SESSION_JOIN`     | unset (create a room)    |

use std::time::Duration;

use room_session_client::{
    ClientConfig, FileStore, IdentityStore, RoomClient, RoomPhase, Session, SessionConfig,
    WebSocketTransport,
};

const DEFAULT_URL: &str = "ws://localhost:3000/ws";
const DEFAULT_STORE: &str = "room-session.json";

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=room_session_client=debug` for protocol-level output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = env_or("ROOM_SESSION_URL", DEFAULT_URL);
    let store_path = env_or("ROOM_SESSION_STORE", DEFAULT_STORE);
    let nickname = env_or("ROOM_SESSION_NICKNAME", "Player");
    let join_code = std::env::var("ROOM_SESSION_JOIN").ok();

    // ── Connect ─────────────────────────────────────────────────────
    tracing::info!("Connecting to {url}");
    let transport = WebSocketTransport::connect_with_timeout(&url, Duration::from_secs(5)).await?;
    let client = RoomClient::start(transport, ClientConfig::default());
    let identity = IdentityStore::new(FileStore::open(&store_path)?);
    let session = Session::new(client, identity, SessionConfig::default());

    // ── Restore ─────────────────────────────────────────────────────
    let report = session.start().await?;
    tracing::info!(bootstrap = ?report.bootstrap, recovery = ?report.recovery, "startup finished");

    if session.player_id().is_none() {
        let outcome = session.submit_nickname(&nickname).await?;
        tracing::info!(?outcome, "registered nickname {nickname:?}");
    }

    if session.phase().await == RoomPhase::NoRoom {
        let result = match &join_code {
            Some(code) => session.join_room(code).await,
            None => session.create_room(None).await,
        };
        if let Err(e) = result {
            tracing::error!("could not enter a room: {e}");
        }
    }

    // ── Watch ───────────────────────────────────────────────────────
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    let mut last_seen = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !session.client().is_connected() {
                    tracing::warn!("connection lost");
                    break;
                }
                let snapshot = session.snapshot().await;
                if snapshot.room != last_seen {
                    match &snapshot.room {
                        Some(room) => {
                            let names: Vec<&str> =
                                room.players.iter().map(|p| p.name.as_str()).collect();
                            tracing::info!(
                                "room {} ({:?}): {}/{} players: {}",
                                room.code,
                                room.status,
                                room.player_ids.len(),
                                room.max_players,
                                names.join(", ")
                            );
                        }
                        None => tracing::info!("not in a room"),
                    }
                    last_seen = snapshot.room;
                }
                if let Some(error) = snapshot.last_error {
                    tracing::warn!("server said: {error}");
                    session.dismiss_error().await;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    session.shutdown().await;
    tracing::info!("Room pointer kept in {store_path}; run again to rejoin.");
    Ok(())
}
