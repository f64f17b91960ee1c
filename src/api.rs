//! The request/acknowledge operations the session components depend on.
//!
//! [`RoomClient`](crate::client::RoomClient) implements [`RoomApi`] over a
//! live connection. The bootstrapper, recovery agent and lifecycle controller
//! only see this trait, so they can be driven by any implementation.
//!
//! `Err` means the server never answered (transport failure). A server that
//! answered with `success: false` produces `Ok` with the rejection inside the
//! response; callers use the responses' `ensure_success` helpers.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{
    PlayerCreateResponse, PlayerGetResponse, RoomCode, RoomLeaveResponse, RoomResponse,
};

#[async_trait]
pub trait RoomApi: Send + Sync {
    /// `player:create {name}`
    async fn create_player(&self, name: &str) -> Result<PlayerCreateResponse>;

    /// `player:get {playerId}`
    async fn get_player(&self, player_id: &str) -> Result<PlayerGetResponse>;

    /// `room:create {maxPlayers?, playerId}`
    async fn create_room(&self, player_id: &str, max_players: Option<u32>)
        -> Result<RoomResponse>;

    /// `room:get {roomCode}`
    async fn get_room(&self, room_code: &RoomCode) -> Result<RoomResponse>;

    /// `room:join {roomCode, playerId}`
    async fn join_room(&self, room_code: &RoomCode, player_id: &str) -> Result<RoomResponse>;

    /// `room:leave {roomCode, playerId}`
    async fn leave_room(&self, room_code: &RoomCode, player_id: &str)
        -> Result<RoomLeaveResponse>;
}
