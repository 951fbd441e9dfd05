//! Network Layer
//!
//! TCP and WebSocket server for real-time multiplayer communication.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod protocol;
pub mod session;
pub mod server;

pub use protocol::{
    ClientMessage, ServerMessage, ClientRole, ErrorCode, StateSnapshot, StateDelta,
};
pub use session::{SessionId, SessionRegistry, SessionEvent, DisconnectReason, ConnectionHandle};
pub use server::{GameServer, NetworkConfig, GameServerError};
