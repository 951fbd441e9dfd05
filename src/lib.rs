//! # DonCEyKongJr Game Server
//!
//! Authoritative multiplayer server for DonCEyKongJr. Matches run a
//! deterministic fixed-tick simulation; clients send actions and receive
//! snapshots, deltas and events.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  DONCEYKONGJR SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fixed.rs    - Q16.16 fixed-point arithmetic             │
//! │  ├── vec2.rs     - 2D vector with fixed-point                │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - State hashing for verification            │
//! │                                                              │
//! │  game/           - Game logic (deterministic)                │
//! │  ├── map.rs      - Vines, platforms, water and goal          │
//! │  ├── input.rs    - Actions, intents, receipt-order queue     │
//! │  ├── state.rs    - Match, player, crocodile, fruit state     │
//! │  ├── tick.rs     - Authoritative simulation loop             │
//! │  ├── collision.rs- Contact detection                         │
//! │  ├── crocodile.rs- Crocodile spawning and movement           │
//! │  └── fruit.rs    - Fruit placement and pickup                │
//! │                                                              │
//! │  room/           - Matches (one task per match)              │
//! │  ├── manager.rs  - Create, join, leave, teardown             │
//! │  ├── actor.rs    - Match task driving the tick               │
//! │  ├── broadcast.rs- Snapshot/delta fan-out                    │
//! │  └── delta.rs    - Snapshot diffing                          │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── server.rs   - TCP + WebSocket server                    │
//! │  ├── protocol.rs - Message types                             │
//! │  └── session.rs  - Session registry                          │
//! │                                                              │
//! │  admin.rs        - Operator console                          │
//! │  config.rs       - Command line / environment config         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **100% deterministic**:
//! - No floating-point arithmetic in game logic
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from seeded Xorshift128+
//!
//! Given identical inputs and RNG seed, a match produces **identical
//! state hashes** on any platform.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod room;
pub mod network;
pub mod admin;
pub mod config;

// Re-export commonly used types
pub use core::fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use core::vec2::FixedVec2;
pub use core::rng::DeterministicRng;
pub use game::state::{SimulationState, PlayerState, PlayerId};
pub use room::{MatchId, RoomConfig, RoomManager};
pub use network::{GameServer, SessionRegistry};
pub use config::ServerConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default simulation tick rate (Hz)
pub const DEFAULT_TICK_RATE: u32 = 20;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 5555;
