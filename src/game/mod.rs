//! Game Logic Module
//!
//! All game simulation code. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `map`: Vines, platforms, water line and goal
//! - `input`: Player actions, intents, receipt-order queue
//! - `state`: Match state, players, crocodiles, fruits
//! - `crocodile`: Crocodile spawning and movement
//! - `fruit`: Fruit placement, seeding and pickup
//! - `collision`: Contact detection
//! - `tick`: Authoritative simulation loop
//! - `events`: Game events forwarded to clients

pub mod map;
pub mod input;
pub mod state;
pub mod crocodile;
pub mod fruit;
pub mod collision;
pub mod tick;
pub mod events;

// Re-export key types
pub use input::{PlayerAction, InputQueue};
pub use state::{SimulationState, PlayerState, PlayerId, MatchPhase, CrocodileKind, SimulationError, SpawnError};
pub use tick::{tick, MatchConfig, TickResult};
pub use events::{GameEvent, EndReason};
