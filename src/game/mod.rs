//! Game Logic Module
//!
//! All match simulation code. Given the same map and the same sequence of
//! per-tick inputs, the simulation produces identical results.
//!
//! ## Module Structure
//!
//! - `map`: Tile grid, text formats, collision queries
//! - `state`: Player roster and match state
//! - `tick`: Authoritative simulation loop

pub mod map;
pub mod state;
pub mod tick;

// Re-export key types
pub use map::{CellKind, MapError, TileMap, TILE_SIZE};
pub use state::{EliminationCause, MatchPhase, MatchState, PlayerState, Vec2};
pub use tick::{tick, PhysicsConfig, TickResult};
