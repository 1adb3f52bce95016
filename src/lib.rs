//! # Jetpack Game Server
//!
//! Authoritative server for Jetpack, a two-player side-scrolling race:
//! both avatars auto-scroll through a tile map, steering only their
//! jetpack, collecting coins and dodging electric hazards on the way to
//! the far edge.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      JETPACK SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Simulation (deterministic per tick)       │
//! │  ├── map.rs      - Tile map, parsing, collision queries      │
//! │  ├── state.rs    - Player roster and match state             │
//! │  └── tick.rs     - Authoritative physics/scoring tick        │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── protocol.rs - Length-prefixed binary packet codec       │
//! │  ├── session.rs  - Fixed-slot session registry               │
//! │  └── server.rs   - TCP server, lifecycle, tick loop          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority Model
//!
//! The server owns every piece of game state. Clients contribute exactly
//! one bit of input each (jetpack on/off); positions, velocities, scores
//! and liveness are computed server-side at a fixed 60 Hz tick and pushed
//! to all connections as snapshots, so every client observes the same
//! match regardless of its own latency.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::map::{CellKind, MapError, TileMap};
pub use game::state::{MatchPhase, MatchState, PlayerState, Vec2};
pub use game::tick::{tick, PhysicsConfig, TickResult};
pub use network::protocol::{Packet, PacketType, ProtocolError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;

/// Fixed roster size; a match always plays out between exactly this many slots.
pub const MAX_PLAYERS: usize = 2;
