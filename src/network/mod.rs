//! Network Layer
//!
//! TCP server speaking the length-prefixed binary protocol. This layer is
//! **non-deterministic** - all game logic runs through `game/`.

pub mod protocol;
pub mod session;
pub mod server;

pub use protocol::{recv_packet, send_packet, Packet, PacketType, ProtocolError};
pub use session::{ClientHandle, RegistryError, SessionRegistry};
pub use server::{GameServer, GameServerError, ServerConfig};
