//! Wire Protocol
//!
//! Length-prefixed binary framing: every message is a fixed
//! `{type: i32, length: i32}` header followed by exactly `length` payload
//! bytes. Header and payload fields are native byte order - both ends of
//! this protocol are same-host-family peers and the layout mirrors the
//! original wire contract, deliberately not normalized.
//!
//! Payload encoding is explicit and field-by-field (never a struct
//! reinterpreted as bytes), so the layout is fixed and documented
//! independent of any compiler's packing. The encode/decode functions are
//! pure; the async framing functions are the only I/O in this module.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::game::state::MatchState;
use crate::MAX_PLAYERS;

/// Bytes in the `{type, length}` frame header.
pub const HEADER_SIZE: usize = 8;

/// Largest payload accepted from the wire.
pub const MAX_PAYLOAD_SIZE: usize = 4096;

/// Protocol-level failures.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The peer closed the connection at a frame boundary.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The stream ended before a declared payload fully arrived.
    #[error("truncated payload: expected {expected} bytes")]
    Truncated {
        /// Bytes the header declared.
        expected: usize,
    },

    /// A header declared more payload than the protocol allows. The
    /// payload is drained so the stream stays frame-aligned.
    #[error("oversized payload: {len} bytes announced")]
    Oversized {
        /// Bytes the header declared.
        len: usize,
    },

    /// A header declared a negative payload length; the stream cannot be
    /// re-aligned after this.
    #[error("negative payload length")]
    NegativeLength,

    /// The type field names no known message kind.
    #[error("unknown packet type {0}")]
    UnknownType(i32),

    /// A known message kind with an undecodable payload.
    #[error("malformed payload: {0}")]
    Malformed(&'static str),

    /// Underlying socket failure.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True when the error only invalidates one message and the stream can
    /// keep being read; false when the connection is no longer usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Truncated { .. }
                | ProtocolError::Oversized { .. }
                | ProtocolError::UnknownType(_)
                | ProtocolError::Malformed(_)
        )
    }
}

/// Message kind discriminants as they appear on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum PacketType {
    /// Client greeting, empty payload.
    Connect = 0,
    /// Client is ready, empty payload.
    Ready = 1,
    /// Full map text in wire format.
    MapData = 2,
    /// Per-player position/input report.
    PlayerPos = 3,
    /// Authoritative per-tick snapshot.
    GameState = 4,
    /// Final result broadcast.
    GameOver = 5,
    /// Waiting-room occupancy.
    WaitingStatus = 6,
}

impl PacketType {
    /// Decode the wire discriminant.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(PacketType::Connect),
            1 => Some(PacketType::Ready),
            2 => Some(PacketType::MapData),
            3 => Some(PacketType::PlayerPos),
            4 => Some(PacketType::GameState),
            5 => Some(PacketType::GameOver),
            6 => Some(PacketType::WaitingStatus),
            _ => None,
        }
    }
}

/// PlayerPos payload: `{i32 player_id; f32 x; f32 y; i32 jetpack_on}`.
///
/// Client to server this is an input report, of which only `jetpack_on`
/// is trusted; server to client it can echo an authoritative position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerPos {
    /// Slot the report concerns.
    pub player_id: i32,
    /// Horizontal position, pixels.
    pub x: f32,
    /// Vertical position, pixels.
    pub y: f32,
    /// Jetpack engaged?
    pub jetpack_on: bool,
}

/// One roster entry of a GameState payload:
/// `{i32 id; f32 x; f32 y; i32 score; i32 alive}`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerSnapshot {
    /// Slot index.
    pub id: i32,
    /// Horizontal position, pixels.
    pub x: f32,
    /// Vertical position, pixels.
    pub y: f32,
    /// Coins collected.
    pub score: i32,
    /// 1 = alive on the wire.
    pub alive: bool,
}

/// GameState payload: `{i32 phase; PlayerSnapshot[MAX_PLAYERS]}`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GameStateUpdate {
    /// Match phase wire code (0 waiting, 1 running, 2 over).
    pub phase: i32,
    /// The whole roster, slot order.
    pub players: [PlayerSnapshot; MAX_PLAYERS],
}

impl GameStateUpdate {
    /// Snapshot the authoritative state.
    pub fn from_match(state: &MatchState) -> Self {
        Self {
            phase: state.phase.wire_code(),
            players: std::array::from_fn(|slot| {
                let p = &state.players[slot];
                PlayerSnapshot {
                    id: p.id as i32,
                    x: p.position.x,
                    y: p.position.y,
                    score: p.score as i32,
                    alive: p.alive,
                }
            }),
        }
    }
}

/// GameOver payload: `{i32 winner_id; i32 scores[MAX_PLAYERS]}`.
/// A winner of -1 means nobody won.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameOverInfo {
    /// Winning slot, or -1.
    pub winner_id: i32,
    /// Final score per slot.
    pub scores: [i32; MAX_PLAYERS],
}

impl GameOverInfo {
    /// Final result from the authoritative state.
    pub fn from_match(state: &MatchState) -> Self {
        Self {
            winner_id: state.winner.map(|slot| slot as i32).unwrap_or(-1),
            scores: state.scores(),
        }
    }
}

/// A decoded protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    /// Client greeting.
    Connect,
    /// Client ready notification.
    Ready,
    /// Map text in wire format.
    MapData(String),
    /// Position/input report.
    PlayerPos(PlayerPos),
    /// Per-tick snapshot.
    GameState(GameStateUpdate),
    /// Final result.
    GameOver(GameOverInfo),
    /// Waiting-room occupancy count.
    WaitingStatus(i32),
}

impl Packet {
    /// Wire discriminant for this message.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect => PacketType::Connect,
            Packet::Ready => PacketType::Ready,
            Packet::MapData(_) => PacketType::MapData,
            Packet::PlayerPos(_) => PacketType::PlayerPos,
            Packet::GameState(_) => PacketType::GameState,
            Packet::GameOver(_) => PacketType::GameOver,
            Packet::WaitingStatus(_) => PacketType::WaitingStatus,
        }
    }

    /// Encode the typed payload. Pure; the frame header is the sender's
    /// business.
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Packet::Connect | Packet::Ready => {}
            Packet::MapData(text) => buf.extend_from_slice(text.as_bytes()),
            Packet::PlayerPos(pos) => {
                put_i32(&mut buf, pos.player_id);
                put_f32(&mut buf, pos.x);
                put_f32(&mut buf, pos.y);
                put_i32(&mut buf, pos.jetpack_on as i32);
            }
            Packet::GameState(update) => {
                put_i32(&mut buf, update.phase);
                for p in &update.players {
                    put_i32(&mut buf, p.id);
                    put_f32(&mut buf, p.x);
                    put_f32(&mut buf, p.y);
                    put_i32(&mut buf, p.score);
                    put_i32(&mut buf, p.alive as i32);
                }
            }
            Packet::GameOver(info) => {
                put_i32(&mut buf, info.winner_id);
                for score in &info.scores {
                    put_i32(&mut buf, *score);
                }
            }
            Packet::WaitingStatus(count) => put_i32(&mut buf, *count),
        }
        buf
    }

    /// Decode a typed payload. Pure inverse of [`Packet::encode_payload`].
    /// Trailing payload bytes beyond the expected fields are ignored.
    pub fn decode(packet_type: i32, payload: &[u8]) -> Result<Self, ProtocolError> {
        let kind = PacketType::from_i32(packet_type)
            .ok_or(ProtocolError::UnknownType(packet_type))?;
        let mut reader = PayloadReader::new(payload);

        match kind {
            PacketType::Connect => Ok(Packet::Connect),
            PacketType::Ready => Ok(Packet::Ready),
            PacketType::MapData => {
                let text = std::str::from_utf8(payload)
                    .map_err(|_| ProtocolError::Malformed("map text is not UTF-8"))?;
                Ok(Packet::MapData(text.to_string()))
            }
            PacketType::PlayerPos => Ok(Packet::PlayerPos(PlayerPos {
                player_id: reader.take_i32()?,
                x: reader.take_f32()?,
                y: reader.take_f32()?,
                jetpack_on: reader.take_i32()? != 0,
            })),
            PacketType::GameState => {
                let phase = reader.take_i32()?;
                let mut players = [PlayerSnapshot {
                    id: 0,
                    x: 0.0,
                    y: 0.0,
                    score: 0,
                    alive: false,
                }; MAX_PLAYERS];
                for slot in &mut players {
                    *slot = PlayerSnapshot {
                        id: reader.take_i32()?,
                        x: reader.take_f32()?,
                        y: reader.take_f32()?,
                        score: reader.take_i32()?,
                        alive: reader.take_i32()? != 0,
                    };
                }
                Ok(Packet::GameState(GameStateUpdate { phase, players }))
            }
            PacketType::GameOver => {
                let winner_id = reader.take_i32()?;
                let mut scores = [0i32; MAX_PLAYERS];
                for score in &mut scores {
                    *score = reader.take_i32()?;
                }
                Ok(Packet::GameOver(GameOverInfo { winner_id, scores }))
            }
            PacketType::WaitingStatus => Ok(Packet::WaitingStatus(reader.take_i32()?)),
        }
    }
}

/// Sequential field reader over a payload slice.
struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take4(&mut self) -> Result<[u8; 4], ProtocolError> {
        if self.pos + 4 > self.buf.len() {
            return Err(ProtocolError::Malformed("payload too short"));
        }
        let bytes = [
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ];
        self.pos += 4;
        Ok(bytes)
    }

    fn take_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_ne_bytes(self.take4()?))
    }

    fn take_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_ne_bytes(self.take4()?))
    }
}

fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_ne_bytes());
}

fn put_f32(buf: &mut Vec<u8>, value: f32) {
    buf.extend_from_slice(&value.to_ne_bytes());
}

/// Write one framed message as a single unit (one buffer, one write).
pub async fn send_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let payload = packet.encode_payload();
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(packet.packet_type() as i32).to_ne_bytes());
    frame.extend_from_slice(&(payload.len() as i32).to_ne_bytes());
    frame.extend_from_slice(&payload);
    writer.write_all(&frame).await?;
    Ok(())
}

/// Read one framed message: the full header first, then exactly the
/// declared payload. A clean close at the header boundary is
/// [`ProtocolError::ConnectionClosed`]; a stream that dies mid-payload is
/// [`ProtocolError::Truncated`].
pub async fn recv_packet<R>(reader: &mut R) -> Result<Packet, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    if let Err(e) = reader.read_exact(&mut header).await {
        return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(e)
        });
    }

    let packet_type = i32::from_ne_bytes([header[0], header[1], header[2], header[3]]);
    let declared = i32::from_ne_bytes([header[4], header[5], header[6], header[7]]);
    if declared < 0 {
        return Err(ProtocolError::NegativeLength);
    }

    let len = declared as usize;
    if len > MAX_PAYLOAD_SIZE {
        drain(reader, len).await?;
        return Err(ProtocolError::Oversized { len });
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        if let Err(e) = reader.read_exact(&mut payload).await {
            return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::Truncated { expected: len }
            } else {
                ProtocolError::Io(e)
            });
        }
    }

    Packet::decode(packet_type, &payload)
}

/// Consume and discard an over-limit payload so the next header lines up.
async fn drain<R>(reader: &mut R, mut remaining: usize) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let expected = remaining;
    let mut sink = [0u8; 512];
    while remaining > 0 {
        let take = remaining.min(sink.len());
        if let Err(e) = reader.read_exact(&mut sink[..take]).await {
            return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::Truncated { expected }
            } else {
                ProtocolError::Io(e)
            });
        }
        remaining -= take;
    }
    Ok(())
}
