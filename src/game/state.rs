//! Match State
//!
//! Player roster and match lifecycle state. The roster is a fixed array of
//! `MAX_PLAYERS` slots - capacity is a hard invariant of the game, not a
//! convenience - and a player's identity is simply its slot index, stable
//! for the whole match.

use crate::game::map::TileMap;
use crate::MAX_PLAYERS;

/// 2D point/vector in pixel space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec2 {
    /// Horizontal coordinate, pixels.
    pub x: f32,
    /// Vertical coordinate, pixels; +y points down.
    pub y: f32,
}

impl Vec2 {
    /// Create a point.
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Why a player stopped being alive.
///
/// Grace-window resurrection applies only to hazard deaths; a disconnected
/// player stays down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EliminationCause {
    /// Touched an electric tile outside the grace window.
    Hazard,
    /// The player's connection dropped.
    Disconnect,
}

/// Lifecycle phase of the single match this server hosts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchPhase {
    /// Accepting connections, waiting for a full roster.
    #[default]
    Waiting,
    /// Tick loop active.
    Running,
    /// Finished; terminal until an external restart.
    Over,
}

impl MatchPhase {
    /// Wire encoding of the phase.
    pub fn wire_code(self) -> i32 {
        match self {
            MatchPhase::Waiting => 0,
            MatchPhase::Running => 1,
            MatchPhase::Over => 2,
        }
    }
}

/// State of a single player slot.
///
/// Owned exclusively by the simulation: written only inside a tick, or by
/// the registry at admission/reset time.
#[derive(Clone, Debug)]
pub struct PlayerState {
    /// Slot index; doubles as the player's wire identity.
    pub id: usize,

    /// Top-left corner of the avatar's bounding box, pixels.
    pub position: Vec2,

    /// Vertical velocity, px/tick; +y is downward.
    pub velocity_y: f32,

    /// Latest jetpack input received for this slot.
    pub jetpack_on: bool,

    /// Coins collected this match. Never decreases within a match.
    pub score: u32,

    /// Still in the race?
    pub alive: bool,

    /// Set when `alive` goes false; cleared on respawn.
    pub eliminated_by: Option<EliminationCause>,
}

impl PlayerState {
    /// Fresh state for a slot.
    pub fn new(id: usize) -> Self {
        Self {
            id,
            position: Vec2::default(),
            velocity_y: 0.0,
            jetpack_on: false,
            score: 0,
            alive: true,
            eliminated_by: None,
        }
    }

    /// Mark the player dead, remembering why.
    pub fn eliminate(&mut self, cause: EliminationCause) {
        self.alive = false;
        self.eliminated_by = Some(cause);
    }

    /// Reset for a match start at the given spawn point.
    pub fn respawn(&mut self, at: Vec2) {
        self.position = at;
        self.velocity_y = 0.0;
        self.jetpack_on = false;
        self.score = 0;
        self.alive = true;
        self.eliminated_by = None;
    }
}

/// Authoritative state of the match: phase, roster and winner.
#[derive(Clone, Debug)]
pub struct MatchState {
    /// Current lifecycle phase.
    pub phase: MatchPhase,

    /// The fixed roster, indexed by slot.
    pub players: [PlayerState; MAX_PLAYERS],

    /// Winning slot, set once at the Over transition. None after an Over
    /// with nobody left standing.
    pub winner: Option<usize>,

    /// Ticks elapsed since the match started running.
    pub tick: u32,

    /// Remaining ticks of the spawn grace window.
    pub grace_ticks: u32,
}

impl MatchState {
    /// New match in the Waiting phase.
    pub fn new() -> Self {
        Self {
            phase: MatchPhase::Waiting,
            players: std::array::from_fn(PlayerState::new),
            winner: None,
            tick: 0,
            grace_ticks: 0,
        }
    }

    /// Transition Waiting -> Running: respawn every slot at its start
    /// position and arm the grace window.
    pub fn start(&mut self, map: &TileMap, grace_ticks: u32) {
        let starts = map.start_positions();
        for (slot, player) in self.players.iter_mut().enumerate() {
            player.respawn(starts[slot]);
        }
        self.phase = MatchPhase::Running;
        self.winner = None;
        self.tick = 0;
        self.grace_ticks = grace_ticks;
    }

    /// Number of slots still alive.
    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.alive).count()
    }

    /// Lowest alive slot, if any.
    pub fn sole_survivor(&self) -> Option<usize> {
        self.players.iter().position(|p| p.alive)
    }

    /// Transition to Over with the given winner. Returns false (and
    /// changes nothing) if the match is already over: the transition fires
    /// at most once and the winner is immutable afterwards.
    pub fn end(&mut self, winner: Option<usize>) -> bool {
        if self.phase == MatchPhase::Over {
            return false;
        }
        self.phase = MatchPhase::Over;
        self.winner = winner;
        true
    }

    /// Record the latest jetpack input for a slot. Called from the I/O
    /// side between ticks; the engine only ever reads the stored value.
    pub fn apply_input(&mut self, slot: usize, jetpack_on: bool) {
        if let Some(player) = self.players.get_mut(slot) {
            player.jetpack_on = jetpack_on;
        }
    }

    /// Final per-slot scores, in wire form.
    pub fn scores(&self) -> [i32; MAX_PLAYERS] {
        std::array::from_fn(|slot| self.players[slot].score as i32)
    }
}

impl Default for MatchState {
    fn default() -> Self {
        Self::new()
    }
}
