//! Authoritative Simulation Tick
//!
//! The fixed-rate core loop. Each call advances every live slot in slot
//! order - never concurrently - so shared state needs no per-player locks
//! and ties resolve deterministically (lowest slot first).

use tracing::debug;

use crate::game::map::{CellKind, TileMap};
use crate::game::state::{EliminationCause, MatchPhase, MatchState, PlayerState};
use crate::TICK_RATE;

/// Tunable physics constants, all in pixel/tick units.
#[derive(Debug, Clone)]
pub struct PhysicsConfig {
    /// Downward acceleration while the jetpack is off (px/tick^2).
    pub gravity: f32,
    /// Upward acceleration while the jetpack is on (px/tick^2).
    pub jetpack_force: f32,
    /// Vertical speed clamp, applied in both directions (px/tick).
    pub max_vertical_speed: f32,
    /// Unconditional forward scroll speed (px/tick).
    pub horizontal_speed: f32,
    /// Avatar bounding-box width (px).
    pub player_width: f32,
    /// Avatar bounding-box height (px).
    pub player_height: f32,
    /// Hazard-free window after match start, in ticks.
    pub grace_ticks: u32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: 0.5,
            jetpack_force: 0.8,
            max_vertical_speed: 10.0,
            horizontal_speed: 5.0,
            player_width: 32.0,
            player_height: 32.0,
            grace_ticks: 3 * TICK_RATE,
        }
    }
}

/// Outcome of one tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Whether the match transitioned to Over during this tick.
    pub match_ended: bool,
    /// Winning slot if the match ended with one.
    pub winner: Option<usize>,
}

/// Run one simulation tick.
///
/// Per live slot, in slot order: vertical acceleration (jetpack or
/// gravity, clamped), integration with floor/ceiling clamp (impacts absorb
/// velocity), horizontal auto-scroll, tile resolution (coins collect,
/// hazards eliminate), then the win check. After all slots, the match ends
/// if at most one player is left alive.
///
/// While the grace window is open, hazard contact is suppressed and any
/// hazard death from the window's edge is resurrected at the start of the
/// tick; disconnect deaths stay down.
pub fn tick(state: &mut MatchState, map: &mut TileMap, config: &PhysicsConfig) -> TickResult {
    match state.phase {
        MatchPhase::Waiting => return TickResult::default(),
        MatchPhase::Over => {
            return TickResult {
                match_ended: true,
                winner: state.winner,
            }
        }
        MatchPhase::Running => {}
    }

    state.tick += 1;

    let in_grace = state.grace_ticks > 0;
    if in_grace {
        state.grace_ticks -= 1;
        for player in state.players.iter_mut() {
            if !player.alive && player.eliminated_by == Some(EliminationCause::Hazard) {
                player.alive = true;
                player.eliminated_by = None;
            }
        }
        if state.grace_ticks == 0 {
            debug!(tick = state.tick, "grace window closed");
        }
    }

    let floor_y = map.height_px() - config.player_height;
    let finish_x = map.width_px() - config.player_width;

    for slot in 0..state.players.len() {
        let player = &mut state.players[slot];
        if !player.alive {
            continue;
        }

        // Vertical acceleration, clamped in the direction of travel.
        if player.jetpack_on {
            player.velocity_y =
                (player.velocity_y - config.jetpack_force).max(-config.max_vertical_speed);
        } else {
            player.velocity_y = (player.velocity_y + config.gravity).min(config.max_vertical_speed);
        }

        // Integrate; floor and ceiling impacts absorb velocity, no bounce.
        player.position.y += player.velocity_y;
        if player.position.y < 0.0 {
            player.position.y = 0.0;
            player.velocity_y = 0.0;
        } else if player.position.y > floor_y {
            player.position.y = floor_y;
            player.velocity_y = 0.0;
        }

        // The avatar always advances; there is no backward movement.
        player.position.x += config.horizontal_speed;

        resolve_tiles(player, map, config, in_grace);

        // Reaching the far edge wins, provided the tile pass was survived.
        // Slot order is the tie-break when both cross in the same tick.
        let won = player.alive && player.position.x >= finish_x;
        if won {
            debug!(slot, tick = state.tick, "player reached the far edge");
            state.end(Some(slot));
            return TickResult {
                match_ended: true,
                winner: Some(slot),
            };
        }
    }

    // With one (or zero) players left there is no race to run.
    if state.alive_count() <= 1 {
        let winner = state.sole_survivor();
        state.end(winner);
        return TickResult {
            match_ended: true,
            winner,
        };
    }

    TickResult::default()
}

/// Resolve every tile touched by the player's bounding box, row-major.
/// Coins are one-shot: collected and cleared. A hazard (outside grace)
/// eliminates the player and stops the scan for this tick.
fn resolve_tiles(player: &mut PlayerState, map: &mut TileMap, config: &PhysicsConfig, in_grace: bool) {
    let (x0, y0, x1, y1) = TileMap::tile_span(
        player.position.x,
        player.position.y,
        config.player_width,
        config.player_height,
    );

    for ty in y0..=y1 {
        for tx in x0..=x1 {
            match map.cell_at(tx, ty) {
                CellKind::Coin => {
                    player.score += 1;
                    map.set_cell(tx, ty, CellKind::Empty);
                    debug!(slot = player.id, score = player.score, "coin collected");
                }
                CellKind::Electric if !in_grace => {
                    player.eliminate(EliminationCause::Hazard);
                    debug!(slot = player.id, "player hit an electric hazard");
                    return;
                }
                _ => {}
            }
        }
    }
}
