use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::game::game_loop::TickEvent;
use crate::game::state::{AutoState, Tank, TankAction, TankId};
use crate::game::systems::pathfinding::{plan_route, Plan, PlanFailure};
use crate::game::world::{ActionOutcome, SimulationWorld, TickError};
use crate::util::grid::{Direction, Position};

/// Planning result for one autonomous tank
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Route { target: TankId, target_pos: Position, plan: Plan },
    /// A target exists but no firing position can be reached
    Unreachable { target: TankId, target_pos: Position },
    NoTarget,
}

/// What an autonomous tank does on one action tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoAction {
    /// Throttled or nothing to do
    Pass,
    /// Next step of the planned route
    Advance(Direction),
    /// Random evasive step
    Evade(Direction),
    /// Aimed at the target, fire
    Fire,
}

/// Plan, then act, for every live autonomous tank in id order
pub fn update(world: &mut SimulationWorld, events: &mut Vec<TickEvent>) {
    let decisions = plan_all(world);
    apply_decisions(world, decisions);

    for id in world.tank_ids() {
        if !world.tanks.get(&id).is_some_and(|t| t.is_auto() && t.is_alive() && !t.cleared) {
            continue;
        }
        let action = match next_action(world, id) {
            Ok(action) => action,
            Err(e) => {
                warn!("AI step for tank {} skipped: {}", id, e);
                continue;
            }
        };
        if let Err(e) = execute(world, id, action, events) {
            warn!("AI action for tank {} failed: {}", id, e);
        }
    }
}

/// A tank needs a plan when it is about to act and has no usable route
fn needs_plan(world: &SimulationWorld, tank: &Tank, state: &AutoState) -> bool {
    if !tank.is_alive() || tank.cleared || state.evade_steps > 0 {
        return false;
    }
    if state.gap_counter < tank.info.gap {
        return false;
    }
    state.needs_replan || state.arrived() || live_target(world, state.target, tank.id()).is_none()
}

/// Position of `target` if it is a live, placed tank other than `me`
fn live_target(world: &SimulationWorld, target: Option<TankId>, me: TankId) -> Option<(TankId, Position)> {
    let id = target?;
    if id == me {
        return None;
    }
    world
        .tanks
        .get(&id)
        .filter(|t| t.is_alive() && !t.cleared)
        .map(|t| (id, t.position))
}

/// Nearest live tank inside the scan square, by Manhattan distance then id
fn scan_nearest(world: &SimulationWorld, tank: &Tank) -> Option<(TankId, Position)> {
    let radius = world.config.ai_scan_radius;
    world
        .tanks
        .values()
        .filter(|other| other.id() != tank.id() && other.is_alive() && !other.cleared)
        .filter(|other| other.position.chebyshev(tank.position) <= radius)
        .min_by_key(|other| (other.position.manhattan(tank.position), other.id()))
        .map(|other| (other.id(), other.position))
}

/// Pick a target and plan a route to it
pub fn decide(world: &SimulationWorld, tank: &Tank, state: &AutoState) -> Decision {
    let current = live_target(world, state.target, tank.id());
    // A freshly assigned target (retarget on attack) is kept as is
    let target = match current {
        Some(current) if state.last_target_pos.is_none() => Some(current),
        _ => scan_nearest(world, tank).or(current),
    };
    let Some((target, target_pos)) = target else {
        return Decision::NoTarget;
    };

    let range = tank.info.bullet.range.max(0) as u32;
    match plan_route(&world.map, tank.position, target_pos, range, world.config.astar_node_budget) {
        Ok(plan) => Decision::Route { target, target_pos, plan },
        Err(PlanFailure::NoFiringLine) | Err(PlanFailure::Unreachable) => Decision::Unreachable { target, target_pos },
    }
}

/// Plan for every tank that needs it, in parallel against the unchanged world
pub fn plan_all(world: &SimulationWorld) -> Vec<(TankId, Decision)> {
    let candidates: Vec<TankId> = world
        .tank_ids()
        .into_iter()
        .filter(|id| {
            let tank = &world.tanks[id];
            tank.auto().is_some_and(|state| needs_plan(world, tank, state))
        })
        .collect();

    candidates
        .into_par_iter()
        .filter_map(|id| {
            let tank = world.tanks.get(&id)?;
            let state = tank.auto()?;
            Some((id, decide(world, tank, state)))
        })
        .collect()
}

/// Install planning results, in id order
pub fn apply_decisions(world: &mut SimulationWorld, decisions: Vec<(TankId, Decision)>) {
    let evade_steps = world.config.evade_steps;
    for (id, decision) in decisions {
        let Some(state) = world.tanks.get_mut(&id).and_then(Tank::auto_mut) else {
            continue;
        };
        match decision {
            Decision::Route { target, target_pos, plan } => {
                state.set_route(target, target_pos, plan.destination, plan.route);
            }
            Decision::Unreachable { target, target_pos } => {
                debug!("Tank {} cannot reach a firing line on {}, evading", id, target);
                state.discard_route();
                state.target = Some(target);
                // Seen but not reached: the next plan scans again
                state.last_target_pos = Some(target_pos);
                state.evade_steps = evade_steps;
            }
            Decision::NoTarget => {
                state.target = None;
                state.last_target_pos = None;
                state.discard_route();
            }
        }
    }
}

/// Throttled decision of one autonomous tank.
///
/// Below its gap the tank passes and counts up. On an action tick it takes
/// an evasive step, the next route step, or, with the route exhausted,
/// aims at its target and fires.
pub fn next_action(world: &mut SimulationWorld, id: TankId) -> Result<AutoAction, TickError> {
    let target_pos = {
        let tank = world.tanks.get(&id).ok_or(TickError::UnknownTank(id))?;
        let state = tank.auto().ok_or(TickError::NotAutonomous(id))?;
        live_target(world, state.target, id).map(|(_, pos)| pos)
    };

    let tank = world.tanks.get_mut(&id).ok_or(TickError::UnknownTank(id))?;
    if !tank.is_alive() {
        return Err(TickError::DeadTank(id));
    }
    let gap = tank.info.gap;
    let position = tank.position;
    let facing = tank.direction;
    let state = tank.auto_mut().ok_or(TickError::NotAutonomous(id))?;

    if state.gap_counter < gap {
        state.gap_counter += 1;
        return Ok(AutoAction::Pass);
    }
    state.gap_counter = 0;

    if state.evade_steps > 0 {
        state.evade_steps -= 1;
        if state.evade_steps == 0 {
            state.needs_replan = true;
        }
        let direction = Direction::ALL[world.rng.gen_range(0..Direction::ALL.len())];
        return Ok(AutoAction::Evade(direction));
    }
    if state.needs_replan {
        return Ok(AutoAction::Pass);
    }
    if !state.arrived() {
        let direction = state.route[state.route_index];
        state.route_index += 1;
        return Ok(AutoAction::Advance(direction));
    }

    // Arrived: aim, fire, and look again next time
    let aim = target_pos
        .and_then(|pos| position.direction_to(pos))
        .unwrap_or(facing);
    state.needs_replan = true;
    tank.face(aim);
    Ok(AutoAction::Fire)
}

/// Carry out an autonomous action like a player action
pub fn execute(world: &mut SimulationWorld, id: TankId, action: AutoAction, events: &mut Vec<TickEvent>) -> Result<(), TickError> {
    let (tank_action, from_route) = match action {
        AutoAction::Pass => return Ok(()),
        AutoAction::Advance(direction) => (TankAction::Move(direction), true),
        AutoAction::Evade(direction) => (TankAction::Move(direction), false),
        AutoAction::Fire => (TankAction::Fire, false),
    };
    match world.apply_action(id, tank_action)? {
        ActionOutcome::Blocked if from_route => {
            // Something moved into the way; plan again on the next action tick
            if let Some(state) = world.tanks.get_mut(&id).and_then(Tank::auto_mut) {
                state.discard_route();
            }
        }
        ActionOutcome::Fired(bullet) => events.push(TickEvent::BulletFired { owner: id, bullet }),
        _ => {}
    }
    Ok(())
}
