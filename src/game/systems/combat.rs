//! Collision resolution and reaping
//!
//! Runs on the post-move board. Lethality of every bullet sharing a cell is
//! summed and applied once, so the outcome never depends on the order in
//! which bullets were advanced.

use tracing::debug;

use crate::game::game_loop::TickEvent;
use crate::game::state::{BulletId, Tank, TankId};
use crate::game::world::SimulationWorld;

/// Resolve every cell holding several bullets, or a bullet and a tank
pub fn resolve_collisions(world: &mut SimulationWorld, events: &mut Vec<TickEvent>) {
    for pos in world.map.bullet_positions() {
        let point = world.map.at(pos);
        let hits: Vec<BulletId> = point
            .bullets()
            .iter()
            .copied()
            .filter(|id| world.bullets.get(*id).is_some_and(|b| b.hp > 0))
            .collect();
        let victim = point.tank_id();
        if hits.len() < 2 && !(hits.len() == 1 && victim.is_some()) {
            continue;
        }

        let mut damage = 0;
        // Owner of the most lethal bullet gets the credit, lowest id on ties
        let mut credited: Option<(i32, TankId)> = None;
        let mut attackers: Vec<TankId> = Vec::with_capacity(hits.len());
        for id in &hits {
            let Some(bullet) = world.bullets.get_mut(*id) else {
                continue;
            };
            damage += bullet.lethality;
            attackers.push(bullet.owner);
            credited = match credited {
                Some((lethality, owner))
                    if lethality > bullet.lethality || (lethality == bullet.lethality && owner <= bullet.owner) =>
                {
                    Some((lethality, owner))
                }
                _ => Some((bullet.lethality, bullet.owner)),
            };
            bullet.kill();
        }
        attackers.sort_unstable();
        attackers.dedup();

        if let (Some(victim), Some((_, killer))) = (victim, credited) {
            strike(world, victim, killer, damage, attackers, events);
        }
    }
}

/// Apply summed damage to one tank and let an autonomous victim react
fn strike(
    world: &mut SimulationWorld,
    victim: TankId,
    killer: TankId,
    damage: i32,
    attackers: Vec<TankId>,
    events: &mut Vec<TickEvent>,
) {
    let attacker_pos = world.tanks.get(&killer).filter(|t| t.is_alive()).map(|t| t.position);
    let retarget_distance = world.config.retarget_distance;
    let evade_steps = world.config.evade_steps;

    let Some(tank) = world.tanks.get_mut(&victim) else {
        return;
    };
    if !tank.is_alive() {
        return;
    }
    let killed = tank.attacked(damage);
    let victim_pos = tank.position;
    events.push(TickEvent::TankAttacked { victim, damage, attackers });

    if killed {
        debug!("Tank {} killed by {}", victim, killer);
        events.push(TickEvent::TankKilled { killer, victim });
        if killer != victim {
            if let Some(credit) = world.tanks.get_mut(&killer) {
                credit.kills += 1;
            }
        }
        return;
    }

    let Some(state) = tank.auto_mut() else {
        return;
    };
    match attacker_pos {
        Some(pos) if killer != victim && pos.manhattan(victim_pos) < retarget_distance => {
            if state.target != Some(killer) || !state.needs_replan {
                state.retarget(killer);
                events.push(TickEvent::Retargeted { tank: victim, target: killer });
            }
        }
        _ => {
            // Shot from afar or by a ghost: get out of the line of fire
            state.discard_route();
            state.evade_steps = evade_steps;
        }
    }
}

/// Remove dead bullets and clear newly dead tanks from the map
pub fn reap(world: &mut SimulationWorld) -> (usize, usize) {
    let dead_bullets: Vec<BulletId> = world
        .bullets
        .iter()
        .filter(|(_, b)| !b.is_alive())
        .map(|(id, _)| id)
        .collect();
    for id in &dead_bullets {
        world.remove_bullet(*id);
    }

    let mut cleared = 0;
    for id in world.tank_ids() {
        let Some(tank) = world.tanks.get_mut(&id) else {
            continue;
        };
        if tank.is_alive() || tank.cleared {
            continue;
        }
        if world.map.at(tank.position).tank_id() == Some(id) {
            world.map.remove_tank(tank.position);
        }
        clear(tank);
        cleared += 1;
    }
    (dead_bullets.len(), cleared)
}

fn clear(tank: &mut Tank) {
    tank.cleared = true;
    if let Some(state) = tank.auto_mut() {
        state.target = None;
        state.discard_route();
    }
}
