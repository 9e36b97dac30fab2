//! Bullet advance
//!
//! Every live bullet moves one cell per tick. Bullets fired during the
//! current tick stay at the muzzle so point-blank shots resolve against the
//! adjacent cell first.

use crate::game::state::{BulletId, BulletStep};
use crate::game::world::SimulationWorld;

/// Per-tick bullet movement summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    pub moved: usize,
    pub bounced: usize,
}

/// Advance every bullet fired before the current tick
pub fn advance_bullets(world: &mut SimulationWorld) -> AdvanceReport {
    let tick = world.tick;
    let ids: Vec<BulletId> = world
        .bullets
        .iter()
        .filter(|(_, b)| b.is_alive() && b.fired_tick < tick)
        .map(|(id, _)| id)
        .collect();

    let mut report = AdvanceReport::default();
    for id in ids {
        let Some(next) = world.bullets.get(id).map(|b| b.position.step(b.direction)) else {
            continue;
        };
        // Dormant cells are not obstacles; wake the cell before entering it
        world.activate_point(next);
        let Some(bullet) = world.bullets.get_mut(id) else {
            continue;
        };
        match bullet.react(id, &mut world.map) {
            BulletStep::Moved => report.moved += 1,
            BulletStep::Bounced => report.bounced += 1,
            BulletStep::Dead => {}
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::FillKind;
    use crate::game::systems::combat;
    use crate::game::world::tests::{open_world, spawn_player};
    use crate::util::grid::{Direction, Position, Zone};

    #[test]
    fn test_fresh_bullets_wait_one_tick() {
        let mut world = open_world();
        let shooter = spawn_player(&mut world, Position::ORIGIN);
        world.tick = 5;
        let bullet = world.fire(shooter).unwrap().unwrap();

        assert_eq!(advance_bullets(&mut world), AdvanceReport::default());
        assert_eq!(world.bullet(bullet).unwrap().position, Position::new(0, 1));

        world.tick = 6;
        assert_eq!(advance_bullets(&mut world).moved, 1);
        assert_eq!(world.bullet(bullet).unwrap().position, Position::new(0, 2));
        world.check_consistency().unwrap();
    }

    #[test]
    fn test_bounce_between_walls() {
        let mut world = open_world();
        let shooter = spawn_player(&mut world, Position::ORIGIN);
        world.face_tank(shooter, Direction::Right).unwrap();
        world.map_mut().fill(Zone::new(2, 3, 0, 1), FillKind::Wall);
        let bullet = world.fire(shooter).unwrap().unwrap();

        world.tick = 1;
        let report = advance_bullets(&mut world);
        assert_eq!(report.bounced, 1);
        let b = world.bullet(bullet).unwrap();
        assert_eq!(b.position, Position::new(1, 0));
        assert_eq!(b.direction, Direction::Left);
    }

    #[test]
    fn test_bullet_enters_dormant_tank_cell() {
        let mut world = open_world();
        let shooter = spawn_player(&mut world, Position::ORIGIN);
        let victim = spawn_player(&mut world, Position::new(3, 0));
        world.face_tank(shooter, Direction::Right).unwrap();
        world.unload_zone(Zone::new(3, 4, 0, 1));
        assert!(world.tank(victim).is_none());

        let bullet = world.fire(shooter).unwrap().unwrap();
        world.tick = 1;
        assert_eq!(advance_bullets(&mut world).moved, 1);
        world.tick = 2;
        let report = advance_bullets(&mut world);
        assert_eq!(report, AdvanceReport { moved: 1, bounced: 0 });

        let b = world.bullet(bullet).unwrap();
        assert_eq!(b.position, Position::new(3, 0));
        assert_eq!(b.direction, Direction::Right);
        assert!(world.map().at(Position::new(3, 0)).is_active());

        let mut events = Vec::new();
        combat::resolve_collisions(&mut world, &mut events);
        assert_eq!(world.tank(victim).unwrap().hp, 75);
        world.check_consistency().unwrap();
    }
}
