//! Fixed-interval tick driver
//!
//! One tick: queued player actions, autonomous tanks, bullet advance,
//! collision resolution, reap, and periodically a zone refresh. All
//! movement of a tick happens before any collision is resolved.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::game::input_buffer::{InputBuffer, InputSender};
use crate::game::state::{BulletId, TankAction, TankId};
use crate::game::systems::{ai, combat, projectile};
use crate::game::world::{ActionOutcome, SimulationWorld, TickError};
use crate::metrics::Metrics;

/// Something that happened during a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickEvent {
    TankKilled { killer: TankId, victim: TankId },
    /// One per hit tank per tick, with the summed damage
    TankAttacked { victim: TankId, damage: i32, attackers: Vec<TankId> },
    BulletFired { owner: TankId, bullet: BulletId },
    Retargeted { tank: TankId, target: TankId },
}

/// Result of one tick
#[derive(Debug, Clone, Default)]
pub struct TickOutput {
    pub tick: u64,
    pub events: Vec<TickEvent>,
    /// Entity steps skipped because they referred to stale tanks
    pub errors: usize,
    pub duration: Duration,
}

pub struct GameLoop {
    world: SimulationWorld,
    input: InputBuffer,
    /// Per-tank FIFO of actions not yet applied
    queues: HashMap<TankId, VecDeque<TankAction>>,
    metrics: Option<Arc<Metrics>>,
    last_stats_log: Instant,
}

impl GameLoop {
    pub fn new(config: GameConfig) -> Self {
        Self {
            world: SimulationWorld::new(config),
            input: InputBuffer::default(),
            queues: HashMap::new(),
            metrics: None,
            last_stats_log: Instant::now(),
        }
    }

    pub fn with_metrics(config: GameConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new(config)
        }
    }

    pub fn world(&self) -> &SimulationWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut SimulationWorld {
        &mut self.world
    }

    /// Handle for producers outside the lock
    pub fn input_sender(&self) -> InputSender {
        self.input.sender()
    }

    /// Queue an action for the next tick
    pub fn submit(&self, tank_id: TankId, action: TankAction) -> bool {
        self.input.try_submit(tank_id, action)
    }

    /// Actions still waiting for `tank_id`, not counting undrained input
    pub fn queued_for(&self, tank_id: TankId) -> usize {
        self.queues.get(&tank_id).map_or(0, VecDeque::len)
    }

    /// Advance the simulation by one tick
    pub fn tick(&mut self) -> TickOutput {
        let start = Instant::now();
        self.world.tick += 1;
        let mut output = TickOutput {
            tick: self.world.tick,
            ..Default::default()
        };

        self.apply_player_actions(&mut output);
        ai::update(&mut self.world, &mut output.events);
        projectile::advance_bullets(&mut self.world);
        combat::resolve_collisions(&mut self.world, &mut output.events);
        let (reaped_bullets, cleared_tanks) = combat::reap(&mut self.world);
        if cleared_tanks > 0 {
            debug!("Tick {}: {} bullets reaped, {} tanks cleared", output.tick, reaped_bullets, cleared_tanks);
        }

        if output.tick % self.world.config.zone_refresh_ticks == 0 {
            self.world.refresh_zones();
        }

        output.duration = start.elapsed();
        self.record(&output);
        output
    }

    /// Move drained input into per-tank queues and apply at most one action per tank
    fn apply_player_actions(&mut self, output: &mut TickOutput) {
        for message in self.input.drain() {
            self.queues.entry(message.tank_id).or_default().push_back(message.action);
        }

        let mut ids: Vec<TankId> = self.queues.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let Some(tank) = self.world.tank(id) else {
                // Deleted or asleep in a dormant cell
                self.queues.remove(&id);
                continue;
            };
            if tank.is_auto() {
                self.queues.remove(&id);
                continue;
            }
            let Some(action) = self.queues.get_mut(&id).and_then(VecDeque::pop_front) else {
                continue;
            };
            match self.world.apply_action(id, action) {
                Ok(ActionOutcome::Fired(bullet)) => output.events.push(TickEvent::BulletFired { owner: id, bullet }),
                Ok(_) => {}
                Err(TickError::DeadTank(_)) => {}
                Err(e) => {
                    warn!("Player action for tank {} skipped: {}", id, e);
                    output.errors += 1;
                }
            }
            if self.queues.get(&id).is_some_and(VecDeque::is_empty) {
                self.queues.remove(&id);
            }
        }
    }

    fn record(&mut self, output: &TickOutput) {
        let kills = output
            .events
            .iter()
            .filter(|e| matches!(e, TickEvent::TankKilled { .. }))
            .count();

        if let Some(metrics) = &self.metrics {
            metrics.record_tick_time(output.duration);
            metrics.record_world(&self.world.stats());
            metrics.kills_total.fetch_add(kills as u64, Ordering::Relaxed);
            metrics.tick_errors_total.fetch_add(output.errors as u64, Ordering::Relaxed);
        }

        if self.last_stats_log.elapsed() >= Duration::from_secs(30) {
            self.last_stats_log = Instant::now();
            let stats = self.world.stats();
            info!(
                "Tick {}: {} tanks ({} auto, {} dormant), {} bullets, {} points, last tick {:?}",
                output.tick,
                stats.tanks,
                stats.auto_tanks,
                stats.dormant_tanks,
                stats.bullets,
                stats.points,
                output.duration
            );
        }
    }
}

/// Drive `game` at a fixed interval until the task is dropped.
/// The lock is held for the duration of one tick only.
pub async fn run_tick_loop(game: Arc<Mutex<GameLoop>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Tick loop started ({:?} interval)", interval);

    loop {
        ticker.tick().await;
        let output = game.lock().tick();
        if output.duration > interval {
            warn!("Tick {} overran its budget: {:?}", output.tick, output.duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::Status;
    use crate::game::state::TankInfo;
    use crate::game::systems::pathfinding::is_in_firing_line;
    use crate::util::grid::{Direction, Position};

    fn open_loop() -> GameLoop {
        GameLoop::new(GameConfig {
            wall_density: 0.0,
            ..Default::default()
        })
    }

    fn add_player(game: &mut GameLoop, pos: Position) -> TankId {
        let world = game.world_mut();
        let id = world.allocate_tank_id();
        let info = world.player_info(id, format!("p{}", id));
        world.insert_tank(info, pos).unwrap()
    }

    #[test]
    fn test_one_action_per_tank_per_tick_in_order() {
        let mut game = open_loop();
        let id = add_player(&mut game, Position::ORIGIN);
        assert!(game.submit(id, TankAction::Move(Direction::Right)));
        assert!(game.submit(id, TankAction::Move(Direction::Up)));

        game.tick();
        assert_eq!(game.world().tank(id).unwrap().position, Position::new(1, 0));
        assert_eq!(game.queued_for(id), 1);

        game.tick();
        assert_eq!(game.world().tank(id).unwrap().position, Position::new(1, 1));
        assert_eq!(game.queued_for(id), 0);
    }

    #[test]
    fn test_point_blank_shot_hits_before_moving() {
        let mut game = open_loop();
        let shooter = add_player(&mut game, Position::ORIGIN);
        let victim = add_player(&mut game, Position::new(0, 2));
        game.submit(shooter, TankAction::Fire);

        // Bullet spawns at (0,1) and stays there this tick
        let first = game.tick();
        assert!(matches!(&first.events[..], [TickEvent::BulletFired { owner, .. }] if *owner == shooter));
        assert_eq!(game.world().tank(victim).unwrap().hp, 100);

        // Next tick it enters the victim's cell
        let second = game.tick();
        let hit = second.events.iter().any(|e| matches!(e, TickEvent::TankAttacked { victim: v, damage: 25, .. } if *v == victim));
        assert!(hit);
        assert_eq!(game.world().tank(victim).unwrap().hp, 75);
        assert_eq!(game.world().bullets().count(), 0);
        game.world().check_consistency().unwrap();
    }

    #[test]
    fn test_actions_for_dead_or_unknown_tanks_are_noops() {
        let mut game = open_loop();
        let id = add_player(&mut game, Position::ORIGIN);
        game.world_mut().tank_mut(id).unwrap().kill();
        game.submit(id, TankAction::Move(Direction::Up));
        game.submit(404, TankAction::Fire);

        let output = game.tick();
        assert_eq!(output.errors, 0);
        assert!(output.events.is_empty());
        assert_eq!(game.queued_for(404), 0);
        // Reaped: cleared from the map, kept in the table
        let tank = game.world().tank(id).unwrap();
        assert!(tank.cleared);
        assert!(!game.world().map().at(Position::ORIGIN).has(Status::Tank));
    }

    #[test]
    fn test_auto_tank_hunts_player_to_death() {
        let mut game = open_loop();
        let victim = add_player(&mut game, Position::new(0, 6));
        let world = game.world_mut();
        let id = world.allocate_tank_id();
        let hunter = world.insert_tank(TankInfo::auto(id, 5), Position::new(3, 0)).unwrap();

        let mut killed = false;
        for _ in 0..2_000 {
            let output = game.tick();
            if output.events.contains(&TickEvent::TankKilled { killer: hunter, victim }) {
                killed = true;
                break;
            }
            game.world().check_consistency().unwrap();
        }
        assert!(killed);
        assert_eq!(game.world().tank(hunter).unwrap().kills, 1);
    }

    #[test]
    fn test_hit_auto_tank_replans_against_attacker() {
        let mut game = open_loop();
        let world = game.world_mut();
        let id = world.allocate_tank_id();
        let hunter = world.insert_tank(TankInfo::auto(id, 5), Position::ORIGIN).unwrap();
        // Old target sits outside the scan square, with a stale route toward it
        let old_target = add_player(&mut game, Position::new(0, 30));
        let attacker = add_player(&mut game, Position::new(5, 0));
        {
            let world = game.world_mut();
            let tank = world.tank_mut(hunter).unwrap();
            tank.info.gap = 1_000;
            let state = tank.auto_mut().unwrap();
            state.set_route(old_target, Position::new(0, 30), Position::new(0, 2), vec![Direction::Up; 2]);
            world.face_tank(attacker, Direction::Left).unwrap();
        }
        game.submit(attacker, TankAction::Fire);

        let mut retargeted = false;
        for _ in 0..10 {
            let output = game.tick();
            if output.events.contains(&TickEvent::Retargeted { tank: hunter, target: attacker }) {
                retargeted = true;
                break;
            }
        }
        assert!(retargeted);
        assert_eq!(game.world().tank(hunter).unwrap().hp, 160 - 25);

        // Next action tick plans against the attacker before acting
        game.world_mut().tank_mut(hunter).unwrap().info.gap = 0;
        let output = game.tick();

        let world = game.world();
        let tank = world.tank(hunter).unwrap();
        let state = tank.auto().unwrap();
        assert_eq!(state.target, Some(attacker));
        assert_eq!(state.last_target_pos, Some(Position::new(5, 0)));
        let destination = state.destination.unwrap();
        let range = tank.info.bullet.range as u32;
        assert!(is_in_firing_line(world.map(), destination, Position::new(5, 0), Some(range)));
        assert_eq!(tank.direction, Direction::Right);
        assert!(output
            .events
            .iter()
            .any(|e| matches!(e, TickEvent::BulletFired { owner, .. } if *owner == hunter)));
    }

    #[test]
    fn test_bullets_never_survive_reap() {
        let mut game = open_loop();
        let shooter = add_player(&mut game, Position::ORIGIN);
        for _ in 0..80 {
            game.submit(shooter, TankAction::Fire);
            game.tick();
            for (_, bullet) in game.world().bullets() {
                assert!(bullet.is_alive());
            }
        }
    }

    #[test]
    fn test_metrics_are_recorded() {
        let metrics = Arc::new(Metrics::new());
        let mut game = GameLoop::with_metrics(GameConfig::default(), metrics.clone());
        add_player(&mut game, Position::ORIGIN);
        game.tick();
        game.tick();
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.tanks_live.load(Ordering::Relaxed), 1);
    }
}
