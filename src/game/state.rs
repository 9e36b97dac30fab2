//! Entity model: tanks, autonomous tanks and bullets
//!
//! Live entities are owned by the world's tables and referenced from map
//! cells by id only. `TankData`/`BulletData` are the serializable snapshots
//! a dormant cell holds instead of live entities.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::game::constants::{ai, bullet, tank};
use crate::game::map::{Map, MoveOutcome};
use crate::util::grid::{Direction, Position};

/// Unique, monotonically assigned tank identifier
pub type TankId = u32;

new_key_type! {
    /// Generational key of a live bullet
    pub struct BulletId;
}

/// Bullet parameters a tank fires with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulletTemplate {
    /// Bounce budget
    pub hp: i32,
    pub lethality: i32,
    pub range: i32,
}

impl Default for BulletTemplate {
    fn default() -> Self {
        Self {
            hp: bullet::PLAYER_HP,
            lethality: bullet::PLAYER_LETHALITY,
            range: bullet::PLAYER_RANGE,
        }
    }
}

/// Identity and configuration of a tank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankInfo {
    pub id: TankId,
    pub name: String,
    pub max_hp: i32,
    /// Ticks to wait between actions (autonomous tanks)
    pub gap: u32,
    /// 0 for player tanks, 1..=MAX_LEVEL for autonomous ones
    pub level: u8,
    pub bullet: BulletTemplate,
}

impl TankInfo {
    pub fn player(id: TankId, name: String) -> Self {
        Self {
            id,
            name,
            max_hp: tank::PLAYER_MAX_HP,
            gap: tank::PLAYER_GAP,
            level: 0,
            bullet: BulletTemplate::default(),
        }
    }

    /// Stats of an autonomous tank of the given level (clamped to 1..=MAX_LEVEL)
    pub fn auto(id: TankId, level: u8) -> Self {
        let level = level.clamp(1, ai::MAX_LEVEL);
        let l = level as i32;
        Self {
            id,
            name: format!("auto-{}#{}", level, id),
            max_hp: 60 + 20 * l,
            gap: (12u32).saturating_sub(2 * level as u32).max(2),
            level,
            bullet: BulletTemplate {
                hp: 1 + l / 2,
                lethality: 10 + 5 * l,
                range: 8 + 3 * l,
            },
        }
    }
}

/// Navigation state carried only by autonomous tanks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoState {
    pub target: Option<TankId>,
    pub last_target_pos: Option<Position>,
    /// Firing-line cell the current route leads to
    pub destination: Option<Position>,
    pub route: Vec<Direction>,
    pub route_index: usize,
    /// Counts up to the tank's gap; the tank acts when it reaches it
    pub gap_counter: u32,
    /// Set when the route must be recomputed before the next action
    pub needs_replan: bool,
    /// Remaining random evasive steps
    pub evade_steps: u32,
}

impl AutoState {
    pub fn new() -> Self {
        Self {
            needs_replan: true,
            ..Default::default()
        }
    }

    /// Route exhausted
    pub fn arrived(&self) -> bool {
        self.route_index >= self.route.len()
    }

    /// Install a freshly planned route
    pub fn set_route(&mut self, target: TankId, target_pos: Position, destination: Position, route: Vec<Direction>) {
        self.target = Some(target);
        self.last_target_pos = Some(target_pos);
        self.destination = Some(destination);
        self.route = route;
        self.route_index = 0;
        self.needs_replan = false;
    }

    /// Drop the current route and force a replan
    pub fn discard_route(&mut self) {
        self.route.clear();
        self.route_index = 0;
        self.destination = None;
        self.needs_replan = true;
    }

    /// Point the tank at a new target, discarding the old route
    pub fn retarget(&mut self, target: TankId) {
        self.target = Some(target);
        self.last_target_pos = None;
        self.evade_steps = 0;
        self.discard_route();
    }
}

/// Closed set of tank behaviours
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TankKind {
    Normal,
    Auto(AutoState),
}

/// A tank on the map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tank {
    pub info: TankInfo,
    pub hp: i32,
    pub position: Position,
    pub direction: Direction,
    /// Removed from the map after death
    pub cleared: bool,
    pub kills: u32,
    pub deaths: u32,
    pub kind: TankKind,
}

impl Tank {
    pub fn new(info: TankInfo, position: Position, kind: TankKind) -> Self {
        Self {
            hp: info.max_hp,
            info,
            position,
            direction: Direction::Up,
            cleared: false,
            kills: 0,
            deaths: 0,
            kind,
        }
    }

    #[inline]
    pub fn id(&self) -> TankId {
        self.info.id
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }

    #[inline]
    pub fn is_auto(&self) -> bool {
        matches!(self.kind, TankKind::Auto(_))
    }

    pub fn auto(&self) -> Option<&AutoState> {
        match &self.kind {
            TankKind::Auto(state) => Some(state),
            TankKind::Normal => None,
        }
    }

    pub fn auto_mut(&mut self) -> Option<&mut AutoState> {
        match &mut self.kind {
            TankKind::Auto(state) => Some(state),
            TankKind::Normal => None,
        }
    }

    /// Face `direction` and try to move one cell. The cached position is
    /// only updated after the map accepted the move.
    pub fn step(&mut self, map: &mut Map, direction: Direction) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.face(direction);
        match map.tank_move(self.position, direction) {
            MoveOutcome::Moved => {
                self.position = self.position.step(direction);
                true
            }
            MoveOutcome::Blocked => false,
        }
    }

    pub fn up(&mut self, map: &mut Map) -> bool {
        self.step(map, Direction::Up)
    }

    pub fn down(&mut self, map: &mut Map) -> bool {
        self.step(map, Direction::Down)
    }

    pub fn left(&mut self, map: &mut Map) -> bool {
        self.step(map, Direction::Left)
    }

    pub fn right(&mut self, map: &mut Map) -> bool {
        self.step(map, Direction::Right)
    }

    /// Turn in place
    pub fn face(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Cell a fired bullet would spawn in
    pub fn muzzle(&self) -> Position {
        self.position.step(self.direction)
    }

    /// Apply damage; hp is clamped to [0, max_hp]. Returns true if this hit killed the tank.
    pub fn attacked(&mut self, lethality: i32) -> bool {
        let was_alive = self.is_alive();
        self.hp = (self.hp - lethality).clamp(0, self.info.max_hp);
        if was_alive && !self.is_alive() {
            self.deaths += 1;
            true
        } else {
            false
        }
    }

    pub fn kill(&mut self) -> bool {
        self.attacked(self.hp)
    }

    /// Bring a dead or cleared tank back at `new_pos`.
    ///
    /// No-op (returns false) if the tank is alive and not cleared, or if the
    /// map refuses the cell.
    pub fn revive(&mut self, map: &mut Map, new_pos: Position) -> bool {
        if self.is_alive() && !self.cleared {
            return false;
        }
        if !self.cleared {
            // Dead but not reaped yet: the old cell still carries the tank
            map.remove_tank(self.position);
        }
        if !map.add_tank(self.id(), new_pos) {
            // Keep the tank consistent with the map: it is off the map now
            self.cleared = true;
            return false;
        }
        self.hp = self.info.max_hp;
        self.cleared = false;
        self.position = new_pos;
        if let Some(state) = self.auto_mut() {
            *state = AutoState::new();
        }
        true
    }

    /// Snapshot for a dormant cell
    pub fn to_data(&self) -> TankData {
        TankData {
            info: self.info.clone(),
            hp: self.hp,
            position: self.position,
            direction: self.direction,
            cleared: self.cleared,
            kills: self.kills,
            deaths: self.deaths,
            auto: self.auto().cloned(),
        }
    }

    /// Rebuild a live tank from its snapshot
    pub fn from_data(data: TankData) -> Self {
        let kind = match data.auto {
            Some(state) => TankKind::Auto(state),
            None => TankKind::Normal,
        };
        Self {
            info: data.info,
            hp: data.hp,
            position: data.position,
            direction: data.direction,
            cleared: data.cleared,
            kills: data.kills,
            deaths: data.deaths,
            kind,
        }
    }

    pub fn view(&self) -> TankView {
        TankView {
            id: self.id(),
            name: self.info.name.clone(),
            position: self.position,
            direction: self.direction,
            hp: self.hp,
            max_hp: self.info.max_hp,
            alive: self.is_alive(),
            is_auto: self.is_auto(),
            level: self.info.level,
            kills: self.kills,
            deaths: self.deaths,
        }
    }
}

/// Serializable snapshot of a tank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankData {
    pub info: TankInfo,
    pub hp: i32,
    pub position: Position,
    pub direction: Direction,
    pub cleared: bool,
    pub kills: u32,
    pub deaths: u32,
    pub auto: Option<AutoState>,
}

/// Read-only tank view for renderers and clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankView {
    pub id: TankId,
    pub name: String,
    pub position: Position,
    pub direction: Direction,
    pub hp: i32,
    pub max_hp: i32,
    pub alive: bool,
    pub is_auto: bool,
    pub level: u8,
    pub kills: u32,
    pub deaths: u32,
}

/// One action a tank can take in a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TankAction {
    /// Face and try to move one cell
    Move(Direction),
    /// Face without moving
    Turn(Direction),
    Fire,
}

/// Outcome of one bullet advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulletStep {
    Moved,
    Bounced,
    Dead,
}

/// A bullet in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bullet {
    pub owner: TankId,
    pub position: Position,
    pub direction: Direction,
    /// Bounce budget
    pub hp: i32,
    pub range: i32,
    pub lethality: i32,
    /// Tick the bullet was fired in
    pub fired_tick: u64,
}

impl Bullet {
    pub fn new(owner: TankId, position: Position, direction: Direction, template: BulletTemplate, fired_tick: u64) -> Self {
        Self {
            owner,
            position,
            direction,
            hp: template.hp,
            range: template.range,
            lethality: template.lethality,
            fired_tick,
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.hp > 0 && self.range > 0
    }

    pub fn kill(&mut self) {
        self.hp = 0;
    }

    /// Advance one cell; a wall ahead costs one bounce and reverses the bullet in place
    pub fn react(&mut self, id: BulletId, map: &mut Map) -> BulletStep {
        if !self.is_alive() {
            return BulletStep::Dead;
        }
        match map.bullet_move(id, self.position, self.direction) {
            MoveOutcome::Moved => {
                self.position = self.position.step(self.direction);
                self.range -= 1;
                BulletStep::Moved
            }
            MoveOutcome::Blocked => {
                self.hp -= 1;
                self.direction = self.direction.reverse();
                BulletStep::Bounced
            }
        }
    }

    pub fn to_data(&self) -> BulletData {
        BulletData {
            owner: self.owner,
            position: self.position,
            direction: self.direction,
            hp: self.hp,
            range: self.range,
            lethality: self.lethality,
        }
    }

    pub fn from_data(data: BulletData, fired_tick: u64) -> Self {
        Self {
            owner: data.owner,
            position: data.position,
            direction: data.direction,
            hp: data.hp,
            range: data.range,
            lethality: data.lethality,
            fired_tick,
        }
    }
}

/// Serializable snapshot of a bullet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulletData {
    pub owner: TankId,
    pub position: Position,
    pub direction: Direction,
    pub hp: i32,
    pub range: i32,
    pub lethality: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::generator::PointGenerator;
    use crate::game::map::{FillKind, Status};
    use crate::util::grid::Zone;
    use proptest::prelude::*;
    use slotmap::SlotMap;

    fn open_map() -> Map {
        Map::new(PointGenerator::new(1, 0.0))
    }

    fn placed_tank(map: &mut Map, id: TankId, pos: Position) -> Tank {
        assert!(map.add_tank(id, pos));
        Tank::new(TankInfo::player(id, format!("t{}", id)), pos, TankKind::Normal)
    }

    #[test]
    fn test_auto_levels_scale() {
        let low = TankInfo::auto(1, 1);
        let high = TankInfo::auto(2, ai::MAX_LEVEL);
        assert!(high.max_hp > low.max_hp);
        assert!(high.gap <= low.gap);
        assert!(high.bullet.lethality > low.bullet.lethality);
        assert_eq!(TankInfo::auto(3, 99).level, ai::MAX_LEVEL);
        assert_eq!(TankInfo::auto(3, 0).level, 1);
    }

    #[test]
    fn test_step_keeps_map_and_tank_in_sync() {
        let mut map = open_map();
        let mut tank = placed_tank(&mut map, 1, Position::ORIGIN);

        assert!(tank.up(&mut map));
        assert!(tank.right(&mut map));
        assert_eq!(tank.position, Position::new(1, 1));
        assert_eq!(tank.direction, Direction::Right);
        assert_eq!(map.at(tank.position).tank_id(), Some(1));
        assert!(!map.at(Position::ORIGIN).has(Status::Tank));
    }

    #[test]
    fn test_blocked_step_only_turns() {
        let mut map = open_map();
        map.fill(Zone::new(0, 1, 1, 2), FillKind::Wall);
        let mut tank = placed_tank(&mut map, 1, Position::ORIGIN);
        tank.face(Direction::Left);

        assert!(!tank.up(&mut map));
        assert_eq!(tank.position, Position::ORIGIN);
        assert_eq!(tank.direction, Direction::Up);
    }

    #[test]
    fn test_tank_cannot_enter_occupied_cell() {
        let mut map = open_map();
        let mut a = placed_tank(&mut map, 1, Position::ORIGIN);
        let _b = placed_tank(&mut map, 2, Position::new(1, 0));
        assert!(!a.right(&mut map));
        assert_eq!(map.at(Position::new(1, 0)).tank_id(), Some(2));
    }

    #[test]
    fn test_attacked_clamps_and_counts_death_once() {
        let mut map = open_map();
        let mut tank = placed_tank(&mut map, 1, Position::ORIGIN);
        assert!(!tank.attacked(30));
        assert_eq!(tank.hp, 70);
        assert!(tank.attacked(500));
        assert_eq!(tank.hp, 0);
        assert!(!tank.attacked(10));
        assert_eq!(tank.deaths, 1);

        // Negative lethality heals but never above max
        tank.hp = 90;
        tank.attacked(-50);
        assert_eq!(tank.hp, 100);
    }

    #[test]
    fn test_kill() {
        let mut map = open_map();
        let mut tank = placed_tank(&mut map, 1, Position::ORIGIN);
        assert!(tank.kill());
        assert!(!tank.is_alive());
    }

    #[test]
    fn test_revive_after_clear() {
        let mut map = open_map();
        let mut tank = placed_tank(&mut map, 1, Position::ORIGIN);
        tank.kill();
        map.remove_tank(tank.position);
        tank.cleared = true;

        let new_pos = Position::new(2, 2);
        assert!(tank.revive(&mut map, new_pos));
        assert_eq!(tank.hp, tank.info.max_hp);
        assert!(!tank.cleared);
        assert_eq!(tank.position, new_pos);
        assert_eq!(map.at(new_pos).tank_id(), Some(1));

        // Second revive on a healthy tank does nothing
        assert!(!tank.revive(&mut map, Position::new(-2, -2)));
        assert_eq!(tank.position, new_pos);
        assert!(!map.at(Position::new(-2, -2)).has(Status::Tank));
    }

    #[test]
    fn test_revive_dead_uncleared_moves_status() {
        let mut map = open_map();
        let mut tank = placed_tank(&mut map, 1, Position::ORIGIN);
        tank.kill();
        assert!(tank.revive(&mut map, Position::new(0, 2)));
        assert!(!map.at(Position::ORIGIN).has(Status::Tank));
        assert!(map.at(Position::new(0, 2)).has(Status::Tank));
    }

    #[test]
    fn test_wall_bounce_kills_after_budget() {
        let mut map = open_map();
        // Walls on both sides of (0,0)
        map.fill(Zone::new(1, 2, 0, 1), FillKind::Wall);
        map.fill(Zone::new(-1, 0, 0, 1), FillKind::Wall);

        let mut bullets: SlotMap<BulletId, Bullet> = SlotMap::with_key();
        let template = BulletTemplate { hp: 2, lethality: 10, range: 30 };
        let id = bullets.insert(Bullet::new(9, Position::ORIGIN, Direction::Right, template, 0));
        assert!(map.add_bullet(id, Position::ORIGIN));

        let bullet = &mut bullets[id];
        assert_eq!(bullet.react(id, &mut map), BulletStep::Bounced);
        assert_eq!(bullet.direction, Direction::Left);
        assert!(bullet.is_alive());
        assert_eq!(bullet.react(id, &mut map), BulletStep::Bounced);
        assert!(!bullet.is_alive());
        assert_eq!(bullet.range, 30);
        assert_eq!(bullet.react(id, &mut map), BulletStep::Dead);
    }

    #[test]
    fn test_bullet_range_runs_out() {
        let mut map = open_map();
        let mut bullets: SlotMap<BulletId, Bullet> = SlotMap::with_key();
        let template = BulletTemplate { hp: 1, lethality: 10, range: 2 };
        let id = bullets.insert(Bullet::new(9, Position::ORIGIN, Direction::Up, template, 0));
        map.add_bullet(id, Position::ORIGIN);

        let bullet = &mut bullets[id];
        assert_eq!(bullet.react(id, &mut map), BulletStep::Moved);
        assert_eq!(bullet.react(id, &mut map), BulletStep::Moved);
        assert!(!bullet.is_alive());
        assert_eq!(bullet.position, Position::new(0, 2));
        assert_eq!(map.at(Position::new(0, 2)).bullets(), &[id]);
    }

    #[test]
    fn test_auto_state_arrival() {
        let mut state = AutoState::new();
        assert!(state.arrived());
        state.set_route(2, Position::new(5, 5), Position::new(5, 0), vec![Direction::Right; 3]);
        assert!(!state.arrived());
        state.route_index = 3;
        assert!(state.arrived());
        state.retarget(4);
        assert_eq!(state.target, Some(4));
        assert!(state.route.is_empty());
        assert!(state.needs_replan);
    }

    fn arb_direction() -> impl Strategy<Value = Direction> {
        prop_oneof![
            Just(Direction::Up),
            Just(Direction::Down),
            Just(Direction::Left),
            Just(Direction::Right),
        ]
    }

    proptest! {
        #[test]
        fn prop_tank_snapshot_round_trip(
            id in 1u32..10_000,
            hp in 0i32..=100,
            x in -1_000i32..1_000,
            y in -1_000i32..1_000,
            direction in arb_direction(),
            cleared in any::<bool>(),
            auto in any::<bool>(),
            target in proptest::option::of(1u32..100),
            route in proptest::collection::vec(arb_direction(), 0..20),
            index_seed in 0usize..25,
        ) {
            let kind = if auto {
                let mut state = AutoState::new();
                state.target = target;
                state.route_index = index_seed.min(route.len());
                state.route = route;
                TankKind::Auto(state)
            } else {
                TankKind::Normal
            };
            let mut tank = Tank::new(TankInfo::player(id, format!("p{}", id)), Position::new(x, y), kind);
            tank.hp = hp;
            tank.direction = direction;
            tank.cleared = cleared;

            let rebuilt = Tank::from_data(tank.to_data());
            prop_assert_eq!(&rebuilt, &tank);
            prop_assert_eq!(rebuilt.view(), tank.view());
        }
    }

    #[test]
    fn test_bullet_snapshot_round_trip() {
        let bullet = Bullet::new(3, Position::new(-4, 8), Direction::Left, BulletTemplate { hp: 2, lethality: 40, range: 12 }, 7);
        let rebuilt = Bullet::from_data(bullet.to_data(), 7);
        assert_eq!(rebuilt, bullet);
    }

    #[test]
    fn test_tank_data_serializes() {
        let mut state = AutoState::new();
        state.route = vec![Direction::Left, Direction::Up];
        let tank = Tank::new(TankInfo::auto(5, 3), Position::new(1, -1), TankKind::Auto(state));
        let data = tank.to_data();
        let encoded = bincode::serde::encode_to_vec(&data, bincode::config::standard()).unwrap();
        let (decoded, _): (TankData, usize) =
            bincode::serde::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(Tank::from_data(decoded), tank);
    }
}
