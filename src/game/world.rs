//! Simulation world
//!
//! Owns the sparse map together with the live entity tables. Cells hold ids
//! only; the tables own the entities. Dormant cells carry snapshots instead
//! and their tanks are indexed in `dormant_tanks` so commands can still
//! find them.

use hashbrown::HashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use tracing::debug;
use uuid::Uuid;

use crate::config::GameConfig;
use crate::game::constants::map::FREE_CELL_SEARCH_RINGS;
use crate::game::generator::PointGenerator;
use crate::game::map::{DormantOccupants, Map, Status};
use crate::game::state::{
    AutoState, Bullet, BulletId, BulletTemplate, Tank, TankAction, TankId, TankInfo, TankKind, TankView,
};
use crate::util::grid::{Direction, Position, Zone};

/// Identifies a registered viewer (a connected client)
pub type ViewerId = Uuid;

/// Failure of one entity step inside a tick
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickError {
    #[error("tank {0} does not exist")]
    UnknownTank(TankId),
    #[error("tank {0} is dead")]
    DeadTank(TankId),
    #[error("tank {0} is not autonomous")]
    NotAutonomous(TankId),
}

/// What an applied action did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Moved,
    Blocked,
    Turned,
    Fired(BulletId),
    /// Muzzle cell was a wall
    Misfired,
}

/// One cell as seen by renderers and clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellView {
    pub position: Position,
    pub statuses: Vec<Status>,
    pub tank: Option<TankId>,
    pub text: String,
}

/// Entity counts for stats and metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorldStats {
    pub tanks: usize,
    pub auto_tanks: usize,
    pub dormant_tanks: usize,
    pub bullets: usize,
    pub points: usize,
}

pub struct SimulationWorld {
    pub(crate) config: GameConfig,
    pub(crate) tick: u64,
    pub(crate) map: Map,
    pub(crate) tanks: HashMap<TankId, Tank>,
    pub(crate) dormant_tanks: HashMap<TankId, Position>,
    pub(crate) bullets: SlotMap<BulletId, Bullet>,
    pub(crate) rng: ChaCha8Rng,
    next_tank_id: TankId,
    viewer_zones: HashMap<ViewerId, Zone>,
}

impl SimulationWorld {
    pub fn new(config: GameConfig) -> Self {
        let generator = PointGenerator::new(config.seed, config.wall_density);
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed.wrapping_mul(0x2545_F491_4F6C_DD1D)),
            config,
            tick: 0,
            map: Map::new(generator),
            tanks: HashMap::new(),
            dormant_tanks: HashMap::new(),
            bullets: SlotMap::with_key(),
            next_tank_id: 1,
            viewer_zones: HashMap::new(),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn map(&self) -> &Map {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut Map {
        &mut self.map
    }

    pub fn tank(&self, id: TankId) -> Option<&Tank> {
        self.tanks.get(&id)
    }

    pub fn tank_mut(&mut self, id: TankId) -> Option<&mut Tank> {
        self.tanks.get_mut(&id)
    }

    pub fn bullet(&self, id: BulletId) -> Option<&Bullet> {
        self.bullets.get(id)
    }

    pub fn bullets(&self) -> impl Iterator<Item = (BulletId, &Bullet)> {
        self.bullets.iter()
    }

    /// Live tank ids in ascending order
    pub fn tank_ids(&self) -> Vec<TankId> {
        let mut ids: Vec<TankId> = self.tanks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Where a dormant tank sleeps
    pub fn dormant_tank(&self, id: TankId) -> Option<Position> {
        self.dormant_tanks.get(&id).copied()
    }

    pub fn stats(&self) -> WorldStats {
        WorldStats {
            tanks: self.tanks.len(),
            auto_tanks: self.tanks.values().filter(|t| t.is_auto()).count(),
            dormant_tanks: self.dormant_tanks.len(),
            bullets: self.bullets.len(),
            points: self.map.point_count(),
        }
    }

    // ----- placement -----

    /// A cell a tank may be placed on right now
    pub fn is_placeable(&self, pos: Position) -> bool {
        let point = self.map.at(pos);
        point.is_active() && !point.has(Status::Wall) && !point.has(Status::Tank)
    }

    /// Nearest placeable cell, searching square rings outward from `center`
    pub fn find_free_cell(&self, center: Position) -> Option<Position> {
        for ring in 0..=FREE_CELL_SEARCH_RINGS {
            for dy in -ring..=ring {
                for dx in -ring..=ring {
                    if dx.abs() != ring && dy.abs() != ring {
                        continue;
                    }
                    let pos = Position::new(center.x + dx, center.y + dy);
                    if self.is_placeable(pos) {
                        return Some(pos);
                    }
                }
            }
        }
        None
    }

    /// Random free cell within the configured spawn radius of the origin
    pub fn random_spawn_cell(&mut self) -> Option<Position> {
        let radius = self.config.spawn_radius;
        let center = if radius > 0 {
            Position::new(self.rng.gen_range(-radius..=radius), self.rng.gen_range(-radius..=radius))
        } else {
            Position::ORIGIN
        };
        self.find_free_cell(center)
    }

    /// Stats of a fresh player tank
    pub fn player_info(&self, id: TankId, name: String) -> TankInfo {
        let mut info = TankInfo::player(id, name);
        info.max_hp = self.config.player_max_hp;
        info.bullet = BulletTemplate {
            hp: self.config.player_bullet_bounces,
            lethality: self.config.player_bullet_lethality,
            range: self.config.player_bullet_range,
        };
        info
    }

    /// Reserve the next tank id
    pub fn allocate_tank_id(&mut self) -> TankId {
        let id = self.next_tank_id;
        self.next_tank_id += 1;
        id
    }

    /// Insert a tank at `pos`. The caller has checked the cell.
    pub fn insert_tank(&mut self, info: TankInfo, pos: Position) -> Option<TankId> {
        self.activate_point(pos);
        let id = info.id;
        let kind = if info.level > 0 {
            TankKind::Auto(AutoState::new())
        } else {
            TankKind::Normal
        };
        if !self.map.add_tank(id, pos) {
            return None;
        }
        self.tanks.insert(id, Tank::new(info, pos, kind));
        debug!("Tank {} placed at {}", id, pos);
        Some(id)
    }

    /// Take a tank out of the world completely
    pub fn delete_tank(&mut self, id: TankId) -> bool {
        if let Some(pos) = self.dormant_tanks.get(&id).copied() {
            self.activate_point(pos);
        }
        let Some(tank) = self.tanks.remove(&id) else {
            return false;
        };
        if !tank.cleared && self.map.at(tank.position).tank_id() == Some(id) {
            self.map.remove_tank(tank.position);
        }
        true
    }

    /// Bring a dormant tank back into the live table
    pub fn wake_tank(&mut self, id: TankId) -> bool {
        if self.tanks.contains_key(&id) {
            return true;
        }
        match self.dormant_tanks.get(&id).copied() {
            Some(pos) => {
                self.activate_point(pos);
                self.tanks.contains_key(&id)
            }
            None => false,
        }
    }

    // ----- movement and firing -----

    /// Move a live tank one cell. `Ok(false)` means blocked.
    pub fn move_tank(&mut self, id: TankId, direction: Direction) -> Result<bool, TickError> {
        let pos = match self.tanks.get(&id) {
            Some(tank) if tank.is_alive() && !tank.cleared => tank.position,
            Some(_) => return Err(TickError::DeadTank(id)),
            None => return Err(TickError::UnknownTank(id)),
        };
        self.activate_point(pos.step(direction));
        let tank = self.tanks.get_mut(&id).ok_or(TickError::UnknownTank(id))?;
        Ok(tank.step(&mut self.map, direction))
    }

    /// Turn a live tank in place
    pub fn face_tank(&mut self, id: TankId, direction: Direction) -> Result<(), TickError> {
        match self.tanks.get_mut(&id) {
            Some(tank) if tank.is_alive() => {
                tank.face(direction);
                Ok(())
            }
            Some(_) => Err(TickError::DeadTank(id)),
            None => Err(TickError::UnknownTank(id)),
        }
    }

    /// Fire from a live tank. `Ok(None)` when the muzzle cell is a wall.
    pub fn fire(&mut self, id: TankId) -> Result<Option<BulletId>, TickError> {
        let (muzzle, direction, template) = match self.tanks.get(&id) {
            Some(tank) if tank.is_alive() && !tank.cleared => (tank.muzzle(), tank.direction, tank.info.bullet),
            Some(_) => return Err(TickError::DeadTank(id)),
            None => return Err(TickError::UnknownTank(id)),
        };
        self.activate_point(muzzle);
        if self.map.is_wall(muzzle) {
            return Ok(None);
        }
        let bullet_id = self
            .bullets
            .insert(Bullet::new(id, muzzle, direction, template, self.tick));
        if !self.map.add_bullet(bullet_id, muzzle) {
            self.bullets.remove(bullet_id);
            return Ok(None);
        }
        Ok(Some(bullet_id))
    }

    /// Run one player or autonomous action
    pub fn apply_action(&mut self, id: TankId, action: TankAction) -> Result<ActionOutcome, TickError> {
        match action {
            TankAction::Move(direction) => Ok(if self.move_tank(id, direction)? {
                ActionOutcome::Moved
            } else {
                ActionOutcome::Blocked
            }),
            TankAction::Turn(direction) => {
                self.face_tank(id, direction)?;
                Ok(ActionOutcome::Turned)
            }
            TankAction::Fire => Ok(match self.fire(id)? {
                Some(bullet) => ActionOutcome::Fired(bullet),
                None => ActionOutcome::Misfired,
            }),
        }
    }

    /// Drop a bullet from the arena and its cell
    pub fn remove_bullet(&mut self, id: BulletId) -> bool {
        match self.bullets.remove(id) {
            Some(bullet) => {
                self.map.remove_bullet(id, bullet.position);
                true
            }
            None => false,
        }
    }

    // ----- point lifecycle -----

    /// Make a dormant cell live again, rebuilding its entities.
    /// Idempotent: active and unmaterialised cells are left alone.
    pub fn activate_point(&mut self, pos: Position) -> bool {
        let Some(dormant) = self.map.activate(pos) else {
            return false;
        };
        if let Some(data) = dormant.tank {
            let tank = Tank::from_data(data);
            let id = tank.id();
            self.dormant_tanks.remove(&id);
            self.map.attach_tank(pos, id);
            self.tanks.insert(id, tank);
        }
        for data in dormant.bullets {
            let id = self.bullets.insert(Bullet::from_data(data, self.tick));
            self.map.attach_bullet(pos, id);
        }
        true
    }

    /// Put a live cell to sleep, snapshotting its entities.
    /// Idempotent: dormant and unmaterialised cells are left alone.
    pub fn deactivate_point(&mut self, pos: Position) -> bool {
        let Some(live) = self.map.deactivate(pos) else {
            return false;
        };
        let mut dormant = DormantOccupants::default();
        if let Some(id) = live.tank {
            if let Some(tank) = self.tanks.remove(&id) {
                dormant.tank = Some(tank.to_data());
                self.dormant_tanks.insert(id, pos);
            }
        }
        for id in live.bullets {
            if let Some(bullet) = self.bullets.remove(id) {
                dormant.bullets.push(bullet.to_data());
            }
        }
        self.map.store_dormant(pos, dormant);
        true
    }

    /// Activate every dormant cell in the zone. Returns how many woke up.
    pub fn load_zone(&mut self, zone: Zone) -> usize {
        self.map
            .materialized_in(zone)
            .into_iter()
            .filter(|pos| self.activate_point(*pos))
            .count()
    }

    /// Deactivate every live cell in the zone. Returns how many went dormant.
    pub fn unload_zone(&mut self, zone: Zone) -> usize {
        let mut count = 0;
        for pos in self.map.materialized_in(zone) {
            if self.deactivate_point(pos) {
                count += 1;
                self.map.compact(pos);
            }
        }
        count
    }

    /// Register or move the zone a viewer keeps alive
    pub fn set_viewer_zone(&mut self, viewer: ViewerId, zone: Zone) {
        self.viewer_zones.insert(viewer, zone);
    }

    pub fn remove_viewer(&mut self, viewer: ViewerId) {
        self.viewer_zones.remove(&viewer);
    }

    pub fn viewer_count(&self) -> usize {
        self.viewer_zones.len()
    }

    /// Keep only cells inside some viewer zone active.
    /// Without viewers everything stays as it is.
    pub fn refresh_zones(&mut self) -> (usize, usize) {
        if self.viewer_zones.is_empty() {
            return (0, 0);
        }
        let zones: Vec<Zone> = self.viewer_zones.values().copied().collect();
        let mut unloaded = 0;
        for pos in self.map.active_positions() {
            if zones.iter().any(|z| z.contains(pos)) {
                continue;
            }
            if self.deactivate_point(pos) {
                unloaded += 1;
                self.map.compact(pos);
            }
        }
        let loaded: usize = zones.into_iter().map(|zone| self.load_zone(zone)).sum();
        if loaded > 0 || unloaded > 0 {
            debug!("Zone refresh: {} loaded, {} unloaded", loaded, unloaded);
        }
        (loaded, unloaded)
    }

    // ----- views -----

    /// One glyph per cell
    pub fn display_text(&self, pos: Position) -> String {
        let point = self.map.at(pos);
        if point.has(Status::Wall) {
            return "#".to_string();
        }
        if point.has(Status::Tank) {
            let direction = point
                .tank_id()
                .and_then(|id| self.tanks.get(&id))
                .map(|t| t.direction)
                .or_else(|| point.dormant().and_then(|d| d.tank.as_ref()).map(|t| t.direction))
                .unwrap_or_default();
            return direction.glyph().to_string();
        }
        if point.has(Status::Bullet) {
            return "*".to_string();
        }
        " ".to_string()
    }

    pub fn cell_view(&self, pos: Position) -> CellView {
        let point = self.map.at(pos);
        CellView {
            position: pos,
            statuses: point.statuses().to_vec(),
            tank: point
                .tank_id()
                .or_else(|| point.dormant().and_then(|d| d.tank.as_ref()).map(|t| t.info.id)),
            text: self.display_text(pos),
        }
    }

    /// Non-empty cells of a zone in row-major order
    pub fn cells_in(&self, zone: Zone) -> Vec<CellView> {
        zone.positions()
            .filter(|pos| !self.map.at(*pos).statuses().is_empty())
            .map(|pos| self.cell_view(pos))
            .collect()
    }

    /// Views of all live tanks, by id
    pub fn tank_views(&self) -> Vec<TankView> {
        self.tank_ids().into_iter().filter_map(|id| self.tanks.get(&id)).map(Tank::view).collect()
    }

    /// Views of live tanks standing inside `zone`, by id
    pub fn tank_views_in(&self, zone: Zone) -> Vec<TankView> {
        self.tank_ids()
            .into_iter()
            .filter_map(|id| self.tanks.get(&id))
            .filter(|t| !t.cleared && zone.contains(t.position))
            .map(Tank::view)
            .collect()
    }

    /// Every placed live tank must be referenced by its own cell
    pub fn check_consistency(&self) -> Result<(), String> {
        for (id, tank) in &self.tanks {
            if tank.cleared {
                continue;
            }
            let point = self.map.at(tank.position);
            if !point.has(Status::Tank) || point.tank_id() != Some(*id) {
                return Err(format!("tank {} not found at its cell {}", id, tank.position));
            }
        }
        for (id, bullet) in &self.bullets {
            if !self.map.at(bullet.position).bullets().contains(&id) {
                return Err(format!("bullet {:?} not found at its cell {}", id, bullet.position));
            }
        }
        Ok(())
    }
}
