//! Sparse, lazily generated infinite map
//!
//! Only cells that were ever touched are stored. Anything else is resolved
//! through the [`PointGenerator`]. Every mutation records its position in a
//! change-set that renderers and replication drain.

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::game::generator::PointGenerator;
use crate::game::state::{BulletData, BulletId, TankData, TankId};
use crate::util::grid::{Direction, Position, Zone};

/// Tag attached to a cell. BULLET may repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Status {
    Wall,
    Tank,
    Bullet,
}

/// Result of a movement primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    Blocked,
}

/// Bulk operation for [`Map::fill`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FillKind {
    Wall,
    Clear,
}

/// What a fill touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillReport {
    pub changed: usize,
    /// Cells left alone because a tank stands on them
    pub skipped: usize,
}

/// Live entity references of an active cell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveOccupants {
    pub tank: Option<TankId>,
    pub bullets: SmallVec<[BulletId; 2]>,
}

/// Snapshots held by a dormant cell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DormantOccupants {
    pub tank: Option<TankData>,
    pub bullets: Vec<BulletData>,
}

impl DormantOccupants {
    pub fn is_empty(&self) -> bool {
        self.tank.is_none() && self.bullets.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Active(ActiveOccupants),
    Inactive(DormantOccupants),
}

/// One materialised cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    statuses: SmallVec<[Status; 4]>,
    lifecycle: Lifecycle,
}

impl Point {
    fn empty() -> Self {
        Self {
            statuses: SmallVec::new(),
            lifecycle: Lifecycle::Active(ActiveOccupants::default()),
        }
    }

    fn wall() -> Self {
        let mut point = Self::empty();
        point.statuses.push(Status::Wall);
        point
    }

    pub fn has(&self, status: Status) -> bool {
        self.statuses.contains(&status)
    }

    pub fn count(&self, status: Status) -> usize {
        self.statuses.iter().filter(|s| **s == status).count()
    }

    pub fn statuses(&self) -> &[Status] {
        &self.statuses
    }

    pub fn is_active(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Active(_))
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Live tank occupying an active cell
    pub fn tank_id(&self) -> Option<TankId> {
        match &self.lifecycle {
            Lifecycle::Active(occ) => occ.tank,
            Lifecycle::Inactive(_) => None,
        }
    }

    /// Live bullets in an active cell
    pub fn bullets(&self) -> &[BulletId] {
        match &self.lifecycle {
            Lifecycle::Active(occ) => &occ.bullets,
            Lifecycle::Inactive(_) => &[],
        }
    }

    /// Snapshots of a dormant cell
    pub fn dormant(&self) -> Option<&DormantOccupants> {
        match &self.lifecycle {
            Lifecycle::Active(_) => None,
            Lifecycle::Inactive(dormant) => Some(dormant),
        }
    }

    fn push_status(&mut self, status: Status) {
        self.statuses.push(status);
    }

    fn pop_status(&mut self, status: Status) -> bool {
        match self.statuses.iter().position(|s| *s == status) {
            Some(index) => {
                self.statuses.remove(index);
                true
            }
            None => false,
        }
    }

    /// Live references of an active cell.
    ///
    /// Panics on a dormant cell: live entity tables and active cells must
    /// stay in lockstep, and continuing would corrupt both.
    fn occupants_mut(&mut self, pos: Position) -> &mut ActiveOccupants {
        match &mut self.lifecycle {
            Lifecycle::Active(occ) => occ,
            Lifecycle::Inactive(_) => panic!("lifecycle violation: live access to dormant cell {}", pos),
        }
    }
}

/// The sparse map
#[derive(Debug, Clone)]
pub struct Map {
    points: HashMap<Position, Point>,
    changes: HashSet<Position>,
    generator: PointGenerator,
    empty: Point,
    wall: Point,
}

impl Map {
    pub fn new(generator: PointGenerator) -> Self {
        Self {
            points: HashMap::with_capacity(1024),
            changes: HashSet::new(),
            generator,
            empty: Point::empty(),
            wall: Point::wall(),
        }
    }

    pub fn generator(&self) -> &PointGenerator {
        &self.generator
    }

    /// Read-only view of a cell; ungenerated cells resolve to a shared
    /// empty or wall point without touching the map
    pub fn at(&self, pos: Position) -> &Point {
        match self.points.get(&pos) {
            Some(point) => point,
            None if self.generator.is_wall(pos) => &self.wall,
            None => &self.empty,
        }
    }

    pub fn is_materialized(&self, pos: Position) -> bool {
        self.points.contains_key(&pos)
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_wall(&self, pos: Position) -> bool {
        self.at(pos).has(Status::Wall)
    }

    #[inline]
    pub fn has_tank(&self, pos: Position) -> bool {
        self.at(pos).has(Status::Tank)
    }

    /// Neither wall nor tank
    #[inline]
    pub fn is_free(&self, pos: Position) -> bool {
        let point = self.at(pos);
        !point.has(Status::Wall) && !point.has(Status::Tank)
    }

    fn touch(&mut self, pos: Position) -> &mut Point {
        let generator = self.generator;
        self.points.entry(pos).or_insert_with(|| {
            if generator.is_wall(pos) {
                Point::wall()
            } else {
                Point::empty()
            }
        })
    }

    #[inline]
    pub fn mark_changed(&mut self, pos: Position) {
        self.changes.insert(pos);
    }

    /// Place a tank. Refused on walls, occupied cells and dormant cells.
    pub fn add_tank(&mut self, id: TankId, pos: Position) -> bool {
        let point = self.at(pos);
        if point.has(Status::Wall) || point.has(Status::Tank) || !point.is_active() {
            return false;
        }
        let point = self.touch(pos);
        point.push_status(Status::Tank);
        point.occupants_mut(pos).tank = Some(id);
        self.mark_changed(pos);
        true
    }

    /// Place a bullet. Refused on walls and dormant cells.
    pub fn add_bullet(&mut self, id: BulletId, pos: Position) -> bool {
        let point = self.at(pos);
        if point.has(Status::Wall) || !point.is_active() {
            return false;
        }
        let point = self.touch(pos);
        point.push_status(Status::Bullet);
        point.occupants_mut(pos).bullets.push(id);
        self.mark_changed(pos);
        true
    }

    /// Remove one occurrence of `status`. Removing TANK or BULLET from an
    /// active cell also drops the matching live reference.
    pub fn remove_status(&mut self, status: Status, pos: Position) -> bool {
        if !self.at(pos).has(status) {
            return false;
        }
        let point = self.touch(pos);
        point.pop_status(status);
        if let Lifecycle::Active(occ) = &mut point.lifecycle {
            match status {
                Status::Tank => occ.tank = None,
                Status::Bullet => {
                    occ.bullets.pop();
                }
                Status::Wall => {}
            }
        }
        self.mark_changed(pos);
        true
    }

    /// Take the live tank off a cell
    pub fn remove_tank(&mut self, pos: Position) -> Option<TankId> {
        let id = self.at(pos).tank_id()?;
        self.remove_status(Status::Tank, pos);
        Some(id)
    }

    /// Take one specific live bullet off a cell
    pub fn remove_bullet(&mut self, id: BulletId, pos: Position) -> bool {
        let Some(point) = self.points.get_mut(&pos) else {
            return false;
        };
        let Lifecycle::Active(occ) = &mut point.lifecycle else {
            return false;
        };
        let Some(index) = occ.bullets.iter().position(|b| *b == id) else {
            return false;
        };
        occ.bullets.remove(index);
        point.pop_status(Status::Bullet);
        self.mark_changed(pos);
        true
    }

    /// Move the tank at `pos` one cell. Blocked by walls, tanks and dormant cells.
    pub fn tank_move(&mut self, pos: Position, direction: Direction) -> MoveOutcome {
        let dest = pos.step(direction);
        let Some(id) = self.at(pos).tank_id() else {
            return MoveOutcome::Blocked;
        };
        let target = self.at(dest);
        if target.has(Status::Wall) || target.has(Status::Tank) || !target.is_active() {
            return MoveOutcome::Blocked;
        }

        let source = self.touch(pos);
        source.pop_status(Status::Tank);
        source.occupants_mut(pos).tank = None;

        let target = self.touch(dest);
        target.push_status(Status::Tank);
        target.occupants_mut(dest).tank = Some(id);

        self.mark_changed(pos);
        self.mark_changed(dest);
        MoveOutcome::Moved
    }

    /// Move bullet `id` from `pos` one cell. Blocked by walls and dormant cells only.
    pub fn bullet_move(&mut self, id: BulletId, pos: Position, direction: Direction) -> MoveOutcome {
        let dest = pos.step(direction);
        if !self.at(pos).bullets().contains(&id) {
            return MoveOutcome::Blocked;
        }
        let target = self.at(dest);
        if target.has(Status::Wall) || !target.is_active() {
            return MoveOutcome::Blocked;
        }

        self.remove_bullet(id, pos);
        let target = self.touch(dest);
        target.push_status(Status::Bullet);
        target.occupants_mut(dest).bullets.push(id);
        self.mark_changed(dest);
        MoveOutcome::Moved
    }

    /// Set or clear WALL over a zone. Cells holding a tank are never walled.
    pub fn fill(&mut self, zone: Zone, kind: FillKind) -> FillReport {
        let mut report = FillReport::default();
        for pos in zone.positions() {
            let point = self.at(pos);
            match kind {
                FillKind::Wall => {
                    if point.has(Status::Wall) {
                        continue;
                    }
                    if point.has(Status::Tank) {
                        report.skipped += 1;
                        continue;
                    }
                    self.touch(pos).push_status(Status::Wall);
                }
                FillKind::Clear => {
                    if !point.has(Status::Wall) {
                        continue;
                    }
                    let point = self.touch(pos);
                    while point.pop_status(Status::Wall) {}
                }
            }
            self.mark_changed(pos);
            report.changed += 1;
        }
        report
    }

    /// Positions changed since the last drain, in position order
    pub fn drain_changes(&mut self) -> Vec<Position> {
        let mut changes: Vec<Position> = std::mem::take(&mut self.changes).into_iter().collect();
        changes.sort_unstable();
        changes
    }

    pub fn pending_changes(&self) -> usize {
        self.changes.len()
    }

    // ----- lifecycle -----

    /// Switch an active cell to dormant, handing back its live references.
    /// The caller snapshots them and returns the snapshots via [`Map::store_dormant`].
    /// Returns None for unmaterialised or already dormant cells.
    pub fn deactivate(&mut self, pos: Position) -> Option<ActiveOccupants> {
        let point = self.points.get_mut(&pos)?;
        match &mut point.lifecycle {
            Lifecycle::Inactive(_) => None,
            Lifecycle::Active(occ) => {
                let occupants = std::mem::take(occ);
                point.lifecycle = Lifecycle::Inactive(DormantOccupants::default());
                Some(occupants)
            }
        }
    }

    /// Attach snapshots to a dormant cell
    pub fn store_dormant(&mut self, pos: Position, dormant: DormantOccupants) {
        match self.points.get_mut(&pos).map(|p| &mut p.lifecycle) {
            Some(Lifecycle::Inactive(slot)) => *slot = dormant,
            _ => panic!("lifecycle violation: storing snapshots in non-dormant cell {}", pos),
        }
    }

    /// Switch a dormant cell back to active, handing back its snapshots.
    /// The caller rebuilds the entities and attaches them with
    /// [`Map::attach_tank`]/[`Map::attach_bullet`].
    /// Returns None for unmaterialised or already active cells.
    pub fn activate(&mut self, pos: Position) -> Option<DormantOccupants> {
        let point = self.points.get_mut(&pos)?;
        match &mut point.lifecycle {
            Lifecycle::Active(_) => None,
            Lifecycle::Inactive(dormant) => {
                let dormant = std::mem::take(dormant);
                point.lifecycle = Lifecycle::Active(ActiveOccupants::default());
                Some(dormant)
            }
        }
    }

    /// Re-link a rebuilt tank to the TANK status its cell kept while dormant
    pub fn attach_tank(&mut self, pos: Position, id: TankId) {
        let point = self.touch(pos);
        debug_assert!(point.has(Status::Tank));
        point.occupants_mut(pos).tank = Some(id);
    }

    /// Re-link a rebuilt bullet to a BULLET status its cell kept while dormant
    pub fn attach_bullet(&mut self, pos: Position, id: BulletId) {
        let point = self.touch(pos);
        point.occupants_mut(pos).bullets.push(id);
    }

    /// Drop a dormant cell that carries nothing the generator would not reproduce
    pub fn compact(&mut self, pos: Position) -> bool {
        let removable = match self.points.get(&pos) {
            Some(point) => {
                point.statuses.is_empty()
                    && matches!(&point.lifecycle, Lifecycle::Inactive(d) if d.is_empty())
                    && !self.generator.is_wall(pos)
            }
            None => false,
        };
        if removable {
            self.points.remove(&pos);
        }
        removable
    }

    /// Materialised cells inside `zone`, in position order
    pub fn materialized_in(&self, zone: Zone) -> Vec<Position> {
        let mut positions: Vec<Position> = if zone.area() <= self.points.len() as u64 {
            zone.positions().filter(|p| self.points.contains_key(p)).collect()
        } else {
            self.points.keys().copied().filter(|p| zone.contains(*p)).collect()
        };
        positions.sort_unstable();
        positions
    }

    /// All active materialised cells, in position order
    pub fn active_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .points
            .iter()
            .filter(|(_, p)| p.is_active())
            .map(|(pos, _)| *pos)
            .collect();
        positions.sort_unstable();
        positions
    }

    /// Cells currently holding at least one bullet, in position order
    pub fn bullet_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .points
            .iter()
            .filter(|(_, p)| p.has(Status::Bullet) && p.is_active())
            .map(|(pos, _)| *pos)
            .collect();
        positions.sort_unstable();
        positions
    }
}
