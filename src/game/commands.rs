//! Administrative and player command verbs
//!
//! Every verb validates its arguments against the current world before
//! touching it, so a rejected command never leaves partial changes behind.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::game::constants::{ai, bullet, map, tank};
use crate::game::map::FillKind;
use crate::game::state::{TankId, TankInfo};
use crate::game::world::SimulationWorld;
use crate::util::grid::{Position, Zone};

/// Errors reported back to the issuing user
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("no tank with id {0}")]
    UnknownTank(TankId),
    #[error("tank {0} is dead")]
    TankDead(TankId),
    #[error("tank {0} is alive")]
    TankAlive(TankId),
    #[error("cell {0} is blocked")]
    CellBlocked(Position),
    #[error("no free cell found")]
    NoFreeCell,
    #[error("level must be 1-{max}, got {got}")]
    InvalidLevel { got: u8, max: u8 },
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("{name} must be {min}-{max}, got {got}")]
    OutOfRange { name: &'static str, got: i64, min: i64, max: i64 },
    #[error("invalid zone {0}")]
    InvalidZone(Zone),
}

/// Tank attribute adjustable at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attribute {
    MaxHp(i32),
    Hp(i32),
    Gap(u32),
    BulletLethality(i32),
    BulletRange(i32),
    BulletBounces(i32),
    Name(String),
}

/// A command as ingested from a client or the console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    CreateTank { name: String, at: Option<Position> },
    CreateAutoTank { level: u8, at: Option<Position> },
    Revive { id: TankId, at: Option<Position> },
    Kill { id: TankId },
    Delete { id: TankId },
    Teleport { id: TankId, to: Position },
    Fill { zone: Zone, kind: FillKind },
    SetAttribute { id: TankId, attribute: Attribute },
}

/// Run a command, returning a human-readable confirmation
pub fn execute(world: &mut SimulationWorld, command: Command) -> Result<String, CommandError> {
    match command {
        Command::CreateTank { name, at } => {
            let id = create_tank(world, name, at)?;
            Ok(format!("created tank {}", id))
        }
        Command::CreateAutoTank { level, at } => {
            let id = create_auto_tank(world, level, at)?;
            Ok(format!("created level {} auto tank {}", level, id))
        }
        Command::Revive { id, at } => {
            let pos = revive(world, id, at)?;
            Ok(format!("revived tank {} at {}", id, pos))
        }
        Command::Kill { id } => {
            kill(world, id)?;
            Ok(format!("killed tank {}", id))
        }
        Command::Delete { id } => {
            delete(world, id)?;
            Ok(format!("deleted tank {}", id))
        }
        Command::Teleport { id, to } => {
            teleport(world, id, to)?;
            Ok(format!("teleported tank {} to {}", id, to))
        }
        Command::Fill { zone, kind } => {
            let report = fill(world, zone, kind)?;
            Ok(format!("filled {}: {} changed, {} skipped", zone, report.changed, report.skipped))
        }
        Command::SetAttribute { id, attribute } => {
            set_attribute(world, id, attribute)?;
            Ok(format!("updated tank {}", id))
        }
    }
}

/// Pick `at` if it is placeable, otherwise a random free spawn cell
fn placement(world: &mut SimulationWorld, at: Option<Position>) -> Result<Position, CommandError> {
    match at {
        Some(pos) => {
            world.activate_point(pos);
            if world.is_placeable(pos) {
                Ok(pos)
            } else {
                Err(CommandError::CellBlocked(pos))
            }
        }
        None => world.random_spawn_cell().ok_or(CommandError::NoFreeCell),
    }
}

fn validate_name(name: &str) -> Result<(), CommandError> {
    if name.trim().is_empty() {
        return Err(CommandError::InvalidName("empty".to_string()));
    }
    if name.chars().count() > tank::MAX_NAME_LEN {
        return Err(CommandError::InvalidName(format!("longer than {} characters", tank::MAX_NAME_LEN)));
    }
    if name.chars().any(char::is_control) {
        return Err(CommandError::InvalidName("control characters".to_string()));
    }
    Ok(())
}

fn validate_range(name: &'static str, value: i64, min: i64, max: i64) -> Result<(), CommandError> {
    if value < min || value > max {
        return Err(CommandError::OutOfRange { name, got: value, min, max });
    }
    Ok(())
}

/// Live-table tank, waking it if it sleeps in a dormant cell
fn require_tank(world: &mut SimulationWorld, id: TankId) -> Result<(), CommandError> {
    if world.wake_tank(id) {
        Ok(())
    } else {
        Err(CommandError::UnknownTank(id))
    }
}

fn require_alive(world: &mut SimulationWorld, id: TankId) -> Result<(), CommandError> {
    require_tank(world, id)?;
    match world.tank(id) {
        Some(tank) if tank.is_alive() && !tank.cleared => Ok(()),
        Some(_) => Err(CommandError::TankDead(id)),
        None => Err(CommandError::UnknownTank(id)),
    }
}

pub fn create_tank(world: &mut SimulationWorld, name: String, at: Option<Position>) -> Result<TankId, CommandError> {
    validate_name(&name)?;
    let pos = placement(world, at)?;
    let id = world.allocate_tank_id();
    let info = world.player_info(id, name);
    let id = world.insert_tank(info, pos).ok_or(CommandError::CellBlocked(pos))?;
    info!("Tank {} created at {}", id, pos);
    Ok(id)
}

pub fn create_auto_tank(world: &mut SimulationWorld, level: u8, at: Option<Position>) -> Result<TankId, CommandError> {
    if level == 0 || level > ai::MAX_LEVEL {
        return Err(CommandError::InvalidLevel { got: level, max: ai::MAX_LEVEL });
    }
    let pos = placement(world, at)?;
    let id = world.allocate_tank_id();
    let id = world
        .insert_tank(TankInfo::auto(id, level), pos)
        .ok_or(CommandError::CellBlocked(pos))?;
    info!("Auto tank {} (level {}) created at {}", id, level, pos);
    Ok(id)
}

/// Revive a dead or cleared tank
pub fn revive(world: &mut SimulationWorld, id: TankId, at: Option<Position>) -> Result<Position, CommandError> {
    require_tank(world, id)?;
    if world.tank(id).is_some_and(|t| t.is_alive() && !t.cleared) {
        return Err(CommandError::TankAlive(id));
    }
    let pos = placement(world, at)?;
    let tank = world.tanks.get_mut(&id).ok_or(CommandError::UnknownTank(id))?;
    if !tank.revive(&mut world.map, pos) {
        return Err(CommandError::CellBlocked(pos));
    }
    Ok(pos)
}

/// Kill a live tank; the next reap clears it from the map
pub fn kill(world: &mut SimulationWorld, id: TankId) -> Result<(), CommandError> {
    require_alive(world, id)?;
    if let Some(tank) = world.tank_mut(id) {
        tank.kill();
    }
    Ok(())
}

pub fn delete(world: &mut SimulationWorld, id: TankId) -> Result<(), CommandError> {
    if world.delete_tank(id) {
        Ok(())
    } else {
        Err(CommandError::UnknownTank(id))
    }
}

pub fn teleport(world: &mut SimulationWorld, id: TankId, to: Position) -> Result<(), CommandError> {
    require_alive(world, id)?;
    world.activate_point(to);
    if !world.is_placeable(to) {
        return Err(CommandError::CellBlocked(to));
    }
    let tank = world.tanks.get_mut(&id).ok_or(CommandError::UnknownTank(id))?;
    world.map.remove_tank(tank.position);
    if !world.map.add_tank(id, to) {
        // Checked above; put it back where it was
        world.map.add_tank(id, tank.position);
        return Err(CommandError::CellBlocked(to));
    }
    tank.position = to;
    if let Some(state) = tank.auto_mut() {
        state.discard_route();
    }
    Ok(())
}

pub fn fill(world: &mut SimulationWorld, zone: Zone, kind: FillKind) -> Result<crate::game::map::FillReport, CommandError> {
    if !zone.is_valid() || zone.area() > map::MAX_FILL_AREA {
        return Err(CommandError::InvalidZone(zone));
    }
    Ok(world.map.fill(zone, kind))
}

pub fn set_attribute(world: &mut SimulationWorld, id: TankId, attribute: Attribute) -> Result<(), CommandError> {
    require_tank(world, id)?;
    let tank = world.tanks.get(&id).ok_or(CommandError::UnknownTank(id))?;

    match &attribute {
        Attribute::MaxHp(v) => validate_range("max_hp", *v as i64, 1, tank::MAX_HP_LIMIT as i64)?,
        Attribute::Hp(v) => {
            if !tank.is_alive() {
                return Err(CommandError::TankDead(id));
            }
            validate_range("hp", *v as i64, 1, tank.info.max_hp as i64)?
        }
        Attribute::Gap(v) => validate_range("gap", *v as i64, 0, tank::MAX_GAP as i64)?,
        Attribute::BulletLethality(v) => validate_range("bullet_lethality", *v as i64, 0, bullet::MAX_LETHALITY as i64)?,
        Attribute::BulletRange(v) => validate_range("bullet_range", *v as i64, 1, bullet::MAX_RANGE as i64)?,
        Attribute::BulletBounces(v) => validate_range("bullet_bounces", *v as i64, 1, bullet::MAX_HP as i64)?,
        Attribute::Name(name) => validate_name(name)?,
    }

    let tank = world.tanks.get_mut(&id).ok_or(CommandError::UnknownTank(id))?;
    match attribute {
        Attribute::MaxHp(v) => {
            tank.info.max_hp = v;
            tank.hp = tank.hp.min(v);
        }
        Attribute::Hp(v) => tank.hp = v,
        Attribute::Gap(v) => tank.info.gap = v,
        Attribute::BulletLethality(v) => tank.info.bullet.lethality = v,
        Attribute::BulletRange(v) => tank.info.bullet.range = v,
        Attribute::BulletBounces(v) => tank.info.bullet.hp = v,
        Attribute::Name(name) => tank.info.name = name,
    }
    Ok(())
}
