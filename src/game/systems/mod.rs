pub mod ai;
pub mod combat;
pub mod pathfinding;
pub mod projectile;
