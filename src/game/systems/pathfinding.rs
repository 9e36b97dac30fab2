//! Firing-line search and A* route planning
//!
//! An autonomous tank does not walk to its target, it walks to the nearest
//! cell from which the target can be shot: same row or column, nothing
//! solid in between, within bullet range.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::game::constants::ai::STEP_COST;
use crate::game::map::Map;
use crate::util::grid::{Direction, Position};

/// A planned approach to a firing position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Firing-line cell the route ends in
    pub destination: Position,
    /// One step per move, start excluded
    pub route: Vec<Direction>,
}

/// Why planning produced no route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFailure {
    /// No cell can shoot the target at all
    NoFiringLine,
    /// Firing line exists but the search could not reach it
    Unreachable,
}

/// True if a shot from `a` travels unobstructed to `b`: the two cells share
/// exactly one axis and every cell strictly between them is free of walls
/// and tanks. With `range`, `b` must also be at most that far away.
pub fn is_in_firing_line(map: &Map, a: Position, b: Position, range: Option<u32>) -> bool {
    let Some(direction) = a.direction_to(b) else {
        return false;
    };
    let distance = a.manhattan(b);
    if range.is_some_and(|r| distance > r) {
        return false;
    }
    let mut cell = a.step(direction);
    while cell != b {
        if !map.is_free(cell) {
            return false;
        }
        cell = cell.step(direction);
    }
    true
}

/// Cells within `range` from which `target` can be shot, scanning outward
/// from the target in `Direction::ALL` order and stopping at the first
/// blocker on each ray. `start` counts as usable even though its own tank
/// occupies it.
pub fn firing_cells(map: &Map, start: Position, target: Position, range: u32) -> Vec<Position> {
    let mut cells = Vec::new();
    for direction in Direction::ALL {
        let mut cell = target;
        for _ in 0..range {
            cell = cell.step(direction);
            if cell == start {
                cells.push(cell);
                break;
            }
            if !map.is_free(cell) {
                break;
            }
            cells.push(cell);
        }
    }
    cells
}

/// Plan a route from `start` to a cell that can shoot `target`.
///
/// The goal used by the heuristic is the firing cell nearest to `start`
/// (first in scan order on ties); the search stops as soon as any firing
/// cell is inserted into the open set and that cell becomes the destination.
pub fn plan_route(map: &Map, start: Position, target: Position, range: u32, node_budget: usize) -> Result<Plan, PlanFailure> {
    let cells = firing_cells(map, start, target, range);
    let goal = cells
        .iter()
        .copied()
        .enumerate()
        .min_by_key(|(index, cell)| (start.manhattan(*cell), *index))
        .map(|(_, cell)| cell)
        .ok_or(PlanFailure::NoFiringLine)?;
    let firing: FxHashSet<Position> = cells.into_iter().collect();

    if firing.contains(&start) {
        return Ok(Plan {
            destination: start,
            route: Vec::new(),
        });
    }

    astar(map, start, goal, &firing, node_budget)
        .map(|(destination, route)| Plan { destination, route })
        .ok_or(PlanFailure::Unreachable)
}

/// A* over free cells with uniform step cost
fn astar(
    map: &Map,
    start: Position,
    goal: Position,
    accept: &FxHashSet<Position>,
    node_budget: usize,
) -> Option<(Position, Vec<Direction>)> {
    let heuristic = |pos: Position| pos.manhattan(goal) * STEP_COST;

    // Ordered by f, then h, then position for a reproducible expansion order
    let mut open: BinaryHeap<Reverse<(u32, u32, Position)>> = BinaryHeap::new();
    let mut best_g: FxHashMap<Position, u32> = FxHashMap::default();
    let mut came_from: FxHashMap<Position, (Position, Direction)> = FxHashMap::default();
    let mut closed: FxHashSet<Position> = FxHashSet::default();

    best_g.insert(start, 0);
    open.push(Reverse((heuristic(start), heuristic(start), start)));

    let mut expanded = 0usize;
    while let Some(Reverse((_, _, current))) = open.pop() {
        if !closed.insert(current) {
            continue; // stale heap entry
        }
        expanded += 1;
        if expanded > node_budget {
            return None;
        }

        let g = best_g[&current];
        for (direction, next) in current.neighbors() {
            if closed.contains(&next) || !map.is_free(next) {
                continue;
            }
            let tentative = g + STEP_COST;
            if best_g.get(&next).is_some_and(|&known| known <= tentative) {
                continue;
            }
            best_g.insert(next, tentative);
            came_from.insert(next, (current, direction));
            if accept.contains(&next) {
                return Some((next, reconstruct(&came_from, start, next)));
            }
            let h = heuristic(next);
            open.push(Reverse((tentative + h, h, next)));
        }
    }
    None
}

fn reconstruct(came_from: &FxHashMap<Position, (Position, Direction)>, start: Position, end: Position) -> Vec<Direction> {
    let mut route = Vec::new();
    let mut cell = end;
    while cell != start {
        let (previous, direction) = came_from[&cell];
        route.push(direction);
        cell = previous;
    }
    route.reverse();
    route
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::generator::PointGenerator;
    use crate::game::map::FillKind;
    use crate::util::grid::Zone;

    fn open_map() -> Map {
        Map::new(PointGenerator::new(11, 0.0))
    }

    fn walk(start: Position, route: &[Direction]) -> Position {
        route.iter().fold(start, |pos, d| pos.step(*d))
    }

    #[test]
    fn test_firing_line_requires_shared_axis() {
        let map = open_map();
        assert!(is_in_firing_line(&map, Position::ORIGIN, Position::new(0, 5), None));
        assert!(is_in_firing_line(&map, Position::ORIGIN, Position::new(-4, 0), None));
        assert!(!is_in_firing_line(&map, Position::ORIGIN, Position::new(3, 5), None));
        assert!(!is_in_firing_line(&map, Position::ORIGIN, Position::ORIGIN, None));
    }

    #[test]
    fn test_firing_line_blocked_between() {
        let mut map = open_map();
        map.fill(Zone::new(0, 1, 3, 4), FillKind::Wall);
        assert!(!is_in_firing_line(&map, Position::ORIGIN, Position::new(0, 5), None));
        // Endpoints themselves are not checked
        assert!(is_in_firing_line(&map, Position::ORIGIN, Position::new(0, 3), None));

        map.fill(Zone::new(0, 1, 3, 4), FillKind::Clear);
        map.add_tank(9, Position::new(0, 2));
        assert!(!is_in_firing_line(&map, Position::ORIGIN, Position::new(0, 5), None));
    }

    #[test]
    fn test_firing_line_range() {
        let map = open_map();
        assert!(is_in_firing_line(&map, Position::ORIGIN, Position::new(6, 0), Some(6)));
        assert!(!is_in_firing_line(&map, Position::ORIGIN, Position::new(7, 0), Some(6)));
    }

    #[test]
    fn test_firing_cells_stop_at_blockers() {
        let mut map = open_map();
        let target = Position::new(10, 10);
        map.fill(Zone::new(10, 11, 12, 13), FillKind::Wall);
        let cells = firing_cells(&map, Position::ORIGIN, target, 4);
        assert!(cells.contains(&Position::new(10, 11)));
        assert!(!cells.contains(&Position::new(10, 12)));
        assert!(!cells.contains(&Position::new(10, 13)));
        assert!(cells.contains(&Position::new(6, 10)));
        assert!(!cells.contains(&Position::new(5, 10)));
        for cell in &cells {
            assert!(is_in_firing_line(&map, *cell, target, Some(4)));
        }
    }

    #[test]
    fn test_route_length_matches_manhattan_on_open_ground() {
        let map = open_map();
        let start = Position::ORIGIN;
        let target = Position::new(5, 5);
        let plan = plan_route(&map, start, target, 30, 10_000).unwrap();

        assert_eq!(plan.route.len() as u32, start.manhattan(plan.destination));
        assert_eq!(walk(start, &plan.route), plan.destination);
        assert!(is_in_firing_line(&map, plan.destination, target, Some(30)));
        assert_eq!(start.manhattan(plan.destination), 5);
    }

    #[test]
    fn test_already_in_line_needs_no_route() {
        let map = open_map();
        let plan = plan_route(&map, Position::ORIGIN, Position::new(0, 8), 30, 100).unwrap();
        assert_eq!(plan.destination, Position::ORIGIN);
        assert!(plan.route.is_empty());
    }

    #[test]
    fn test_route_goes_around_wall() {
        let mut map = open_map();
        // Wall between the tank and the target's column
        map.fill(Zone::new(3, 4, -5, 6), FillKind::Wall);
        let start = Position::ORIGIN;
        let target = Position::new(6, 20);
        let plan = plan_route(&map, start, target, 30, 10_000).unwrap();

        let mut pos = start;
        for direction in &plan.route {
            pos = pos.step(*direction);
            assert!(map.is_free(pos), "route crosses {}", pos);
        }
        assert_eq!(pos, plan.destination);
        assert!(is_in_firing_line(&map, plan.destination, target, Some(30)));
    }

    #[test]
    fn test_boxed_target_has_no_firing_line() {
        let map = open_map();
        let target = Position::new(4, 4);
        // Every ray is immediately blocked by walls
        let mut walled = open_map();
        walled.fill(Zone::new(3, 6, 3, 6), FillKind::Wall);
        walled.fill(Zone::new(4, 5, 4, 5), FillKind::Clear);
        assert_eq!(
            plan_route(&walled, Position::ORIGIN, target, 10, 1_000),
            Err(PlanFailure::NoFiringLine)
        );
        assert!(plan_route(&map, Position::ORIGIN, target, 10, 1_000).is_ok());
    }

    #[test]
    fn test_enclosed_start_is_unreachable() {
        let mut map = open_map();
        map.fill(Zone::new(-1, 2, -1, 2), FillKind::Wall);
        map.fill(Zone::new(0, 1, 0, 1), FillKind::Clear);
        map.add_tank(1, Position::ORIGIN);
        assert_eq!(
            plan_route(&map, Position::ORIGIN, Position::new(10, 10), 5, 1_000),
            Err(PlanFailure::Unreachable)
        );
    }

    #[test]
    fn test_node_budget_bounds_search() {
        let mut map = open_map();
        // Long wall between tank and target
        map.fill(Zone::new(50, 51, -100, 100), FillKind::Wall);
        let result = plan_route(&map, Position::ORIGIN, Position::new(60, 0), 5, 50);
        assert_eq!(result, Err(PlanFailure::Unreachable));
    }
}
