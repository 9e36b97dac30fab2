use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer cell coordinate on the unbounded grid.
///
/// Field order matters: the derived `Ord` compares `x` first, then `y`,
/// which is the lexicographic order used for deterministic tie-breaking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0, y: 0 };

    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The neighbouring cell one step in `direction`
    #[inline]
    pub fn step(self, direction: Direction) -> Self {
        let (dx, dy) = direction.delta();
        Self {
            x: self.x.wrapping_add(dx),
            y: self.y.wrapping_add(dy),
        }
    }

    #[inline]
    pub fn manhattan(self, other: Position) -> u32 {
        self.x.abs_diff(other.x).saturating_add(self.y.abs_diff(other.y))
    }

    /// Chebyshev distance, used for square neighbourhood scans
    #[inline]
    pub fn chebyshev(self, other: Position) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }

    /// Direction of `other` if it lies on the same row or column
    pub fn direction_to(self, other: Position) -> Option<Direction> {
        if self == other {
            return None;
        }
        if self.x == other.x {
            Some(if other.y > self.y { Direction::Up } else { Direction::Down })
        } else if self.y == other.y {
            Some(if other.x > self.x { Direction::Right } else { Direction::Left })
        } else {
            None
        }
    }

    /// The four orthogonal neighbours in `Direction::ALL` order
    pub fn neighbors(self) -> [(Direction, Position); 4] {
        Direction::ALL.map(|d| (d, self.step(d)))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Facing/movement direction. UP increases y.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Fixed scan order used wherever iteration order must be reproducible
    pub const ALL: [Direction; 4] = [Direction::Up, Direction::Down, Direction::Left, Direction::Right];

    #[inline]
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, 1),
            Direction::Down => (0, -1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    #[inline]
    pub fn reverse(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// Glyph used by cell views for a tank facing this way
    pub fn glyph(self) -> char {
        match self {
            Direction::Up => '^',
            Direction::Down => 'v',
            Direction::Left => '<',
            Direction::Right => '>',
        }
    }
}

/// Axis-aligned rectangle of cells, half-open on both axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Zone {
    pub x_min: i32,
    pub x_max: i32,
    pub y_min: i32,
    pub y_max: i32,
}

impl Zone {
    pub const fn new(x_min: i32, x_max: i32, y_min: i32, y_max: i32) -> Self {
        Self { x_min, x_max, y_min, y_max }
    }

    /// Zone centred on `center` extending `half_width`/`half_height` cells each way
    pub fn around(center: Position, half_width: i32, half_height: i32) -> Self {
        Self {
            x_min: center.x.saturating_sub(half_width),
            x_max: center.x.saturating_add(half_width).saturating_add(1),
            y_min: center.y.saturating_sub(half_height),
            y_max: center.y.saturating_add(half_height).saturating_add(1),
        }
    }

    #[inline]
    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= self.x_min && pos.x < self.x_max && pos.y >= self.y_min && pos.y < self.y_max
    }

    pub fn is_valid(&self) -> bool {
        self.x_min < self.x_max && self.y_min < self.y_max
    }

    pub fn width(&self) -> u64 {
        (self.x_max as i64 - self.x_min as i64).max(0) as u64
    }

    pub fn height(&self) -> u64 {
        (self.y_max as i64 - self.y_min as i64).max(0) as u64
    }

    pub fn area(&self) -> u64 {
        self.width() * self.height()
    }

    /// All cells, row by row (y ascending, then x ascending)
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        let (x_min, x_max) = (self.x_min, self.x_max);
        (self.y_min..self.y_max).flat_map(move |y| (x_min..x_max).map(move |x| Position::new(x, y)))
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}) x [{}..{})", self.x_min, self.x_max, self.y_min, self.y_max)
    }
}
