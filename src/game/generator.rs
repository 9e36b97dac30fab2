//! Procedural terrain for never-visited cells
//!
//! Pure function of (position, seed). Nothing is stored, so arbitrarily
//! distant cells can be classified without generating anything in between,
//! and a server and a reconnecting client agree on the same terrain.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::game::constants::map::CLEAR_ORIGIN_RADIUS;
use crate::util::grid::Position;

/// Classification of an untouched cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terrain {
    Wall,
    Empty,
}

/// Seeded terrain generator
#[derive(Debug, Clone, Copy)]
pub struct PointGenerator {
    seed: u64,
    wall_density: f64,
}

impl PointGenerator {
    pub fn new(seed: u64, wall_density: f64) -> Self {
        Self {
            seed,
            wall_density: wall_density.clamp(0.0, 1.0),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn wall_density(&self) -> f64 {
        self.wall_density
    }

    /// Classify a cell that has no entry in the sparse map
    pub fn generate(&self, pos: Position) -> Terrain {
        if pos.x.abs() <= CLEAR_ORIGIN_RADIUS && pos.y.abs() <= CLEAR_ORIGIN_RADIUS {
            return Terrain::Empty;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(cell_hash(pos, self.seed));
        if rng.gen_bool(self.wall_density) {
            Terrain::Wall
        } else {
            Terrain::Empty
        }
    }

    #[inline]
    pub fn is_wall(&self, pos: Position) -> bool {
        self.generate(pos) == Terrain::Wall
    }
}

/// SplitMix64 finaliser over the packed coordinate and seed
fn cell_hash(pos: Position, seed: u64) -> u64 {
    let packed = ((pos.x as u32 as u64) << 32) | (pos.y as u32 as u64);
    let mut z = packed ^ seed.rotate_left(17) ^ 0x9E37_79B9_7F4A_7C15;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
