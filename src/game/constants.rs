/// Tank constants
pub mod tank {
    /// Max hit points of a player-controlled tank
    pub const PLAYER_MAX_HP: i32 = 100;
    /// Ticks a player tank waits between actions (players are throttled by input instead)
    pub const PLAYER_GAP: u32 = 0;
    /// Maximum accepted length of a tank display name
    pub const MAX_NAME_LEN: usize = 24;
    /// Upper bound for any configured max hp
    pub const MAX_HP_LIMIT: i32 = 100_000;
    /// Upper bound for any configured action gap
    pub const MAX_GAP: u32 = 1_000;
}

/// Bullet constants
pub mod bullet {
    /// Bounce budget of a player bullet (wall impacts before it dies)
    pub const PLAYER_HP: i32 = 2;
    /// Damage dealt by a player bullet
    pub const PLAYER_LETHALITY: i32 = 25;
    /// Cells a player bullet may travel
    pub const PLAYER_RANGE: i32 = 30;
    /// Upper bounds accepted by attribute commands
    pub const MAX_HP: i32 = 100;
    pub const MAX_LETHALITY: i32 = 10_000;
    pub const MAX_RANGE: i32 = 500;
}

/// Autonomous tank constants
pub mod ai {
    /// Highest autonomous tank level
    pub const MAX_LEVEL: u8 = 5;
    /// Half-width of the square neighbourhood scanned for targets
    pub const SCAN_RADIUS: u32 = 15;
    /// Attackers closer than this become the new target
    pub const RETARGET_DISTANCE: u32 = 20;
    /// Random steps taken when evading
    pub const EVADE_STEPS: u32 = 6;
    /// Expansion budget of one A* search
    pub const ASTAR_NODE_BUDGET: usize = 4_000;
    /// Uniform A* edge cost
    pub const STEP_COST: u32 = 10;
}

/// Map constants
pub mod map {
    /// Fraction of never-visited cells that generate as walls
    pub const WALL_DENSITY: f64 = 0.12;
    /// Cells around the origin that always generate empty
    pub const CLEAR_ORIGIN_RADIUS: i32 = 2;
    /// Radius around the spawn origin used for random spawn attempts
    pub const SPAWN_RADIUS: i32 = 20;
    /// Rings searched outward from a spawn candidate for a free cell
    pub const FREE_CELL_SEARCH_RINGS: i32 = 64;
    /// Half-width of the active zone kept around each viewer
    pub const VIEW_HALF_WIDTH: i32 = 40;
    /// Half-height of the active zone kept around each viewer
    pub const VIEW_HALF_HEIGHT: i32 = 20;
    /// Ticks between active-zone refreshes
    pub const ZONE_REFRESH_TICKS: u64 = 10;
    /// Largest zone a single fill command may touch
    pub const MAX_FILL_AREA: u64 = 250_000;
}

/// Simulation timing
pub mod sim {
    /// Default tick interval in milliseconds
    pub const TICK_INTERVAL_MS: u64 = 20;
}

/// Networking constants
pub mod net {
    /// Frame magic ("TANK")
    pub const FRAME_MAGIC: u32 = 0x5441_4E4B;
    /// Frame format version
    pub const FRAME_VERSION: u16 = 1;
    /// Header bytes preceding every payload
    pub const HEADER_SIZE: usize = 12;
    /// Maximum payload size
    pub const MAX_MESSAGE_SIZE: usize = 1 << 20;
    /// Largest zone a client may poll
    pub const MAX_POLL_AREA: u64 = 40_000;
    /// First client retry delay after a failed request
    pub const RETRY_BASE_MS: u64 = 100;
    /// Client retry delay ceiling
    pub const RETRY_MAX_MS: u64 = 5_000;
}
