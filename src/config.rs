use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::game::constants::{ai, bullet, map, sim, tank};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Requests served concurrently (worker pool size)
    pub worker_pool_size: usize,
    /// Maximum simultaneously connected clients
    pub max_clients: usize,
    /// Time a client request may take before it is abandoned
    pub request_timeout_ms: u64,
    /// Port of the metrics HTTP endpoint
    pub metrics_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 7777,
            worker_pool_size: 8,
            max_clients: 64,
            request_timeout_ms: 2_000,
            metrics_port: 9090,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid BIND_ADDRESS '{}', using default", addr);
            }
        }

        if let Some(port) = env_in_range::<u16>("PORT", 1, u16::MAX) {
            config.port = port;
        }
        if let Some(size) = env_in_range::<usize>("WORKER_POOL_SIZE", 1, 1024) {
            config.worker_pool_size = size;
        }
        if let Some(max) = env_in_range::<usize>("MAX_CLIENTS", 1, 10_000) {
            config.max_clients = max;
        }
        if let Some(ms) = env_in_range::<u64>("REQUEST_TIMEOUT_MS", 10, 60_000) {
            config.request_timeout_ms = ms;
        }
        if let Some(port) = env_in_range::<u16>("METRICS_PORT", 1, u16::MAX) {
            config.metrics_port = port;
        }

        config
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.worker_pool_size == 0 {
            return Err("worker_pool_size must be at least 1".to_string());
        }
        if self.max_clients == 0 {
            return Err("max_clients must be at least 1".to_string());
        }
        if self.metrics_port == self.port {
            return Err("metrics_port must differ from port".to_string());
        }
        Ok(())
    }
}

/// Simulation configuration
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Terrain seed shared by server and clients
    pub seed: u64,
    pub tick_interval_ms: u64,
    /// Fraction of untouched cells generated as walls
    pub wall_density: f64,
    /// Half-width of the square an autonomous tank scans for targets
    pub ai_scan_radius: u32,
    /// Attackers strictly closer than this become the victim's new target
    pub retarget_distance: u32,
    pub view_half_width: i32,
    pub view_half_height: i32,
    /// Ticks between active-zone refreshes
    pub zone_refresh_ticks: u64,
    pub astar_node_budget: usize,
    pub spawn_radius: i32,
    pub evade_steps: u32,
    pub player_max_hp: i32,
    pub player_bullet_lethality: i32,
    pub player_bullet_range: i32,
    pub player_bullet_bounces: i32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            tick_interval_ms: sim::TICK_INTERVAL_MS,
            wall_density: map::WALL_DENSITY,
            ai_scan_radius: ai::SCAN_RADIUS,
            retarget_distance: ai::RETARGET_DISTANCE,
            view_half_width: map::VIEW_HALF_WIDTH,
            view_half_height: map::VIEW_HALF_HEIGHT,
            zone_refresh_ticks: map::ZONE_REFRESH_TICKS,
            astar_node_budget: ai::ASTAR_NODE_BUDGET,
            spawn_radius: map::SPAWN_RADIUS,
            evade_steps: ai::EVADE_STEPS,
            player_max_hp: tank::PLAYER_MAX_HP,
            player_bullet_lethality: bullet::PLAYER_LETHALITY,
            player_bullet_range: bullet::PLAYER_RANGE,
            player_bullet_bounces: bullet::PLAYER_HP,
        }
    }
}

impl GameConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(seed) = std::env::var("GAME_SEED") {
            match seed.parse::<u64>() {
                Ok(parsed) => config.seed = parsed,
                Err(_) => tracing::warn!("Invalid GAME_SEED '{}', using default", seed),
            }
        }
        if let Some(ms) = env_in_range::<u64>("TICK_INTERVAL_MS", 1, 1_000) {
            config.tick_interval_ms = ms;
        }
        if let Some(density) = env_in_range::<f64>("WALL_DENSITY", 0.0, 0.9) {
            config.wall_density = density;
        }
        if let Some(radius) = env_in_range::<u32>("AI_SCAN_RADIUS", 1, 200) {
            config.ai_scan_radius = radius;
        }
        if let Some(distance) = env_in_range::<u32>("RETARGET_DISTANCE", 0, 1_000) {
            config.retarget_distance = distance;
        }
        if let Some(w) = env_in_range::<i32>("VIEW_HALF_WIDTH", 1, 500) {
            config.view_half_width = w;
        }
        if let Some(h) = env_in_range::<i32>("VIEW_HALF_HEIGHT", 1, 500) {
            config.view_half_height = h;
        }
        if let Some(ticks) = env_in_range::<u64>("ZONE_REFRESH_TICKS", 1, 10_000) {
            config.zone_refresh_ticks = ticks;
        }
        if let Some(budget) = env_in_range::<usize>("ASTAR_NODE_BUDGET", 16, 1_000_000) {
            config.astar_node_budget = budget;
        }
        if let Some(radius) = env_in_range::<i32>("SPAWN_RADIUS", 0, 10_000) {
            config.spawn_radius = radius;
        }
        if let Some(steps) = env_in_range::<u32>("EVADE_STEPS", 0, 100) {
            config.evade_steps = steps;
        }
        if let Some(hp) = env_in_range::<i32>("PLAYER_MAX_HP", 1, tank::MAX_HP_LIMIT) {
            config.player_max_hp = hp;
        }

        config
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.wall_density) {
            return Err("wall_density must be within 0.0..=1.0".to_string());
        }
        if self.view_half_width <= 0 || self.view_half_height <= 0 {
            return Err("view half extents must be positive".to_string());
        }
        if self.zone_refresh_ticks == 0 {
            return Err("zone_refresh_ticks must be at least 1".to_string());
        }
        if self.astar_node_budget == 0 {
            return Err("astar_node_budget must be at least 1".to_string());
        }
        if self.player_max_hp <= 0 || self.player_max_hp > tank::MAX_HP_LIMIT {
            return Err(format!("player_max_hp must be within 1..={}", tank::MAX_HP_LIMIT));
        }
        if self.player_bullet_bounces <= 0 || self.player_bullet_range <= 0 {
            return Err("player bullet bounces and range must be positive".to_string());
        }
        Ok(())
    }
}

/// Parse an environment variable, warning and returning None when it is
/// malformed or outside `[min, max]`
fn env_in_range<T>(key: &str, min: T, max: T) -> Option<T>
where
    T: FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(parsed) if parsed >= min && parsed <= max => Some(parsed),
        Ok(_) => {
            tracing::warn!("{} must be {}-{}, using default", key, min, max);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}
