//! Prometheus-compatible metrics endpoint
//!
//! Exposes simulation and server metrics in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, debug};

use crate::game::world::WorldStats;

/// Metrics registry for the game server
#[derive(Debug)]
pub struct Metrics {
    // Entity counts
    pub tanks_live: AtomicU64,
    pub tanks_auto: AtomicU64,
    pub tanks_dormant: AtomicU64,
    pub bullet_count: AtomicU64,
    pub map_points: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,

    pub tick_count: AtomicU64,
    pub kills_total: AtomicU64,
    /// Per-entity failures swallowed by the tick driver
    pub tick_errors_total: AtomicU64,

    // Network stats
    pub clients_active: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub requests_timed_out: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tanks_live: AtomicU64::new(0),
            tanks_auto: AtomicU64::new(0),
            tanks_dormant: AtomicU64::new(0),
            bullet_count: AtomicU64::new(0),
            map_points: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            kills_total: AtomicU64::new(0),
            tick_errors_total: AtomicU64::new(0),
            clients_active: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            requests_timed_out: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(1000)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > 1000 {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Copy entity counts from a world snapshot
    pub fn record_world(&self, stats: &WorldStats) {
        self.tanks_live.store(stats.tanks as u64, Ordering::Relaxed);
        self.tanks_auto.store(stats.auto_tanks as u64, Ordering::Relaxed);
        self.tanks_dormant.store(stats.dormant_tanks as u64, Ordering::Relaxed);
        self.bullet_count.store(stats.bullets as u64, Ordering::Relaxed);
        self.map_points.store(stats.points as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Entity metrics
        metric!("tank_maze_tanks_live", "Tanks in the live table", "gauge",
            self.tanks_live.load(Ordering::Relaxed));
        metric!("tank_maze_tanks_auto", "Autonomous tanks in the live table", "gauge",
            self.tanks_auto.load(Ordering::Relaxed));
        metric!("tank_maze_tanks_dormant", "Tanks held in dormant cells", "gauge",
            self.tanks_dormant.load(Ordering::Relaxed));
        metric!("tank_maze_bullets", "Bullets in flight", "gauge",
            self.bullet_count.load(Ordering::Relaxed));
        metric!("tank_maze_map_points", "Materialised map cells", "gauge",
            self.map_points.load(Ordering::Relaxed));

        // Performance metrics
        metric!("tank_maze_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("tank_maze_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("tank_maze_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("tank_maze_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("tank_maze_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("tank_maze_kills_total", "Tanks destroyed", "counter",
            self.kills_total.load(Ordering::Relaxed));
        metric!("tank_maze_tick_errors_total", "Entity steps skipped inside ticks", "counter",
            self.tick_errors_total.load(Ordering::Relaxed));

        // Network metrics
        metric!("tank_maze_clients_active", "Connected clients", "gauge",
            self.clients_active.load(Ordering::Relaxed));
        metric!("tank_maze_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("tank_maze_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("tank_maze_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("tank_maze_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("tank_maze_requests_timed_out_total", "Requests abandoned after the timeout", "counter",
            self.requests_timed_out.load(Ordering::Relaxed));
        metric!("tank_maze_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "entities": {
                "tanks": self.tanks_live.load(Ordering::Relaxed),
                "auto_tanks": self.tanks_auto.load(Ordering::Relaxed),
                "dormant_tanks": self.tanks_dormant.load(Ordering::Relaxed),
                "bullets": self.bullet_count.load(Ordering::Relaxed),
                "map_points": self.map_points.load(Ordering::Relaxed),
            },
            "performance": {
                "tick_time_us": self.tick_time_us.load(Ordering::Relaxed),
                "tick_time_p95_us": self.tick_time_p95_us.load(Ordering::Relaxed),
                "tick_time_p99_us": self.tick_time_p99_us.load(Ordering::Relaxed),
                "tick_time_max_us": self.tick_time_max_us.load(Ordering::Relaxed),
                "tick_count": self.tick_count.load(Ordering::Relaxed),
                "tick_errors": self.tick_errors_total.load(Ordering::Relaxed),
            },
            "game": {
                "kills": self.kills_total.load(Ordering::Relaxed),
                "uptime_seconds": self.uptime_seconds(),
            },
            "network": {
                "clients": self.clients_active.load(Ordering::Relaxed),
                "messages_sent": self.messages_sent.load(Ordering::Relaxed),
                "messages_received": self.messages_received.load(Ordering::Relaxed),
                "bytes_sent": self.bytes_sent.load(Ordering::Relaxed),
                "bytes_received": self.bytes_received.load(Ordering::Relaxed),
                "timed_out": self.requests_timed_out.load(Ordering::Relaxed),
            },
        });
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

/// Build the HTTP response for one request
fn route(metrics: &Metrics, request: &str) -> String {
    let (content_type, body) = if request.starts_with("GET /metrics/json") || request.starts_with("GET /json") {
        ("application/json", metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        ("text/plain; version=0.0.4", metrics.to_prometheus())
    } else if request.starts_with("GET /health") || request.starts_with("GET / ") {
        ("text/plain", "OK".to_string())
    } else {
        return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
    };
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}
