use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tank_maze_server::config::{GameConfig, ServerConfig};
use tank_maze_server::game::game_loop::{run_tick_loop, GameLoop};
use tank_maze_server::metrics::{self, Metrics};
use tank_maze_server::net::server::GameServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Tank Maze Server v{}", env!("CARGO_PKG_VERSION"));

    let server_config = ServerConfig::load_or_default();
    let game_config = GameConfig::load_or_default();
    server_config.validate().map_err(anyhow::Error::msg)?;
    game_config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: {}:{}, workers={}, seed={:#x}, tick={}ms",
        server_config.bind_address,
        server_config.port,
        server_config.worker_pool_size,
        game_config.seed,
        game_config.tick_interval_ms
    );

    let metrics = Arc::new(Metrics::new());
    let metrics_clone = metrics.clone();
    let metrics_port = server_config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let tick_interval = game_config.tick_interval();
    let game = Arc::new(Mutex::new(GameLoop::with_metrics(game_config, metrics.clone())));
    let ticker = tokio::spawn(run_tick_loop(game.clone(), tick_interval));

    let server = GameServer::new(server_config, game.clone(), metrics);

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    ticker.abort();
    let stats = game.lock().world().stats();
    info!(
        "Server stopped: {} tanks, {} bullets, {} map points",
        stats.tanks, stats.bullets, stats.points
    );

    Ok(())
}
