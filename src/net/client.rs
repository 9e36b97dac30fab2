//! Request/response client with connectivity health tracking
//!
//! A request that errors or outlives the timeout counts as a failed
//! attempt. The connection is dropped and re-established on the next
//! request, after the backoff, and a registered tank is resumed on the new
//! connection. The world is never rolled back, only the client's view is stale.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::game::commands::Command;
use crate::game::constants::net::{RETRY_BASE_MS, RETRY_MAX_MS};
use crate::game::state::{TankAction, TankId};
use crate::net::framing::{self, FramingError};
use crate::net::protocol::{self, ClientMessage, DecodeError, EncodeError, ServerMessage, ZoneUpdate};
use crate::util::grid::Zone;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Unexpected reply: {0:?}")]
    Unexpected(Box<ServerMessage>),
}

/// Connectivity degradation as seen by one client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionHealth {
    /// Consecutive failed requests; reset by the next success
    pub failed_attempts: u32,
    /// Round trip of the last success, or time lost on the last failure
    pub last_delay: Duration,
}

impl ConnectionHealth {
    pub fn record_success(&mut self, round_trip: Duration) {
        self.failed_attempts = 0;
        self.last_delay = round_trip;
    }

    pub fn record_failure(&mut self, lost: Duration) {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.last_delay = lost;
    }

    pub fn is_degraded(&self) -> bool {
        self.failed_attempts > 0
    }

    /// Exponential backoff to wait before retrying
    pub fn retry_delay(&self) -> Duration {
        if self.failed_attempts == 0 {
            return Duration::ZERO;
        }
        let shift = (self.failed_attempts - 1).min(16);
        Duration::from_millis((RETRY_BASE_MS << shift).min(RETRY_MAX_MS))
    }
}

pub struct GameClient {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    timeout: Duration,
    health: ConnectionHealth,
    tank_id: Option<TankId>,
}

impl GameClient {
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, ClientError> {
        let mut client = Self {
            addr,
            stream: None,
            timeout,
            health: ConnectionHealth::default(),
            tank_id: None,
        };
        client.reconnect().await?;
        Ok(client)
    }

    pub fn health(&self) -> ConnectionHealth {
        self.health
    }

    pub fn tank_id(&self) -> Option<TankId> {
        self.tank_id
    }

    async fn reconnect(&mut self) -> Result<(), ClientError> {
        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ClientError::Connect(e)),
            Err(_) => return Err(ClientError::Timeout(self.timeout)),
        };
        stream.set_nodelay(true).map_err(ClientError::Connect)?;
        debug!("Connected to {}", self.addr);
        self.stream = Some(stream);
        Ok(())
    }

    /// Send one message and wait for its reply, updating health either way
    pub async fn request(&mut self, message: &ClientMessage) -> Result<ServerMessage, ClientError> {
        if self.stream.is_none() && self.health.is_degraded() {
            tokio::time::sleep(self.health.retry_delay()).await;
        }
        let start = Instant::now();
        let timeout = self.timeout;
        let result = match tokio::time::timeout(timeout, self.exchange(message)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(timeout)),
        };

        match &result {
            Ok(_) => self.health.record_success(start.elapsed()),
            Err(e) => {
                self.stream = None;
                self.health.record_failure(start.elapsed());
                warn!(
                    "Request failed ({} in a row, retry in {:?}): {}",
                    self.health.failed_attempts,
                    self.health.retry_delay(),
                    e
                );
            }
        }
        result
    }

    async fn exchange(&mut self, message: &ClientMessage) -> Result<ServerMessage, ClientError> {
        let payload = protocol::encode(message)?;
        if self.stream.is_none() {
            self.reconnect().await?;
            if let Some(tank_id) = self.tank_id {
                match self.round_trip(&protocol::encode(&ClientMessage::Resume { tank_id })?).await? {
                    ServerMessage::Registered { .. } => debug!("Resumed tank {}", tank_id),
                    other => {
                        self.stream = None;
                        return Err(unexpected(other));
                    }
                }
            }
        }
        self.round_trip(&payload).await
    }

    async fn round_trip(&mut self, payload: &[u8]) -> Result<ServerMessage, ClientError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ClientError::Connect(std::io::ErrorKind::NotConnected.into()));
        };
        framing::write_message(stream, payload).await?;
        let reply = framing::read_message(stream).await?;
        Ok(protocol::decode(&reply)?)
    }

    pub async fn register(&mut self, name: &str) -> Result<TankId, ClientError> {
        let reply = self.request(&ClientMessage::Register { name: name.to_string() }).await?;
        match reply {
            ServerMessage::Registered { tank_id, .. } => {
                self.tank_id = Some(tank_id);
                Ok(tank_id)
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn poll(&mut self, zone: Zone) -> Result<ZoneUpdate, ClientError> {
        match self.request(&ClientMessage::Poll { zone }).await? {
            ServerMessage::Update(update) => Ok(update),
            other => Err(unexpected(other)),
        }
    }

    /// Run a command; a failed command comes back as `Rejected`
    pub async fn command(&mut self, command: Command) -> Result<String, ClientError> {
        match self.request(&ClientMessage::Command(command)).await? {
            ServerMessage::CommandResult { ok: true, message } => Ok(message),
            ServerMessage::CommandResult { ok: false, message } => Err(ClientError::Rejected(message)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn react(&mut self, action: TankAction) -> Result<(), ClientError> {
        match self.request(&ClientMessage::React(action)).await? {
            ServerMessage::CommandResult { ok: true, .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn leave(mut self) -> Result<(), ClientError> {
        self.request(&ClientMessage::Leave).await?;
        Ok(())
    }
}

fn unexpected(reply: ServerMessage) -> ClientError {
    match reply {
        ServerMessage::Error { reason } => ClientError::Rejected(reason),
        other => ClientError::Unexpected(Box::new(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::net::TcpListener;

    use crate::config::{GameConfig, ServerConfig};
    use crate::game::game_loop::GameLoop;
    use crate::metrics::Metrics;
    use crate::net::server::GameServer;
    use crate::util::grid::Direction;

    async fn start_server() -> (SocketAddr, Arc<Mutex<GameLoop>>) {
        let game = Arc::new(Mutex::new(GameLoop::new(GameConfig {
            wall_density: 0.0,
            ..Default::default()
        })));
        let server = GameServer::new(ServerConfig::default(), game.clone(), Arc::new(Metrics::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve(listener).await });
        (addr, game)
    }

    #[test]
    fn test_health_grows_and_resets() {
        let mut health = ConnectionHealth::default();
        assert_eq!(health.retry_delay(), Duration::ZERO);

        health.record_failure(Duration::from_millis(50));
        let first = health.retry_delay();
        health.record_failure(Duration::from_millis(50));
        assert_eq!(health.failed_attempts, 2);
        assert!(health.retry_delay() > first);
        assert!(health.is_degraded());

        for _ in 0..40 {
            health.record_failure(Duration::from_millis(50));
        }
        assert_eq!(health.retry_delay(), Duration::from_millis(RETRY_MAX_MS));

        health.record_success(Duration::from_millis(3));
        assert_eq!(health.failed_attempts, 0);
        assert_eq!(health.last_delay, Duration::from_millis(3));
        assert!(!health.is_degraded());
    }

    #[tokio::test]
    async fn test_register_react_poll() {
        let (addr, game) = start_server().await;
        let mut client = GameClient::connect(addr, Duration::from_secs(2)).await.unwrap();

        let tank = client.register("alice").await.unwrap();
        assert_eq!(client.tank_id(), Some(tank));
        let start = game.lock().world().tank(tank).unwrap().position;

        client.react(TankAction::Move(Direction::Left)).await.unwrap();
        game.lock().tick();

        let update = client.poll(Zone::around(start, 5, 5)).await.unwrap();
        assert_eq!(update.tanks.len(), 1);
        assert_eq!(update.tanks[0].position, start.step(Direction::Left));
        assert!(update.changes.contains(&start));
        assert_eq!(client.health().failed_attempts, 0);
    }

    #[tokio::test]
    async fn test_rejected_command() {
        let (addr, _game) = start_server().await;
        let mut client = GameClient::connect(addr, Duration::from_secs(2)).await.unwrap();
        let result = client.command(Command::Kill { id: 12345 }).await;
        assert!(matches!(result, Err(ClientError::Rejected(_))));
        // A rejected command is still a successful exchange
        assert_eq!(client.health().failed_attempts, 0);
    }

    #[tokio::test]
    async fn test_silent_server_counts_as_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and never answer
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((stream, _)) = listener.accept().await {
                    held.push(stream);
                }
            }
        });

        let timeout = Duration::from_millis(50);
        let mut client = GameClient::connect(addr, timeout).await.unwrap();
        let first = client.poll(Zone::new(0, 1, 0, 1)).await;
        assert!(matches!(first, Err(ClientError::Timeout(_))));

        // The retry waits out the backoff before reconnecting
        let started = Instant::now();
        let _ = client.poll(Zone::new(0, 1, 0, 1)).await;
        assert!(started.elapsed() >= Duration::from_millis(RETRY_BASE_MS) + timeout);

        let health = client.health();
        assert_eq!(health.failed_attempts, 2);
        assert!(health.last_delay >= timeout);
    }

    #[tokio::test]
    async fn test_reconnect_resumes_registered_tank() {
        let (addr, game) = start_server().await;
        let mut client = GameClient::connect(addr, Duration::from_secs(2)).await.unwrap();
        let tank = client.register("bob").await.unwrap();
        let start = game.lock().world().tank(tank).unwrap().position;

        // Lose the connection without telling the server
        client.stream = None;
        client.react(TankAction::Move(Direction::Right)).await.unwrap();
        game.lock().tick();

        let world_tanks = game.lock().world().stats().tanks;
        assert_eq!(world_tanks, 1);
        assert_eq!(client.tank_id(), Some(tank));
        assert_eq!(game.lock().world().tank(tank).unwrap().position, start.step(Direction::Right));
        assert_eq!(client.health().failed_attempts, 0);
    }
}
