//! TCP game server
//!
//! Each connection runs a request/response loop. A request waits for a
//! worker-pool permit, takes the game lock for its critical section only,
//! and releases both before the reply is written.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::game::commands;
use crate::game::constants::net::MAX_POLL_AREA;
use crate::game::game_loop::GameLoop;
use crate::game::state::TankId;
use crate::game::world::SimulationWorld;
use crate::metrics::Metrics;
use crate::net::framing::{self, FramingError};
use crate::net::protocol::{self, ClientMessage, ServerMessage, ZoneUpdate};
use crate::util::grid::{Position, Zone};

/// What the server remembers about one connected client
#[derive(Debug, Default)]
pub struct ClientState {
    pub tank: Option<TankId>,
    pub zone: Option<Zone>,
    /// Cells touched since the last poll, limited to the viewer zone
    changes: HashSet<Position>,
}

/// Per-client bookkeeping, guarded together with the game
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<Uuid, ClientState>,
}

impl ClientRegistry {
    pub fn connect(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.clients.insert(id, ClientState::default());
        id
    }

    pub fn disconnect(&mut self, world: &mut SimulationWorld, id: Uuid) {
        if self.clients.remove(&id).is_some() {
            world.remove_viewer(id);
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&ClientState> {
        self.clients.get(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Spread the map's pending changes into every client's change-set
    fn collect_changes(&mut self, world: &mut SimulationWorld) {
        let changes = world.map_mut().drain_changes();
        if changes.is_empty() {
            return;
        }
        for client in self.clients.values_mut() {
            let Some(zone) = client.zone else { continue };
            client.changes.extend(changes.iter().copied().filter(|p| zone.contains(*p)));
        }
    }

    /// Serve one request against the locked game state
    pub fn handle(&mut self, game: &mut GameLoop, client_id: Uuid, message: ClientMessage) -> ServerMessage {
        self.collect_changes(game.world_mut());
        if !self.clients.contains_key(&client_id) {
            return error("unknown client");
        }

        match message {
            ClientMessage::Register { name } => self.register(game.world_mut(), client_id, name),
            ClientMessage::Resume { tank_id } => self.resume(game.world_mut(), client_id, tank_id),
            ClientMessage::Poll { zone } => self.poll(game.world_mut(), client_id, zone),
            ClientMessage::Command(command) => match commands::execute(game.world_mut(), command) {
                Ok(message) => ServerMessage::CommandResult { ok: true, message },
                Err(e) => ServerMessage::CommandResult {
                    ok: false,
                    message: e.to_string(),
                },
            },
            ClientMessage::React(action) => {
                let Some(tank) = self.clients.get(&client_id).and_then(|c| c.tank) else {
                    return error("not registered");
                };
                if game.submit(tank, action) {
                    ServerMessage::CommandResult {
                        ok: true,
                        message: "queued".to_string(),
                    }
                } else {
                    error("input buffer full")
                }
            }
            ClientMessage::Leave => {
                game.world_mut().remove_viewer(client_id);
                if let Some(client) = self.clients.get_mut(&client_id) {
                    client.zone = None;
                    client.changes.clear();
                }
                ServerMessage::CommandResult {
                    ok: true,
                    message: "bye".to_string(),
                }
            }
        }
    }

    fn register(&mut self, world: &mut SimulationWorld, client_id: Uuid, name: String) -> ServerMessage {
        if let Some(tank) = self.clients.get(&client_id).and_then(|c| c.tank) {
            return error(&format!("already registered as tank {}", tank));
        }
        let tank_id = match commands::create_tank(world, name, None) {
            Ok(id) => id,
            Err(e) => return error(&e.to_string()),
        };
        info!("Client {} registered as tank {}", client_id, tank_id);
        self.bind_tank(world, client_id, tank_id)
    }

    /// Rebind a player tank to a new connection. A connection that still
    /// holds it (one that has not noticed its peer is gone) loses it.
    fn resume(&mut self, world: &mut SimulationWorld, client_id: Uuid, tank_id: TankId) -> ServerMessage {
        if let Some(tank) = self.clients.get(&client_id).and_then(|c| c.tank) {
            if tank != tank_id {
                return error(&format!("already registered as tank {}", tank));
            }
        }
        if !world.wake_tank(tank_id) {
            return error(&format!("unknown tank {}", tank_id));
        }
        if world.tank(tank_id).is_some_and(|t| t.is_auto()) {
            return error(&format!("tank {} is autonomous", tank_id));
        }
        for (id, client) in self.clients.iter_mut() {
            if *id != client_id && client.tank == Some(tank_id) {
                client.tank = None;
            }
        }
        info!("Client {} resumed tank {}", client_id, tank_id);
        self.bind_tank(world, client_id, tank_id)
    }

    fn bind_tank(&mut self, world: &mut SimulationWorld, client_id: Uuid, tank_id: TankId) -> ServerMessage {
        let Some(position) = world.tank(tank_id).map(|t| t.position) else {
            return error("tank vanished");
        };
        let zone = Zone::around(position, world.config().view_half_width, world.config().view_half_height);
        world.set_viewer_zone(client_id, zone);
        world.load_zone(zone);
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.tank = Some(tank_id);
            client.zone = Some(zone);
        }
        ServerMessage::Registered { client_id, tank_id }
    }

    fn poll(&mut self, world: &mut SimulationWorld, client_id: Uuid, zone: Zone) -> ServerMessage {
        if !zone.is_valid() {
            return error(&format!("invalid zone {}", zone));
        }
        if zone.area() > MAX_POLL_AREA {
            return error(&format!("zone too large: {} cells (max {})", zone.area(), MAX_POLL_AREA));
        }
        let Some(client) = self.clients.get_mut(&client_id) else {
            return error("unknown client");
        };

        world.set_viewer_zone(client_id, zone);
        world.load_zone(zone);
        client.zone = Some(zone);
        let changes = std::mem::take(&mut client.changes);
        ServerMessage::Update(ZoneUpdate::extract(world, zone, changes))
    }
}

fn error(reason: &str) -> ServerMessage {
    ServerMessage::Error {
        reason: reason.to_string(),
    }
}

/// TCP front end for a shared game
pub struct GameServer {
    config: ServerConfig,
    game: Arc<Mutex<GameLoop>>,
    registry: Arc<Mutex<ClientRegistry>>,
    workers: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl GameServer {
    pub fn new(config: ServerConfig, game: Arc<Mutex<GameLoop>>, metrics: Arc<Metrics>) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(config.worker_pool_size)),
            slots: Arc::new(Semaphore::new(config.max_clients)),
            registry: Arc::new(Mutex::new(ClientRegistry::default())),
            config,
            game,
            metrics,
        }
    }

    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        Ok(TcpListener::bind(addr).await?)
    }

    /// Bind the configured address and accept connections forever
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!("Game server listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;

            let Ok(slot) = self.slots.clone().try_acquire_owned() else {
                warn!("Rejecting {}: server full", peer);
                tokio::spawn(reject(stream));
                continue;
            };

            let connection = Connection {
                game: self.game.clone(),
                registry: self.registry.clone(),
                workers: self.workers.clone(),
                metrics: self.metrics.clone(),
                timeout: self.config.request_timeout(),
            };

            tokio::spawn(async move {
                connection.metrics.clients_active.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = connection.serve(stream, peer).await {
                    debug!("Connection {} ended: {}", peer, e);
                }
                connection.metrics.clients_active.fetch_sub(1, Ordering::Relaxed);
                drop(slot);
            });
        }
    }
}

async fn reject(mut stream: TcpStream) {
    if let Ok(payload) = protocol::encode(&error("server full")) {
        let _ = framing::write_message(&mut stream, &payload).await;
    }
}

struct Connection {
    game: Arc<Mutex<GameLoop>>,
    registry: Arc<Mutex<ClientRegistry>>,
    workers: Arc<Semaphore>,
    metrics: Arc<Metrics>,
    timeout: std::time::Duration,
}

impl Connection {
    async fn serve(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), FramingError> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();
        let client_id = self.registry.lock().connect();
        debug!("Client {} connected from {}", client_id, peer);

        let result = self.request_loop(&mut reader, &mut writer, client_id).await;

        let mut game = self.game.lock();
        self.registry.lock().disconnect(game.world_mut(), client_id);
        debug!("Client {} disconnected", client_id);
        result
    }

    async fn request_loop<R, W>(&self, reader: &mut R, writer: &mut W, client_id: Uuid) -> Result<(), FramingError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let bytes = match framing::read_message(reader).await {
                Ok(bytes) => bytes,
                Err(FramingError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            };
            self.metrics.record_received(bytes.len());

            let (reply, leaving) = match protocol::decode::<ClientMessage>(&bytes) {
                Ok(message) => {
                    let leaving = message == ClientMessage::Leave;
                    (self.dispatch(client_id, message).await, leaving)
                }
                Err(e) => (error(&e.to_string()), false),
            };

            let payload = match protocol::encode(&reply) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to encode reply for {}: {}", client_id, e);
                    protocol::encode(&error("internal error")).unwrap_or_default()
                }
            };
            framing::write_message(writer, &payload).await?;
            self.metrics.record_sent(payload.len());

            if leaving {
                return Ok(());
            }
        }
    }

    /// Run one request on a worker-pool permit
    async fn dispatch(&self, client_id: Uuid, message: ClientMessage) -> ServerMessage {
        let permit = match tokio::time::timeout(self.timeout, self.workers.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return error("server shutting down"),
            Err(_) => {
                self.metrics.requests_timed_out.fetch_add(1, Ordering::Relaxed);
                return error("server busy");
            }
        };

        let reply = {
            let mut game = self.game.lock();
            self.registry.lock().handle(&mut game, client_id, message)
        };
        drop(permit);
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::commands::Command;
    use crate::game::state::TankAction;
    use crate::util::grid::Direction;

    fn open_game() -> GameLoop {
        GameLoop::new(GameConfig {
            wall_density: 0.0,
            ..Default::default()
        })
    }

    fn registered(registry: &mut ClientRegistry, game: &mut GameLoop) -> (Uuid, TankId) {
        let client = registry.connect();
        match registry.handle(game, client, ClientMessage::Register { name: "alice".into() }) {
            ServerMessage::Registered { client_id, tank_id } => {
                assert_eq!(client_id, client);
                (client, tank_id)
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_register_sets_viewer_zone() {
        let mut game = open_game();
        let mut registry = ClientRegistry::default();
        let (client, tank) = registered(&mut registry, &mut game);

        assert_eq!(game.world().viewer_count(), 1);
        let state = registry.get(client).unwrap();
        assert_eq!(state.tank, Some(tank));
        let pos = game.world().tank(tank).unwrap().position;
        assert!(state.zone.unwrap().contains(pos));

        let again = registry.handle(&mut game, client, ClientMessage::Register { name: "bob".into() });
        assert!(matches!(again, ServerMessage::Error { .. }));
    }

    #[test]
    fn test_poll_returns_changes_once() {
        let mut game = open_game();
        let mut registry = ClientRegistry::default();
        let (client, tank) = registered(&mut registry, &mut game);
        let start = game.world().tank(tank).unwrap().position;
        let zone = Zone::around(start, 10, 10);

        // First poll flushes whatever registration touched
        registry.handle(&mut game, client, ClientMessage::Poll { zone });

        game.world_mut().move_tank(tank, Direction::Right).unwrap();
        let ServerMessage::Update(update) = registry.handle(&mut game, client, ClientMessage::Poll { zone }) else {
            panic!("expected update");
        };
        assert!(update.changes.contains(&start));
        assert!(update.changes.contains(&start.step(Direction::Right)));
        assert_eq!(update.tanks.len(), 1);

        let ServerMessage::Update(update) = registry.handle(&mut game, client, ClientMessage::Poll { zone }) else {
            panic!("expected update");
        };
        assert!(update.changes.is_empty());
    }

    #[test]
    fn test_poll_rejects_bad_zones() {
        let mut game = open_game();
        let mut registry = ClientRegistry::default();
        let client = registry.connect();

        let inverted = registry.handle(&mut game, client, ClientMessage::Poll { zone: Zone::new(5, 0, 0, 5) });
        assert!(matches!(inverted, ServerMessage::Error { .. }));
        let huge = registry.handle(&mut game, client, ClientMessage::Poll { zone: Zone::new(0, 1000, 0, 1000) });
        assert!(matches!(huge, ServerMessage::Error { .. }));
        assert_eq!(game.world().viewer_count(), 0);
    }

    #[test]
    fn test_react_requires_registration() {
        let mut game = open_game();
        let mut registry = ClientRegistry::default();
        let stranger = registry.connect();
        let reply = registry.handle(&mut game, stranger, ClientMessage::React(TankAction::Fire));
        assert!(matches!(reply, ServerMessage::Error { .. }));

        let (client, tank) = registered(&mut registry, &mut game);
        let reply = registry.handle(&mut game, client, ClientMessage::React(TankAction::Move(Direction::Up)));
        assert!(matches!(reply, ServerMessage::CommandResult { ok: true, .. }));

        let before = game.world().tank(tank).unwrap().position;
        game.tick();
        assert_eq!(game.world().tank(tank).unwrap().position, before.step(Direction::Up));
    }

    #[test]
    fn test_resume_rebinds_tank_to_new_connection() {
        let mut game = open_game();
        let mut registry = ClientRegistry::default();
        let (old, tank) = registered(&mut registry, &mut game);

        // New connection arrives before the old one is torn down
        let fresh = registry.connect();
        let reply = registry.handle(&mut game, fresh, ClientMessage::Resume { tank_id: tank });
        assert_eq!(reply, ServerMessage::Registered { client_id: fresh, tank_id: tank });
        assert_eq!(registry.get(fresh).unwrap().tank, Some(tank));
        assert_eq!(registry.get(old).unwrap().tank, None);

        registry.disconnect(game.world_mut(), old);
        let reply = registry.handle(&mut game, fresh, ClientMessage::React(TankAction::Fire));
        assert!(matches!(reply, ServerMessage::CommandResult { ok: true, .. }));
        assert_eq!(game.world().viewer_count(), 1);
    }

    #[test]
    fn test_resume_wakes_dormant_tank_and_rejects_bad_ids() {
        let mut game = open_game();
        let mut registry = ClientRegistry::default();
        let (old, tank) = registered(&mut registry, &mut game);
        registry.disconnect(game.world_mut(), old);
        let pos = game.world().tank(tank).unwrap().position;
        game.world_mut().unload_zone(Zone::around(pos, 0, 0));
        assert!(game.world().tank(tank).is_none());

        let fresh = registry.connect();
        let missing = registry.handle(&mut game, fresh, ClientMessage::Resume { tank_id: 999 });
        assert!(matches!(missing, ServerMessage::Error { .. }));
        let reply = registry.handle(&mut game, fresh, ClientMessage::Resume { tank_id: tank });
        assert!(matches!(reply, ServerMessage::Registered { .. }));
        assert_eq!(game.world().tank(tank).unwrap().position, pos);
    }

    #[test]
    fn test_command_failure_is_reported() {
        let mut game = open_game();
        let mut registry = ClientRegistry::default();
        let client = registry.connect();
        let reply = registry.handle(&mut game, client, ClientMessage::Command(Command::Kill { id: 99 }));
        assert!(matches!(reply, ServerMessage::CommandResult { ok: false, .. }));
    }

    #[test]
    fn test_disconnect_drops_viewer() {
        let mut game = open_game();
        let mut registry = ClientRegistry::default();
        let (client, _) = registered(&mut registry, &mut game);
        registry.disconnect(game.world_mut(), client);
        assert!(registry.is_empty());
        assert_eq!(game.world().viewer_count(), 0);
        let reply = registry.handle(&mut game, client, ClientMessage::Leave);
        assert!(matches!(reply, ServerMessage::Error { .. }));
    }
}
