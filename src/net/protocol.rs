//! Wire messages exchanged between clients and the server
//!
//! Payloads are bincode-encoded (legacy config, fixed-size integers) and
//! carried inside the frames of [`crate::net::framing`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::commands::Command;
use crate::game::state::{TankAction, TankId, TankView};
use crate::game::world::{CellView, SimulationWorld};
use crate::util::grid::{Position, Zone};

/// Requests sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Create a tank for this connection
    Register { name: String },
    /// Take back a tank registered on an earlier connection
    Resume { tank_id: TankId },
    /// Ask for the current state of a zone; also moves the viewer zone
    Poll { zone: Zone },
    /// Run a command verb against the world
    Command(Command),
    /// Queue an action for the registered tank
    React(TankAction),
    /// Drop the tank's viewer zone before disconnecting
    Leave,
}

/// Responses sent by the server, one per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    Registered { client_id: Uuid, tank_id: TankId },
    Update(ZoneUpdate),
    CommandResult { ok: bool, message: String },
    Error { reason: String },
}

/// Sparse view of one zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneUpdate {
    pub tick: u64,
    pub zone: Zone,
    /// Non-empty cells inside the zone
    pub cells: Vec<CellView>,
    /// Live tanks inside the zone
    pub tanks: Vec<TankView>,
    /// Positions inside the zone touched since the client's last poll
    pub changes: Vec<Position>,
}

impl ZoneUpdate {
    /// Extract the view of `zone` from live state.
    /// `changes` is filtered down to the zone and sorted.
    pub fn extract(world: &SimulationWorld, zone: Zone, changes: impl IntoIterator<Item = Position>) -> Self {
        let mut changes: Vec<Position> = changes.into_iter().filter(|p| zone.contains(*p)).collect();
        changes.sort_unstable();
        changes.dedup();
        Self {
            tick: world.tick(),
            zone,
            cells: world.cells_in(zone),
            tanks: world.tank_views_in(zone),
            changes,
        }
    }
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
