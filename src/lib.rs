//! Tank Maze Server Library
//!
//! Simulation core of a multiplayer tank battle on an infinite,
//! procedurally generated grid, plus a TCP server that relays it.

pub mod config;
pub mod util;
pub mod game;
pub mod net;
pub mod metrics;
