//! Networking: framing, wire messages, server and client

pub mod client;
pub mod framing;
pub mod protocol;
pub mod server;
