//! WebSocket front end for the motion relay.

pub mod config;
pub mod server;
pub mod ws_channel;
