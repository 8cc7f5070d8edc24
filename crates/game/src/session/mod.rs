//! Server and client sessions: the join handshake and the steady-state
//! delta stream layered over the transport host.

mod client;
mod config;
mod server;

use std::io;

use crate::engine::ArenaError;

pub use client::{Client, ClientEvent, ClientState, DisconnectType, Mirror};
pub use config::{ClientConfig, ServerConfig};
pub use server::{Server, ServerStats};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("network error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Arena(#[from] ArenaError),
}
