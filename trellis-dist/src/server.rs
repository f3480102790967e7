//! Serving policy states to actors.
mod base;
mod config;
pub use base::{PolicyServer, ServerStep};
pub use config::ServerConfig;
