//! HTTP control plane: configuration, routing, and request/response mapping.

pub mod app;
pub mod config;
pub mod middleware;

pub use app::{AppState, build_app};
pub use config::{ConfigError, ServerConfig};
