//! HTTP server for provider logins, sessions and M2M token exchange.

pub mod config;
pub mod observability;
pub mod server;

pub use config::{AppConfig, LogFormat, LoggingConfig, ServerConfig};
pub use observability::init_tracing;
pub use server::{AppState, RoxAuthServer, build_app, build_state};
