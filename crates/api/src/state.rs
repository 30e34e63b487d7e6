use std::sync::Arc;

use scripter_core::Scripter;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The script host.
    pub scripter: Arc<Scripter>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
