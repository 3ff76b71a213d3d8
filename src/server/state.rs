use std::sync::Arc;

use crate::backend::BackendClient;
use crate::config::GatewayConfig;

/// Shared application state accessible to all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub backend: BackendClient,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(backend: BackendClient, config: Arc<GatewayConfig>) -> Self {
        Self { backend, config }
    }
}
