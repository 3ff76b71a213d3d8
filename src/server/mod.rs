pub mod router;
pub mod state;

use std::sync::Arc;

use axum::Router;

use crate::auth;
use crate::backend::BackendClient;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};

/// Build the router for a configuration without binding a socket.
pub fn app(config: GatewayConfig) -> Result<Router> {
    let http = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .build()?;

    let id_tokens = auth::provider_from_key(config.google_key_json.as_deref(), http.clone());
    let backend = BackendClient::new(&config, http, id_tokens);
    tracing::info!(
        backend = backend.base_url(),
        mock_fallback = config.mock_fallback,
        "Configured agent backend"
    );

    let app_state = state::AppState::new(backend, Arc::new(config));
    Ok(router::build(app_state))
}

/// Start the HTTP server with the given configuration.
pub async fn start(config: GatewayConfig) -> Result<()> {
    let bind_addr = config.bind_address();
    let app = app(config)?;

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| GatewayError::Server(format!("Failed to bind to {bind_addr}: {e}")))?;

    tracing::info!("Gateway listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| GatewayError::Server(format!("Server error: {e}")))?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
