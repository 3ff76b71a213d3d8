use crate::config::GatewayConfig;
use crate::error::Result;
use crate::server;

/// Execute the `serve` command: start the gateway.
pub async fn execute(
    host: Option<String>,
    port: Option<u16>,
    backend_url: Option<String>,
) -> Result<()> {
    let mut config = GatewayConfig::load()?;

    // Override config with CLI arguments
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(backend_url) = backend_url {
        config.backend_url = backend_url;
    }

    println!("Story gateway starting...");
    println!("Listening on http://{}", config.bind_address());
    println!("Forwarding to {}", config.backend_base());
    println!("Press Ctrl+C to stop");

    server::start(config).await
}
