use clap::Parser;
use tracing_subscriber::EnvFilter;

use story_gateway::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            backend_url,
        } => {
            story_gateway::cli::serve::execute(host, port, backend_url).await?;
        }
        Commands::Chat {
            gateway,
            wallet,
            mcp,
        } => {
            story_gateway::cli::chat::execute(&gateway, wallet, mcp.as_deref()).await?;
        }
    }

    Ok(())
}
