pub mod chat;
pub mod serve;

use clap::{Parser, Subcommand};

/// Story Gateway - chat proxy and client for the Story Protocol assistant
#[derive(Debug, Parser)]
#[command(name = "story-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the gateway HTTP server
    Serve {
        /// Host address to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config and PORT)
        #[arg(long)]
        port: Option<u16>,

        /// Agent backend base URL (overrides config and BACKEND_URL)
        #[arg(long)]
        backend_url: Option<String>,
    },

    /// Chat with the assistant through a running gateway
    Chat {
        /// Gateway base URL
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        gateway: String,

        /// Wallet address sent with every turn
        #[arg(long)]
        wallet: Option<String>,

        /// MCP server to route turns to (e.g. "storyscan", "story-sdk")
        #[arg(long)]
        mcp: Option<String>,
    },
}
