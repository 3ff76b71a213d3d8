//! MCP server catalog
//!
//! The backend routes each chat turn to one MCP tool server, named by the
//! `mcp_type` request field.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// An MCP tool server the backend can route to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServer {
    pub id: String,
    pub name: String,
    pub description: String,
    pub available: bool,
    #[serde(default)]
    pub coming_soon: bool,
}

impl McpServer {
    fn new(id: &str, name: &str, description: &str, available: bool) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            available,
            coming_soon: !available,
        }
    }
}

/// The servers the backend currently knows about.
pub fn default_servers() -> Vec<McpServer> {
    vec![
        McpServer::new(
            "storyscan",
            "Storyscan",
            "Explore balances, transactions and stats on the Story blockchain",
            true,
        ),
        McpServer::new(
            "story-sdk",
            "Story SDK",
            "Register and manage IP assets with the Story Protocol SDK",
            true,
        ),
        McpServer::new(
            "story-ip",
            "Story IP",
            "License and monetize intellectual property",
            false,
        ),
    ]
}

/// Server list plus the current selection
#[derive(Debug, Clone)]
pub struct McpCatalog {
    servers: Vec<McpServer>,
    selected: String,
}

impl McpCatalog {
    /// Catalog over `servers`; the first available one starts selected.
    pub fn new(servers: Vec<McpServer>) -> Result<Self> {
        let selected = servers
            .iter()
            .find(|s| s.available)
            .map(|s| s.id.clone())
            .ok_or_else(|| GatewayError::Config("No available MCP server".into()))?;
        Ok(Self { servers, selected })
    }

    pub fn servers(&self) -> &[McpServer] {
        &self.servers
    }

    pub fn get(&self, id: &str) -> Option<&McpServer> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Currently selected server
    pub fn selected(&self) -> &McpServer {
        self.get(&self.selected).unwrap_or(&self.servers[0])
    }

    pub fn selected_id(&self) -> &str {
        &self.selected
    }

    /// Select `id`; unknown and unavailable servers are rejected.
    pub fn select(&mut self, id: &str) -> Result<()> {
        match self.get(id) {
            Some(server) if server.available => {
                self.selected = server.id.clone();
                tracing::debug!(mcp = id, "Selected MCP server");
                Ok(())
            }
            Some(server) => Err(GatewayError::InvalidRequest(format!(
                "MCP server '{}' is not available yet",
                server.name
            ))),
            None => Err(GatewayError::InvalidRequest(format!(
                "Unknown MCP server: {id}"
            ))),
        }
    }
}

impl Default for McpCatalog {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            selected: "storyscan".to_string(),
        }
    }
}
