//! # story-gateway
//!
//! Chat gateway and client for a Story Protocol blockchain assistant.
//!
//! ## Overview
//!
//! The gateway sits between chat front ends and the agent backend. It
//! forwards each user turn, relays the answer (a JSON document or a live text
//! stream), and forwards transaction and interrupt-confirmation requests,
//! attaching a Google identity token when a service account is configured.
//!
//! The client side drives a conversation through the gateway: it decodes the
//! stream, lifts `[INTERRUPT]` and `[TRANSACTION]` markers out of the text,
//! and keeps the pending confirmation and transaction until the user answers
//! or signs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use story_gateway::client::{ChatController, GatewayClient, MemoryConversationStore};
//!
//! # async fn example() -> story_gateway::Result<()> {
//! let controller = ChatController::new(
//!     GatewayClient::new("http://127.0.0.1:3000"),
//!     Arc::new(MemoryConversationStore::new()),
//! )?;
//!
//! controller.send("What is the latest block?").await?;
//! for message in controller.messages() {
//!     println!("{:?}: {}", message.sender, message.content);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **server** / **api**: axum router exposing `/api/chat`, `/api/transaction`,
//!   `/api/interrupt/confirm` and `/health`
//! - **backend**: reqwest client for the agent backend
//! - **auth**: `IdTokenProvider` trait and the service-account implementation
//! - **client**: chat controller, marker scanner, conversation store, wallet seam

pub mod api;
pub mod auth;
pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod dirs;
pub mod error;
pub mod format;
pub mod server;
pub mod types;

// Re-export core types
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use types::{
    ChatMessage, ChatRequest, InterruptConfirmRequest, InterruptRequest, TransactionRequest,
    WalletTransaction,
};
