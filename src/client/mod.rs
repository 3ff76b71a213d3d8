//! Chat client
//!
//! Everything a front end needs to drive a conversation through the gateway:
//! the controller, the stream decoding it relies on, and the wallet seam.

pub mod controller;
pub mod conversation;
pub mod decoder;
pub mod gateway;
pub mod intent;
pub mod markers;
pub mod mcp;
pub mod wallet;

pub use controller::{
    ChatController, ChatStatus, ChatUpdate, Message, PendingTransaction, SendOutcome, Sender,
    TransactionSource,
};
pub use conversation::{ConversationStore, FileConversationStore, MemoryConversationStore};
pub use gateway::{ChatResponse, GatewayClient};
pub use markers::{MarkerKind, MarkerScanner, StreamEvent};
pub use mcp::{McpCatalog, McpServer};
pub use wallet::{TxHash, WalletSigner};
