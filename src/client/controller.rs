//! Client-side chat controller
//!
//! Owns the transcript, the pending interrupt and the pending transaction.
//! Talks to the gateway, turns the streamed answer into transcript updates,
//! and broadcasts every change to subscribers (the CLI, or any other UI).

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::client::conversation::ConversationStore;
use crate::client::decoder::Utf8Decoder;
use crate::client::gateway::{ChatResponse, GatewayClient};
use crate::client::intent::extract_transaction_intent;
use crate::client::markers::{MarkerScanner, StreamEvent};
use crate::client::mcp::{McpCatalog, McpServer};
use crate::client::wallet::{TxHash, WalletSigner};
use crate::error::{GatewayError, Result};
use crate::format::mask_address;
use crate::types::{
    ChatMessage, ChatRequest, InterruptConfirmRequest, InterruptRequest, TransactionRequest,
    WalletTransaction,
};

/// Greeting every transcript starts with
pub const WELCOME_MESSAGE: &str = "Hello! How can I help you today?";

/// Id of the greeting; it is never sent to the backend
pub const WELCOME_ID: &str = "welcome";

/// Assistant message shown when a chat request fails
pub const SEND_FAILURE_MESSAGE: &str =
    "Sorry, I couldn't process your request. Please try again later.";

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Who wrote a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// A transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    /// The stream producing this message was cancelled before it finished
    #[serde(default)]
    pub cancelled: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content.into())
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self::new(Sender::Bot, content.into())
    }

    fn welcome() -> Self {
        Self {
            id: WELCOME_ID.to_string(),
            ..Self::bot(WELCOME_MESSAGE)
        }
    }

    fn new(sender: Sender, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            sender,
            timestamp: Utc::now(),
            cancelled: false,
        }
    }
}

/// Controller status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatStatus {
    /// Idle, input accepted
    Ready,
    /// Request sent, no response yet
    Submitted,
    /// Reading a streamed answer
    Streaming,
    /// The agent paused and waits for a yes/no
    AwaitingConfirmation,
    /// The last request failed; input is accepted again
    Error,
}

impl ChatStatus {
    /// A request is in flight
    pub fn is_busy(self) -> bool {
        matches!(self, ChatStatus::Submitted | ChatStatus::Streaming)
    }
}

/// Where a pending transaction came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionSource {
    /// `[TRANSACTION]` marker in a streamed answer
    Stream,
    /// Attached to (or returned for) the interrupt with this id
    Interrupt(String),
    /// `transaction` field of a JSON answer
    Json,
    /// `Transaction intent:` block in the assistant's text
    Intent,
    /// Built by the backend for `request_transaction`
    Requested,
}

/// A transaction waiting for the user's wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub tx: WalletTransaction,
    pub source: TransactionSource,
}

/// Change notifications sent to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatUpdate {
    #[serde(rename = "message_added")]
    MessageAdded { message: Message },

    /// Text appended to a streaming message
    #[serde(rename = "text_delta")]
    Delta { message_id: String, text: String },

    #[serde(rename = "message_cancelled")]
    MessageCancelled { message_id: String },

    #[serde(rename = "message_removed")]
    MessageRemoved { message_id: String },

    #[serde(rename = "status")]
    Status { status: ChatStatus },

    #[serde(rename = "interrupt")]
    Interrupt { interrupt: InterruptRequest },

    #[serde(rename = "transaction")]
    Transaction { pending: PendingTransaction },

    #[serde(rename = "transaction_cleared")]
    TransactionCleared,

    #[serde(rename = "transaction_sent")]
    TransactionSent { hash: String },

    /// Transcript reset to the welcome message under a new conversation id
    #[serde(rename = "reset")]
    Reset { conversation_id: String },
}

/// How a send ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Completed,
    Cancelled,
    /// Blank input, nothing was sent
    Ignored,
}

struct ChatState {
    messages: Vec<Message>,
    status: ChatStatus,
    conversation_id: String,
    mcp: McpCatalog,
    wallet_address: Option<String>,
    pending_interrupt: Option<InterruptRequest>,
    pending_transaction: Option<PendingTransaction>,
    last_transaction_hash: Option<TxHash>,
}

impl ChatState {
    fn new(conversation_id: String) -> Self {
        Self {
            messages: vec![Message::welcome()],
            status: ChatStatus::Ready,
            conversation_id,
            mcp: McpCatalog::default(),
            wallet_address: None,
            pending_interrupt: None,
            pending_transaction: None,
            last_transaction_hash: None,
        }
    }

    fn push(&mut self, events: &mut Vec<ChatUpdate>, message: Message) -> String {
        let id = message.id.clone();
        events.push(ChatUpdate::MessageAdded {
            message: message.clone(),
        });
        self.messages.push(message);
        id
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    fn append_text(&mut self, events: &mut Vec<ChatUpdate>, id: &str, text: String) {
        if let Some(message) = self.message_mut(id) {
            message.content.push_str(&text);
            events.push(ChatUpdate::Delta {
                message_id: id.to_string(),
                text,
            });
        }
    }

    fn mark_cancelled(&mut self, events: &mut Vec<ChatUpdate>, id: &str) {
        if let Some(message) = self.message_mut(id) {
            message.cancelled = true;
            events.push(ChatUpdate::MessageCancelled {
                message_id: id.to_string(),
            });
        }
    }

    fn drop_if_empty(&mut self, events: &mut Vec<ChatUpdate>, id: &str) {
        let before = self.messages.len();
        self.messages
            .retain(|m| m.id != id || !m.content.trim().is_empty());
        if self.messages.len() != before {
            events.push(ChatUpdate::MessageRemoved {
                message_id: id.to_string(),
            });
        }
    }

    fn set_status(&mut self, events: &mut Vec<ChatUpdate>, status: ChatStatus) {
        if self.status != status {
            self.status = status;
            events.push(ChatUpdate::Status { status });
        }
    }

    /// Leave the busy state: wait for a confirmation if one is pending.
    fn settle(&mut self, events: &mut Vec<ChatUpdate>) {
        let status = if self.pending_interrupt.is_some() {
            ChatStatus::AwaitingConfirmation
        } else {
            ChatStatus::Ready
        };
        self.set_status(events, status);
    }

    fn set_interrupt(&mut self, events: &mut Vec<ChatUpdate>, interrupt: InterruptRequest) {
        tracing::info!(
            interrupt_id = %interrupt.interrupt_id,
            action = interrupt.action.as_deref().unwrap_or("unknown"),
            "Agent requested confirmation"
        );
        if let Some(tx) = interrupt.transaction.clone() {
            let source = TransactionSource::Interrupt(interrupt.interrupt_id.clone());
            self.set_transaction(events, PendingTransaction { tx, source });
        }
        events.push(ChatUpdate::Interrupt {
            interrupt: interrupt.clone(),
        });
        self.pending_interrupt = Some(interrupt);
    }

    fn set_transaction(&mut self, events: &mut Vec<ChatUpdate>, pending: PendingTransaction) {
        tracing::info!(
            to = %pending.tx.to,
            value = %pending.tx.value,
            source = ?pending.source,
            "Transaction pending signature"
        );
        events.push(ChatUpdate::Transaction {
            pending: pending.clone(),
        });
        self.pending_transaction = Some(pending);
    }

    fn clear_transaction(&mut self, events: &mut Vec<ChatUpdate>) {
        if self.pending_transaction.take().is_some() {
            events.push(ChatUpdate::TransactionCleared);
        }
    }

    fn apply_stream_events(
        &mut self,
        events: &mut Vec<ChatUpdate>,
        message_id: &str,
        stream_events: Vec<StreamEvent>,
    ) {
        for event in stream_events {
            match event {
                StreamEvent::Text(text) => self.append_text(events, message_id, text),
                StreamEvent::Interrupt(interrupt) => self.set_interrupt(events, interrupt),
                StreamEvent::Transaction(tx) => self.set_transaction(
                    events,
                    PendingTransaction {
                        tx,
                        source: TransactionSource::Stream,
                    },
                ),
            }
        }
    }

    /// Pick up a `Transaction intent:` block when no marker delivered a transaction.
    fn recognize_intent(&mut self, events: &mut Vec<ChatUpdate>, message_id: &str) {
        if self.pending_transaction.is_some() {
            return;
        }
        let Some(intent) = self
            .message_mut(message_id)
            .and_then(|m| extract_transaction_intent(&m.content))
        else {
            return;
        };
        match intent.to_wallet_transaction() {
            Ok(tx) => self.set_transaction(
                events,
                PendingTransaction {
                    tx,
                    source: TransactionSource::Intent,
                },
            ),
            Err(e) => tracing::warn!(error = %e, "Ignoring transaction intent"),
        }
    }

    /// Apply a complete JSON answer from `/api/chat`.
    fn apply_json(&mut self, events: &mut Vec<ChatUpdate>, body: &serde_json::Value) {
        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            tracing::error!(error = %error, "Chat request returned an error");
            self.push(events, Message::bot(format!("Error: {}", value_text(error))));
            self.set_status(events, ChatStatus::Error);
            return;
        }

        if let Some(text) = reply_text(body) {
            self.push(events, Message::bot(text));
        }
        if let Some(interrupt) = interrupt_from_json(body) {
            self.set_interrupt(events, interrupt);
        }
        if let Some(tx) = transaction_from_json(body) {
            self.set_transaction(
                events,
                PendingTransaction {
                    tx,
                    source: TransactionSource::Json,
                },
            );
        }
        self.settle(events);
    }

    /// Conversation sent to the gateway: everything but the greeting and empty entries.
    fn chat_request(&self) -> ChatRequest {
        let messages = self
            .messages
            .iter()
            .filter(|m| m.id != WELCOME_ID && !m.content.is_empty())
            .map(|m| match m.sender {
                Sender::User => ChatMessage::user(m.content.clone()),
                Sender::Bot => ChatMessage::assistant(m.content.clone()),
            })
            .collect();

        ChatRequest {
            messages,
            conversation_id: Some(self.conversation_id.clone()),
            wallet_address: self.wallet_address.clone(),
            mcp_type: Some(self.mcp.selected_id().to_string()),
        }
    }
}

/// Chat session against a gateway
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ChatController {
    gateway: GatewayClient,
    store: Arc<dyn ConversationStore>,
    state: Arc<Mutex<ChatState>>,
    updates: broadcast::Sender<ChatUpdate>,
}

impl ChatController {
    /// Start a session, resuming the stored conversation id if there is one.
    pub fn new(gateway: GatewayClient, store: Arc<dyn ConversationStore>) -> Result<Self> {
        let conversation_id = store.get_or_create()?;
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Ok(Self {
            gateway,
            store,
            state: Arc::new(Mutex::new(ChatState::new(conversation_id))),
            updates,
        })
    }

    pub fn with_wallet(self, address: impl Into<String>) -> Self {
        self.set_wallet_address(Some(address.into()));
        self
    }

    /// Receive every change made from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatUpdate> {
        self.updates.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn status(&self) -> ChatStatus {
        self.lock().status
    }

    pub fn conversation_id(&self) -> String {
        self.lock().conversation_id.clone()
    }

    pub fn wallet_address(&self) -> Option<String> {
        self.lock().wallet_address.clone()
    }

    pub fn set_wallet_address(&self, address: Option<String>) {
        let address = address.filter(|a| !a.is_empty());
        tracing::debug!(wallet = %mask_address(address.as_deref()), "Wallet address set");
        self.lock().wallet_address = address;
    }

    pub fn mcp_servers(&self) -> Vec<McpServer> {
        self.lock().mcp.servers().to_vec()
    }

    pub fn selected_mcp(&self) -> McpServer {
        self.lock().mcp.selected().clone()
    }

    /// Route following turns to another MCP server; only available servers qualify.
    pub fn select_mcp(&self, id: &str) -> Result<()> {
        self.lock().mcp.select(id)
    }

    pub fn pending_interrupt(&self) -> Option<InterruptRequest> {
        self.lock().pending_interrupt.clone()
    }

    pub fn pending_transaction(&self) -> Option<PendingTransaction> {
        self.lock().pending_transaction.clone()
    }

    pub fn last_transaction_hash(&self) -> Option<TxHash> {
        self.lock().last_transaction_hash.clone()
    }

    /// Send a user message and consume the answer.
    pub async fn send(&self, input: &str) -> Result<SendOutcome> {
        self.send_with_cancel(input, CancellationToken::new()).await
    }

    /// Like [`send`](Self::send), abandoning the request or stream once `cancel` fires.
    ///
    /// Text streamed before cancellation stays in the transcript.
    pub async fn send_with_cancel(
        &self,
        input: &str,
        cancel: CancellationToken,
    ) -> Result<SendOutcome> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let request = self.update(|state, events| -> Result<ChatRequest> {
            if state.status.is_busy() {
                return Err(GatewayError::InvalidState(
                    "A message is already being processed".into(),
                ));
            }
            if state.pending_interrupt.is_some() {
                return Err(GatewayError::InvalidState(
                    "Confirm or reject the pending request first".into(),
                ));
            }
            if let Some(discarded) = &state.pending_transaction {
                tracing::info!(to = %discarded.tx.to, "Discarding unsigned transaction");
                state.clear_transaction(events);
                state.push(
                    events,
                    Message::bot("The previous transaction was not signed and has been discarded."),
                );
            }
            state.push(events, Message::user(input));
            state.set_status(events, ChatStatus::Submitted);
            Ok(state.chat_request())
        })?;
        let _in_flight = InFlight(self);

        tracing::info!(
            conversation_id = request.conversation_id.as_deref().unwrap_or_default(),
            mcp = request.mcp_type.as_deref().unwrap_or("default"),
            wallet = %mask_address(request.wallet_address.as_deref()),
            messages = request.messages.len(),
            "Sending chat message"
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.gateway.chat(&request) => Some(result),
        };

        let response = match response {
            None => {
                tracing::info!("Chat request cancelled before a response arrived");
                self.update(|state, events| state.set_status(events, ChatStatus::Ready));
                return Ok(SendOutcome::Cancelled);
            }
            Some(Ok(response)) => response,
            Some(Err(e)) => {
                tracing::error!(error = %e, "Chat request failed");
                self.update(|state, events| {
                    state.push(events, Message::bot(SEND_FAILURE_MESSAGE));
                    state.set_status(events, ChatStatus::Error);
                });
                return Err(e);
            }
        };

        match response {
            ChatResponse::Json {
                body,
                conversation_id,
            } => {
                let conversation_id = conversation_id.or_else(|| {
                    body.get("conversation_id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                });
                self.adopt_conversation_id(conversation_id);
                self.update(|state, events| state.apply_json(events, &body));
                Ok(SendOutcome::Completed)
            }
            ChatResponse::Stream {
                conversation_id,
                body,
            } => {
                self.adopt_conversation_id(conversation_id);
                self.consume_stream(body, &cancel).await
            }
        }
    }

    async fn consume_stream(
        &self,
        mut body: BoxStream<'static, Result<Bytes>>,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome> {
        let message_id = self.update(|state, events| {
            state.set_status(events, ChatStatus::Streaming);
            state.push(events, Message::bot(""))
        });

        let mut decoder = Utf8Decoder::new();
        let mut scanner = MarkerScanner::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = body.next() => Some(chunk),
            };

            match next {
                None => {
                    tracing::info!("Chat stream cancelled");
                    self.update(|state, events| {
                        state.mark_cancelled(events, &message_id);
                        state.drop_if_empty(events, &message_id);
                        state.settle(events);
                    });
                    return Ok(SendOutcome::Cancelled);
                }
                Some(None) => break,
                Some(Some(Ok(chunk))) => {
                    let stream_events = scanner.feed(&decoder.decode(&chunk));
                    self.update(|state, events| {
                        state.apply_stream_events(events, &message_id, stream_events)
                    });
                }
                Some(Some(Err(e))) => {
                    tracing::error!(error = %e, "Chat stream failed");
                    self.update(|state, events| {
                        state.drop_if_empty(events, &message_id);
                        state.push(events, Message::bot(SEND_FAILURE_MESSAGE));
                        state.set_status(events, ChatStatus::Error);
                    });
                    return Err(e);
                }
            }
        }

        let mut stream_events = scanner.feed(&decoder.finish());
        stream_events.extend(scanner.finish());
        self.update(|state, events| {
            state.apply_stream_events(events, &message_id, stream_events);
            state.recognize_intent(events, &message_id);
            state.drop_if_empty(events, &message_id);
            state.settle(events);
        });

        tracing::debug!("Chat stream completed");
        Ok(SendOutcome::Completed)
    }

    /// Answer the pending interrupt.
    ///
    /// Rejecting also drops a transaction that came with the interrupt. On
    /// failure the interrupt stays pending so the answer can be retried.
    pub async fn confirm_interrupt(&self, accept: bool) -> Result<()> {
        let (request, interrupt_id) =
            self.update(|state, events| -> Result<(InterruptConfirmRequest, String)> {
                if state.status.is_busy() {
                    return Err(GatewayError::InvalidState(
                        "A message is already being processed".into(),
                    ));
                }
                let Some(interrupt) = &state.pending_interrupt else {
                    return Err(GatewayError::InvalidState(
                        "No confirmation is pending".into(),
                    ));
                };
                let interrupt_id = interrupt.interrupt_id.clone();
                let request = InterruptConfirmRequest {
                    interrupt_id: Some(interrupt_id.clone()),
                    conversation_id: Some(state.conversation_id.clone()),
                    confirmed: Some(accept),
                    wallet_address: state.wallet_address.clone(),
                };
                state.set_status(events, ChatStatus::Submitted);
                Ok((request, interrupt_id))
            })?;
        let _in_flight = InFlight(self);

        tracing::info!(interrupt_id = %interrupt_id, confirmed = accept, "Answering interrupt");

        let body = match self.gateway.confirm_interrupt(&request).await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(interrupt_id = %interrupt_id, error = %e, "Interrupt confirmation failed");
                self.update(|state, events| state.set_status(events, ChatStatus::Error));
                return Err(e);
            }
        };

        self.adopt_conversation_id(
            body.get("conversation_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        );
        self.update(|state, events| {
            state.pending_interrupt = None;
            let from_interrupt = state
                .pending_transaction
                .as_ref()
                .is_some_and(|p| p.source == TransactionSource::Interrupt(interrupt_id.clone()));
            if !accept && from_interrupt {
                state.clear_transaction(events);
            }

            if let Some(text) = reply_text(&body) {
                state.push(events, Message::bot(text));
            }
            if let Some(next) = interrupt_from_json(&body) {
                state.set_interrupt(events, next);
            }
            if let Some(tx) = transaction_from_json(&body) {
                state.set_transaction(
                    events,
                    PendingTransaction {
                        tx,
                        source: TransactionSource::Interrupt(interrupt_id.clone()),
                    },
                );
            }
            state.settle(events);
        });
        Ok(())
    }

    /// Ask the backend to build a transfer from the connected wallet; it becomes pending.
    pub async fn request_transaction(&self, to: &str, amount: &str) -> Result<WalletTransaction> {
        let wallet_address = self
            .wallet_address()
            .ok_or_else(|| GatewayError::InvalidState("Connect a wallet first".into()))?;

        let request = TransactionRequest {
            to_address: Some(to.to_string()),
            amount: Some(serde_json::Value::String(amount.to_string())),
            wallet_address: Some(wallet_address),
            private_key: None,
        };
        let body = self.gateway.request_transaction(&request).await?;

        let tx = transaction_from_json(&body).ok_or_else(|| GatewayError::Backend {
            status: 502,
            message: "Transaction response did not contain a transaction".into(),
        })?;
        self.update(|state, events| {
            state.set_transaction(
                events,
                PendingTransaction {
                    tx: tx.clone(),
                    source: TransactionSource::Requested,
                },
            )
        });
        Ok(tx)
    }

    /// Hand the pending transaction to `signer` and report the outcome in the transcript.
    ///
    /// A failed signature leaves the transaction pending.
    pub async fn sign_pending_transaction(&self, signer: &dyn WalletSigner) -> Result<TxHash> {
        let tx = self.update(|state, _| -> Result<WalletTransaction> {
            if state.pending_interrupt.is_some() {
                return Err(GatewayError::InvalidState(
                    "Confirm the pending request before signing".into(),
                ));
            }
            state
                .pending_transaction
                .as_ref()
                .map(|p| p.tx.clone())
                .ok_or_else(|| GatewayError::InvalidState("No transaction is pending".into()))
        })?;

        tracing::info!(
            to = %tx.to,
            value = %tx.value,
            signer = %mask_address(Some(signer.address())),
            "Signing transaction"
        );

        match signer.sign_and_send(&tx).await {
            Ok(hash) => {
                tracing::info!(hash = %hash, "Transaction sent");
                self.update(|state, events| {
                    if state.pending_transaction.as_ref().is_some_and(|p| p.tx == tx) {
                        state.clear_transaction(events);
                    }
                    state.last_transaction_hash = Some(hash.clone());
                    state.push(events, Message::bot(format!("Transaction sent: {hash}")));
                    events.push(ChatUpdate::TransactionSent { hash: hash.clone() });
                });
                Ok(hash)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Transaction failed");
                self.update(|state, events| {
                    state.push(events, Message::bot(format!("Transaction failed: {e}")));
                });
                Err(e)
            }
        }
    }

    /// Start a new conversation: fresh id, greeting-only transcript, nothing pending.
    pub fn reset(&self) -> Result<String> {
        let conversation_id = self.update(|state, events| -> Result<String> {
            // Checked under the same lock that clears the transcript.
            if state.status.is_busy() {
                return Err(GatewayError::InvalidState(
                    "A message is already being processed".into(),
                ));
            }
            let conversation_id = self.store.reset()?;

            state.messages = vec![Message::welcome()];
            state.pending_interrupt = None;
            state.pending_transaction = None;
            state.conversation_id = conversation_id.clone();
            events.push(ChatUpdate::Reset {
                conversation_id: conversation_id.clone(),
            });
            state.set_status(events, ChatStatus::Ready);
            Ok(conversation_id)
        })?;
        tracing::info!(conversation_id = %conversation_id, "Started new conversation");
        Ok(conversation_id)
    }

    fn adopt_conversation_id(&self, conversation_id: Option<String>) {
        let Some(id) = conversation_id.filter(|id| !id.is_empty()) else {
            return;
        };
        let changed = {
            let mut state = self.lock();
            if state.conversation_id == id {
                false
            } else {
                state.conversation_id = id.clone();
                true
            }
        };
        if changed {
            tracing::debug!(conversation_id = %id, "Adopted conversation id from gateway");
            if let Err(e) = self.store.save(&id) {
                tracing::warn!(error = %e, "Failed to persist conversation id");
            }
        }
    }

    /// Mutate the state under the lock, then broadcast the collected updates.
    fn update<R>(&self, f: impl FnOnce(&mut ChatState, &mut Vec<ChatUpdate>) -> R) -> R {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock();
            f(&mut state, &mut events)
        };
        for event in events {
            // No subscribers is fine
            let _ = self.updates.send(event);
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Leaves the busy state if a request future is dropped mid-flight.
struct InFlight<'a>(&'a ChatController);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.update(|state, events| {
            if state.status.is_busy() {
                tracing::debug!("Request dropped while in flight");
                state.settle(events);
            }
        });
    }
}

fn reply_text(body: &serde_json::Value) -> Option<String> {
    ["message", "content"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(|v| v.as_str()))
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

fn interrupt_from_json(body: &serde_json::Value) -> Option<InterruptRequest> {
    let value = body.get("interrupt").filter(|v| !v.is_null())?;
    serde_json::from_value(value.clone())
        .map_err(|e| tracing::warn!(error = %e, "Ignoring malformed interrupt"))
        .ok()
}

/// `transaction` field, or the body itself when it has `to` and `value`.
fn transaction_from_json(body: &serde_json::Value) -> Option<WalletTransaction> {
    let value = match body.get("transaction").filter(|v| !v.is_null()) {
        Some(tx) => tx,
        None if body.get("to").is_some() && body.get("value").is_some() => body,
        None => return None,
    };
    serde_json::from_value(value.clone())
        .map_err(|e| tracing::warn!(error = %e, "Ignoring malformed transaction"))
        .ok()
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::conversation::MemoryConversationStore;

    const TO: &str = "0x1111111111111111111111111111111111111111";

    fn offline_controller() -> ChatController {
        ChatController::new(
            GatewayClient::new("http://127.0.0.1:9"),
            Arc::new(MemoryConversationStore::new()),
        )
        .unwrap()
    }

    fn apply(controller: &ChatController, body: serde_json::Value) {
        controller.update(|state, events| state.apply_json(events, &body));
    }

    #[test]
    fn test_starts_with_welcome_message() {
        let controller = offline_controller();
        let messages = controller.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, WELCOME_ID);
        assert_eq!(messages[0].content, WELCOME_MESSAGE);
        assert_eq!(messages[0].sender, Sender::Bot);
        assert_eq!(controller.status(), ChatStatus::Ready);
        assert_eq!(controller.selected_mcp().id, "storyscan");
    }

    #[test]
    fn test_resumes_stored_conversation_id() {
        let store = Arc::new(MemoryConversationStore::new());
        store.save("conv-stored").unwrap();
        let controller =
            ChatController::new(GatewayClient::new("http://127.0.0.1:9"), store).unwrap();
        assert_eq!(controller.conversation_id(), "conv-stored");
    }

    #[test]
    fn test_chat_request_skips_welcome() {
        let controller = offline_controller().with_wallet("0xabc");
        controller.update(|state, events| {
            state.push(events, Message::user("hi"));
            state.push(events, Message::bot("hello"));
        });
        let request = controller.lock().chat_request();
        assert_eq!(
            request.messages,
            vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")]
        );
        assert_eq!(request.wallet_address.as_deref(), Some("0xabc"));
        assert_eq!(request.mcp_type.as_deref(), Some("storyscan"));
        assert_eq!(
            request.conversation_id.as_deref(),
            Some(controller.conversation_id().as_str())
        );
    }

    #[test]
    fn test_json_reply_with_transaction() {
        let controller = offline_controller();
        apply(
            &controller,
            serde_json::json!({
                "message": "Ready to send 1 IP",
                "transaction": {"to": TO, "value": "1000000000000000000"}
            }),
        );
        let pending = controller.pending_transaction().unwrap();
        assert_eq!(pending.source, TransactionSource::Json);
        assert_eq!(pending.tx.to, TO);
        assert_eq!(controller.messages().last().unwrap().content, "Ready to send 1 IP");
        assert_eq!(controller.status(), ChatStatus::Ready);
    }

    #[test]
    fn test_json_reply_top_level_transaction() {
        let controller = offline_controller();
        apply(&controller, serde_json::json!({"to": TO, "value": 5}));
        assert_eq!(controller.pending_transaction().unwrap().tx.value, "5");
    }

    #[test]
    fn test_json_error_sets_error_status() {
        let controller = offline_controller();
        apply(&controller, serde_json::json!({"error": "agent crashed"}));
        assert_eq!(controller.status(), ChatStatus::Error);
        assert_eq!(
            controller.messages().last().unwrap().content,
            "Error: agent crashed"
        );
    }

    #[test]
    fn test_json_interrupt_awaits_confirmation() {
        let controller = offline_controller();
        apply(
            &controller,
            serde_json::json!({
                "content": "Please confirm",
                "interrupt": {
                    "interrupt_id": "int-1",
                    "transaction": {"to": TO, "value": "1"}
                }
            }),
        );
        assert_eq!(controller.status(), ChatStatus::AwaitingConfirmation);
        assert_eq!(controller.pending_interrupt().unwrap().interrupt_id, "int-1");
        assert_eq!(
            controller.pending_transaction().unwrap().source,
            TransactionSource::Interrupt("int-1".into())
        );
    }

    #[test]
    fn test_stream_events_and_intent() {
        let controller = offline_controller();
        let message_id = controller.update(|state, events| state.push(events, Message::bot("")));
        let text = crate::client::intent::create_transaction_intent(TO, "2", None);
        controller.update(|state, events| {
            state.apply_stream_events(events, &message_id, vec![StreamEvent::Text(text)]);
            state.recognize_intent(events, &message_id);
        });
        let pending = controller.pending_transaction().unwrap();
        assert_eq!(pending.source, TransactionSource::Intent);
        assert_eq!(pending.tx.value, "2000000000000000000");
    }

    #[test]
    fn test_intent_with_amount_beyond_u128() {
        let controller = offline_controller();
        let message_id = controller.update(|state, events| state.push(events, Message::bot("")));
        let text =
            crate::client::intent::create_transaction_intent(TO, "400000000000000000000", None);
        controller.update(|state, events| {
            state.apply_stream_events(events, &message_id, vec![StreamEvent::Text(text)]);
            state.recognize_intent(events, &message_id);
        });
        let pending = controller.pending_transaction().unwrap();
        assert_eq!(
            pending.tx.value,
            format!("400000000000000000000{}", "0".repeat(18))
        );
    }

    #[test]
    fn test_empty_stream_message_is_dropped() {
        let controller = offline_controller();
        controller.update(|state, events| {
            let id = state.push(events, Message::bot(""));
            state.drop_if_empty(events, &id);
        });
        assert_eq!(controller.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let controller = offline_controller();
        assert_eq!(controller.send("   ").await.unwrap(), SendOutcome::Ignored);
        assert_eq!(controller.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_reports_in_transcript() {
        let controller = offline_controller();
        let mut updates = controller.subscribe();

        let err = controller.send("hello").await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable(_)));
        assert_eq!(controller.status(), ChatStatus::Error);

        let messages = controller.messages();
        assert_eq!(messages[1].content, "hello");
        assert_eq!(messages[2].content, SEND_FAILURE_MESSAGE);

        assert!(matches!(
            updates.recv().await.unwrap(),
            ChatUpdate::MessageAdded { .. }
        ));
    }

    #[tokio::test]
    async fn test_send_rejected_while_interrupt_pending() {
        let controller = offline_controller();
        apply(
            &controller,
            serde_json::json!({"interrupt": {"interrupt_id": "int-2"}}),
        );
        let err = controller.send("next").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_send_discards_unsigned_transaction() {
        let controller = offline_controller();
        apply(&controller, serde_json::json!({"to": TO, "value": "1"}));
        let _ = controller.send("something else").await;
        assert!(controller.pending_transaction().is_none());
        assert!(controller
            .messages()
            .iter()
            .any(|m| m.content.contains("has been discarded")));
    }

    #[tokio::test]
    async fn test_cancel_before_response() {
        let controller = offline_controller();
        let token = CancellationToken::new();
        token.cancel();
        let outcome = controller.send_with_cancel("hi", token).await.unwrap();
        assert_eq!(outcome, SendOutcome::Cancelled);
        assert_eq!(controller.status(), ChatStatus::Ready);
    }

    #[tokio::test]
    async fn test_sign_without_pending_transaction() {
        struct NeverSigner;

        #[async_trait::async_trait]
        impl WalletSigner for NeverSigner {
            fn address(&self) -> &str {
                "0xabc"
            }

            async fn sign_and_send(&self, _tx: &WalletTransaction) -> Result<TxHash> {
                unreachable!("nothing to sign")
            }
        }

        let controller = offline_controller();
        let err = controller
            .sign_pending_transaction(&NeverSigner)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_request_transaction_needs_wallet() {
        let controller = offline_controller();
        let err = controller.request_transaction(TO, "1").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidState(_)));
    }

    #[test]
    fn test_reset_clears_everything() {
        let controller = offline_controller();
        let before = controller.conversation_id();
        apply(
            &controller,
            serde_json::json!({"content": "hi", "interrupt": {"interrupt_id": "int-3"}}),
        );

        let after = controller.reset().unwrap();
        assert_ne!(before, after);
        assert_eq!(controller.conversation_id(), after);
        assert_eq!(controller.messages().len(), 1);
        assert!(controller.pending_interrupt().is_none());
        assert_eq!(controller.status(), ChatStatus::Ready);
    }

    #[test]
    fn test_select_mcp() {
        let controller = offline_controller();
        controller.select_mcp("story-sdk").unwrap();
        assert_eq!(controller.selected_mcp().id, "story-sdk");
        assert!(controller.select_mcp("story-ip").is_err());
    }

    #[test]
    fn test_update_serializes_with_type_tag() {
        let update = ChatUpdate::Delta {
            message_id: "m1".into(),
            text: "hi".into(),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "text_delta");
        assert_eq!(json["text"], "hi");
    }
}
