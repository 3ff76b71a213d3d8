//! Wire types shared by the gateway routes and the chat client
//!
//! Field names follow the snake_case JSON the agent backend speaks, except
//! for the wallet transaction which uses the camelCase shape wallets expect.

use serde::{Deserialize, Deserializer, Serialize};

/// A single chat message as exchanged with the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_type: Option<String>,
}

impl ChatRequest {
    /// Content of the last `user` message, or an empty string.
    pub fn latest_user_message(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Body the gateway forwards to `{backend}/api/chat`
///
/// The backend keeps its own history per conversation, so only the latest
/// user message travels.
#[derive(Debug, Clone, Serialize)]
pub struct BackendChatRequest<'a> {
    pub message: &'a str,
    pub conversation_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_type: Option<&'a str>,
}

/// Body of `POST /api/transaction`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,

    /// Amount in IP; the backend accepts either a number or a decimal string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<SecretString>,
}

impl TransactionRequest {
    /// True when `to_address`, `amount` and `wallet_address` are all present and non-empty.
    pub fn has_required_fields(&self) -> bool {
        non_empty(&self.to_address)
            && non_empty(&self.wallet_address)
            && self.amount.as_ref().is_some_and(is_truthy)
    }
}

/// Body of `POST /api/interrupt/confirm`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterruptConfirmRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

impl InterruptConfirmRequest {
    pub fn has_required_fields(&self) -> bool {
        non_empty(&self.interrupt_id) && non_empty(&self.conversation_id) && self.confirmed.is_some()
    }
}

/// Canned assistant reply used when the backend cannot be reached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockReply {
    pub id: String,
    pub content: String,
    pub role: String,
}

impl MockReply {
    pub fn for_message(latest_user_message: &str) -> Self {
        Self {
            id: format!("mock-{}", chrono::Utc::now().timestamp_millis()),
            content: format!(
                "This is a mock response for local development. You said: \"{latest_user_message}\". \
                 The backend server is not available. Please check your BACKEND_URL environment \
                 variable and ensure the backend server is running."
            ),
            role: "assistant".to_string(),
        }
    }
}

/// A transaction in the shape wallet libraries sign (`to`, `value` in wei, `data`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    pub to: String,

    #[serde(deserialize_with = "string_or_number")]
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_string_or_number"
    )]
    pub gas: Option<String>,
}

/// A backend request to pause and ask the user before a sensitive operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptRequest {
    pub interrupt_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<WalletTransaction>,
}

/// String wrapper whose `Debug` never prints the contents
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
