//! HTTP client for the gateway's `/api/*` routes

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;

use crate::backend::{BodyKind, CONVERSATION_ID_HEADER};
use crate::error::{GatewayError, Result};
use crate::types::{ChatRequest, InterruptConfirmRequest, TransactionRequest};

/// What `/api/chat` answered with
pub enum ChatResponse {
    /// A complete JSON document
    Json {
        body: serde_json::Value,
        conversation_id: Option<String>,
    },
    /// A text stream, read chunk by chunk
    Stream {
        conversation_id: Option<String>,
        body: BoxStream<'static, Result<Bytes>>,
    },
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatResponse::Json {
                body,
                conversation_id,
            } => f
                .debug_struct("Json")
                .field("body", body)
                .field("conversation_id", conversation_id)
                .finish(),
            ChatResponse::Stream {
                conversation_id, ..
            } => f
                .debug_struct("Stream")
                .field("conversation_id", conversation_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Client for a running gateway
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /api/chat`
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let response = self.post("/api/chat", request).await?;
        let response = ensure_success(response).await?;

        let conversation_id = response
            .headers()
            .get(CONVERSATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        match BodyKind::of(&response) {
            BodyKind::Json => {
                let body = response.json().await?;
                Ok(ChatResponse::Json {
                    body,
                    conversation_id,
                })
            }
            BodyKind::Stream => {
                let body = response
                    .bytes_stream()
                    .map_err(|e| GatewayError::Stream(e.to_string()))
                    .boxed();
                Ok(ChatResponse::Stream {
                    conversation_id,
                    body,
                })
            }
        }
    }

    /// `POST /api/interrupt/confirm`
    pub async fn confirm_interrupt(
        &self,
        request: &InterruptConfirmRequest,
    ) -> Result<serde_json::Value> {
        let response = self.post("/api/interrupt/confirm", request).await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    /// `POST /api/transaction`
    pub async fn request_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<serde_json::Value> {
        let response = self.post("/api/transaction", request).await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        self.http.post(&url).json(body).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                GatewayError::BackendUnavailable(e)
            } else {
                GatewayError::Http(e)
            }
        })
    }
}

/// Turn a non-2xx answer into `GatewayError::Backend`, using its `error` field when present.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("error").map(error_text))
        .unwrap_or_else(|| {
            if text.is_empty() {
                format!("Gateway returned {status}")
            } else {
                text
            }
        });

    Err(GatewayError::Backend {
        status: status.as_u16(),
        message,
    })
}

fn error_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
