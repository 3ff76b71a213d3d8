//! HTTP client for the agent backend
//!
//! Thin wrapper over `reqwest` that knows the backend's three endpoints,
//! attaches identity tokens, and tells transport failures apart from HTTP
//! error statuses.

use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use serde::Serialize;

use crate::auth::IdTokenProvider;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};

/// Header carrying the conversation id next to a streamed body
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

/// How a successful backend body should be relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// A complete JSON document (transaction payloads, mock replies)
    Json,
    /// Anything else: relayed chunk by chunk as text
    Stream,
}

impl BodyKind {
    /// Classify a response by its `Content-Type` header value.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.to_ascii_lowercase().contains("application/json") => BodyKind::Json,
            _ => BodyKind::Stream,
        }
    }

    pub fn of(response: &reqwest::Response) -> Self {
        Self::from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        )
    }
}

/// Client for `{backend}/api/*`
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    id_tokens: Option<Arc<dyn IdTokenProvider>>,
    request_timeout: std::time::Duration,
}

impl BackendClient {
    pub fn new(
        config: &GatewayConfig,
        http: reqwest::Client,
        id_tokens: Option<Arc<dyn IdTokenProvider>>,
    ) -> Self {
        Self {
            http,
            base_url: config.backend_base().to_string(),
            id_tokens,
            request_timeout: config.request_timeout(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Outbound headers: JSON content type, plus a bearer identity token
    /// when a provider is configured. Token failures degrade to no auth.
    pub async fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let Some(provider) = &self.id_tokens else {
            return headers;
        };

        match provider.id_token(&self.base_url).await {
            Ok(token) => match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(e) => tracing::warn!(error = %e, "Identity token is not a valid header value"),
            },
            Err(e) => {
                tracing::warn!(provider = provider.name(), error = %e, "Failed to generate auth headers");
            }
        }

        headers
    }

    /// Forward a chat turn. The response body is left unread so it can be streamed.
    ///
    /// Only the connect timeout applies; a streamed answer may take minutes.
    pub async fn chat<B: Serialize + ?Sized>(&self, body: &B) -> Result<reqwest::Response> {
        self.post("/api/chat", body, None).await
    }

    /// Forward a transaction request.
    pub async fn transaction<B: Serialize + ?Sized>(&self, body: &B) -> Result<reqwest::Response> {
        self.post("/api/transaction", body, Some(self.request_timeout))
            .await
    }

    /// Forward an interrupt decision.
    pub async fn confirm_interrupt<B: Serialize + ?Sized>(
        &self,
        body: &B,
    ) -> Result<reqwest::Response> {
        self.post("/api/interrupt/confirm", body, Some(self.request_timeout))
            .await
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        timeout: Option<std::time::Duration>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .post(&url)
            .headers(self.headers().await)
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() || e.is_request() {
                GatewayError::BackendUnavailable(e)
            } else {
                GatewayError::Http(e)
            }
        })
    }
}
