//! Error types for story-gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors raised by the gateway routes and the chat client
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Request body could not be parsed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A route was called without one of its required fields
    #[error("Missing required parameters")]
    MissingParameters,

    /// The backend could not be reached at all (connect error, timeout)
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(#[source] reqwest::Error),

    /// The backend (or gateway, seen from the client) answered with a non-2xx status
    #[error("{message}")]
    Backend {
        status: u16,
        message: String,
    },

    /// The backend answered 2xx with a body that is not valid JSON
    #[error("Invalid backend response: {0}")]
    InvalidResponse(#[source] reqwest::Error),

    /// Any other HTTP client failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Identity token generation failure
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A response stream broke mid-way
    #[error("Stream error: {0}")]
    Stream(String),

    /// The controller was asked to do something its current state forbids
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Wallet signing failure
    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// HTTP status this error maps to when returned from a route.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) | GatewayError::MissingParameters => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Backend { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            GatewayError::InvalidRequest(_)
            | GatewayError::MissingParameters
            | GatewayError::Backend { .. } => serde_json::json!({ "error": self.to_string() }),
            _ => serde_json::json!({
                "error": self.to_string(),
                "details": format!("{self:?}"),
            }),
        };

        (status, Json(body)).into_response()
    }
}
