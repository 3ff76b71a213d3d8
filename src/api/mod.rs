pub mod chat;
pub mod health;
pub mod interrupt;
pub mod stream;
pub mod transaction;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::de::DeserializeOwned;

use crate::error::{GatewayError, Result};
use crate::server::state::AppState;

/// Build the proxy routes mounted under `/api`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat::handler))
        .route("/transaction", post(transaction::handler))
        .route("/interrupt/confirm", post(interrupt::handler))
}

/// Parse a JSON request body, answering 400 for anything unparsable.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    if body.is_empty() {
        return Err(GatewayError::InvalidRequest("request body is empty".into()));
    }
    serde_json::from_slice(body).map_err(|e| GatewayError::InvalidRequest(e.to_string()))
}

/// Relay a JSON backend answer, turning non-2xx into `"{failure}: <body text>"`.
pub(crate) async fn relay_json(response: reqwest::Response, failure: &str) -> Result<Response> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        tracing::error!(status = status.as_u16(), body = %text, "{failure}");
        return Err(GatewayError::Backend {
            status: status.as_u16(),
            message: format!("{failure}: {text}"),
        });
    }

    let data: serde_json::Value = read_json(response).await?;
    tracing::debug!(response = %data, "Relaying backend response");
    Ok((StatusCode::OK, Json(data)).into_response())
}

/// Read a 2xx body as JSON. A body that cannot be read or parsed answers 500.
pub(crate) async fn read_json(response: reqwest::Response) -> Result<serde_json::Value> {
    response.json().await.map_err(GatewayError::InvalidResponse)
}
