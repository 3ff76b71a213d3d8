use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use crate::api::stream::{text_stream_response, with_conversation_id};
use crate::api::{parse_body, read_json};
use crate::backend::{BodyKind, CONVERSATION_ID_HEADER};
use crate::client::conversation::new_conversation_id;
use crate::error::{GatewayError, Result};
use crate::format::{mask_address, truncate_for_log};
use crate::server::state::AppState;
use crate::types::{BackendChatRequest, ChatRequest, MockReply};

/// POST /api/chat - forward the latest user turn and relay JSON or a text stream.
pub async fn handler(State(state): State<AppState>, body: Bytes) -> Response {
    match relay(&state, &body).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Error in chat API route");
            e.into_response()
        }
    }
}

async fn relay(state: &AppState, body: &[u8]) -> Result<Response> {
    let request: ChatRequest = parse_body(body)?;
    let latest = request.latest_user_message();

    tracing::info!(
        wallet = %mask_address(request.wallet_address.as_deref()),
        mcp = request.mcp_type.as_deref().unwrap_or("default"),
        messages = request.messages.len(),
        latest = %truncate_for_log(latest, 100),
        "Processing chat message"
    );

    let conversation_id = request
        .conversation_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(new_conversation_id);

    let backend_request = BackendChatRequest {
        message: latest,
        conversation_id: &conversation_id,
        wallet_address: request.wallet_address.as_deref(),
        mcp_type: request.mcp_type.as_deref(),
    };

    let response = match state.backend.chat(&backend_request).await {
        Ok(response) => response,
        Err(GatewayError::BackendUnavailable(e)) if state.config.mock_fallback => {
            tracing::warn!(error = %e, "Backend connection error, returning mock response");
            return Ok(mock_reply(latest, &conversation_id));
        }
        Err(e) => return Err(e),
    };

    if !response.status().is_success() {
        return Ok(backend_error(response).await);
    }

    let conversation_id = response
        .headers()
        .get(CONVERSATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or(conversation_id);

    match BodyKind::of(&response) {
        BodyKind::Json => {
            tracing::info!("Received JSON response from backend");
            let data = match read_json(response).await {
                Ok(data) => data,
                Err(e) if state.config.mock_fallback => {
                    tracing::warn!(error = %e, "Unreadable backend response, returning mock response");
                    return Ok(mock_reply(latest, &conversation_id));
                }
                Err(e) => return Err(e),
            };
            let reply = (StatusCode::OK, Json(data)).into_response();
            Ok(with_conversation_id(reply, &conversation_id))
        }
        BodyKind::Stream => {
            tracing::info!(
                content_type = ?response.headers().get(axum::http::header::CONTENT_TYPE),
                "Streaming response detected"
            );
            Ok(text_stream_response(response, &conversation_id))
        }
    }
}

fn mock_reply(latest: &str, conversation_id: &str) -> Response {
    let reply = Json(MockReply::for_message(latest)).into_response();
    with_conversation_id(reply, conversation_id)
}

/// Mirror a backend failure status with `{"error", "status"}`.
async fn backend_error(response: reqwest::Response) -> Response {
    let status = response.status();
    tracing::error!(
        status = status.as_u16(),
        reason = status.canonical_reason().unwrap_or(""),
        "Backend error"
    );

    let error_data: Value = response
        .json()
        .await
        .unwrap_or_else(|_| serde_json::json!({ "message": "Failed to parse error response" }));

    let error = error_message(error_data);
    let body = serde_json::json!({ "error": error, "status": status.as_u16() });
    let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(body)).into_response()
}

/// The backend's `message` when it has a usable one, else the whole error body.
fn error_message(error_data: Value) -> Value {
    match error_data.get("message") {
        Some(Value::String(s)) if !s.is_empty() => Value::String(s.clone()),
        Some(Value::Null) | Some(Value::Bool(false)) | Some(Value::String(_)) | None => {
            if error_data.is_null() {
                Value::String("Failed to fetch from backend".into())
            } else {
                error_data
            }
        }
        Some(other) => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_message_prefers_message_field() {
        assert_eq!(
            error_message(json!({"message": "agent crashed", "code": 7})),
            json!("agent crashed")
        );
    }

    #[test]
    fn test_error_message_falls_back_to_body() {
        let body = json!({"detail": "validation failed"});
        assert_eq!(error_message(body.clone()), body);
        let body = json!({"message": ""});
        assert_eq!(error_message(body.clone()), body);
    }

    #[test]
    fn test_error_message_for_null_body() {
        assert_eq!(error_message(Value::Null), json!("Failed to fetch from backend"));
    }
}
