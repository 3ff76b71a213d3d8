use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};

use crate::api::{parse_body, relay_json};
use crate::error::{GatewayError, Result};
use crate::format::mask_address;
use crate::server::state::AppState;
use crate::types::InterruptConfirmRequest;

/// POST /api/interrupt/confirm - forward the user's accept/reject decision.
pub async fn handler(State(state): State<AppState>, body: Bytes) -> Response {
    match forward(&state, &body).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Error in interrupt confirmation API route");
            e.into_response()
        }
    }
}

async fn forward(state: &AppState, body: &[u8]) -> Result<Response> {
    let request: InterruptConfirmRequest = parse_body(body)?;

    tracing::info!(
        interrupt_id = request.interrupt_id.as_deref().unwrap_or(""),
        conversation_id = request.conversation_id.as_deref().unwrap_or(""),
        confirmed = ?request.confirmed,
        wallet = %mask_address(request.wallet_address.as_deref()),
        "Interrupt confirmation request"
    );

    if !request.has_required_fields() {
        return Err(GatewayError::MissingParameters);
    }

    let response = state.backend.confirm_interrupt(&request).await?;
    relay_json(response, "Interrupt confirmation failed").await
}
