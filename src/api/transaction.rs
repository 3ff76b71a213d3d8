use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};

use crate::api::{parse_body, relay_json};
use crate::error::{GatewayError, Result};
use crate::format::mask_address;
use crate::server::state::AppState;
use crate::types::TransactionRequest;

/// POST /api/transaction - ask the backend to build a wallet transaction.
pub async fn handler(State(state): State<AppState>, body: Bytes) -> Response {
    match forward(&state, &body).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Error in transaction API route");
            e.into_response()
        }
    }
}

async fn forward(state: &AppState, body: &[u8]) -> Result<Response> {
    let mut request: TransactionRequest = parse_body(body)?;

    // An empty key is treated as absent and never forwarded.
    request.private_key = request.private_key.filter(|k| !k.is_empty());

    tracing::info!(
        to = request.to_address.as_deref().unwrap_or(""),
        amount = ?request.amount,
        wallet = %mask_address(request.wallet_address.as_deref()),
        has_private_key = request.private_key.is_some(),
        "Transaction request"
    );

    if !request.has_required_fields() {
        return Err(GatewayError::MissingParameters);
    }

    let response = state.backend.transaction(&request).await?;
    relay_json(response, "Transaction API request failed").await
}
