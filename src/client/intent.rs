//! Transaction intents written into assistant text
//!
//! Besides inline markers, the assistant may describe a transfer as a fenced
//! JSON block after the words `Transaction intent:`. These helpers create,
//! detect and parse that block and convert it into a wallet transaction.

use alloy_primitives::utils::{format_units, parse_units, ParseUnits};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::types::WalletTransaction;

const INTENT_LABEL: &str = "Transaction intent:";

/// Native token decimals (IP uses 18, like ETH)
pub const NATIVE_DECIMALS: u8 = 18;

/// A transfer the assistant wants the user's wallet to make
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIntent {
    pub to: String,
    /// Amount in IP, as a decimal string
    pub amount: String,
    pub data: String,
}

impl TransactionIntent {
    /// Convert to a wallet transaction, scaling the amount to wei.
    pub fn to_wallet_transaction(&self) -> Result<WalletTransaction> {
        Ok(WalletTransaction {
            to: self.to.clone(),
            value: parse_amount(&self.amount)?.to_string(),
            data: Some(self.data.clone()),
            chain_id: None,
            gas: None,
        })
    }
}

/// `0x` followed by exactly 40 hex digits.
pub fn is_valid_ethereum_address(address: &str) -> bool {
    address.len() == 42 && address.starts_with("0x") && address.parse::<Address>().is_ok()
}

/// `0x1234...5678` for valid addresses; anything else is returned unchanged.
pub fn format_address(address: &str) -> String {
    if !is_valid_ethereum_address(address) {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Render an intent block the way the assistant writes it.
pub fn create_transaction_intent(to: &str, amount: &str, data: Option<&str>) -> String {
    let intent = serde_json::json!({
        "to": to,
        "amount": amount,
        "data": data.unwrap_or("0x"),
    });
    let pretty = serde_json::to_string_pretty(&intent).unwrap_or_else(|_| intent.to_string());
    format!("{INTENT_LABEL} \n```json\n{pretty}\n```")
}

/// Whether the text mentions a transaction intent at all.
pub fn has_transaction_intent(content: &str) -> bool {
    content.contains(INTENT_LABEL)
}

/// Find and validate the first complete intent block in `content`.
///
/// Returns `None` when there is no block, the JSON is malformed, `to` or
/// `amount` is missing, empty or numeric zero, or `to` is not a valid
/// address. The string `"0"` counts as an amount.
pub fn extract_transaction_intent(content: &str) -> Option<TransactionIntent> {
    let json = intent_block(content)?;

    let value: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Error parsing transaction intent");
            return None;
        }
    };

    let to = value.get("to").and_then(present_scalar);
    let amount = value.get("amount").and_then(present_scalar);
    let (Some(to), Some(amount)) = (to, amount) else {
        tracing::warn!("Invalid transaction intent: missing required fields");
        return None;
    };

    if !is_valid_ethereum_address(&to) {
        tracing::warn!(to = %to, "Invalid transaction intent: invalid address format");
        return None;
    }

    let data = value
        .get("data")
        .and_then(|d| d.as_str())
        .filter(|d| !d.is_empty())
        .unwrap_or("0x")
        .to_string();

    Some(TransactionIntent { to, amount, data })
}

/// The JSON object of the first `Transaction intent: ```json { ... } ```` block.
fn intent_block(content: &str) -> Option<&str> {
    content
        .match_indices(INTENT_LABEL)
        .find_map(|(start, label)| block_after_label(&content[start + label.len()..]))
}

fn block_after_label(rest: &str) -> Option<&str> {
    let body = rest.trim_start().strip_prefix("```json")?.trim_start();
    if !body.starts_with('{') {
        return None;
    }
    body.match_indices("```").find_map(|(end, _)| {
        let object = body[..end].trim_end();
        object.ends_with('}').then_some(object)
    })
}

/// Non-empty strings and non-zero numbers, as text.
fn present_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// Scale a decimal IP amount to wei (`"1.5"` → 1.5e18).
///
/// Digits past the 18th decimal place are truncated. Negative amounts are
/// rejected.
pub fn parse_amount(amount: &str) -> Result<U256> {
    let invalid = |reason: String| {
        GatewayError::InvalidRequest(format!("Invalid amount {amount}: {reason}"))
    };
    match parse_units(amount.trim(), NATIVE_DECIMALS) {
        Ok(ParseUnits::U256(wei)) => Ok(wei),
        Ok(ParseUnits::I256(_)) => Err(invalid("must not be negative".into())),
        Err(e) => Err(invalid(e.to_string())),
    }
}

/// Render a wei value as a decimal IP amount.
pub fn format_amount(wei: U256) -> Result<String> {
    format_units(wei, NATIVE_DECIMALS)
        .map_err(|e| GatewayError::InvalidRequest(format!("Invalid amount {wei}: {e}")))
}
