//! Wallet signing seam
//!
//! The chat client never holds keys itself. A `WalletSigner` is whatever
//! connects to the user's wallet (browser extension bridge, hardware wallet,
//! local signer) and returns the transaction hash once broadcast.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::WalletTransaction;

/// Transaction hash as returned by the wallet (`0x`-prefixed hex)
pub type TxHash = String;

/// Trait for wallets that can sign and broadcast a transaction
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Connected account address
    fn address(&self) -> &str;

    /// Sign `tx` and send it, returning the transaction hash
    async fn sign_and_send(&self, tx: &WalletTransaction) -> Result<TxHash>;
}
