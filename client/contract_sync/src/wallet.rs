//! Wallet boundary: account access, signing and chain switching.
//!
//! Implementations wrap a browser extension or a WalletConnect session. Their
//! failures arrive as EIP-1193 provider errors and are mapped here onto the
//! crate's taxonomy.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{Result, SyncError};
use crate::types::{amount, Address, TxHash};

/// EIP-1193: the user rejected the request.
pub const USER_REJECTED: i64 = 4001;
/// EIP-1193: the requested account or method has not been authorized.
pub const UNAUTHORIZED: i64 = 4100;
/// EIP-1193: the provider is disconnected from all chains.
pub const DISCONNECTED: i64 = 4900;
/// EIP-1193: the provider is not connected to the requested chain.
pub const CHAIN_DISCONNECTED: i64 = 4901;

/// A write, ready for the wallet to sign and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub method: &'static str,
    pub args: Vec<Value>,
    #[serde(with = "amount")]
    pub value: u128,
}

/// Notifications pushed by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// The selected accounts changed. Empty means the user locked or
    /// disconnected every account.
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    Disconnected,
}

#[async_trait]
pub trait Wallet: Send + Sync {
    /// Prompt the user to expose accounts.
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    /// Accounts already exposed, without prompting.
    async fn accounts(&self) -> Result<Vec<Address>>;

    async fn chain_id(&self) -> Result<u64>;

    /// Sign and broadcast. Resolves once broadcast, never waits for inclusion.
    async fn send_transaction(&self, request: &TxRequest) -> Result<TxHash>;

    async fn switch_chain(&self, chain_id: u64) -> Result<()>;
}

/// Map an EIP-1193 provider error onto [`SyncError`].
pub fn provider_error(code: i64, message: &str) -> SyncError {
    if message.to_lowercase().contains("insufficient funds") {
        return SyncError::InsufficientFunds;
    }
    match code {
        USER_REJECTED => SyncError::WalletRejected(message.to_string()),
        UNAUTHORIZED | DISCONNECTED | CHAIN_DISCONNECTED => SyncError::NotConnected,
        _ => SyncError::Rpc(format!("wallet error {code}: {message}")),
    }
}
