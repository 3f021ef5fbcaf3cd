//! Crate-wide error taxonomy.
//!
//! | Variant               | Retried | Surfaced to the user            |
//! |-----------------------|---------|---------------------------------|
//! | `Rpc`                 | once    | generic retry prompt            |
//! | `Revert`              | never   | decoded reason when present     |
//! | `WalletRejected`      | never   | yes                             |
//! | `InsufficientFunds`   | never   | yes                             |
//! | `StaleRead`           | silent  | never (refetched internally)    |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("execution reverted: {}", reason.as_deref().unwrap_or("no reason given"))]
    Revert { reason: Option<String> },

    #[error("Wallet rejected the request: {0}")]
    WalletRejected(String),

    #[error("Insufficient funds to cover value plus gas")]
    InsufficientFunds,

    #[error("Stale read for {key}: served at block {served}, need {required}")]
    StaleRead {
        key: String,
        served: u64,
        required: u64,
    },

    #[error("A {kind} transaction for {subject} is already pending")]
    DuplicatePending { kind: String, subject: String },

    #[error("Account {account} has already voted on project {project_id}")]
    AlreadyVoted { project_id: u64, account: String },

    #[error("Review score {score} is below the required minimum of {minimum}")]
    ReviewBelowThreshold { score: u8, minimum: u8 },

    #[error("Wallet not connected")]
    NotConnected,

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("File storage error: {0}")]
    Storage(String),

    #[error("Review service error: {0}")]
    Review(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Transient failures that may succeed on a second attempt.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Rpc(_) | Self::StaleRead { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Message suitable for showing to the person operating the wallet.
    pub fn user_message(&self) -> String {
        match self {
            Self::Revert {
                reason: Some(reason),
            } => reason.clone(),
            Self::Revert { reason: None } | Self::Rpc(_) | Self::Http(_) | Self::StaleRead { .. } => {
                "Transaction failed. Please try again.".to_string()
            }
            Self::WalletRejected(_) => "The request was rejected in your wallet.".to_string(),
            Self::InsufficientFunds => {
                "Your account cannot cover the amount plus network fees.".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
