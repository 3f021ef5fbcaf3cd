//! Contract-state synchronization layer for the crowdfunding client.
//!
//! Reads on-chain state (roles, projects, screening tallies), tracks the
//! writes this client sends until they confirm or fail, and keeps a
//! versioned cache consistent with both.
//!
//! ```text
//! ReadFacade ─► EntityCache ─► ChainClient ─► ChainTransport (JSON-RPC)
//!     │              ▲              │
//!     ▼              │              └───────► Wallet (signing)
//!  Tracker ──────────┘ invalidate on confirm
//!     ▲
//! SessionState (roles, wallet events)      EventWatcher (foreign writes)
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod contract;
pub mod errors;
pub mod events;
pub mod facade;
pub mod review;
pub mod rpc;
pub mod session;
pub mod storage;
pub mod submission;
pub mod tracker;
pub mod types;
pub mod wallet;
pub mod watcher;

#[cfg(test)]
mod test_reconciliation;
#[cfg(test)]
mod testing;

pub use cache::{Entity, EntityCache, Lookup};
pub use config::{Config, SyncConfig};
pub use contract::{EntityKey, WriteCall, WriteKind};
pub use errors::{Result, SyncError};
pub use facade::{ProjectFilter, ReadFacade};
pub use rpc::{ChainClient, ChainTransport, HttpTransport};
pub use session::{ConnectionStatus, Session, SessionState};
pub use tracker::{FailureKind, PendingTransaction, Tracker, TxFailure, TxId, TxStatus, TxUpdate};
pub use wallet::{Wallet, WalletEvent};
pub use watcher::EventWatcher;
