//! Write-transaction tracker.
//!
//! Every write moves through `Submitted → Confirmed | Failed` exactly once.
//!
//! * On submission the related cache entries are flagged as processing; their
//!   last confirmed value stays visible.
//! * On confirmation the related entries are invalidated at the receipt's
//!   block and re-read in the background.
//! * On failure the processing flags are dropped and nothing is re-read.
//!
//! A second write of the same kind from the same account against the same
//! subject is refused while the first is still pending. Other accounts are
//! never blocked. The slot is reserved before the wallet is even asked to
//! sign, so two clicks racing each other cannot both get through.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::EntityCache;
use crate::config::SyncConfig;
use crate::contract::{EntityKey, WriteCall, WriteKind};
use crate::errors::{Result, SyncError};
use crate::rpc::ChainClient;
use crate::types::{Address, TxHash};

pub type TxId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Reverted,
    WalletRejected,
    InsufficientFunds,
    Network,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxFailure {
    pub kind: FailureKind,
    /// Decoded revert reason when there is one, otherwise a generic prompt.
    pub message: String,
}

impl From<&SyncError> for TxFailure {
    fn from(err: &SyncError) -> Self {
        let kind = match err {
            SyncError::Revert { .. } => FailureKind::Reverted,
            SyncError::WalletRejected(_) | SyncError::NotConnected => FailureKind::WalletRejected,
            SyncError::InsufficientFunds => FailureKind::InsufficientFunds,
            SyncError::Rpc(_) | SyncError::Http(_) => FailureKind::Network,
            _ => FailureKind::Other,
        };
        Self {
            kind,
            message: err.user_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxStatus {
    Submitted,
    Confirmed { block: u64 },
    Failed(TxFailure),
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub id: TxId,
    pub kind: WriteKind,
    pub sender: Address,
    pub subject: EntityKey,
    pub related: Vec<EntityKey>,
    /// Unset while the wallet is still asking the user to sign.
    pub hash: Option<TxHash>,
    pub status: TxStatus,
    pub submitted_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl PendingTransaction {
    fn collides(&self, kind: WriteKind, sender: &Address, subject: &EntityKey) -> bool {
        self.kind == kind && &self.sender == sender && &self.subject == subject
    }
}

/// Broadcast to subscribers on every status change.
#[derive(Debug, Clone)]
pub struct TxUpdate {
    pub id: TxId,
    pub kind: WriteKind,
    pub sender: Address,
    pub related: Vec<EntityKey>,
    pub status: TxStatus,
}

struct Entry {
    tx: PendingTransaction,
    cancel: CancellationToken,
}

#[derive(Default)]
struct TrackerState {
    next_id: TxId,
    pending: HashMap<TxId, Entry>,
    finished: VecDeque<PendingTransaction>,
}

struct TrackerInner {
    client: ChainClient,
    cache: EntityCache,
    poll_interval: Duration,
    retention: usize,
    state: Mutex<TrackerState>,
    updates: broadcast::Sender<TxUpdate>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    pub fn new(client: ChainClient, cache: EntityCache, config: &SyncConfig) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(TrackerInner {
                client,
                cache,
                poll_interval: config.confirmation_poll_interval,
                retention: config.finished_retention,
                state: Mutex::new(TrackerState::default()),
                updates,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TxUpdate> {
        self.inner.updates.subscribe()
    }

    /// Is a write of `kind` from `sender` against `subject` still waiting to settle?
    pub fn is_pending(&self, kind: WriteKind, sender: &Address, subject: &EntityKey) -> bool {
        self.state()
            .pending
            .values()
            .any(|e| e.tx.collides(kind, sender, subject))
    }

    pub fn pending(&self) -> Vec<PendingTransaction> {
        let mut list: Vec<_> = self.state().pending.values().map(|e| e.tx.clone()).collect();
        list.sort_by_key(|tx| tx.id);
        list
    }

    /// Current record of `id`, pending or recently settled.
    pub fn status(&self, id: TxId) -> Option<PendingTransaction> {
        let state = self.state();
        state
            .pending
            .get(&id)
            .map(|e| e.tx.clone())
            .or_else(|| state.finished.iter().find(|tx| tx.id == id).cloned())
    }

    // ─────────────────────────────────────────────────────────
    // Submission
    // ─────────────────────────────────────────────────────────

    /// Sign and broadcast `call` from `sender`, then watch it to completion.
    pub async fn submit(&self, sender: &Address, call: WriteCall) -> Result<TxId> {
        let id = self.reserve(sender, &call)?;
        let wire = call.to_call(sender);

        match self.inner.client.submit(&wire, call.value()).await {
            Ok(hash) => {
                self.attach(id, hash);
                Ok(id)
            }
            Err(e) => {
                warn!("{} from {sender} was not submitted: {e}", call.kind());
                self.settle(id, TxStatus::Failed(TxFailure::from(&e)));
                Err(e)
            }
        }
    }

    /// Watch a transaction that was signed and broadcast elsewhere.
    pub fn track(&self, sender: &Address, call: WriteCall, hash: TxHash) -> Result<TxId> {
        let id = self.reserve(sender, &call)?;
        self.attach(id, hash);
        Ok(id)
    }

    fn reserve(&self, sender: &Address, call: &WriteCall) -> Result<TxId> {
        let kind = call.kind();
        let subject = call.subject(sender);
        let related = call.related(sender);

        let id = {
            let mut state = self.state();
            if state
                .pending
                .values()
                .any(|e| e.tx.collides(kind, sender, &subject))
            {
                return Err(SyncError::DuplicatePending {
                    kind: kind.to_string(),
                    subject: subject.to_string(),
                });
            }
            state.next_id += 1;
            let id = state.next_id;
            state.pending.insert(
                id,
                Entry {
                    tx: PendingTransaction {
                        id,
                        kind,
                        sender: sender.clone(),
                        subject,
                        related: related.clone(),
                        hash: None,
                        status: TxStatus::Submitted,
                        submitted_at: Utc::now(),
                        settled_at: None,
                    },
                    cancel: self.inner.shutdown.child_token(),
                },
            );
            id
        };

        for key in &related {
            self.inner.cache.mark_stale(key);
        }
        self.publish(id);
        Ok(id)
    }

    fn attach(&self, id: TxId, hash: TxHash) {
        let cancel = {
            let mut state = self.state();
            let Some(entry) = state.pending.get_mut(&id) else {
                warn!("Transaction {id} settled before its hash {hash} arrived");
                return;
            };
            entry.tx.hash = Some(hash.clone());
            entry.cancel.clone()
        };
        info!("Transaction {id} broadcast as {hash}");

        let tracker = self.clone();
        tokio::spawn(async move { tracker.watch(id, hash, cancel).await });
    }

    /// Poll for the receipt until it appears or the watch is cancelled. The
    /// wallet side has no timeout; neither does inclusion.
    async fn watch(&self, id: TxId, hash: TxHash, cancel: CancellationToken) {
        loop {
            match self.inner.client.receipt(&hash).await {
                Ok(Some(receipt)) if receipt.success => {
                    self.settle(id, TxStatus::Confirmed { block: receipt.block });
                    return;
                }
                Ok(Some(receipt)) => {
                    let err = SyncError::Revert {
                        reason: receipt.revert_reason,
                    };
                    self.settle(id, TxStatus::Failed(TxFailure::from(&err)));
                    return;
                }
                Ok(None) => debug!("Transaction {id} not yet included"),
                Err(e) => warn!("Receipt poll for {hash} failed: {e}"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.inner.poll_interval) => {}
            }
        }
    }

    /// Move `id` to a terminal state. No-op when it already left the pending set.
    fn settle(&self, id: TxId, status: TxStatus) {
        if !status.is_terminal() {
            return;
        }
        let Some(Entry { mut tx, cancel }) = self.state().pending.remove(&id) else {
            return;
        };
        cancel.cancel();

        let cache = &self.inner.cache;
        for key in &tx.related {
            cache.clear_stale(key);
        }
        match &status {
            TxStatus::Confirmed { block } => {
                for key in &tx.related {
                    cache.invalidate(key, *block);
                }
                cache.refresh(&tx.related);
                info!("Transaction {id} ({}) confirmed in block {block}", tx.kind);
            }
            TxStatus::Failed(failure) => {
                warn!("Transaction {id} ({}) failed: {}", tx.kind, failure.message);
            }
            TxStatus::Submitted => {}
        }

        tx.status = status;
        tx.settled_at = Some(Utc::now());
        {
            let mut state = self.state();
            state.finished.push_back(tx);
            while state.finished.len() > self.inner.retention {
                state.finished.pop_front();
            }
        }
        self.publish(id);
    }

    /// Fail every pending transaction, e.g. because the wallet went away.
    pub fn fail_all(&self, reason: &str) {
        let ids: Vec<TxId> = self.state().pending.keys().copied().collect();
        for id in ids {
            self.settle(
                id,
                TxStatus::Failed(TxFailure {
                    kind: FailureKind::WalletRejected,
                    message: reason.to_string(),
                }),
            );
        }
    }

    fn publish(&self, id: TxId) {
        if let Some(tx) = self.status(id) {
            // No subscribers is fine.
            let _ = self.inner.updates.send(TxUpdate {
                id,
                kind: tx.kind,
                sender: tx.sender,
                related: tx.related,
                status: tx.status,
            });
        }
    }

    /// Stop every receipt watcher.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}
