//! Session state: connected account, chain id and derived roles.
//!
//! `Disconnected → Connecting → Connected`. Entering `Connecting` starts the
//! three role reads at once; until every one of them has settled the session
//! reports `loading = true` and exposes no role at all. Every account or chain
//! change re-enters `Connecting` and bumps a generation counter, so a role
//! lookup that finishes after the account moved on is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{Result, SyncError};
use crate::facade::ReadFacade;
use crate::tracker::{TxStatus, TxUpdate};
use crate::types::{Address, Roles};
use crate::wallet::{Wallet, WalletEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub status: ConnectionStatus,
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    roles: Option<Roles>,
    /// Role reads are still in flight.
    pub loading: bool,
    /// Set when the role reads failed; roles stay unknown.
    pub role_error: Option<String>,
}

impl Session {
    fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            account: None,
            chain_id: None,
            roles: None,
            loading: false,
            role_error: None,
        }
    }

    /// Fully resolved roles, or `None` while loading or when unknown.
    pub fn roles(&self) -> Option<Roles> {
        if self.loading {
            None
        } else {
            self.roles
        }
    }

    pub fn is_citizen(&self) -> bool {
        self.roles().is_some_and(|r| r.is_citizen)
    }

    pub fn is_admin(&self) -> bool {
        self.roles().is_some_and(|r| r.is_admin)
    }

    pub fn is_main_admin(&self) -> bool {
        self.roles().is_some_and(|r| r.is_main_admin)
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

struct SessionInner {
    wallet: Arc<dyn Wallet>,
    facade: ReadFacade,
    expected_chain: Option<u64>,
    state: watch::Sender<Session>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

/// Shared, observable session. Construct once per application.
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<SessionInner>,
}

impl SessionState {
    pub fn new(wallet: Arc<dyn Wallet>, facade: ReadFacade, expected_chain: Option<u64>) -> Self {
        let (state, _) = watch::channel(Session::disconnected());
        Self {
            inner: Arc::new(SessionInner {
                wallet,
                facade,
                expected_chain,
                state,
                generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    /// Ask the wallet for an account, switch to the expected chain if needed
    /// and derive roles.
    pub async fn connect(&self) -> Result<Session> {
        self.inner.state.send_modify(|s| {
            s.status = ConnectionStatus::Connecting;
            s.loading = true;
        });

        match self.open_wallet().await {
            Ok((account, chain_id)) => self.enter_connecting(account, chain_id).await,
            Err(e) => {
                warn!("Wallet connection failed: {e}");
                self.inner.generation.fetch_add(1, Ordering::SeqCst);
                self.inner.state.send_replace(Session::disconnected());
                Err(e)
            }
        }
    }

    async fn open_wallet(&self) -> Result<(Address, u64)> {
        let wallet = &self.inner.wallet;
        let account = wallet
            .request_accounts()
            .await?
            .into_iter()
            .next()
            .ok_or(SyncError::NotConnected)?;

        let mut chain_id = wallet.chain_id().await?;
        if let Some(expected) = self.inner.expected_chain {
            if chain_id != expected {
                info!("Wallet is on chain {chain_id}, switching to {expected}");
                wallet.switch_chain(expected).await?;
                chain_id = expected;
            }
        }
        Ok((account, chain_id))
    }

    /// Publish `Connecting` for `account` and resolve its roles. Returns the
    /// session as it stands afterwards, which may belong to a newer account if
    /// the wallet switched in the meantime.
    async fn enter_connecting(&self, account: Address, chain_id: u64) -> Result<Session> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_replace(Session {
            status: ConnectionStatus::Connecting,
            account: Some(account.clone()),
            chain_id: Some(chain_id),
            roles: None,
            loading: true,
            role_error: None,
        });
        debug!("Resolving roles for {account} (generation {generation})");

        let outcome = self.inner.facade.roles(&account).await;
        if !self.is_current(generation) {
            debug!("Dropping roles of {account}: session moved on");
            return Ok(self.snapshot());
        }

        self.inner.state.send_modify(|s| {
            s.status = ConnectionStatus::Connected;
            s.loading = false;
            match &outcome {
                Ok(roles) => s.roles = Some(*roles),
                Err(e) => s.role_error = Some(e.user_message()),
            }
        });
        match &outcome {
            Ok(roles) => info!("Session connected: {account} on chain {chain_id} ({roles:?})"),
            Err(e) => warn!("Connected {account} but role reads failed: {e}"),
        }
        Ok(self.snapshot())
    }

    /// Re-derive roles for the connected account without going back to
    /// `loading`; the previous roles stay visible until the new ones land.
    pub async fn refresh_roles(&self) -> Result<()> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let Some(account) = self.snapshot().account else {
            return Ok(());
        };
        let roles = self.inner.facade.roles(&account).await?;
        if self.is_current(generation) {
            self.inner.state.send_modify(|s| {
                s.roles = Some(roles);
                s.role_error = None;
            });
        }
        Ok(())
    }

    /// Drop the session and fail every write still waiting on the wallet.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.facade.tracker().fail_all("wallet disconnected");
        self.inner.state.send_replace(Session::disconnected());
        info!("Session disconnected");
    }

    pub async fn handle_event(&self, event: WalletEvent) -> Result<()> {
        let current = self.snapshot();
        match event {
            WalletEvent::Disconnected => self.disconnect(),
            WalletEvent::AccountsChanged(accounts) => match accounts.into_iter().next() {
                None => self.disconnect(),
                Some(account) if current.account.as_ref() != Some(&account) => {
                    let chain_id = match current.chain_id {
                        Some(id) => id,
                        None => self.inner.wallet.chain_id().await?,
                    };
                    self.enter_connecting(account, chain_id).await?;
                }
                Some(_) => {}
            },
            WalletEvent::ChainChanged(chain_id) => {
                if let Some(account) = current.account {
                    if current.chain_id != Some(chain_id) {
                        self.enter_connecting(account, chain_id).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Drive the session from wallet notifications and confirmed role writes
    /// until [`shutdown`](Self::shutdown) is called.
    pub async fn run(self, mut events: mpsc::Receiver<WalletEvent>) {
        let mut updates = self.inner.facade.tracker().subscribe();
        let shutdown = self.inner.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            warn!("Wallet event handling failed: {e}");
                        }
                    }
                    None => break,
                },
                update = updates.recv() => match update {
                    Ok(update) => self.on_tx_update(&update).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Session missed {skipped} transaction updates; refreshing roles");
                        if let Err(e) = self.refresh_roles().await {
                            warn!("Role refresh failed: {e}");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Session loop stopped");
    }

    async fn on_tx_update(&self, update: &TxUpdate) {
        if !matches!(update.status, TxStatus::Confirmed { .. }) {
            return;
        }
        let Some(account) = self.snapshot().account else {
            return;
        };
        if update.related.iter().any(|key| key.is_role_of(&account)) {
            debug!("Transaction {} touched roles of {account}", update.id);
            if let Err(e) = self.refresh_roles().await {
                warn!("Role refresh failed: {e}");
            }
        }
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}
