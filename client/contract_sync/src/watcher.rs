//! Long-running background task that polls the contract's event log and
//! invalidates the cached entities each event touches.
//!
//! The tracker only reconciles writes this client made. Everything else
//! (another citizen's vote, an admin approving a project) arrives here.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::EntityCache;
use crate::config::SyncConfig;
use crate::contract::EntityKey;
use crate::errors::Result;
use crate::events::ContractEvent;
use crate::rpc::ChainClient;

pub struct EventWatcher {
    client: ChainClient,
    cache: EntityCache,
    /// Next block to read events from.
    cursor: u64,
    poll_interval: Duration,
    per_page: u32,
}

impl EventWatcher {
    pub fn new(client: ChainClient, cache: EntityCache, start_block: u64, config: &SyncConfig) -> Self {
        Self {
            client,
            cache,
            cursor: start_block,
            poll_interval: config.event_poll_interval,
            per_page: config.events_per_page,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Poll until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Event watcher starting at block {}", self.cursor);

        loop {
            match self.poll_once().await {
                Ok(0) => {}
                Ok(n) => debug!("Event watcher invalidated {n} entries"),
                Err(e) => error!("Event watcher poll error: {e}"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("Event watcher stopped at block {}", self.cursor);
    }

    /// Perform a single poll iteration.
    ///
    /// Returns how many cached values were dropped.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let page = self.client.events(self.cursor, self.per_page).await?;

        let mut dropped = BTreeSet::new();
        for raw in &page.events {
            let event = ContractEvent::decode(raw);
            for key in event.affected_keys() {
                if self.cache.invalidate_if_older(&key, event.block) {
                    dropped.insert(key);
                }
            }
        }

        // A full page may have more events in its last block; resume there.
        // Entries already re-read at that block are left alone on the replay.
        // A single block that overflows a page cannot be resumed, so everything
        // served before it is dropped instead.
        let full = page.events.len() >= self.per_page as usize;
        self.cursor = match page.events.last() {
            Some(last) if full && last.block_number > self.cursor => last.block_number,
            Some(last) if full => {
                warn!(
                    "More than {} events in block {}; invalidating every older entry",
                    self.per_page, last.block_number
                );
                dropped.extend(self.cache.invalidate_all_older(last.block_number));
                last.block_number + 1
            }
            _ => page.latest_block.max(self.cursor.saturating_sub(1)) + 1,
        };

        let dropped: Vec<EntityKey> = dropped.into_iter().collect();
        if !dropped.is_empty() {
            info!(
                "Polled {} events → {} cache entries refreshed",
                page.events.len(),
                dropped.len()
            );
            self.cache.refresh(&dropped);
        }
        Ok(dropped.len())
    }
}
