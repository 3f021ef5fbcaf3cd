//! # Entity cache
//!
//! Memoizes contract reads keyed by [`EntityKey`] and keeps them consistent
//! with confirmed transactions.
//!
//! ## Slot lifecycle
//!
//! ```text
//!            fetch                  invalidate(block)
//! (empty) ─────────► Fresh ───────────────────────────► Invalidated ──► fetch ──► Fresh
//!                     │  ▲
//!          mark_stale │  │ clear_stale
//!                     ▼  │
//!                   Fresh + processing
//! ```
//!
//! * `mark_stale` only flags a write in flight. The last confirmed value is
//!   still served, with `processing = true`.
//! * `invalidate` bumps the slot version, drops the value and records the
//!   confirming block as the oldest block a read may be served from.
//! * A fetch remembers the version it started at. If the slot moved on while
//!   the read was in flight, or the node answered from an older block, the
//!   result is discarded and the read is repeated.
//! * Once the table is full, idle slots (no write in flight, no fetch running)
//!   are evicted least recently used first. New slots inherit the highest
//!   `min_block` ever evicted, so eviction never readmits a pre-write read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::contract::{
    decode_address, decode_addresses, decode_bool, decode_detail, decode_summary, decode_tally,
    decode_u64, project_count_call, project_summary_call, EntityKey,
};
use crate::errors::{Result, SyncError};
use crate::rpc::{CallOutput, ChainClient};
use crate::types::{Address, ProjectDetail, ProjectPage, VoteTally};

/// A decoded cache value.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Project(ProjectDetail),
    Projects(ProjectPage),
    Tally(VoteTally),
    Flag(bool),
    Account(Address),
    Accounts(Vec<Address>),
}

/// Non-blocking view of a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Last confirmed value. `processing` is set while a write against the
    /// entity is waiting for confirmation.
    Ready { value: Entity, processing: bool },
    /// No trustworthy value yet; a fetch has been started.
    Pending,
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<Entity>,
    version: u64,
    /// Block the current value was served at.
    served_block: Option<u64>,
    /// Reads served below this block predate the last confirmed write.
    min_block: u64,
    pending_writes: u32,
    fetching: bool,
    /// Table clock at the last access.
    last_used: u64,
    /// Value held before the last invalidation, kept for monotonicity checks.
    previous: Option<Entity>,
}

impl Slot {
    fn is_idle(&self) -> bool {
        self.pending_writes == 0 && !self.fetching
    }
}

struct SlotTable {
    slots: HashMap<EntityKey, Slot>,
    capacity: usize,
    clock: u64,
    /// Highest `min_block` among evicted slots.
    floor: u64,
}

impl SlotTable {
    fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
            floor: 0,
        }
    }

    /// The slot for `key`, created if missing. Counts as a use.
    fn entry(&mut self, key: &EntityKey) -> &mut Slot {
        if !self.slots.contains_key(key) {
            self.make_room();
        }
        self.clock += 1;
        let (clock, floor) = (self.clock, self.floor);
        let slot = self.slots.entry(key.clone()).or_insert_with(|| Slot {
            min_block: floor,
            ..Slot::default()
        });
        slot.last_used = clock;
        slot
    }

    /// The slot for `key` if it exists. Counts as a use.
    fn touch(&mut self, key: &EntityKey) -> Option<&mut Slot> {
        self.clock += 1;
        let clock = self.clock;
        let slot = self.slots.get_mut(key)?;
        slot.last_used = clock;
        Some(slot)
    }

    fn get(&self, key: &EntityKey) -> Option<&Slot> {
        self.slots.get(key)
    }

    fn get_mut(&mut self, key: &EntityKey) -> Option<&mut Slot> {
        self.slots.get_mut(key)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    /// Evict idle slots, oldest first, until a new one fits.
    fn make_room(&mut self) {
        if self.slots.len() < self.capacity {
            return;
        }
        let target = self.capacity - self.capacity / 10 - 1;
        let mut idle: Vec<(u64, EntityKey)> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.is_idle())
            .map(|(key, slot)| (slot.last_used, key.clone()))
            .collect();
        idle.sort_unstable_by_key(|(last_used, _)| *last_used);

        let mut evicted = 0;
        for (_, key) in idle {
            if self.slots.len() <= target {
                break;
            }
            if let Some(slot) = self.slots.remove(&key) {
                self.floor = self.floor.max(slot.min_block);
                evicted += 1;
            }
        }
        debug!("Evicted {evicted} idle cache slots ({} left)", self.slots.len());
    }
}

struct CacheInner {
    client: ChainClient,
    slots: Mutex<SlotTable>,
    max_stale_retries: u32,
    retry_backoff: Duration,
}

/// Shared handle to the cache. Cheap to clone.
#[derive(Clone)]
pub struct EntityCache {
    inner: Arc<CacheInner>,
}

impl EntityCache {
    pub fn new(client: ChainClient, config: &SyncConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                client,
                slots: Mutex::new(SlotTable::new(config.max_cached_entries)),
                max_stale_retries: config.max_stale_retries,
                retry_backoff: config.retry_backoff,
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, SlotTable> {
        // Every mutation under the lock is a plain field assignment.
        self.inner
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ─────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────

    /// Return the cached value if there is one, otherwise start a background
    /// fetch and return [`Lookup::Pending`].
    pub fn get(&self, key: &EntityKey) -> Lookup {
        let start_fetch = {
            let mut slots = self.slots();
            let slot = slots.entry(key);
            if let Some(value) = &slot.value {
                debug!("cache hit {key}");
                return Lookup::Ready {
                    value: value.clone(),
                    processing: slot.pending_writes > 0,
                };
            }
            let start = !slot.fetching;
            slot.fetching = true;
            start
        };

        if start_fetch {
            debug!("cache miss {key}, fetching in background");
            let cache = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                if let Err(e) = cache.fetch(&key).await {
                    warn!("Background fetch of {key} failed: {e}");
                }
            });
        }
        Lookup::Pending
    }

    /// Return the cached value, reading it from the chain first if needed.
    pub async fn fetch(&self, key: &EntityKey) -> Result<Entity> {
        for attempt in 0..=self.inner.max_stale_retries {
            let started_at = {
                let mut slots = self.slots();
                let slot = slots.entry(key);
                if let Some(value) = &slot.value {
                    return Ok(value.clone());
                }
                slot.fetching = true;
                slot.version
            };

            let (entity, block) = match self.load(key).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    if let Some(slot) = self.slots().get_mut(key) {
                        slot.fetching = false;
                    }
                    return Err(e);
                }
            };

            match self.store(key, started_at, entity, block) {
                Ok(entity) => return Ok(entity),
                Err(stale) => {
                    debug!("Discarding read (attempt {attempt}): {stale}");
                    tokio::time::sleep(self.inner.retry_backoff).await;
                }
            }
        }

        if let Some(slot) = self.slots().get_mut(key) {
            slot.fetching = false;
        }
        Err(SyncError::Rpc(format!(
            "{key} still stale after {} reads",
            self.inner.max_stale_retries + 1
        )))
    }

    /// Install a freshly read value unless it is older than what the slot
    /// already knows about. A slot evicted mid-read gets nothing installed.
    fn store(&self, key: &EntityKey, started_at: u64, entity: Entity, block: u64) -> Result<Entity> {
        let mut slots = self.slots();
        let Some(slot) = slots.touch(key) else {
            return Ok(entity);
        };

        let stale = |required: u64| SyncError::StaleRead {
            key: key.to_string(),
            served: block,
            required,
        };

        if slot.version != started_at || block < slot.min_block {
            return Err(stale(slot.min_block));
        }
        if let (Entity::Tally(new), Some(Entity::Tally(old))) = (&entity, &slot.previous) {
            if !new.is_successor_of(old) {
                return Err(stale(slot.min_block));
            }
        }
        // A concurrent fetch may have installed a newer answer already.
        if let (Some(current), Some(served)) = (&slot.value, slot.served_block) {
            if served > block {
                return Ok(current.clone());
            }
        }

        slot.fetching = false;
        // A partial page answers this read only; the next one sweeps again.
        if matches!(&entity, Entity::Projects(page) if page.is_partial()) {
            return Ok(entity);
        }
        slot.value = Some(entity.clone());
        slot.served_block = Some(block);
        Ok(entity)
    }

    async fn load(&self, key: &EntityKey) -> Result<(Entity, u64)> {
        let Some(call) = key.read_call() else {
            let (page, block) = self.sweep_projects().await?;
            return Ok((Entity::Projects(page), block));
        };

        let CallOutput { value, block } = self.inner.client.call(&call).await?;
        let entity = match key {
            EntityKey::Project(_) => Entity::Project(decode_detail(value)?),
            EntityKey::ProjectIndex => {
                return Err(SyncError::Decode("project index has no single read".to_string()))
            }
            EntityKey::ScreeningVotes(id) => Entity::Tally(decode_tally(*id, &value)?),
            EntityKey::ScreeningBallot(..) | EntityKey::Citizenship(_) | EntityKey::AdminRole(_) => {
                Entity::Flag(decode_bool(&value)?)
            }
            EntityKey::MainAdmin => Entity::Account(decode_address(&value)?),
            EntityKey::CitizenshipRequests => Entity::Accounts(decode_addresses(&value)?),
        };
        Ok((entity, block))
    }

    /// Load every project summary in one sweep. Individual failures leave the
    /// rest of the page intact.
    async fn sweep_projects(&self) -> Result<(ProjectPage, u64)> {
        let client = &self.inner.client;
        let count = client.call(&project_count_call()).await?;
        let total = decode_u64(&count.value)?;
        let calls: Vec<_> = (0..total).map(project_summary_call).collect();

        let results = match client.call_batch(&calls).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Batched sweep failed ({e}); falling back to concurrent reads");
                join_all(calls.iter().map(|call| client.call(call))).await
            }
        };
        debug!("Swept {total} projects");

        let mut page = ProjectPage::default();
        let mut block = count.block;
        for (id, result) in (0..total).zip(results) {
            match result.and_then(|out| {
                block = block.min(out.block);
                decode_summary(out.value)
            }) {
                Ok(summary) => page.projects.push(summary),
                Err(e) => {
                    warn!("Project {id} failed to load: {e}");
                    page.failed.push(id);
                }
            }
        }
        Ok((page, block))
    }

    // ─────────────────────────────────────────────────────────
    // Typed reads
    // ─────────────────────────────────────────────────────────

    pub async fn project(&self, id: u64) -> Result<ProjectDetail> {
        match self.fetch(&EntityKey::Project(id)).await? {
            Entity::Project(p) => Ok(p),
            other => Err(mismatch("project", &other)),
        }
    }

    pub async fn projects(&self) -> Result<ProjectPage> {
        match self.fetch(&EntityKey::ProjectIndex).await? {
            Entity::Projects(page) => Ok(page),
            other => Err(mismatch("project index", &other)),
        }
    }

    pub async fn tally(&self, id: u64) -> Result<VoteTally> {
        match self.fetch(&EntityKey::ScreeningVotes(id)).await? {
            Entity::Tally(t) => Ok(t),
            other => Err(mismatch("tally", &other)),
        }
    }

    pub async fn flag(&self, key: EntityKey) -> Result<bool> {
        match self.fetch(&key).await? {
            Entity::Flag(b) => Ok(b),
            other => Err(mismatch("flag", &other)),
        }
    }

    pub async fn main_admin(&self) -> Result<Address> {
        match self.fetch(&EntityKey::MainAdmin).await? {
            Entity::Account(a) => Ok(a),
            other => Err(mismatch("main admin", &other)),
        }
    }

    pub async fn citizenship_requests(&self) -> Result<Vec<Address>> {
        match self.fetch(&EntityKey::CitizenshipRequests).await? {
            Entity::Accounts(list) => Ok(list),
            other => Err(mismatch("citizenship requests", &other)),
        }
    }

    // ─────────────────────────────────────────────────────────
    // Invalidation
    // ─────────────────────────────────────────────────────────

    /// Flag a write in flight against `key`.
    pub fn mark_stale(&self, key: &EntityKey) {
        self.slots().entry(key).pending_writes += 1;
    }

    /// Undo one [`mark_stale`](Self::mark_stale) without touching the value.
    pub fn clear_stale(&self, key: &EntityKey) {
        if let Some(slot) = self.slots().get_mut(key) {
            slot.pending_writes = slot.pending_writes.saturating_sub(1);
        }
    }

    /// Forget the value of `key`; only reads served at `min_block` or later
    /// will be accepted from now on. Returns whether a value was dropped.
    pub fn invalidate(&self, key: &EntityKey, min_block: u64) -> bool {
        let mut slots = self.slots();
        let slot = slots.entry(key);
        slot.version += 1;
        slot.min_block = slot.min_block.max(min_block);
        slot.fetching = false;
        let dropped = slot.value.take();
        let had_value = dropped.is_some();
        if had_value {
            slot.previous = dropped;
        }
        slot.served_block = None;
        debug!("Invalidated {key} (version {}, min block {})", slot.version, slot.min_block);
        had_value
    }

    /// Like [`invalidate`](Self::invalidate), but leaves a value alone when it
    /// was already served at or after `block`. Keys with no slot are ignored;
    /// their first read will be served at the head anyway.
    pub fn invalidate_if_older(&self, key: &EntityKey, block: u64) -> bool {
        {
            let slots = self.slots();
            match slots.get(key) {
                None => return false,
                Some(slot) if slot.value.is_some() && slot.served_block.is_some_and(|b| b >= block) => {
                    return false
                }
                Some(_) => {}
            }
        }
        self.invalidate(key, block)
    }

    /// [`invalidate_if_older`](Self::invalidate_if_older) every resident
    /// slot. Returns the keys whose value was dropped.
    pub fn invalidate_all_older(&self, block: u64) -> Vec<EntityKey> {
        let keys: Vec<EntityKey> = self.slots().slots.keys().cloned().collect();
        keys.into_iter()
            .filter(|key| self.invalidate_if_older(key, block))
            .collect()
    }

    /// Start background re-reads of `keys`.
    pub fn refresh(&self, keys: &[EntityKey]) {
        for key in keys {
            let _ = self.get(key);
        }
    }

    pub fn version(&self, key: &EntityKey) -> u64 {
        self.slots().get(key).map_or(0, |s| s.version)
    }

    pub fn served_block(&self, key: &EntityKey) -> Option<u64> {
        self.slots().get(key).and_then(|s| s.served_block)
    }

    /// Number of resident slots.
    pub fn resident(&self) -> usize {
        self.slots().len()
    }

    pub fn is_processing(&self, key: &EntityKey) -> bool {
        self.slots().get(key).is_some_and(|s| s.pending_writes > 0)
    }
}

fn mismatch(expected: &str, got: &Entity) -> SyncError {
    SyncError::Decode(format!("expected {expected}, cache held {got:?}"))
}
