//! In-memory doubles for the chain gateway and the wallet.
//!
//! `MockChain` holds a tiny model of the crowdfunding contract. Writes sent
//! through `MockWallet` sit in a mempool until the test calls `mine()`, which
//! applies them, records receipts and emits events. Every read is counted so
//! tests can assert on the exact traffic the sync layer generated.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::cache::EntityCache;
use crate::config::SyncConfig;
use crate::contract::ContractCall;
use crate::errors::{Result, SyncError};
use crate::facade::ReadFacade;
use crate::review::{ReviewRequest, ReviewService, ReviewVerdict};
use crate::rpc::{CallOutput, ChainClient, ChainTransport, EventsPage, RawEvent, Receipt};
use crate::storage::FileStore;
use crate::tracker::Tracker;
use crate::types::{Address, Investor, Milestone, ProjectDetail, ProjectId, ProjectSummary, TxHash};
use crate::wallet::{provider_error, TxRequest, Wallet, USER_REJECTED};

pub fn addr(n: u8) -> Address {
    Address::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
}

pub fn contract_address() -> Address {
    addr(0xc0)
}

pub fn fast_config() -> SyncConfig {
    SyncConfig {
        retry_backoff: Duration::from_millis(1),
        confirmation_poll_interval: Duration::from_millis(5),
        event_poll_interval: Duration::from_millis(5),
        ..SyncConfig::default()
    }
}

pub fn sample_project(id: ProjectId, creator: &Address, approved: bool) -> ProjectDetail {
    ProjectDetail {
        summary: ProjectSummary {
            id,
            name: format!("Project {id}"),
            creator: creator.clone(),
            approved,
            total_funds: 0,
            current_milestone: 0,
            milestone_count: 2,
            funding_expired: false,
        },
        description: "Community solar for the east district".to_string(),
        icon_ref: format!("ipfs://icon{id}"),
        banner_ref: format!("ipfs://banner{id}"),
        milestones: vec![
            Milestone {
                description: "Site survey".to_string(),
                completed: false,
                votes_for: 0,
                votes_against: 0,
                funds_released: false,
            },
            Milestone {
                description: "Installation".to_string(),
                completed: false,
                votes_for: 0,
                votes_against: 0,
                funds_released: false,
            },
        ],
        investors: Vec::new(),
    }
}

#[derive(Default)]
struct Screening {
    votes_for: u64,
    votes_against: u64,
    voters: HashSet<Address>,
}

struct ChainState {
    block: u64,
    /// Reads are served this many blocks behind the head.
    read_lag: u64,
    main_admin: Address,
    admins: HashSet<Address>,
    citizens: HashSet<Address>,
    requests: Vec<Address>,
    projects: Vec<ProjectDetail>,
    screening: HashMap<ProjectId, Screening>,
    mempool: Vec<(TxHash, TxRequest)>,
    receipts: HashMap<TxHash, Receipt>,
    events: Vec<RawEvent>,
    failing_reads: HashSet<ProjectId>,
    delays: HashMap<&'static str, Duration>,
    next_tx: u64,
}

pub struct MockChain {
    state: Mutex<ChainState>,
    calls: Mutex<Vec<&'static str>>,
    batches: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl MockChain {
    pub fn new(main_admin: Address) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                block: 1,
                read_lag: 0,
                main_admin,
                admins: HashSet::new(),
                citizens: HashSet::new(),
                requests: Vec::new(),
                projects: Vec::new(),
                screening: HashMap::new(),
                mempool: Vec::new(),
                receipts: HashMap::new(),
                events: Vec::new(),
                failing_reads: HashSet::new(),
                delays: HashMap::new(),
                next_tx: 1,
            }),
            calls: Mutex::new(Vec::new()),
            batches: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        })
    }

    // ── Fixture setup ───────────────────────────────────────

    pub fn add_citizen(&self, account: &Address) {
        self.state.lock().unwrap().citizens.insert(account.clone());
    }

    pub fn add_admin(&self, account: &Address) {
        self.state.lock().unwrap().admins.insert(account.clone());
    }

    pub fn add_project(&self, creator: &Address, approved: bool) -> ProjectId {
        let mut state = self.state.lock().unwrap();
        let id = state.projects.len() as ProjectId;
        state.projects.push(sample_project(id, creator, approved));
        id
    }

    pub fn fail_reads_of(&self, id: ProjectId) {
        self.state.lock().unwrap().failing_reads.insert(id);
    }

    pub fn recover_reads_of(&self, id: ProjectId) {
        self.state.lock().unwrap().failing_reads.remove(&id);
    }

    pub fn set_read_lag(&self, lag: u64) {
        self.state.lock().unwrap().read_lag = lag;
    }

    pub fn delay(&self, method: &'static str, by: Duration) {
        self.state.lock().unwrap().delays.insert(method, by);
    }

    // ── Observation ─────────────────────────────────────────

    pub fn block(&self) -> u64 {
        self.state.lock().unwrap().block
    }

    /// Individual (non-batched) reads, by method name.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| **m == method).count()
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn mempool_len(&self) -> usize {
        self.state.lock().unwrap().mempool.len()
    }

    // ── Block production ────────────────────────────────────

    fn enqueue(&self, request: &TxRequest) -> TxHash {
        let mut state = self.state.lock().unwrap();
        let hash = TxHash::parse(&format!("0x{:064x}", state.next_tx)).unwrap();
        state.next_tx += 1;
        state.mempool.push((hash.clone(), request.clone()));
        hash
    }

    /// Include every queued transaction in a new block.
    pub fn mine(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.block += 1;
        let block = state.block;
        let queued = std::mem::take(&mut state.mempool);
        for (hash, request) in queued {
            let outcome = apply(&mut state, &request, block, &hash);
            let receipt = match outcome {
                Ok(()) => Receipt {
                    block,
                    success: true,
                    revert_reason: None,
                },
                Err(reason) => Receipt {
                    block,
                    success: false,
                    revert_reason: Some(reason.to_string()),
                },
            };
            state.receipts.insert(hash, receipt);
        }
        block
    }

    fn read(&self, state: &ChainState, call: &ContractCall) -> Result<Value> {
        let arg_id = || call.args.first().and_then(Value::as_u64).unwrap_or(u64::MAX);
        let arg_addr = |i: usize| {
            call.args
                .get(i)
                .and_then(Value::as_str)
                .map(|s| Address::parse(s).unwrap())
                .unwrap()
        };
        let project = |id: ProjectId| {
            if state.failing_reads.contains(&id) {
                return Err(SyncError::Rpc(format!("node dropped read of {id}")));
            }
            state
                .projects
                .get(id as usize)
                .ok_or_else(|| SyncError::Revert {
                    reason: Some("Project does not exist".to_string()),
                })
        };

        Ok(match call.method {
            "isCitizen" => json!(state.citizens.contains(&arg_addr(0))),
            "isAdmin" => json!(state.admins.contains(&arg_addr(0))),
            "mainAdmin" => json!(state.main_admin.as_str()),
            "projectCount" => json!(state.projects.len()),
            "getProject" => serde_json::to_value(&project(arg_id())?.summary)?,
            "getProjectDetails" => serde_json::to_value(project(arg_id())?)?,
            "getScreeningVotes" => {
                let s = state.screening.get(&arg_id());
                json!({
                    "votesFor": s.map_or(0, |s| s.votes_for),
                    "votesAgainst": s.map_or(0, |s| s.votes_against),
                })
            }
            "hasVotedScreening" => json!(state
                .screening
                .get(&arg_id())
                .map_or(false, |s| s.voters.contains(&arg_addr(1)))),
            "getPendingCitizenshipRequests" => {
                json!(state.requests.iter().map(Address::as_str).collect::<Vec<_>>())
            }
            other => return Err(SyncError::Rpc(format!("unknown method {other}"))),
        })
    }
}

fn apply(
    state: &mut ChainState,
    req: &TxRequest,
    block: u64,
    hash: &TxHash,
) -> std::result::Result<(), &'static str> {
    let id = req.args.first().and_then(Value::as_u64).unwrap_or(u64::MAX);
    let account = || {
        req.args
            .first()
            .and_then(Value::as_str)
            .map(|s| Address::parse(s).unwrap())
    };
    let is_admin = state.admins.contains(&req.from) || state.main_admin == req.from;
    let mut emitted: Vec<(&str, Value)> = Vec::new();
    let mut emit = |name: &'static str, args: Value| emitted.push((name, args));

    match req.method {
        "requestCitizenship" => {
            if state.citizens.contains(&req.from) || state.requests.contains(&req.from) {
                return Err("Already requested");
            }
            state.requests.push(req.from.clone());
            emit("CitizenshipRequested", json!({ "account": req.from.as_str() }));
        }
        "approveCitizenship" => {
            if !is_admin {
                return Err("Only admins");
            }
            let account = account().ok_or("Missing account")?;
            state.requests.retain(|a| a != &account);
            state.citizens.insert(account.clone());
            emit("CitizenshipApproved", json!({ "account": account.as_str() }));
        }
        "voteScreening" => {
            if !state.citizens.contains(&req.from) {
                return Err("Not a citizen");
            }
            if state.projects.get(id as usize).is_none() {
                return Err("Project does not exist");
            }
            let approve = req.args.get(1).and_then(Value::as_bool).unwrap_or(false);
            let screening = state.screening.entry(id).or_default();
            if !screening.voters.insert(req.from.clone()) {
                return Err("Already voted");
            }
            if approve {
                screening.votes_for += 1;
            } else {
                screening.votes_against += 1;
            }
            emit(
                "ScreeningVoteCast",
                json!({ "projectId": id, "voter": req.from.as_str(), "approve": approve }),
            );
        }
        "fundProject" => {
            let project = state
                .projects
                .get_mut(id as usize)
                .ok_or("Project does not exist")?;
            if project.summary.funding_expired {
                return Err("Funding expired");
            }
            project.summary.total_funds += req.value;
            project.investors.push(Investor {
                address: req.from.clone(),
                amount: req.value,
            });
            emit(
                "ProjectFunded",
                json!({ "projectId": id, "funder": req.from.as_str(), "amount": req.value.to_string() }),
            );
        }
        "submitProject" => {
            let new_id = state.projects.len() as ProjectId;
            let mut project = sample_project(new_id, &req.from, false);
            if let Some(name) = req.args.first().and_then(Value::as_str) {
                project.summary.name = name.to_string();
            }
            state.projects.push(project);
            emit(
                "ProjectSubmitted",
                json!({ "projectId": new_id, "creator": req.from.as_str() }),
            );
        }
        _ => {}
    }
    for (name, args) in emitted {
        state.events.push(RawEvent {
            name: name.to_string(),
            args,
            block_number: block,
            transaction_hash: Some(hash.to_string()),
        });
    }
    Ok(())
}

#[async_trait]
impl ChainTransport for MockChain {
    async fn call(&self, call: &ContractCall) -> Result<CallOutput> {
        self.calls.lock().unwrap().push(call.method);
        let delay = self.state.lock().unwrap().delays.get(call.method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        let value = self.read(&state, call)?;
        Ok(CallOutput {
            value,
            block: state.block.saturating_sub(state.read_lag),
        })
    }

    async fn call_batch(&self, calls: &[ContractCall]) -> Result<Vec<Result<CallOutput>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(calls.len());
        let state = self.state.lock().unwrap();
        let block = state.block.saturating_sub(state.read_lag);
        Ok(calls
            .iter()
            .map(|call| {
                self.read(&state, call)
                    .map(|value| CallOutput { value, block })
            })
            .collect())
    }

    async fn receipt(&self, hash: &TxHash) -> Result<Option<Receipt>> {
        Ok(self.state.lock().unwrap().receipts.get(hash).cloned())
    }

    async fn events(&self, from_block: u64, limit: u32) -> Result<EventsPage> {
        let state = self.state.lock().unwrap();
        Ok(EventsPage {
            events: state
                .events
                .iter()
                .filter(|e| e.block_number >= from_block)
                .take(limit as usize)
                .cloned()
                .collect(),
            latest_block: state.block,
        })
    }
}

pub struct MockWallet {
    chain: Arc<MockChain>,
    accounts: Mutex<Vec<Address>>,
    chain_id: Mutex<u64>,
    reject_next: AtomicBool,
    sent: AtomicUsize,
}

impl MockWallet {
    pub fn new(chain: Arc<MockChain>, account: Address) -> Arc<Self> {
        Arc::new(Self {
            chain,
            accounts: Mutex::new(vec![account]),
            chain_id: Mutex::new(1),
            reject_next: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
        })
    }

    pub fn reject_next(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        *self.accounts.lock().unwrap() = accounts;
    }

    pub fn set_chain_id(&self, id: u64) {
        *self.chain_id.lock().unwrap() = id;
    }

    /// Transactions the wallet actually broadcast.
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Wallet for MockWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        self.accounts().await
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(*self.chain_id.lock().unwrap())
    }

    async fn send_transaction(&self, request: &TxRequest) -> Result<TxHash> {
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(provider_error(USER_REJECTED, "User denied transaction signature"));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(self.chain.enqueue(request))
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<()> {
        self.set_chain_id(chain_id);
        Ok(())
    }
}

/// Review service that always answers with the same score.
pub struct StubReview {
    score: u8,
    calls: AtomicUsize,
}

impl StubReview {
    pub fn new(score: u8) -> Arc<Self> {
        Arc::new(Self {
            score,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReviewService for StubReview {
    async fn review(&self, _request: &ReviewRequest) -> Result<ReviewVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ReviewVerdict {
            approved: self.score >= 50,
            score: self.score,
            feedback: "Reviewed".to_string(),
            suggestions: Vec::new(),
        })
    }
}

/// File store keeping uploads in memory.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<Vec<(String, usize)>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Names of uploaded files, in upload order.
    pub fn uploads(&self) -> Vec<String> {
        self.files.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let mut files = self.files.lock().unwrap();
        files.push((file_name.to_string(), bytes.len()));
        Ok(format!("ipfs://Qm{}", files.len()))
    }

    fn resolve(&self, identifier: &str) -> Result<String> {
        Ok(format!("memory://{identifier}"))
    }
}

/// A fully wired sync layer over the doubles.
pub struct Fixture {
    pub chain: Arc<MockChain>,
    pub wallet: Arc<MockWallet>,
    pub client: ChainClient,
    pub cache: EntityCache,
    pub tracker: Tracker,
    pub facade: ReadFacade,
    pub config: SyncConfig,
}

impl Fixture {
    pub fn new(account: &Address) -> Self {
        let config = fast_config();
        let chain = MockChain::new(addr(0xad));
        let wallet = MockWallet::new(chain.clone(), account.clone());
        let client = ChainClient::new(chain.clone(), contract_address(), &config)
            .with_wallet(wallet.clone());
        let cache = EntityCache::new(client.clone(), &config);
        let tracker = Tracker::new(client.clone(), cache.clone(), &config);
        let facade = ReadFacade::new(cache.clone(), tracker.clone());
        Self {
            chain,
            wallet,
            client,
            cache,
            tracker,
            facade,
            config,
        }
    }
}
