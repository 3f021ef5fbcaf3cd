//! Configuration: library tunables plus the gateway's environment variables.

use std::time::Duration;

use crate::errors::{Result, SyncError};
use crate::types::Address;

/// Timing and threshold knobs shared by every component of the sync layer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on a single RPC read.
    pub rpc_timeout: Duration,
    /// Pause before the one retry a transient read failure gets.
    pub retry_backoff: Duration,
    /// How often a submitted transaction's receipt is polled.
    pub confirmation_poll_interval: Duration,
    /// Reads discarded as stale before the failure is surfaced.
    pub max_stale_retries: u32,
    /// Minimum AI-review score required before a project reaches the contract.
    pub min_review_score: u8,
    /// Settled transactions kept around for the UI.
    pub finished_retention: usize,
    /// How often the event watcher polls for new contract events.
    pub event_poll_interval: Duration,
    pub events_per_page: u32,
    /// Cache slots kept before idle ones are evicted, least recently used first.
    pub max_cached_entries: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(500),
            confirmation_poll_interval: Duration::from_secs(2),
            max_stale_retries: 3,
            min_review_score: 50,
            finished_retention: 64,
            event_poll_interval: Duration::from_secs(5),
            events_per_page: 100,
            max_cached_entries: 10_000,
        }
    }
}

/// Gateway configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Contract gateway JSON-RPC endpoint
    pub rpc_url: String,
    /// Address of the crowdfunding contract
    pub contract_address: Address,
    /// Chain the contract is deployed on
    pub chain_id: u64,
    /// Port for the REST API server
    pub api_port: u16,
    /// Block to start watching events from
    pub start_block: u64,
    /// IPFS HTTP API used for uploads
    pub ipfs_api_url: String,
    /// Public gateway used to resolve content identifiers
    pub ipfs_gateway_url: String,
    /// Optional pinning-service credentials
    pub ipfs_project_id: Option<String>,
    pub ipfs_project_secret: Option<String>,
    /// AI review service endpoint
    pub review_api_url: String,
    pub review_api_key: Option<String>,
    pub sync: SyncConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = SyncConfig::default();
        let contract_raw = env_var("CONTRACT_ADDRESS").map_err(|_| {
            SyncError::Config("CONTRACT_ADDRESS environment variable is required".to_string())
        })?;

        Ok(Config {
            rpc_url: env_var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            contract_address: Address::parse(&contract_raw)
                .map_err(|e| SyncError::Config(format!("Invalid CONTRACT_ADDRESS: {e}")))?,
            chain_id: parse_or("CHAIN_ID", 11_155_111)?,
            api_port: parse_or("API_PORT", 3001)?,
            start_block: parse_or("START_BLOCK", 0)?,
            ipfs_api_url: env_var("IPFS_API_URL")
                .unwrap_or_else(|_| "https://ipfs.infura.io:5001".to_string()),
            ipfs_gateway_url: env_var("IPFS_GATEWAY_URL")
                .unwrap_or_else(|_| "https://ipfs.io".to_string()),
            ipfs_project_id: env_var("IPFS_PROJECT_ID").ok(),
            ipfs_project_secret: env_var("IPFS_PROJECT_SECRET").ok(),
            review_api_url: env_var("REVIEW_API_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8081/review".to_string()),
            review_api_key: env_var("REVIEW_API_KEY").ok(),
            sync: SyncConfig {
                rpc_timeout: Duration::from_secs(parse_or(
                    "RPC_TIMEOUT_SECS",
                    defaults.rpc_timeout.as_secs(),
                )?),
                confirmation_poll_interval: Duration::from_millis(parse_or(
                    "CONFIRMATION_POLL_MS",
                    defaults.confirmation_poll_interval.as_millis() as u64,
                )?),
                event_poll_interval: Duration::from_secs(parse_or(
                    "EVENT_POLL_INTERVAL_SECS",
                    defaults.event_poll_interval.as_secs(),
                )?),
                events_per_page: parse_or("EVENTS_PER_PAGE", defaults.events_per_page)?,
                min_review_score: parse_or("MIN_REVIEW_SCORE", defaults.min_review_score)?,
                max_cached_entries: parse_or("MAX_CACHED_ENTRIES", defaults.max_cached_entries)?,
                ..defaults
            },
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| SyncError::Config(format!("Missing env var: {key}")))
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| SyncError::Config(format!("Invalid {key}"))),
        Err(_) => Ok(default),
    }
}
