//! Chain client: the single choke-point for contract reads and writes.
//!
//! ## Transport
//!
//! Reads travel as JSON-RPC 2.0 over HTTP to a contract gateway that returns
//! decoded JSON values together with the block they were served at. List
//! sweeps are posted as one JSON-RPC batch array, so N reads cost a single
//! round trip. Writes are handed to the [`Wallet`] for signing.
//!
//! ## Resilience
//!
//! * Reads that fail with a transient error are retried exactly once after
//!   [`SyncConfig::retry_backoff`].
//! * Reverts are never retried; their `Error(string)` payload is decoded.
//! * Submissions are never retried: a resend could double-spend.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::contract::ContractCall;
use crate::errors::{Result, SyncError};
use crate::types::{Address, TxHash};
use crate::wallet::{TxRequest, Wallet};

/// ABI selector of `Error(string)`.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// JSON-RPC code geth-style nodes use for execution reverts.
const REVERT_CODE: i64 = 3;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A decoded contract return value and the block it reflects.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutput {
    pub value: Value,
    pub block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub block: u64,
    pub success: bool,
    pub revert_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub name: String,
    #[serde(default)]
    pub args: Value,
    pub block_number: u64,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPage {
    pub events: Vec<RawEvent>,
    pub latest_block: u64,
}

// ─────────────────────────────────────────────────────────
// Transport seam
// ─────────────────────────────────────────────────────────

/// Raw access to the contract gateway. No caching, no retries.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    async fn call(&self, call: &ContractCall) -> Result<CallOutput>;

    /// One underlying request for all of `calls`. Per-call failures are
    /// reported in place; the outer error means the whole sweep failed.
    async fn call_batch(&self, calls: &[ContractCall]) -> Result<Vec<Result<CallOutput>>>;

    async fn receipt(&self, hash: &TxHash) -> Result<Option<Receipt>>;

    async fn events(&self, from_block: u64, limit: u32) -> Result<EventsPage>;
}

/// JSON-RPC over HTTP.
pub struct HttpTransport {
    client: Client,
    rpc_url: String,
    contract: Address,
}

impl HttpTransport {
    pub fn new(rpc_url: &str, contract: Address, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            contract,
        })
    }

    fn call_params(&self, call: &ContractCall) -> Value {
        let mut params = json!({
            "contract": self.contract.as_str(),
            "method": call.method,
            "args": call.args,
        });
        if let Some(from) = &call.from {
            params["from"] = json!(from.as_str());
        }
        json!([params])
    }

    async fn post(&self, body: &Value) -> Result<Value> {
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(body)
            .send()
            .await
            .map_err(|e| SyncError::Rpc(format!("request failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SyncError::Rpc("rate-limited by RPC".to_string()));
        }
        if !resp.status().is_success() {
            return Err(SyncError::Rpc(format!("HTTP {}", resp.status())));
        }

        resp.json()
            .await
            .map_err(|e| SyncError::Rpc(format!("unreadable response: {e}")))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let body = self
            .post(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .await?;
        let resp: RpcResponse = serde_json::from_value(body)?;
        into_result(resp)
    }
}

#[async_trait]
impl ChainTransport for HttpTransport {
    async fn call(&self, call: &ContractCall) -> Result<CallOutput> {
        let result = self.request("contract_call", self.call_params(call)).await?;
        parse_call_output(result)
    }

    async fn call_batch(&self, calls: &[ContractCall]) -> Result<Vec<Result<CallOutput>>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let batch: Vec<Value> = calls
            .iter()
            .enumerate()
            .map(|(i, call)| {
                json!({
                    "jsonrpc": "2.0",
                    "id": i,
                    "method": "contract_call",
                    "params": self.call_params(call),
                })
            })
            .collect();

        let body = self.post(&Value::Array(batch)).await?;
        let responses: Vec<RpcResponse> = serde_json::from_value(body)?;
        debug!("Batch of {} calls returned {} responses", calls.len(), responses.len());

        // Batch responses may arrive in any order; match them back by id.
        let mut by_id: HashMap<usize, RpcResponse> = responses
            .into_iter()
            .filter_map(|r| {
                let id = r.id.as_ref().and_then(Value::as_u64)? as usize;
                Some((id, r))
            })
            .collect();

        Ok((0..calls.len())
            .map(|i| match by_id.remove(&i) {
                Some(resp) => into_result(resp).and_then(parse_call_output),
                None => Err(SyncError::Rpc(format!("batch response missing id {i}"))),
            })
            .collect())
    }

    async fn receipt(&self, hash: &TxHash) -> Result<Option<Receipt>> {
        let result = self
            .request("eth_getTransactionReceipt", json!([hash.as_str()]))
            .await?;
        parse_receipt(&result)
    }

    async fn events(&self, from_block: u64, limit: u32) -> Result<EventsPage> {
        let result = self
            .request(
                "contract_getEvents",
                json!([{
                    "contract": self.contract.as_str(),
                    "fromBlock": from_block,
                    "limit": limit,
                }]),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}

fn into_result(resp: RpcResponse) -> Result<Value> {
    if let Some(err) = resp.error {
        return Err(classify_error(&err));
    }
    // `"result": null` is meaningful (e.g. a receipt that does not exist yet).
    Ok(resp.result.unwrap_or(Value::Null))
}

fn parse_call_output(result: Value) -> Result<CallOutput> {
    let block = result
        .get("blockNumber")
        .and_then(|b| b.as_u64().or_else(|| b.as_str().and_then(parse_quantity)))
        .ok_or_else(|| SyncError::Decode("call result missing blockNumber".to_string()))?;
    let value = result.get("value").cloned().unwrap_or(Value::Null);
    Ok(CallOutput { value, block })
}

fn parse_receipt(result: &Value) -> Result<Option<Receipt>> {
    if result.is_null() {
        return Ok(None);
    }
    let block = result
        .get("blockNumber")
        .and_then(Value::as_str)
        .and_then(parse_quantity)
        .ok_or_else(|| SyncError::Decode("receipt missing blockNumber".to_string()))?;
    let success = result
        .get("status")
        .and_then(Value::as_str)
        .and_then(parse_quantity)
        .map(|s| s == 1)
        .ok_or_else(|| SyncError::Decode("receipt missing status".to_string()))?;
    let revert_reason = result
        .get("revertReason")
        .and_then(Value::as_str)
        .map(|r| decode_revert_reason(r).unwrap_or_else(|| r.to_string()));
    Ok(Some(Receipt {
        block,
        success,
        revert_reason,
    }))
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(raw: &str) -> Option<u64> {
    u64::from_str_radix(raw.strip_prefix("0x")?, 16).ok()
}

/// Map a JSON-RPC error body onto the crate's taxonomy.
pub fn classify_error(err: &RpcErrorBody) -> SyncError {
    let lower = err.message.to_lowercase();
    if lower.contains("insufficient funds") {
        return SyncError::InsufficientFunds;
    }
    if err.code == REVERT_CODE || lower.starts_with("execution reverted") {
        let from_data = err
            .data
            .as_ref()
            .and_then(Value::as_str)
            .and_then(decode_revert_reason);
        let from_message = err
            .message
            .split_once("execution reverted: ")
            .map(|(_, reason)| reason.to_string());
        return SyncError::Revert {
            reason: from_data.or(from_message),
        };
    }
    SyncError::Rpc(format!("{} {}", err.code, err.message))
}

/// Decode ABI-encoded `Error(string)` revert data.
pub fn decode_revert_reason(data: &str) -> Option<String> {
    let bytes = hex::decode(data.strip_prefix("0x").unwrap_or(data)).ok()?;
    if bytes.len() < 4 || bytes[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    let body = &bytes[4..];
    let offset = read_word(body, 0)?;
    let len = read_word(body, offset)?;
    let start = offset.checked_add(32)?;
    let raw = body.get(start..start.checked_add(len)?)?;
    String::from_utf8(raw.to_vec()).ok()
}

fn read_word(body: &[u8], at: usize) -> Option<usize> {
    let word = body.get(at..at.checked_add(32)?)?;
    if word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(tail)).ok()
}

// ─────────────────────────────────────────────────────────
// Typed client
// ─────────────────────────────────────────────────────────

/// Typed access to the contract. Cheap to clone.
#[derive(Clone)]
pub struct ChainClient {
    transport: Arc<dyn ChainTransport>,
    wallet: Option<Arc<dyn Wallet>>,
    contract: Address,
    retry_backoff: Duration,
}

impl ChainClient {
    pub fn new(transport: Arc<dyn ChainTransport>, contract: Address, config: &SyncConfig) -> Self {
        Self {
            transport,
            wallet: None,
            contract,
            retry_backoff: config.retry_backoff,
        }
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub async fn call(&self, call: &ContractCall) -> Result<CallOutput> {
        self.with_retry(call.method, || self.transport.call(call)).await
    }

    pub async fn call_batch(&self, calls: &[ContractCall]) -> Result<Vec<Result<CallOutput>>> {
        self.with_retry("batch", || self.transport.call_batch(calls)).await
    }

    pub async fn receipt(&self, hash: &TxHash) -> Result<Option<Receipt>> {
        self.with_retry("receipt", || self.transport.receipt(hash)).await
    }

    pub async fn events(&self, from_block: u64, limit: u32) -> Result<EventsPage> {
        self.with_retry("events", || self.transport.events(from_block, limit))
            .await
    }

    /// Hand a write to the wallet. Returns as soon as the wallet has
    /// broadcast it; confirmation is the tracker's business.
    pub async fn submit(&self, call: &ContractCall, value: u128) -> Result<TxHash> {
        let wallet = self.wallet.as_ref().ok_or(SyncError::NotConnected)?;
        let from = call
            .from
            .clone()
            .ok_or_else(|| SyncError::InvalidInput(format!("{} has no sender", call.method)))?;
        let request = TxRequest {
            from,
            to: self.contract.clone(),
            method: call.method,
            args: call.args.clone(),
            value,
        };
        wallet.send_transaction(&request).await
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op().await {
            Err(e) if e.is_retriable() => {
                warn!("{what} failed (will retry in {:?}): {e}", self.retry_backoff);
                tokio::time::sleep(self.retry_backoff).await;
                op().await
            }
            other => other,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
