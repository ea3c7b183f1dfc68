//! Thin Ethereum JSON-RPC adapters.
//!
//! One [`JsonRpcClient`] per chain endpoint; the adapters below share it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keeper_core::ChainId;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{ChainClient, ChangeDetector, ChangeEvent, EntitySource, EntityState, SyncError, SyncResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl JsonRpcClient {
    pub fn new(url: &str) -> SyncResult<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> SyncResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(method, id, "json-rpc request");

        let resp = self.client.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            warn!(method, status, body = %text, "json-rpc endpoint error");
            return Err(SyncError::Rpc {
                code: i64::from(status),
                message: text,
            });
        }

        let parsed: RpcResponse = resp.json().await?;
        if let Some(err) = parsed.error {
            return Err(SyncError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(serde_json::from_value(parsed.result.unwrap_or(Value::Null))?)
    }

    pub async fn block_number(&self) -> SyncResult<u64> {
        let hex: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&hex)
    }
}

/// Parse a JSON-RPC hex quantity such as `"0x1b4"`.
pub fn parse_quantity(s: &str) -> SyncResult<u64> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| SyncError::ChainClient(format!("bad quantity {s:?}: {e}")))
}

pub fn to_quantity(n: u64) -> String {
    format!("{n:#x}")
}

/// Chain head via `eth_blockNumber`.
pub struct RpcChainClient {
    rpc: Arc<JsonRpcClient>,
}

impl RpcChainClient {
    pub fn new(rpc: Arc<JsonRpcClient>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn latest_block(&self, chain: &ChainId) -> SyncResult<u64> {
        let block = self.rpc.block_number().await.map_err(|e| match e {
            SyncError::ChainClient(m) => SyncError::ChainClient(format!("{chain}: {m}")),
            other => other,
        })?;
        debug!(%chain, block, "latest block");
        Ok(block)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    /// `None` for pending logs.
    pub block_number: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

/// Changed entities from `eth_getLogs`; the entity id is the emitting contract.
pub struct LogChangeDetector {
    rpc: Arc<JsonRpcClient>,
    addresses: Vec<String>,
    topics: Vec<String>,
}

impl LogChangeDetector {
    pub fn new(rpc: Arc<JsonRpcClient>, addresses: Vec<String>, topics: Vec<String>) -> Self {
        Self {
            rpc,
            addresses,
            topics,
        }
    }

    fn filter(&self, from: u64, to: u64) -> Value {
        let mut filter = json!({
            "fromBlock": to_quantity(from),
            "toBlock": to_quantity(to),
        });
        if !self.addresses.is_empty() {
            filter["address"] = json!(self.addresses);
        }
        if !self.topics.is_empty() {
            // Any of the configured event signatures in position 0.
            filter["topics"] = json!([self.topics]);
        }
        filter
    }
}

/// Turn raw logs into change events, dropping pending and reorged-out entries.
pub fn changes_from_logs(logs: Vec<RpcLog>) -> SyncResult<Vec<ChangeEvent>> {
    let mut events = Vec::with_capacity(logs.len());
    for log in logs {
        if log.removed {
            continue;
        }
        let Some(block) = log.block_number.as_deref() else {
            continue;
        };
        events.push(ChangeEvent {
            entity_id: log.address.to_lowercase(),
            block: parse_quantity(block)?,
        });
    }
    Ok(events)
}

#[async_trait]
impl ChangeDetector for LogChangeDetector {
    async fn find_changed(&self, chain: &ChainId, from: u64, to: u64) -> SyncResult<Vec<ChangeEvent>> {
        let logs: Vec<RpcLog> = self
            .rpc
            .call("eth_getLogs", json!([self.filter(from, to)]))
            .await
            .map_err(|e| SyncError::ChangeDetector(format!("{chain} [{from}, {to}]: {e}")))?;
        let events = changes_from_logs(logs)?;
        debug!(%chain, from, to, events = events.len(), "logs scanned");
        Ok(events)
    }
}

/// Reads entity state with one `eth_call` per entity, pinned to a single block.
pub struct RpcEntitySource {
    rpc: Arc<JsonRpcClient>,
    call_data: String,
}

impl RpcEntitySource {
    pub fn new(rpc: Arc<JsonRpcClient>, call_data: &str) -> Self {
        Self {
            rpc,
            call_data: call_data.to_string(),
        }
    }
}

#[async_trait]
impl EntitySource for RpcEntitySource {
    async fn fetch(
        &self,
        chain: &ChainId,
        entity_ids: &[String],
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<EntityState>> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let block = self.rpc.block_number().await?;
        let tag = to_quantity(block);

        let mut states = Vec::with_capacity(entity_ids.len());
        for id in entity_ids {
            if cancel.is_cancelled() {
                debug!(
                    %chain,
                    fetched = states.len(),
                    remaining = entity_ids.len() - states.len(),
                    "entity fetch cancelled"
                );
                return Err(SyncError::Cancelled);
            }
            let result: String = self
                .rpc
                .call(
                    "eth_call",
                    json!([{ "to": id, "data": self.call_data }, tag]),
                )
                .await
                .map_err(|e| SyncError::Updater(format!("{chain} eth_call {id}: {e}")))?;
            states.push(EntityState {
                entity_id: id.clone(),
                state: json!({ "call_data": self.call_data, "result": result }),
                block: Some(block),
            });
        }
        Ok(states)
    }
}
