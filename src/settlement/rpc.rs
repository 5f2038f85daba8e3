//! Blockchain RPC access for settlement verification.
//!
//! The verifier only needs one call, `eth_getTransactionReceipt`, so the seam is a
//! narrow [`RpcClient`] trait. [`JsonRpcClient`] is the HTTP implementation;
//! [`ProviderCache`] keeps one client per RPC URL so repeated verifications reuse
//! the same connection pool.

use crate::error::{Error, Result};
use alloy_primitives::B256;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default provider cache capacity (distinct RPC URLs).
const DEFAULT_CACHE_CAPACITY: usize = 16;

/// A log emitted by a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLog {
    /// Emitting contract.
    pub address: String,
    /// Indexed topics, hex.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Unindexed data, hex.
    #[serde(default)]
    pub data: String,
}

/// The subset of a transaction receipt the verifier reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    /// `0x1` on success, `0x0` on revert.
    #[serde(default)]
    pub status: Option<String>,
    /// Block the transaction was mined in.
    #[serde(default)]
    pub block_number: Option<String>,
    /// Emitted logs, in order.
    #[serde(default)]
    pub logs: Vec<ReceiptLog>,
}

impl TransactionReceipt {
    /// Whether the receipt reports a revert.
    #[must_use]
    pub fn is_reverted(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "0x0" | "0x00" | "0"))
    }
}

/// Read-only blockchain access.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Fetch a receipt; `Ok(None)` while the transaction is not yet mined.
    async fn transaction_receipt(&self, tx_hash: &B256) -> Result<Option<TransactionReceipt>>;
}

#[derive(Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: [String; 1],
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<TransactionReceipt>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC client over HTTP.
pub struct JsonRpcClient {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl JsonRpcClient {
    /// Create a client for `url`; every call is bounded by `timeout`.
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RpcClient for JsonRpcClient {
    async fn transaction_receipt(&self, tx_hash: &B256) -> Result<Option<TransactionReceipt>> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "eth_getTransactionReceipt",
            params: [format!("0x{}", hex::encode(tx_hash.as_slice()))],
        };

        debug!("eth_getTransactionReceipt {} via {}", request.params[0], self.url);

        let call = async {
            let response = self
                .http
                .post(&self.url)
                .json(&request)
                .send()
                .await
                .map_err(|e| Error::Network(format!("RPC request failed: {e}")))?;

            if !response.status().is_success() {
                return Err(Error::UnexpectedStatus {
                    status: response.status().as_u16(),
                    context: format!("RPC {}", self.url),
                });
            }

            response
                .json::<RpcResponse>()
                .await
                .map_err(|e| Error::Protocol(format!("invalid RPC response: {e}")))
        };

        let body = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("RPC call to {} timed out", self.url);
                return Err(Error::NetworkTimeout(format!("RPC {}", self.url)));
            }
        };

        if let Some(err) = body.error {
            return Err(Error::Network(format!(
                "RPC error {}: {}",
                err.code, err.message
            )));
        }

        Ok(body.result)
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of providers created.
    pub additions: u64,
}

/// One RPC provider per URL, least recently used evicted first.
#[derive(Clone)]
pub struct ProviderCache {
    inner: Arc<Mutex<LruCache<String, Arc<dyn RpcClient>>>>,
    stats: Arc<Mutex<CacheStats>>,
}

impl ProviderCache {
    /// Create a new cache with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create a new cache with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(CacheStats::default())),
        }
    }

    /// Get the provider for `url`, creating a [`JsonRpcClient`] on first use.
    pub fn provider(&self, url: &str, timeout: Duration) -> Arc<dyn RpcClient> {
        let mut cache = self.inner.lock();
        if let Some(provider) = cache.get(url) {
            self.stats.lock().hits += 1;
            return Arc::clone(provider);
        }

        debug!("Creating RPC provider for {}", url);
        let provider: Arc<dyn RpcClient> = Arc::new(JsonRpcClient::new(url, timeout));
        cache.put(url.to_string(), Arc::clone(&provider));

        let mut stats = self.stats.lock();
        stats.misses += 1;
        stats.additions += 1;
        provider
    }

    /// Register a provider for `url` explicitly.
    pub fn insert(&self, url: &str, provider: Arc<dyn RpcClient>) {
        self.inner.lock().put(url.to_string(), provider);
        self.stats.lock().additions += 1;
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Number of cached providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for ProviderCache {
    fn default() -> Self {
        Self::new()
    }
}
