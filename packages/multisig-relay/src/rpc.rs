//! JSON-RPC ledger client with primary → fallback failover and circuit breaker.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ledger::{AccountRecord, BroadcastReceipt, DynamicGlobalProperties, Ledger};
use crate::metrics::METRICS;
use crate::steem::SignedTransaction;

const CIRCUIT_BREAKER_THRESHOLD: u64 = 5;
const CIRCUIT_BREAKER_WINDOW_MS: u64 = 30_000;

struct CircuitState {
    failures: u64,
    last_failure_ms: u64,
    open: bool,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

impl<T> RpcResponse<T> {
    /// An `error` member means the node rejected the call.
    fn into_result(self, method: &str) -> Result<T, crate::Error> {
        if let Some(err) = self.error {
            return Err(crate::Error::Ledger(format!(
                "{method} failed ({}): {}",
                err.code, err.message
            )));
        }
        self.result
            .ok_or_else(|| crate::Error::Rpc(format!("{method} returned neither result nor error")))
    }
}

/// Ledger client over `condenser_api` with failover.
pub struct RpcClient {
    http: reqwest::Client,
    primary_url: String,
    fallback_url: String,
    circuit: Mutex<CircuitState>,
    total_failovers: AtomicU64,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(
        primary_url: &str,
        fallback_url: &str,
        timeout: Duration,
    ) -> Result<Self, crate::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::Error::Config(format!("failed to build HTTP client: {e}")))?;
        if primary_url == fallback_url {
            info!(primary = primary_url, "RPC client initialized without fallback");
        } else {
            info!(
                primary = primary_url,
                fallback = fallback_url,
                "RPC client initialized with failover"
            );
        }
        Ok(Self {
            http,
            primary_url: primary_url.to_string(),
            fallback_url: fallback_url.to_string(),
            circuit: Mutex::new(CircuitState {
                failures: 0,
                last_failure_ms: 0,
                open: false,
            }),
            total_failovers: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn primary_url(&self) -> &str {
        &self.primary_url
    }

    pub fn fallback_url(&self) -> &str {
        &self.fallback_url
    }

    /// A fallback equal to the primary is no fallback at all.
    pub fn has_fallback(&self) -> bool {
        self.fallback_url != self.primary_url
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: &Value,
    ) -> Result<T, crate::Error> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| crate::Error::Rpc(format!("{method} request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(crate::Error::Rpc(format!("{method} returned HTTP {status}")));
        }
        let envelope: RpcResponse<T> = resp
            .json()
            .await
            .map_err(|e| crate::Error::Rpc(format!("{method} response unreadable: {e}")))?;
        envelope.into_result(method)
    }

    /// Call `method` on the active endpoint, retrying once on the fallback when
    /// the primary fails at the transport level. Node rejections are returned
    /// as-is.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, crate::Error> {
        if self.is_circuit_open() {
            return self.post(&self.fallback_url, method, &params).await.map_err(|e| {
                METRICS.rpc_errors.fetch_add(1, Ordering::Relaxed);
                e
            });
        }
        match self.post(&self.primary_url, method, &params).await {
            Ok(v) => {
                self.record_success();
                Ok(v)
            }
            Err(crate::Error::Rpc(e)) if !self.has_fallback() => {
                self.record_failure();
                Err(crate::Error::Rpc(e))
            }
            Err(crate::Error::Rpc(e)) => {
                self.record_failure();
                warn!(method, error = %e, "Primary RPC failed, trying fallback");
                self.post(&self.fallback_url, method, &params)
                    .await
                    .map_err(|e2| match e2 {
                        crate::Error::Rpc(e2) => crate::Error::Rpc(format!(
                            "{method} failed on both RPCs: primary={e}, fallback={e2}"
                        )),
                        other => other,
                    })
            }
            Err(other) => {
                self.record_success();
                Err(other)
            }
        }
    }

    /// Quick connectivity check. Returns "ok", "degraded", or error.
    pub async fn health_check(&self) -> Result<&'static str, crate::Error> {
        let method = "condenser_api.get_dynamic_global_properties";
        let params = json!([]);
        match self.post::<Value>(&self.primary_url, method, &params).await {
            Ok(_) => Ok("ok"),
            Err(e) if !self.has_fallback() => {
                Err(crate::Error::Rpc(format!("RPC unreachable: {e}")))
            }
            Err(_) => match self.post::<Value>(&self.fallback_url, method, &params).await {
                Ok(_) => Ok("degraded"),
                Err(e) => Err(crate::Error::Rpc(format!("Both RPCs unreachable: {e}"))),
            },
        }
    }

    // --- Failover / circuit breaker ---

    fn record_success(&self) {
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        if circuit.failures > 0 {
            info!(primary = %self.primary_url, "Primary RPC recovered");
            circuit.failures = 0;
            circuit.open = false;
        }
    }

    fn record_failure(&self) {
        METRICS.rpc_errors.fetch_add(1, Ordering::Relaxed);
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        circuit.failures += 1;
        circuit.last_failure_ms = now_ms();
        if circuit.failures >= CIRCUIT_BREAKER_THRESHOLD && !circuit.open && self.has_fallback() {
            circuit.open = true;
            self.total_failovers.fetch_add(1, Ordering::Relaxed);
            METRICS.rpc_failovers.fetch_add(1, Ordering::Relaxed);
            warn!(
                failures = circuit.failures,
                fallback = %self.fallback_url,
                "Circuit breaker opened, routing to fallback"
            );
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        if !circuit.open {
            return false;
        }
        if now_ms().saturating_sub(circuit.last_failure_ms) > CIRCUIT_BREAKER_WINDOW_MS {
            circuit.open = false;
            circuit.failures = 0;
            info!(primary = %self.primary_url, "Circuit breaker half-open, retrying primary");
            return false;
        }
        true
    }

    pub fn failover_count(&self) -> u64 {
        self.total_failovers.load(Ordering::Relaxed)
    }

    /// Currently active RPC URL.
    pub fn active_url(&self) -> &str {
        if self.is_circuit_open() {
            &self.fallback_url
        } else {
            &self.primary_url
        }
    }
}

#[async_trait]
impl Ledger for RpcClient {
    async fn dynamic_global_properties(&self) -> Result<DynamicGlobalProperties, crate::Error> {
        self.call("condenser_api.get_dynamic_global_properties", json!([]))
            .await
    }

    async fn get_accounts(&self, names: &[String]) -> Result<Vec<AccountRecord>, crate::Error> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        self.call("condenser_api.get_accounts", json!([names])).await
    }

    async fn broadcast_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<BroadcastReceipt, crate::Error> {
        let tx_id = tx.transaction.id();
        let params = json!([tx]);
        let _: Value = self
            .call("condenser_api.broadcast_transaction", params)
            .await?;
        debug!(%tx_id, "Transaction accepted");
        Ok(BroadcastReceipt { tx_id })
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
