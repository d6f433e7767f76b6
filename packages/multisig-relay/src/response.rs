//! Response types for the status API.

use serde::Serialize;

/// Response from the health endpoint.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub account: String,
    pub role: String,
    pub rotation: Vec<String>,
    /// Hour of day (UTC) last processed successfully.
    pub last_processed_hour: Option<u8>,
    pub in_flight: bool,
    pub rpc_status: &'static str,
    pub active_rpc: String,
    pub rpc_failovers: u64,
    pub uptime_secs: u64,
}
