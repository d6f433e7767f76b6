//! Prometheus metrics (lock-free atomics).

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // --- Scheduler ---
    pub ticks: AtomicU64,
    pub dispatches: AtomicU64,
    pub dispatch_errors: AtomicU64,
    pub peers_not_ready: AtomicU64,

    // --- Protocol ---
    pub signatures_published: AtomicU64,
    pub transactions_broadcast: AtomicU64,

    // --- RPC ---
    pub rpc_failovers: AtomicU64,
    pub rpc_errors: AtomicU64,
}

impl Metrics {
    const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            dispatches: AtomicU64::new(0),
            dispatch_errors: AtomicU64::new(0),
            peers_not_ready: AtomicU64::new(0),
            signatures_published: AtomicU64::new(0),
            transactions_broadcast: AtomicU64::new(0),
            rpc_failovers: AtomicU64::new(0),
            rpc_errors: AtomicU64::new(0),
        }
    }

    /// Render in Prometheus text exposition format.
    ///
    /// `last_processed_hour` is the hour of day (0-23), or -1 before the first
    /// successful dispatch.
    pub fn render(&self, in_flight: bool, last_processed_hour: i64) -> String {
        let ticks = self.ticks.load(Ordering::Relaxed);
        let dispatches = self.dispatches.load(Ordering::Relaxed);
        let dispatch_errors = self.dispatch_errors.load(Ordering::Relaxed);
        let peers_not_ready = self.peers_not_ready.load(Ordering::Relaxed);
        let published = self.signatures_published.load(Ordering::Relaxed);
        let broadcast = self.transactions_broadcast.load(Ordering::Relaxed);
        let rpc_failovers = self.rpc_failovers.load(Ordering::Relaxed);
        let rpc_errors = self.rpc_errors.load(Ordering::Relaxed);
        let in_flight = u8::from(in_flight);

        format!(
            "\
# HELP multisig_ticks_total Scheduler polls.\n\
# TYPE multisig_ticks_total counter\n\
multisig_ticks_total {ticks}\n\
# HELP multisig_dispatches_total Protocol steps started.\n\
# TYPE multisig_dispatches_total counter\n\
multisig_dispatches_total {dispatches}\n\
# HELP multisig_dispatch_errors_total Protocol steps that failed for reasons other than a late peer.\n\
# TYPE multisig_dispatch_errors_total counter\n\
multisig_dispatch_errors_total {dispatch_errors}\n\
# HELP multisig_peers_not_ready_total Upstream signers found without a record for the hour.\n\
# TYPE multisig_peers_not_ready_total counter\n\
multisig_peers_not_ready_total {peers_not_ready}\n\
# HELP multisig_signatures_published_total Relay records written to own metadata.\n\
# TYPE multisig_signatures_published_total counter\n\
multisig_signatures_published_total {published}\n\
# HELP multisig_transactions_broadcast_total Fully signed transfers accepted by the node.\n\
# TYPE multisig_transactions_broadcast_total counter\n\
multisig_transactions_broadcast_total {broadcast}\n\
# HELP multisig_rpc_failovers_total RPC primary-to-fallback failovers.\n\
# TYPE multisig_rpc_failovers_total counter\n\
multisig_rpc_failovers_total {rpc_failovers}\n\
# HELP multisig_rpc_errors_total RPC errors.\n\
# TYPE multisig_rpc_errors_total counter\n\
multisig_rpc_errors_total {rpc_errors}\n\
# HELP multisig_dispatch_in_flight Whether a protocol step is running.\n\
# TYPE multisig_dispatch_in_flight gauge\n\
multisig_dispatch_in_flight {in_flight}\n\
# HELP multisig_last_processed_hour Hour of day last processed, -1 if none.\n\
# TYPE multisig_last_processed_hour gauge\n\
multisig_last_processed_hour {last_processed_hour}\n"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_exposes_every_series() {
        let text = METRICS.render(true, 14);
        for name in [
            "multisig_ticks_total",
            "multisig_dispatches_total",
            "multisig_dispatch_errors_total",
            "multisig_peers_not_ready_total",
            "multisig_signatures_published_total",
            "multisig_transactions_broadcast_total",
            "multisig_rpc_failovers_total",
            "multisig_rpc_errors_total",
        ] {
            assert!(text.contains(&format!("# TYPE {name} counter")), "{name}");
        }
        assert!(text.contains("multisig_dispatch_in_flight 1\n"));
        assert!(text.contains("multisig_last_processed_hour 14\n"));
    }
}
