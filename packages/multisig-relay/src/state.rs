//! Application state shared across handlers and the scheduler.

use crate::clock::SystemClock;
use crate::config::Config;
use crate::protocol::Coordinator;
use crate::relay::MetadataRelay;
use crate::rotation::Rotation;
use crate::rpc::RpcClient;
use crate::scheduler::Scheduler;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub rotation: Rotation,
    pub rpc: Arc<RpcClient>,
    pub scheduler: Arc<Scheduler>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the RPC client, relay, coordinator and scheduler from configuration.
    pub fn new(config: Config) -> Result<Self, crate::Error> {
        let rpc = Arc::new(RpcClient::new(
            &config.rpc_url,
            &config.fallback_rpc_url,
            config.rpc_timeout(),
        )?);
        let relay = MetadataRelay::new(
            rpc.clone(),
            config.account.clone(),
            config.posting_key()?,
            config.chain_id()?,
            config.relay_field.clone(),
        );
        let coordinator = Coordinator::from_config(&config, rpc.clone(), Arc::new(relay))?;
        let role = coordinator.role();
        let rotation = coordinator.rotation().clone();

        info!(
            account = %coordinator.account(),
            role = %role,
            rotation = %rotation.members().join(" "),
            "Loaded rotation"
        );

        let scheduler = Arc::new(Scheduler::new(
            role,
            config.finalize_grace_minutes,
            config.poll_interval(),
            Arc::new(coordinator),
            Arc::new(SystemClock),
        ));

        Ok(Self {
            config,
            rotation,
            rpc,
            scheduler,
            start_time: Instant::now(),
        })
    }
}
