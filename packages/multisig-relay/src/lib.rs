//! # Multisig Relay
//!
//! Hourly round-robin multisig transfer on the Steem ledger. Every member of
//! a fixed rotation runs one process; partial signatures travel between them
//! through each account's `posting_json_metadata` until the last member
//! broadcasts the fully signed transfer.
//!
//! ## Quick Start
//! ```bash
//! MULTISIG_ACCOUNT=bob MULTISIG_ACCOUNTS="alice bob" ... cargo run --bin multisig-relay
//! ```
//!
//! ## Endpoints
//! - `GET /health` - Role, rotation, last processed hour and RPC status
//! - `GET /metrics` - Prometheus metrics

pub mod block_props;
pub mod clock;
pub mod config;
mod error;
mod handlers;
pub mod ledger;
pub mod metrics;
pub mod protocol;
pub mod relay;
mod response;
pub mod rotation;
mod router;
pub mod rpc;
pub mod scheduler;
mod state;
pub mod steem;

pub use config::Config;
pub use error::Error;
pub use protocol::{Coordinator, Outcome, TransferTemplate};
pub use router::create as create_router;
pub use scheduler::{HourlyProtocol, Scheduler};
pub use state::AppState;
