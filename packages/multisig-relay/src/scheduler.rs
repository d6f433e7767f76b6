//! Hour-boundary trigger loop.
//!
//! Polls the clock, decides whether this node owes work for the current hour
//! and runs at most one protocol step at a time.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, HourSlot};
use crate::metrics::METRICS;
use crate::protocol::Outcome;
use crate::rotation::Role;
use crate::Error;

/// Sentinel for "no hour processed yet".
const NOT_PROCESSED: i64 = i64::MIN;

/// The three protocol steps a node can owe in an hour.
#[async_trait]
pub trait HourlyProtocol: Send + Sync {
    async fn initiate(&self, slot: HourSlot) -> Result<Outcome, Error>;
    async fn relay_forward(&self, slot: HourSlot) -> Result<Outcome, Error>;
    async fn finalize(&self, slot: HourSlot) -> Result<Outcome, Error>;
}

/// Progress markers shared between the loop and spawned dispatches.
pub struct SchedulerState {
    last_processed: AtomicI64,
    in_flight: AtomicBool,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerState {
    pub fn new() -> Self {
        Self {
            last_processed: AtomicI64::new(NOT_PROCESSED),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn last_processed(&self) -> Option<HourSlot> {
        match self.last_processed.load(Ordering::Acquire) {
            NOT_PROCESSED => None,
            index => Some(HourSlot::from_index(index)),
        }
    }

    pub fn mark_processed(&self, slot: HourSlot) {
        self.last_processed.store(slot.index(), Ordering::Release);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Exclusive right to run a dispatch. Released on drop.
pub struct DispatchGuard {
    state: Arc<SchedulerState>,
}

impl DispatchGuard {
    pub fn try_acquire(state: &Arc<SchedulerState>) -> Option<Self> {
        state
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                state: Arc::clone(state),
            })
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.state.in_flight.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Initiate,
    RelayForward,
    Finalize,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Initiate => "initiate",
            Action::RelayForward => "relay_forward",
            Action::Finalize => "finalize",
        })
    }
}

/// Why a tick did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    InFlight,
    AlreadyProcessed(HourSlot),
    /// Finalizer waiting for upstream signers to publish.
    GraceWindow { minute: u8 },
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::InFlight => f.write_str("dispatch in flight"),
            Skip::AlreadyProcessed(slot) => {
                write!(f, "hour {} already processed", slot.hour_of_day())
            }
            Skip::GraceWindow { minute } => write!(f, "inside grace window at minute {minute}"),
        }
    }
}

/// A planned protocol step holding the dispatch guard.
pub struct Dispatch {
    guard: DispatchGuard,
    pub slot: HourSlot,
    pub action: Action,
}

pub struct Scheduler {
    role: Role,
    grace_minutes: u8,
    poll_interval: Duration,
    state: Arc<SchedulerState>,
    protocol: Arc<dyn HourlyProtocol>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        role: Role,
        grace_minutes: u8,
        poll_interval: Duration,
        protocol: Arc<dyn HourlyProtocol>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            role,
            grace_minutes,
            poll_interval,
            state: Arc::new(SchedulerState::new()),
            protocol,
            clock,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> &Arc<SchedulerState> {
        &self.state
    }

    /// Decide what, if anything, is owed at `now`.
    pub fn plan(&self, now: OffsetDateTime) -> Result<Dispatch, Skip> {
        if self.state.is_in_flight() {
            return Err(Skip::InFlight);
        }
        let slot = HourSlot::containing(now);
        if self.state.last_processed() == Some(slot) {
            return Err(Skip::AlreadyProcessed(slot));
        }
        let action = match self.role {
            Role::Finalizer if now.minute() > self.grace_minutes => Action::Finalize,
            Role::Finalizer => {
                return Err(Skip::GraceWindow {
                    minute: now.minute(),
                })
            }
            Role::Initiator => Action::Initiate,
            Role::Intermediate { .. } => Action::RelayForward,
        };
        let guard = DispatchGuard::try_acquire(&self.state).ok_or(Skip::InFlight)?;
        Ok(Dispatch {
            guard,
            slot,
            action,
        })
    }

    /// Run a planned step. The hour is marked processed only on success; the
    /// guard is released either way.
    pub async fn execute(&self, dispatch: Dispatch) -> Result<Outcome, Error> {
        let Dispatch {
            guard,
            slot,
            action,
        } = dispatch;
        METRICS.dispatches.fetch_add(1, Ordering::Relaxed);
        info!(
            hour = slot.hour_of_day(),
            role = %self.role,
            action = %action,
            "Dispatching hourly step"
        );

        let result = match action {
            Action::Initiate => self.protocol.initiate(slot).await,
            Action::RelayForward => self.protocol.relay_forward(slot).await,
            Action::Finalize => self.protocol.finalize(slot).await,
        };

        match &result {
            Ok(outcome) => {
                self.state.mark_processed(slot);
                info!(hour = slot.hour_of_day(), %outcome, "Hour processed");
            }
            Err(Error::MissingSignature { accounts }) => {
                METRICS
                    .peers_not_ready
                    .fetch_add(accounts.len() as u64, Ordering::Relaxed);
                warn!(
                    hour = slot.hour_of_day(),
                    action = %action,
                    waiting_on = %accounts.join(","),
                    "Upstream signatures not published yet, retrying next tick"
                );
            }
            Err(e) => {
                METRICS.dispatch_errors.fetch_add(1, Ordering::Relaxed);
                error!(hour = slot.hour_of_day(), action = %action, error = %e, "Dispatch failed");
            }
        }
        drop(guard);
        result
    }

    /// One poll: plan against the clock and spawn the step if one is owed.
    pub fn tick(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        METRICS.ticks.fetch_add(1, Ordering::Relaxed);
        match self.plan(self.clock.now()) {
            Ok(dispatch) => {
                let this = Arc::clone(self);
                Some(tokio::spawn(async move {
                    // outcome already logged
                    let _ = this.execute(dispatch).await;
                }))
            }
            Err(skip) => {
                debug!(reason = %skip, "Tick skipped");
                None
            }
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            role = %self.role,
            poll_interval_secs = self.poll_interval.as_secs(),
            grace_minutes = self.grace_minutes,
            "Scheduler started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = cancel.cancelled() => {
                    info!("Scheduler shutting down");
                    return;
                }
            }
            self.tick();
        }
    }
}
