//! Rejoin detection and state synchronization.
//!
//! A node that drops off the mesh and comes back may have changed state
//! while away (someone pressed a wall button, power was cycled). The
//! cache cannot be trusted until the node has been asked again.
//!
//! ```text
//!            online / announce              stabilization delay,
//!   Stable ────────(accepted)────→ Verifying ── read request per DP ──→ Stable
//!     ↑  └──(within debounce window: discarded)
//!     └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Responses to the read requests come back as ordinary inbound frames
//! and reconcile through the router; this module only asks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dpgate_channel::{CapabilityPublisher, CommandError};
use dpgate_protocol::{DpId, NodeId};
use dpgate_transport::DpTransport;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::SharedRegistry;

// ---------------------------------------------------------------------------
// RejoinConfig
// ---------------------------------------------------------------------------

/// Rejoin events closer than this to the last accepted one are discarded.
pub const REJOIN_DEBOUNCE: Duration = Duration::from_secs(30);

/// Timing for rejoin handling and the startup query.
///
/// The rejoin debounce window is not configurable; see [`REJOIN_DEBOUNCE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RejoinConfig {
    /// Wait after an accepted rejoin before querying. Default: 2 s.
    pub stabilization_ms: u64,

    /// Gap between consecutive read requests after a rejoin. Default: 200 ms.
    pub query_spacing_ms: u64,

    /// Wait after attach before the startup query. Default: 2 s.
    pub initial_delay_ms: u64,

    /// Gap between consecutive read requests of the startup query.
    /// Default: 150 ms.
    pub initial_spacing_ms: u64,

    /// Upper bound of the random delay added to the startup query so
    /// nodes attached together do not query in lockstep. Default: 500 ms.
    pub initial_jitter_ms: u64,

    /// How long one read request may take before it is abandoned.
    /// Default: 5 s.
    pub query_timeout_ms: u64,
}

impl Default for RejoinConfig {
    fn default() -> Self {
        Self {
            stabilization_ms: 2_000,
            query_spacing_ms: 200,
            initial_delay_ms: 2_000,
            initial_spacing_ms: 150,
            initial_jitter_ms: 500,
            query_timeout_ms: 5_000,
        }
    }
}

impl RejoinConfig {
    pub fn stabilization(&self) -> Duration {
        Duration::from_millis(self.stabilization_ms)
    }

    pub fn query_spacing(&self) -> Duration {
        Duration::from_millis(self.query_spacing_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn initial_spacing(&self) -> Duration {
        Duration::from_millis(self.initial_spacing_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// A random extra delay in `0..initial_jitter_ms`.
    fn initial_jitter(&self) -> Duration {
        if self.initial_jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..self.initial_jitter_ms))
    }
}

// ---------------------------------------------------------------------------
// RejoinState
// ---------------------------------------------------------------------------

/// Where the node is in the rejoin cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Stable,
    /// A rejoin was accepted and the node is being re-queried.
    Verifying,
}

/// Outcome of a rejoin candidate event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejoinDecision {
    /// A sync cycle was started. `count` is the new rejoin count.
    Accepted { count: u64 },
    /// Too close to the last accepted rejoin; ignored.
    Debounced { since_last: Duration },
}

/// Per-node rejoin bookkeeping.
///
/// Only the rejoin state machine mutates this; command logic never reads it.
#[derive(Debug, Clone, Default)]
pub struct RejoinState {
    pub last_rejoin_at: Option<Instant>,
    pub rejoin_count: u64,
    pub phase: SyncPhase,
}

impl RejoinState {
    /// Decides whether a rejoin event at `now` starts a new cycle.
    pub fn on_candidate(&mut self, now: Instant, debounce: Duration) -> RejoinDecision {
        if let Some(last) = self.last_rejoin_at {
            let since_last = now.saturating_duration_since(last);
            if since_last < debounce {
                return RejoinDecision::Debounced { since_last };
            }
        }
        self.rejoin_count += 1;
        self.last_rejoin_at = Some(now);
        self.phase = SyncPhase::Verifying;
        RejoinDecision::Accepted {
            count: self.rejoin_count,
        }
    }
}

/// Result of one round of read requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryReport {
    /// Read requests the transport accepted.
    pub sent: usize,
    /// Read requests that failed or timed out.
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// NodeSync
// ---------------------------------------------------------------------------

/// Rejoin and startup synchronization for one physical node.
pub struct NodeSync<T, P> {
    node: NodeId,
    registry: SharedRegistry<T, P>,
    config: RejoinConfig,
    state: Mutex<RejoinState>,
    available: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: DpTransport, P: CapabilityPublisher> NodeSync<T, P> {
    pub fn new(
        node: NodeId,
        registry: SharedRegistry<T, P>,
        config: RejoinConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            node,
            registry,
            config,
            state: Mutex::new(RejoinState::default()),
            available: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// A snapshot of the rejoin bookkeeping.
    pub fn rejoin_state(&self) -> RejoinState {
        self.lock_state().clone()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Marks the node unreachable, after a command met
    /// `TransportUnavailable`. Cleared by the next accepted rejoin.
    pub fn mark_unavailable(&self) {
        if self.available.swap(false, Ordering::AcqRel) {
            tracing::info!(node = %self.node, "node marked unavailable");
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RejoinState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handles an `online` / `announce` event.
    ///
    /// The decision is made synchronously, so two events delivered back to
    /// back can never both be accepted. An accepted rejoin marks the node
    /// available and spawns the sync cycle.
    pub fn on_rejoin_candidate(self: &Arc<Self>) -> RejoinDecision {
        let decision = self
            .lock_state()
            .on_candidate(Instant::now(), REJOIN_DEBOUNCE);

        match decision {
            RejoinDecision::Debounced { since_last } => {
                tracing::debug!(
                    node = %self.node,
                    since_last_ms = since_last.as_millis() as u64,
                    "rejoin event debounced"
                );
            }
            RejoinDecision::Accepted { count } => {
                tracing::info!(node = %self.node, count, "rejoin accepted, syncing state");
                self.available.store(true, Ordering::Release);
                let this = Arc::clone(self);
                self.spawn(async move {
                    tokio::time::sleep(this.config.stabilization()).await;
                    let report = this.query_owned(this.config.query_spacing()).await;
                    this.lock_state().phase = SyncPhase::Stable;
                    tracing::info!(
                        node = %this.node,
                        sent = report.sent,
                        failed = report.failed,
                        "rejoin sync done"
                    );
                });
            }
        }
        decision
    }

    /// Schedules the startup query: after the initial delay plus jitter,
    /// every owned DP is asked for its value. Skipped if the node is
    /// unavailable by then.
    pub fn schedule_initial_query(self: &Arc<Self>) {
        let delay = self.config.initial_delay() + self.config.initial_jitter();
        let this = Arc::clone(self);
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            if !this.is_available() {
                tracing::debug!(node = %this.node, "node unavailable, initial query skipped");
                return;
            }
            let report = this.query_owned(this.config.initial_spacing()).await;
            tracing::info!(
                node = %this.node,
                sent = report.sent,
                failed = report.failed,
                "initial query done"
            );
        });
    }

    /// Asks for `dps` every `every`, starting one interval from now, until
    /// [`shutdown`](Self::shutdown). Rounds are skipped while the node is
    /// unavailable.
    pub fn schedule_poll(self: &Arc<Self>, dps: Vec<DpId>, every: Duration) {
        if dps.is_empty() || every.is_zero() {
            return;
        }
        let this = Arc::clone(self);
        self.spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + every, every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if !this.is_available() {
                    tracing::debug!(node = %this.node, "node unavailable, poll skipped");
                    continue;
                }
                let report = this.query(&dps, this.config.query_spacing()).await;
                tracing::debug!(
                    node = %this.node,
                    sent = report.sent,
                    failed = report.failed,
                    "poll done"
                );
            }
        });
    }

    /// Sends a read request for every DP owned by the node's channels,
    /// `spacing` apart. Each request goes through its owning channel, so
    /// it queues behind a command already in flight there.
    ///
    /// Failures are logged and counted, never returned: a node that is
    /// half-reachable still gets every DP it can answer for.
    pub async fn query_owned(&self, spacing: Duration) -> QueryReport {
        let dps = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .owned_dps(self.node);
        self.query(&dps, spacing).await
    }

    async fn query(&self, dps: &[DpId], spacing: Duration) -> QueryReport {
        let mut report = QueryReport::default();
        for (i, dp) in dps.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(spacing).await;
            }
            // Clone the handle out so the registry lock is not held across the write.
            let owner = self
                .registry
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .lookup(self.node, *dp)
                .map(|(_, channel)| Arc::clone(channel));
            let Some(channel) = owner else {
                tracing::debug!(node = %self.node, %dp, "DP released before its read request");
                report.failed += 1;
                continue;
            };

            match channel.query(*dp, self.config.query_timeout()).await {
                Ok(()) => report.sent += 1,
                Err(CommandError::TransportUnavailable(_)) => {
                    tracing::debug!(node = %self.node, %dp, "read request skipped, node unavailable");
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(node = %self.node, %dp, error = %e, "read request failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(tokio::spawn(task));
    }

    /// Aborts pending sync and startup queries. Used at detach.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
        tracing::debug!(node = %self.node, "node sync stopped");
    }
}

// =========================================================================
// Tests
// =========================================================================
