//! Momentary mode: a command that undoes itself.
//!
//! ```text
//!   Idle ──(command V, ack)──→ Active{revert to previous}
//!    ↑                            │            │
//!    │                 (new command)      (timer fires)
//!    │                            │            ▼
//!    │                            └──→ …   Reverting ──(revert done)──→ Idle
//!    └────────────────(cancel)───────────────┘
//! ```
//!
//! The revert goes through [`LogicalChannel::send`] like any other
//! command, so it is debounced, serialized and retried, and its
//! state-changed notification comes from the normal publish path.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dpgate_protocol::{Datatype, DecodedValue, DpId};
use dpgate_transport::DpTransport;
use tokio::task::JoinHandle;

use crate::{CapabilityPublisher, CommandError, LogicalChannel};

#[derive(Debug, Default)]
enum Phase {
    #[default]
    Idle,
    Active {
        pending_revert: bool,
        timer: JoinHandle<()>,
        generation: u64,
    },
    /// The timer fired and the revert command is running. It can no longer
    /// be cancelled; a new command queues behind it on the channel gate.
    Reverting { generation: u64 },
}

#[derive(Debug, Default)]
struct MomentaryState {
    phase: Phase,
    generation: u64,
    /// Bumped by every explicit [`MomentaryController::cancel`]. A command
    /// that sees it change while its write was running does not arm.
    cancels: u64,
}

/// Receives the error of a revert command that failed.
pub type RevertErrorHook = Arc<dyn Fn(&CommandError) + Send + Sync>;

/// Auto-revert controller for one on/off DP of a channel.
pub struct MomentaryController<T, P> {
    channel: Arc<LogicalChannel<T, P>>,
    dp: DpId,
    timeout: Mutex<Duration>,
    state: Arc<Mutex<MomentaryState>>,
    on_revert_error: Option<RevertErrorHook>,
}

fn lock<S>(m: &Mutex<S>) -> MutexGuard<'_, S> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: DpTransport, P: CapabilityPublisher> MomentaryController<T, P> {
    pub fn new(channel: Arc<LogicalChannel<T, P>>, dp: DpId, timeout: Duration) -> Self {
        Self {
            channel,
            dp,
            timeout: Mutex::new(timeout),
            state: Arc::new(Mutex::new(MomentaryState::default())),
            on_revert_error: None,
        }
    }

    /// Calls `hook` whenever a revert command fails. Reverts run in the
    /// background, so this is the only way their errors reach anyone.
    pub fn on_revert_error(mut self, hook: RevertErrorHook) -> Self {
        self.on_revert_error = Some(hook);
        self
    }

    /// Changes the revert delay. Applies from the next command on.
    pub fn set_timeout(&self, timeout: Duration) {
        *lock(&self.timeout) = timeout;
    }

    pub fn timeout(&self) -> Duration {
        *lock(&self.timeout)
    }

    /// Returns `true` while a revert is armed or running.
    pub fn is_active(&self) -> bool {
        !matches!(lock(&self.state).phase, Phase::Idle)
    }

    /// The value an armed timer will restore, if one is armed.
    pub fn pending_revert(&self) -> Option<bool> {
        match lock(&self.state).phase {
            Phase::Active { pending_revert, .. } => Some(pending_revert),
            _ => None,
        }
    }

    /// Sends `value` and arms a revert to the previous state.
    ///
    /// An armed revert from an earlier command is cancelled first: the
    /// latest command decides what to revert to. If nothing is known about
    /// the previous state, the revert goes to `!value`.
    ///
    /// A [`cancel`](Self::cancel) while the write is running means the
    /// command completes as a plain latching one.
    ///
    /// # Errors
    /// Whatever [`LogicalChannel::send`] returns. Nothing is armed on error.
    pub async fn command(&self, value: bool) -> Result<(), CommandError> {
        self.cancel_armed("superseded by a new command");
        let cancels = lock(&self.state).cancels;

        let previous = self
            .channel
            .last_known(self.dp)
            .and_then(|v| v.as_bool())
            .unwrap_or(!value);

        self.channel
            .send(self.dp, Datatype::Bool, DecodedValue::Bool(value))
            .await?;

        self.arm(previous, cancels);
        Ok(())
    }

    /// Cancels an armed revert, if any, and keeps commands still being
    /// written from arming one. A revert already running is left to finish.
    pub fn cancel(&self) {
        lock(&self.state).cancels += 1;
        self.cancel_armed("cancelled");
    }

    fn cancel_armed(&self, why: &str) {
        let mut state = lock(&self.state);
        if matches!(state.phase, Phase::Active { .. }) {
            if let Phase::Active { timer, .. } = std::mem::take(&mut state.phase) {
                timer.abort();
                tracing::debug!(channel = %self.channel.id(), reason = why, "momentary revert dropped");
            }
        }
    }

    fn arm(&self, pending_revert: bool, cancels: u64) {
        let mut state = lock(&self.state);
        if state.cancels != cancels {
            tracing::debug!(channel = %self.channel.id(), "cancelled during the write, revert not armed");
            return;
        }
        if let Phase::Active { timer, .. } = std::mem::take(&mut state.phase) {
            // A concurrent command armed first; last writer wins.
            timer.abort();
        }
        state.generation += 1;
        let generation = state.generation;
        let timeout = self.timeout();

        let timer = tokio::spawn(revert_after(
            Arc::clone(&self.channel),
            Arc::clone(&self.state),
            self.dp,
            timeout,
            pending_revert,
            generation,
            self.on_revert_error.clone(),
        ));
        state.phase = Phase::Active {
            pending_revert,
            timer,
            generation,
        };
        tracing::debug!(
            channel = %self.channel.id(),
            timeout_ms = timeout.as_millis() as u64,
            pending_revert,
            "momentary revert armed"
        );
    }
}

async fn revert_after<T: DpTransport, P: CapabilityPublisher>(
    channel: Arc<LogicalChannel<T, P>>,
    state: Arc<Mutex<MomentaryState>>,
    dp: DpId,
    timeout: Duration,
    value: bool,
    generation: u64,
    on_error: Option<RevertErrorHook>,
) {
    tokio::time::sleep(timeout).await;

    {
        let mut state = lock(&state);
        let current = matches!(state.phase, Phase::Active { generation: g, .. } if g == generation);
        if !current {
            return;
        }
        state.phase = Phase::Reverting { generation };
    }

    match channel
        .send(dp, Datatype::Bool, DecodedValue::Bool(value))
        .await
    {
        Ok(()) => tracing::info!(channel = %channel.id(), to = value, "momentary revert done"),
        Err(e) => {
            tracing::warn!(channel = %channel.id(), error = %e, "momentary revert failed");
            if let Some(hook) = &on_error {
                hook(&e);
            }
        }
    }

    let mut state = lock(&state);
    if matches!(state.phase, Phase::Reverting { generation: g } if g == generation) {
        state.phase = Phase::Idle;
    }
}

impl<T, P> Drop for MomentaryController<T, P> {
    fn drop(&mut self) {
        if let Phase::Active { timer, .. } = &lock(&self.state).phase {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use dpgate_protocol::{ChannelId, NodeId};
    use dpgate_transport::MemoryTransport;

    use super::*;
    use crate::{CapabilityValue, ChannelConfig, DpBinding, RecordingPublisher};

    struct Fixture {
        momentary: MomentaryController<MemoryTransport, RecordingPublisher>,
        channel: Arc<LogicalChannel<MemoryTransport, RecordingPublisher>>,
        transport: Arc<MemoryTransport>,
        publisher: Arc<RecordingPublisher>,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let (transport, _rx) = MemoryTransport::new();
        let transport = Arc::new(transport);
        let publisher = Arc::new(RecordingPublisher::new());
        let channel = Arc::new(LogicalChannel::new(
            ChannelId::new(NodeId(1), 2),
            [DpBinding::on_off(2)],
            ChannelConfig::relay(),
            Arc::clone(&transport),
            Arc::clone(&publisher),
        ));
        let momentary = MomentaryController::new(Arc::clone(&channel), DpId(2), timeout);
        Fixture {
            momentary,
            channel,
            transport,
            publisher,
        }
    }

    fn written(transport: &MemoryTransport) -> Vec<Vec<u8>> {
        transport.writes().into_iter().map(|w| w.frame.payload).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_reverts_after_timeout() {
        let f = fixture(Duration::from_secs(1));
        f.channel.apply_report(DpId(2), DecodedValue::Bool(false));
        f.publisher.clear();

        f.momentary.command(true).await.unwrap();
        assert_eq!(f.momentary.pending_revert(), Some(false));

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(written(&f.transport), vec![vec![1], vec![0]]);
        let id = f.channel.id();
        assert_eq!(
            f.publisher.transitions(),
            vec![
                (id, CapabilityValue::Bool(false), CapabilityValue::Bool(true)),
                (id, CapabilityValue::Bool(true), CapabilityValue::Bool(false)),
            ]
        );
        assert!(!f.momentary.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_unknown_previous_reverts_to_opposite() {
        let f = fixture(Duration::from_secs(1));
        f.momentary.command(true).await.unwrap();
        assert_eq!(f.momentary.pending_revert(), Some(false));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.channel.last_known(DpId(2)), Some(DecodedValue::Bool(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_command_replaces_armed_revert() {
        let f = fixture(Duration::from_secs(1));
        f.channel.apply_report(DpId(2), DecodedValue::Bool(false));

        f.momentary.command(true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        // Previous is now `true` (cached from the first command).
        f.momentary.command(false).await.unwrap();
        assert_eq!(f.momentary.pending_revert(), Some(true));

        tokio::time::sleep(Duration::from_secs(3)).await;

        // true, false, then a single revert to true; the first timer is gone.
        assert_eq!(written(&f.transport), vec![vec![1], vec![0], vec![1]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending_revert() {
        let f = fixture(Duration::from_secs(1));
        f.momentary.command(true).await.unwrap();
        f.momentary.cancel();
        assert!(!f.momentary.is_active());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.transport.writes().len(), 1);
        assert_eq!(f.channel.last_known(DpId(2)), Some(DecodedValue::Bool(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_write_arms_nothing() {
        let f = fixture(Duration::from_secs(1));
        f.transport.set_latency(Duration::from_millis(300));
        let momentary = Arc::new(f.momentary);

        let command = {
            let momentary = Arc::clone(&momentary);
            tokio::spawn(async move { momentary.command(true).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        momentary.cancel();
        command.await.unwrap().unwrap();

        assert!(!momentary.is_active());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(written(&f.transport), vec![vec![1]]);
        assert_eq!(f.channel.last_known(DpId(2)), Some(DecodedValue::Bool(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_revert_reaches_hook() {
        let f = fixture(Duration::from_secs(1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let momentary = {
            let seen = Arc::clone(&seen);
            f.momentary
                .on_revert_error(Arc::new(move |e: &CommandError| lock(&seen).push(e.clone())))
        };

        momentary.command(true).await.unwrap();
        f.transport.set_reachable(NodeId(1), false);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(
            *lock(&seen),
            vec![CommandError::TransportUnavailable(NodeId(1))]
        );
        assert!(!momentary.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_command_arms_nothing() {
        let f = fixture(Duration::from_secs(1));
        f.transport.set_reachable(NodeId(1), false);

        let err = f.momentary.command(true).await.unwrap_err();
        assert!(matches!(err, CommandError::TransportUnavailable(_)));
        assert!(!f.momentary.is_active());
    }
}
