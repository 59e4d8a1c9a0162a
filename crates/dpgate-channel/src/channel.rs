//! The logical channel: one gang's reliable command path and state cache.
//!
//! # Concurrency
//!
//! Two locks with different jobs:
//!
//! - `gate` (async) is held for the whole life of a command: debounce,
//!   every attempt, every retry delay. It is what makes commands on one
//!   channel strictly sequential. Sibling channels have their own gate,
//!   so a slow fan gang never blocks a relay gang.
//! - `state` (sync) guards the cache and timestamps. It is only held for
//!   short, non-awaiting sections, so inbound reports can update the
//!   cache while a command is in flight.
//!
//! Optimistic (write ack) and authoritative (report) updates both go
//! through [`LogicalChannel::apply_report`]-style comparison; whichever
//! lands later wins.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dpgate_protocol::{
    ChannelId, DataPointFrame, Datatype, DecodedValue, DpId, ProtocolError, encode_bounded,
};
use dpgate_transport::{DpTransport, TransportError};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::{
    Capability, CapabilityPublisher, CapabilityValue, ChannelConfig, CommandError, DpBinding, FailureReason,
    STATE_CHANGED, TriggerTokens,
};

#[derive(Debug, Default)]
struct ChannelState {
    last_command_at: Option<Instant>,
    last_known: HashMap<DpId, DecodedValue>,
    in_flight: bool,
}

/// One controllable unit on a physical node.
pub struct LogicalChannel<T, P> {
    id: ChannelId,
    bindings: BTreeMap<DpId, DpBinding>,
    config: ChannelConfig,
    transport: Arc<T>,
    publisher: Arc<P>,
    gate: tokio::sync::Mutex<()>,
    state: Mutex<ChannelState>,
    closed: watch::Sender<bool>,
}

impl<T: DpTransport, P: CapabilityPublisher> LogicalChannel<T, P> {
    /// Creates a channel owning `bindings`.
    pub fn new(
        id: ChannelId,
        bindings: impl IntoIterator<Item = DpBinding>,
        config: ChannelConfig,
        transport: Arc<T>,
        publisher: Arc<P>,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            bindings: bindings.into_iter().map(|b| (b.dp, b)).collect(),
            config,
            transport,
            publisher,
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(ChannelState::default()),
            closed,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// The DPs this channel owns, ascending.
    pub fn owned_dps(&self) -> Vec<DpId> {
        self.bindings.keys().copied().collect()
    }

    pub fn binding(&self, dp: DpId) -> Option<&DpBinding> {
        self.bindings.get(&dp)
    }

    /// The first binding driving `capability`, if any.
    pub fn binding_for(&self, capability: Capability) -> Option<&DpBinding> {
        self.bindings.values().find(|b| b.capability == capability)
    }

    /// The cached value of `dp`, if one has been confirmed.
    pub fn last_known(&self, dp: DpId) -> Option<DecodedValue> {
        self.lock_state().last_known.get(&dp).cloned()
    }

    /// Whether a command is currently being written.
    pub fn is_in_flight(&self) -> bool {
        self.lock_state().in_flight
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn lock_state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Sends `value` to `dp`, reliably.
    ///
    /// Validation happens before anything else: an unowned DP, a datatype
    /// that differs from the binding, or a value the codec or the bounds
    /// reject never reaches the transport. The command then waits for the
    /// channel's gate, honors the debounce interval, and makes up to
    /// `max_retries` attempts, each raced against `command_timeout`.
    ///
    /// On success the cache is updated optimistically and the change, if
    /// any, is published.
    ///
    /// # Errors
    /// - [`CommandError::NotOwned`] / [`CommandError::InvalidValue`] before
    ///   any write.
    /// - [`CommandError::TransportUnavailable`] on the first attempt that
    ///   meets an unreachable node. Not retried.
    /// - [`CommandError::CommandFailed`] once every attempt has failed.
    ///   The cache is left untouched.
    /// - [`CommandError::ChannelClosed`] if [`close`](Self::close) is
    ///   called while the command waits or retries.
    pub async fn send(
        &self,
        dp: DpId,
        datatype: Datatype,
        value: DecodedValue,
    ) -> Result<(), CommandError> {
        let binding = self.bindings.get(&dp).ok_or(CommandError::NotOwned {
            channel: self.id,
            dp,
        })?;
        if binding.datatype != datatype {
            return Err(CommandError::InvalidValue(ProtocolError::InvalidValue(
                format!("{dp} is a {} DP, not {datatype}", binding.datatype),
            )));
        }
        let payload = encode_bounded(datatype, &value, &binding.bounds)?;
        let frame = DataPointFrame::new(dp, datatype, payload);

        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(CommandError::ChannelClosed(self.id));
        }

        let _gate = tokio::select! {
            guard = self.gate.lock() => guard,
            _ = closed.wait_for(|c| *c) => return Err(CommandError::ChannelClosed(self.id)),
        };

        self.debounce(&mut closed).await?;

        self.lock_state().in_flight = true;
        let result = self.write_with_retry(&frame, &mut closed).await;
        {
            let mut state = self.lock_state();
            state.in_flight = false;
            if result.is_ok() {
                state.last_command_at = Some(Instant::now());
            }
        }
        result?;

        tracing::debug!(channel = %self.id, %dp, %value, "command acknowledged");
        self.update(binding, value);
        Ok(())
    }

    /// Asks the device for the current value of `dp`.
    ///
    /// The read request waits for the channel's gate like any command, so
    /// it never overlaps a write. It makes one attempt bounded by
    /// `timeout`, skips the debounce wait and leaves `last_command_at`
    /// alone. The answer arrives later as an inbound frame.
    ///
    /// # Errors
    /// - [`CommandError::NotOwned`] if `dp` is not bound here.
    /// - [`CommandError::TransportUnavailable`] if the node is unreachable.
    /// - [`CommandError::CommandFailed`] on a transport error or timeout.
    /// - [`CommandError::ChannelClosed`] if the channel closes first.
    pub async fn query(&self, dp: DpId, timeout: Duration) -> Result<(), CommandError> {
        if !self.bindings.contains_key(&dp) {
            return Err(CommandError::NotOwned {
                channel: self.id,
                dp,
            });
        }
        let frame = DataPointFrame::read_request(dp);

        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(CommandError::ChannelClosed(self.id));
        }
        let _gate = tokio::select! {
            guard = self.gate.lock() => guard,
            _ = closed.wait_for(|c| *c) => return Err(CommandError::ChannelClosed(self.id)),
        };

        self.lock_state().in_flight = true;
        let outcome = tokio::select! {
            r = tokio::time::timeout(timeout, self.transport.write_datapoint(self.id.node, &frame)) => Some(r),
            _ = closed.wait_for(|c| *c) => None,
        };
        self.lock_state().in_flight = false;

        let reason = match outcome {
            None => return Err(CommandError::ChannelClosed(self.id)),
            Some(Ok(Ok(()))) => return Ok(()),
            Some(Ok(Err(TransportError::Unavailable(node)))) => {
                return Err(CommandError::TransportUnavailable(node));
            }
            Some(Ok(Err(e))) => FailureReason::Transport(e.to_string()),
            Some(Err(_)) => FailureReason::Timeout,
        };
        Err(CommandError::CommandFailed {
            dp,
            attempts: 1,
            reason,
        })
    }

    async fn debounce(&self, closed: &mut watch::Receiver<bool>) -> Result<(), CommandError> {
        let min_interval = self.config.min_interval();
        let wait = self
            .lock_state()
            .last_command_at
            .map(|at| min_interval.saturating_sub(at.elapsed()))
            .filter(|w| !w.is_zero());

        if let Some(wait) = wait {
            tracing::debug!(channel = %self.id, wait_ms = wait.as_millis() as u64, "debouncing command");
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                _ = closed.wait_for(|c| *c) => return Err(CommandError::ChannelClosed(self.id)),
            }
        }
        Ok(())
    }

    async fn write_with_retry(
        &self,
        frame: &DataPointFrame,
        closed: &mut watch::Receiver<bool>,
    ) -> Result<(), CommandError> {
        let attempts = self.config.attempts();
        let node = self.id.node;

        for attempt in 1..=attempts {
            tracing::trace!(channel = %self.id, dp = %frame.dp, attempt, "writing");
            let outcome = tokio::select! {
                r = tokio::time::timeout(
                    self.config.command_timeout(),
                    self.transport.write_datapoint(node, frame),
                ) => r,
                _ = closed.wait_for(|c| *c) => return Err(CommandError::ChannelClosed(self.id)),
            };

            let reason = match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(TransportError::Unavailable(node))) => {
                    tracing::warn!(channel = %self.id, dp = %frame.dp, "node unavailable");
                    return Err(CommandError::TransportUnavailable(node));
                }
                Ok(Err(e)) => FailureReason::Transport(e.to_string()),
                Err(_) => FailureReason::Timeout,
            };

            tracing::warn!(
                channel = %self.id,
                dp = %frame.dp,
                attempt,
                attempts,
                %reason,
                "write attempt failed"
            );

            if attempt == attempts {
                return Err(CommandError::CommandFailed {
                    dp: frame.dp,
                    attempts,
                    reason,
                });
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.retry_delay()) => {}
                _ = closed.wait_for(|c| *c) => return Err(CommandError::ChannelClosed(self.id)),
            }
        }

        // `attempts()` is at least one, so the loop always returns.
        Err(CommandError::ChannelClosed(self.id))
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Applies a decoded value reported by the device.
    ///
    /// Returns `true` if the cache changed (and the change was published),
    /// `false` if the value was identical or the DP is not owned here.
    pub fn apply_report(&self, dp: DpId, value: DecodedValue) -> bool {
        let Some(binding) = self.bindings.get(&dp) else {
            tracing::debug!(channel = %self.id, %dp, "report for a DP this channel does not own");
            return false;
        };
        self.update(binding, value)
    }

    /// Compares with the cache, stores, and publishes on change.
    fn update(&self, binding: &DpBinding, value: DecodedValue) -> bool {
        let mut state = self.lock_state();
        let previous = state.last_known.get(&binding.dp);
        if previous == Some(&value) {
            return false;
        }

        let capability = binding.capability;
        let from = previous
            .and_then(|v| capability.to_host(v))
            .unwrap_or_else(|| capability.default_value());
        let derived_from = previous.and_then(|v| capability.derived(v)).map(|(_, v)| v);
        let derived = capability.derived(&value);
        let to = capability.to_host(&value);
        state.last_known.insert(binding.dp, value);

        let Some(to) = to else {
            tracing::debug!(channel = %self.id, dp = %binding.dp, %capability, "value has no host representation");
            return true;
        };
        self.publish(capability.name(), from, to);

        if let Some((name, to)) = derived {
            if derived_from.as_ref() != Some(&to) {
                let from = derived_from.unwrap_or(CapabilityValue::Bool(false));
                self.publish(name, from, to);
            }
        }
        true
    }

    fn publish(&self, capability: &str, from: CapabilityValue, to: CapabilityValue) {
        if let Err(e) = self.publisher.publish_value(self.id, capability, &to) {
            tracing::warn!(channel = %self.id, capability, error = %e, "value publish failed");
        }
        if from == to {
            return;
        }
        let tokens = TriggerTokens::from([
            ("capability".to_owned(), CapabilityValue::Text(capability.to_owned())),
            ("from".to_owned(), from),
            ("to".to_owned(), to),
        ]);
        if let Err(e) = self.publisher.publish_trigger(self.id, STATE_CHANGED, &tokens) {
            tracing::warn!(channel = %self.id, capability, error = %e, "trigger publish failed");
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Closes the channel. Waiting and retrying commands end with
    /// [`CommandError::ChannelClosed`]; new commands are refused.
    pub fn close(&self) {
        self.closed.send_replace(true);
        tracing::info!(channel = %self.id, "channel closed");
    }
}

// =========================================================================
// Tests
// =========================================================================
