//! The host publish interface.
//!
//! The host's capability store and trigger system are external. The
//! adapter only ever pushes into them through [`CapabilityPublisher`].

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use dpgate_protocol::ChannelId;

use crate::{CapabilityValue, PublishError};

/// Event name of the trigger fired on every capability change.
pub const STATE_CHANGED: &str = "state_changed";

/// Trigger tokens by name (`capability`, `from`, `to`).
pub type TriggerTokens = BTreeMap<String, CapabilityValue>;

/// Receives reconciled capability values for the host.
///
/// Calls are synchronous and made while the channel's state is locked,
/// so publish order always matches cache order. Implementations must not
/// call back into the channel.
pub trait CapabilityPublisher: Send + Sync + 'static {
    /// Sets `capability` on `channel` to `value`.
    fn publish_value(
        &self,
        channel: ChannelId,
        capability: &str,
        value: &CapabilityValue,
    ) -> Result<(), PublishError>;

    /// Fires the `event` trigger on `channel`.
    fn publish_trigger(
        &self,
        channel: ChannelId,
        event: &str,
        tokens: &TriggerTokens,
    ) -> Result<(), PublishError>;
}

/// One call made into a [`RecordingPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub enum PublishedEvent {
    Value {
        channel: ChannelId,
        capability: String,
        value: CapabilityValue,
    },
    Trigger {
        channel: ChannelId,
        event: String,
        tokens: TriggerTokens,
    },
}

/// A publisher that keeps every call and logs it.
///
/// Useful wherever there is no real host: tests, the demo binary.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<PublishedEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, oldest first.
    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the value publishes, as `(channel, capability, value)`.
    pub fn values(&self) -> Vec<(ChannelId, String, CapabilityValue)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PublishedEvent::Value {
                    channel,
                    capability,
                    value,
                } => Some((channel, capability, value)),
                PublishedEvent::Trigger { .. } => None,
            })
            .collect()
    }

    /// Only the `state_changed` triggers, as `(channel, from, to)`.
    pub fn transitions(&self) -> Vec<(ChannelId, CapabilityValue, CapabilityValue)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PublishedEvent::Trigger {
                    channel,
                    event,
                    tokens,
                } if event == STATE_CHANGED => {
                    Some((channel, tokens.get("from")?.clone(), tokens.get("to")?.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn push(&self, event: PublishedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl CapabilityPublisher for RecordingPublisher {
    fn publish_value(
        &self,
        channel: ChannelId,
        capability: &str,
        value: &CapabilityValue,
    ) -> Result<(), PublishError> {
        tracing::info!(%channel, capability, %value, "capability published");
        self.push(PublishedEvent::Value {
            channel,
            capability: capability.to_owned(),
            value: value.clone(),
        });
        Ok(())
    }

    fn publish_trigger(
        &self,
        channel: ChannelId,
        event: &str,
        tokens: &TriggerTokens,
    ) -> Result<(), PublishError> {
        tracing::info!(%channel, event, ?tokens, "trigger fired");
        self.push(PublishedEvent::Trigger {
            channel,
            event: event.to_owned(),
            tokens: tokens.clone(),
        });
        Ok(())
    }
}
