//! Per-channel command reliability for dpgate.
//!
//! A physical multi-gang device is split into logical channels, one per
//! gang. This crate gives each channel:
//!
//! 1. **A reliable command path** ([`LogicalChannel::send`]): validate,
//!    serialize, debounce, race against a timeout, retry.
//! 2. **A last-known-value cache** updated optimistically on write
//!    acknowledgment and authoritatively by device reports.
//! 3. **Capability publishing** ([`CapabilityPublisher`]): every cache
//!    change becomes a value publish plus a `state_changed` trigger.
//! 4. **Momentary mode** ([`MomentaryController`]): auto-revert after a
//!    configurable delay.
//!
//! # How it fits in the stack
//!
//! ```text
//! Node Layer (above)      ← routes inbound frames here, drives rejoin queries
//!     ↕
//! Channel Layer (this crate)
//!     ↕
//! Transport + Protocol (below) ← write_datapoint, encode/decode
//! ```

mod capability;
mod channel;
mod config;
mod error;
mod momentary;
mod publisher;

pub use capability::{ALARM_MELODIES, Capability, CapabilityValue, DpBinding};
pub use channel::LogicalChannel;
pub use config::{ChannelConfig, ChannelSettings, SwitchMode};
pub use error::{CommandError, FailureReason, PublishError};
pub use momentary::{MomentaryController, RevertErrorHook};
pub use publisher::{
    CapabilityPublisher, PublishedEvent, RecordingPublisher, STATE_CHANGED, TriggerTokens,
};
