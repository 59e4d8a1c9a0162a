//! Error types for the channel layer.

use std::fmt;

use dpgate_protocol::{ChannelId, DpId, NodeId, ProtocolError};

/// Why the last write attempt of a command failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The write did not complete within the command timeout.
    Timeout,
    /// The transport rejected the write.
    Transport(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out"),
            Self::Transport(reason) => write!(f, "transport error: {reason}"),
        }
    }
}

/// Errors returned to the caller of [`LogicalChannel::send`](crate::LogicalChannel::send).
///
/// Every variant leaves the channel consistent: the gate is released and
/// the next command can be issued right away.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The value was rejected before any transport interaction.
    #[error(transparent)]
    InvalidValue(#[from] ProtocolError),

    /// The channel does not own this DP.
    #[error("{dp} is not owned by channel {channel}")]
    NotOwned { channel: ChannelId, dp: DpId },

    /// The node is unreachable. Not retried.
    #[error("node {0} unavailable")]
    TransportUnavailable(NodeId),

    /// Every attempt failed.
    #[error("command to {dp} failed after {attempts} attempt(s): {reason}")]
    CommandFailed {
        dp: DpId,
        attempts: u32,
        reason: FailureReason,
    },

    /// The channel was torn down while the command was waiting or retrying.
    #[error("channel {0} closed")]
    ChannelClosed(ChannelId),
}

/// A publish call into the host failed.
///
/// Publish failures never fail a command or a report; the channel logs
/// them and carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);
