//! Unified error type for dpgate.

use dpgate_channel::{Capability, CommandError};
use dpgate_node::RegistryError;
use dpgate_protocol::{ChannelId, NodeId, ProtocolError};
use dpgate_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// Callers of the `dpgate` facade deal with this single type; `?`
/// converts layer errors through the `#[from]` impls.
#[derive(Debug, thiserror::Error)]
pub enum DpGateError {
    /// Encoding, decoding or frame layout.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport itself failed outside a command.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A command was rejected or failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// DP ownership could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A device profile is not valid JSON.
    #[error("profile parse error: {0}")]
    ProfileJson(#[from] serde_json::Error),

    /// A device profile parsed but cannot be attached.
    #[error("profile {name}: {reason}")]
    InvalidProfile { name: String, reason: String },

    #[error("node {0} already attached")]
    NodeAttached(NodeId),

    #[error("node {0} not attached")]
    NodeNotAttached(NodeId),

    #[error("channel {0} not found")]
    ChannelNotFound(ChannelId),

    /// The channel has no DP driving this capability. Device-wide settings
    /// only exist on the main channel.
    #[error("channel {channel} has no {capability} capability")]
    Unsupported {
        channel: ChannelId,
        capability: Capability,
    },

    /// A host value outside the capability's range.
    #[error("invalid {capability} value: {reason}")]
    InvalidSetting {
        capability: Capability,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use dpgate_protocol::DpId;

    use super::*;

    #[test]
    fn test_from_protocol_error() {
        let err: DpGateError = ProtocolError::UnknownDatatype(9).into();
        assert!(matches!(err, DpGateError::Protocol(_)));
    }

    #[test]
    fn test_from_transport_error() {
        let err: DpGateError = TransportError::Unavailable(NodeId(3)).into();
        assert!(matches!(err, DpGateError::Transport(_)));
        assert!(err.to_string().contains("N-0003"));
    }

    #[test]
    fn test_from_command_error() {
        let err: DpGateError = CommandError::NotOwned {
            channel: ChannelId::main(NodeId(1)),
            dp: DpId(7),
        }
        .into();
        assert!(matches!(err, DpGateError::Command(_)));
        assert!(err.to_string().contains("dp7"));
    }

    #[test]
    fn test_from_registry_error() {
        let err: DpGateError = RegistryError::ChannelExists(ChannelId::main(NodeId(1))).into();
        assert!(matches!(err, DpGateError::Registry(_)));
    }
}
