//! Error types for the node layer.

use dpgate_protocol::{ChannelId, DpId, NodeId};

/// Errors raised while registering channel ownership.
///
/// A failed registration changes nothing: either every DP of the channel
/// is registered or none is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Another channel on the same node already owns this DP.
    #[error("{dp} on node {node} is already owned by channel {owner}")]
    DpConflict {
        node: NodeId,
        dp: DpId,
        owner: ChannelId,
    },

    /// The channel id names a different node.
    #[error("channel {channel} does not belong to node {node}")]
    NodeMismatch { channel: ChannelId, node: NodeId },

    /// The channel is already registered.
    #[error("channel {0} is already registered")]
    ChannelExists(ChannelId),
}
