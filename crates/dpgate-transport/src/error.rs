use dpgate_protocol::NodeId;

/// Errors that can occur in the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The node cannot be reached. Commands surface this immediately
    /// instead of retrying.
    #[error("node {0} unavailable")]
    Unavailable(NodeId),

    /// The write was attempted and failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
