//! Transport abstraction layer for dpgate.
//!
//! The mesh-network stack is an external collaborator. This crate pins
//! down the two things the adapter needs from it:
//!
//! - an outbound primitive, [`DpTransport::write_datapoint`], used both for
//!   commands and for read requests;
//! - a stream of inbound [`NodeEvent`]s keyed by physical node.
//!
//! # Feature Flags
//!
//! - `memory` (default): [`MemoryTransport`], an in-process transport that
//!   scripts write outcomes and can simulate a device. Used by tests and
//!   the demo.

mod error;
#[cfg(feature = "memory")]
mod memory;

pub use error::TransportError;
#[cfg(feature = "memory")]
pub use memory::{MemoryTransport, RecordedWrite, WriteOutcome};

use std::future::Future;

use dpgate_protocol::{DataPointFrame, NodeId};

/// Writes DP frames to physical nodes.
///
/// One transport is shared by every channel of every node, so
/// implementations must accept concurrent calls. The returned future must
/// be `Send` because channels race it against a timer inside spawned
/// tasks.
pub trait DpTransport: Send + Sync + 'static {
    /// Writes a single DP record to `node`.
    ///
    /// Resolves when the device acknowledges the write. A future that
    /// never resolves is legal; the caller bounds it with its own timeout.
    ///
    /// # Errors
    /// - [`TransportError::Unavailable`] when the node cannot be reached
    ///   at all (left the network, no route).
    /// - [`TransportError::WriteFailed`] when the write was attempted and
    ///   rejected.
    fn write_datapoint(
        &self,
        node: NodeId,
        frame: &DataPointFrame,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// An inbound event from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    /// The physical node the event came from.
    pub node: NodeId,
    /// What happened.
    pub kind: NodeEventKind,
}

/// The kinds of inbound events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEventKind {
    /// Unsolicited state report (physical button press, scene, ...).
    Reporting(DataPointFrame),
    /// Answer to a write or a read request.
    Response(DataPointFrame),
    /// The node came back online.
    Online,
    /// The node re-announced itself on the network.
    Announce,
}

impl NodeEvent {
    /// A `reporting` event carrying `frame`.
    pub fn reporting(node: NodeId, frame: DataPointFrame) -> Self {
        Self {
            node,
            kind: NodeEventKind::Reporting(frame),
        }
    }

    /// A `response` event carrying `frame`.
    pub fn response(node: NodeId, frame: DataPointFrame) -> Self {
        Self {
            node,
            kind: NodeEventKind::Response(frame),
        }
    }

    /// An `online` event.
    pub fn online(node: NodeId) -> Self {
        Self {
            node,
            kind: NodeEventKind::Online,
        }
    }

    /// An `announce` event.
    pub fn announce(node: NodeId) -> Self {
        Self {
            node,
            kind: NodeEventKind::Announce,
        }
    }

    /// The DP frame carried by the event, if any.
    pub fn frame(&self) -> Option<&DataPointFrame> {
        match &self.kind {
            NodeEventKind::Reporting(frame) | NodeEventKind::Response(frame) => Some(frame),
            NodeEventKind::Online | NodeEventKind::Announce => None,
        }
    }

    /// Returns `true` for events that suggest the node rejoined.
    pub fn is_rejoin_candidate(&self) -> bool {
        matches!(self.kind, NodeEventKind::Online | NodeEventKind::Announce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpgate_protocol::{Datatype, DpId};

    fn frame() -> DataPointFrame {
        DataPointFrame::new(DpId(1), Datatype::Bool, vec![1])
    }

    #[test]
    fn test_node_event_frame_present_for_reports_and_responses() {
        assert_eq!(NodeEvent::reporting(NodeId(1), frame()).frame(), Some(&frame()));
        assert_eq!(NodeEvent::response(NodeId(1), frame()).frame(), Some(&frame()));
        assert_eq!(NodeEvent::online(NodeId(1)).frame(), None);
    }

    #[test]
    fn test_node_event_rejoin_candidates() {
        assert!(NodeEvent::online(NodeId(1)).is_rejoin_candidate());
        assert!(NodeEvent::announce(NodeId(1)).is_rejoin_candidate());
        assert!(!NodeEvent::reporting(NodeId(1), frame()).is_rejoin_candidate());
    }
}
