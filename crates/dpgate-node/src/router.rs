//! Inbound routing: transport frame → owning channel.
//!
//! Decode and route failures never leave the router. They are logged and
//! reported back as a [`RouteOutcome`] so callers (and tests) can see
//! what happened without handling an error.

use std::sync::{Arc, PoisonError};

use dpgate_channel::{CapabilityPublisher, LogicalChannel};
use dpgate_protocol::{ChannelId, DataPointFrame, NodeId, decode};
use dpgate_transport::DpTransport;

use crate::SharedRegistry;

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered to `channel`. `changed` is `true` if the cache changed
    /// and a publish went out.
    Delivered { channel: ChannelId, changed: bool },
    /// The datatype tag is unknown; the frame was dropped.
    Undecodable,
    /// No channel on the node owns the DP; the frame was dropped.
    RouteMiss,
}

/// Dispatches decoded frames to the channel that owns their DP.
pub struct InboundRouter<T, P> {
    registry: SharedRegistry<T, P>,
}

impl<T, P> Clone for InboundRouter<T, P> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: DpTransport, P: CapabilityPublisher> InboundRouter<T, P> {
    pub fn new(registry: SharedRegistry<T, P>) -> Self {
        Self { registry }
    }

    /// Handles a `reporting` or `response` frame from `node`.
    pub fn on_frame(&self, node: NodeId, frame: &DataPointFrame) -> RouteOutcome {
        let Some(value) = decode(frame) else {
            tracing::debug!(%node, dp = %frame.dp, tag = frame.tag, "undecodable frame dropped");
            return RouteOutcome::Undecodable;
        };

        let Some((channel, handle)) = self.owner(node, frame) else {
            tracing::debug!(%node, dp = %frame.dp, %value, "route miss, frame dropped");
            return RouteOutcome::RouteMiss;
        };

        tracing::trace!(%channel, dp = %frame.dp, %value, "frame routed");
        let changed = handle.apply_report(frame.dp, value);
        RouteOutcome::Delivered { channel, changed }
    }

    fn owner(
        &self,
        node: NodeId,
        frame: &DataPointFrame,
    ) -> Option<(ChannelId, Arc<LogicalChannel<T, P>>)> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry
            .lookup(node, frame.dp)
            .map(|(id, handle)| (id, Arc::clone(handle)))
    }
}
