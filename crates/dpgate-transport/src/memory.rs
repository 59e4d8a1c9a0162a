//! In-process transport.
//!
//! [`MemoryTransport`] stands in for the mesh stack. Every write is
//! recorded with the (tokio) instant it started, so tests running on a
//! paused clock can assert exact spacing. Outcomes are scripted per
//! `(node, dp)`; anything unscripted falls back to a default outcome.
//!
//! With [`MemoryTransport::with_device`] the transport also behaves like
//! a cooperative device: acknowledged writes are stored and echoed back
//! as `response` events, and read requests are answered with the stored
//! value.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dpgate_protocol::{DataPointFrame, DpId, NodeId};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::{DpTransport, NodeEvent, TransportError};

/// How a scripted write completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The device acknowledges.
    Ack,
    /// The write is rejected with this reason.
    Fail(String),
    /// The write never completes.
    Hang,
    /// The node is unreachable.
    Unavailable,
}

/// One write as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub node: NodeId,
    pub frame: DataPointFrame,
    /// When the write was issued.
    pub at: Instant,
}

type Key = (NodeId, DpId);

#[derive(Default)]
struct Inner {
    writes: Vec<RecordedWrite>,
    script: HashMap<Key, VecDeque<WriteOutcome>>,
    default_outcome: Option<WriteOutcome>,
    unreachable: HashSet<NodeId>,
    latency: Duration,
    device: bool,
    device_state: HashMap<Key, DataPointFrame>,
    in_flight: HashMap<Key, usize>,
    max_in_flight: HashMap<Key, usize>,
    shut_down: bool,
}

impl Inner {
    fn next_outcome(&mut self, node: NodeId, dp: DpId) -> WriteOutcome {
        if self.unreachable.contains(&node) {
            return WriteOutcome::Unavailable;
        }
        self.script
            .get_mut(&(node, dp))
            .and_then(VecDeque::pop_front)
            .or_else(|| self.default_outcome.clone())
            .unwrap_or(WriteOutcome::Ack)
    }
}

/// A scriptable, recording [`DpTransport`].
pub struct MemoryTransport {
    inner: Mutex<Inner>,
    events: Mutex<Option<mpsc::UnboundedSender<NodeEvent>>>,
}

impl MemoryTransport {
    /// Creates a transport that acknowledges every write, plus the
    /// receiving end of its event stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NodeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            inner: Mutex::new(Inner::default()),
            events: Mutex::new(Some(tx)),
        };
        (transport, rx)
    }

    /// Like [`new`](Self::new), with device simulation turned on.
    pub fn with_device() -> (Self, mpsc::UnboundedReceiver<NodeEvent>) {
        let (transport, rx) = Self::new();
        transport.lock().device = true;
        (transport, rx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Scripting
    // -----------------------------------------------------------------------

    /// Queues outcomes for the next writes to `(node, dp)`, in order.
    pub fn script(&self, node: NodeId, dp: DpId, outcomes: impl IntoIterator<Item = WriteOutcome>) {
        self.lock()
            .script
            .entry((node, dp))
            .or_default()
            .extend(outcomes);
    }

    /// Sets the outcome for writes with nothing scripted.
    pub fn set_default_outcome(&self, outcome: WriteOutcome) {
        self.lock().default_outcome = Some(outcome);
    }

    /// Marks `node` reachable or not. Writes to an unreachable node fail
    /// with [`TransportError::Unavailable`] regardless of the script.
    pub fn set_reachable(&self, node: NodeId, reachable: bool) {
        let mut inner = self.lock();
        if reachable {
            inner.unreachable.remove(&node);
        } else {
            inner.unreachable.insert(node);
        }
    }

    /// Delay before every write completes.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Seeds the simulated device state for `node`.
    pub fn set_device_state(&self, node: NodeId, frame: DataPointFrame) {
        self.lock().device_state.insert((node, frame.dp), frame);
    }

    /// Pushes an inbound event, as if the node had sent it.
    pub fn inject(&self, event: NodeEvent) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = events.as_ref() {
            if tx.send(event).is_err() {
                tracing::debug!("event receiver dropped");
            }
        }
    }

    /// Stops the transport. Later writes fail with
    /// [`TransportError::Shutdown`] and the event stream ends.
    pub fn shutdown(&self) {
        self.lock().shut_down = true;
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::info!("memory transport shut down");
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Every write issued so far, oldest first.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    /// Writes to `(node, dp)`, oldest first.
    pub fn writes_to(&self, node: NodeId, dp: DpId) -> Vec<RecordedWrite> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.node == node && w.frame.dp == dp)
            .cloned()
            .collect()
    }

    /// Read requests issued to `node`, oldest first.
    pub fn read_requests(&self, node: NodeId) -> Vec<RecordedWrite> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.node == node && w.frame.is_read_request())
            .cloned()
            .collect()
    }

    /// The most writes to `(node, dp)` that were ever in flight at once.
    pub fn max_in_flight(&self, node: NodeId, dp: DpId) -> usize {
        self.lock()
            .max_in_flight
            .get(&(node, dp))
            .copied()
            .unwrap_or(0)
    }

    /// Forgets recorded writes and in-flight peaks.
    pub fn clear_writes(&self) {
        let mut inner = self.lock();
        inner.writes.clear();
        inner.max_in_flight.clear();
    }

    // -----------------------------------------------------------------------
    // Device simulation
    // -----------------------------------------------------------------------

    fn on_ack(&self, node: NodeId, frame: &DataPointFrame) {
        let reply = {
            let mut inner = self.lock();
            if !inner.device {
                return;
            }
            if frame.is_read_request() {
                inner.device_state.get(&(node, frame.dp)).cloned()
            } else {
                inner.device_state.insert((node, frame.dp), frame.clone());
                Some(frame.clone())
            }
        };
        if let Some(reply) = reply {
            tracing::trace!(%node, dp = %reply.dp, "device responds");
            self.inject(NodeEvent::response(node, reply));
        }
    }
}

/// Decrements the in-flight count when a write finishes or is dropped
/// by a caller's timeout.
struct InFlight<'a> {
    transport: &'a MemoryTransport,
    key: Key,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(n) = self.transport.lock().in_flight.get_mut(&self.key) {
            *n = n.saturating_sub(1);
        }
    }
}

impl DpTransport for MemoryTransport {
    async fn write_datapoint(
        &self,
        node: NodeId,
        frame: &DataPointFrame,
    ) -> Result<(), TransportError> {
        let key = (node, frame.dp);
        let (outcome, latency) = {
            let mut inner = self.lock();
            if inner.shut_down {
                return Err(TransportError::Shutdown);
            }
            inner.writes.push(RecordedWrite {
                node,
                frame: frame.clone(),
                at: Instant::now(),
            });
            let current = {
                let n = inner.in_flight.entry(key).or_default();
                *n += 1;
                *n
            };
            let peak = inner.max_in_flight.entry(key).or_default();
            *peak = (*peak).max(current);
            (inner.next_outcome(node, frame.dp), inner.latency)
        };
        let _in_flight = InFlight {
            transport: self,
            key,
        };
        tracing::trace!(%node, dp = %frame.dp, ?outcome, "memory write");

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match outcome {
            WriteOutcome::Ack => {
                self.on_ack(node, frame);
                Ok(())
            }
            WriteOutcome::Fail(reason) => Err(TransportError::WriteFailed(reason)),
            WriteOutcome::Hang => std::future::pending().await,
            WriteOutcome::Unavailable => Err(TransportError::Unavailable(node)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpgate_protocol::Datatype;

    fn on(dp: u8) -> DataPointFrame {
        DataPointFrame::new(DpId(dp), Datatype::Bool, vec![1])
    }

    #[tokio::test]
    async fn test_write_default_acks_and_records() {
        let (transport, _rx) = MemoryTransport::new();
        transport.write_datapoint(NodeId(1), &on(1)).await.unwrap();
        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].frame, on(1));
    }

    #[tokio::test]
    async fn test_write_script_is_consumed_in_order() {
        let (transport, _rx) = MemoryTransport::new();
        transport.script(
            NodeId(1),
            DpId(1),
            [WriteOutcome::Fail("busy".into()), WriteOutcome::Ack],
        );
        let first = transport.write_datapoint(NodeId(1), &on(1)).await;
        let second = transport.write_datapoint(NodeId(1), &on(1)).await;
        assert_eq!(first, Err(TransportError::WriteFailed("busy".into())));
        assert_eq!(second, Ok(()));
    }

    #[tokio::test]
    async fn test_write_unreachable_node_is_unavailable() {
        let (transport, _rx) = MemoryTransport::new();
        transport.set_reachable(NodeId(9), false);
        let err = transport.write_datapoint(NodeId(9), &on(1)).await.unwrap_err();
        assert_eq!(err, TransportError::Unavailable(NodeId(9)));
    }

    #[tokio::test]
    async fn test_device_echoes_writes_as_responses() {
        let (transport, mut rx) = MemoryTransport::with_device();
        transport.write_datapoint(NodeId(1), &on(2)).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event, NodeEvent::response(NodeId(1), on(2)));
    }

    #[tokio::test]
    async fn test_device_answers_read_request_with_stored_state() {
        let (transport, mut rx) = MemoryTransport::with_device();
        transport.set_device_state(NodeId(1), on(3));
        transport
            .write_datapoint(NodeId(1), &DataPointFrame::read_request(DpId(3)))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), NodeEvent::response(NodeId(1), on(3)));
        assert_eq!(transport.read_requests(NodeId(1)).len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_fails_writes_and_ends_stream() {
        let (transport, mut rx) = MemoryTransport::new();
        transport.shutdown();
        let err = transport.write_datapoint(NodeId(1), &on(1)).await.unwrap_err();
        assert_eq!(err, TransportError::Shutdown);
        assert!(rx.recv().await.is_none());
    }
}
