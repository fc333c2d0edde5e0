//! Transport endpoint
//!
//! Inbound operations only enqueue work for the round worker and return at
//! once; they never wait for training. The outbound [`Uplink`] is what the
//! coordinator uses to reach the aggregator.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, warn};

use fedavg_core::identity::ClientIdentity;
use fedavg_core::ledger::CostSnapshot;
use fedavg_net::traits::AggregatorTransport;

use crate::coordinator::{NodeShared, NodeStatus, RoundTrigger};
use crate::error::Rejection;

/// Inbound side of a client node. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TransportEndpoint {
    shared: Arc<NodeShared>,
    triggers: mpsc::Sender<RoundTrigger>,
}

impl TransportEndpoint {
    pub(crate) fn new(shared: Arc<NodeShared>, triggers: mpsc::Sender<RoundTrigger>) -> Self {
        Self { shared, triggers }
    }

    /// Schedule round 0. Accepted at most once per process.
    pub fn on_start(&self) -> Result<(), Rejection> {
        let client = self.shared.identity.client_index();
        if self
            .shared
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(client, "duplicate start rejected");
            return Err(Rejection::AlreadyStarted);
        }
        self.enqueue(RoundTrigger::Start).map_err(|rejection| {
            self.shared.started.store(false, Ordering::Release);
            rejection
        })?;
        debug!(client, "start accepted");
        Ok(())
    }

    /// Account for and schedule an aggregate payload.
    ///
    /// The payload counts toward received bytes even if it is rejected here
    /// or fails to decode later.
    pub fn on_receive_aggregate(&self, payload: Vec<u8>) -> Result<(), Rejection> {
        let client = self.shared.identity.client_index();
        let bytes = payload.len();
        let total = self.shared.ledger.record_received(bytes);
        debug!(client, bytes, total, "aggregate received");
        self.enqueue(RoundTrigger::Aggregate(payload)).map_err(|rejection| {
            warn!(client, bytes, %rejection, "aggregate rejected");
            rejection
        })
    }

    /// Account for an aggregate body that was read but not kept, returning
    /// the `rejection` to report.
    pub fn on_discarded_aggregate(&self, bytes: usize, rejection: Rejection) -> Rejection {
        let client = self.shared.identity.client_index();
        let total = self.shared.ledger.record_received(bytes);
        warn!(client, bytes, total, %rejection, "aggregate discarded");
        rejection
    }

    fn enqueue(&self, trigger: RoundTrigger) -> Result<(), Rejection> {
        self.triggers.try_send(trigger).map_err(|e| match e {
            TrySendError::Full(_) => Rejection::Busy,
            TrySendError::Closed(_) => Rejection::Stopped,
        })
    }

    /// Current status, with live cost counters
    pub fn status(&self) -> NodeStatus {
        let mut status = self.shared.status.borrow().clone();
        status.cost = self.shared.ledger.snapshot();
        status
    }

    /// Cumulative bytes sent and received
    pub fn cost(&self) -> CostSnapshot {
        self.shared.ledger.snapshot()
    }

    /// Watch status changes. Cost counters in the watched value are not live;
    /// use [`cost`](Self::cost).
    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.shared.status.subscribe()
    }

    pub fn identity(&self) -> ClientIdentity {
        self.shared.identity
    }
}

/// Outbound side: delivers payloads to the aggregator and accounts for them
#[derive(Clone)]
pub struct Uplink {
    transport: Arc<dyn AggregatorTransport>,
    shared: Arc<NodeShared>,
}

impl Uplink {
    pub(crate) fn new(transport: Arc<dyn AggregatorTransport>, shared: Arc<NodeShared>) -> Self {
        Self { transport, shared }
    }

    /// Send `payload`, then add its length to sent bytes.
    ///
    /// Nothing is recorded when the send fails. Returns the new sent total.
    pub async fn send_to_aggregator(&self, payload: &[u8]) -> fedavg_net::Result<u64> {
        self.transport.send(payload).await?;
        let total = self.shared.ledger.record_sent(payload.len());
        debug!(
            client = self.shared.identity.client_index(),
            destination = %self.transport.destination(),
            bytes = payload.len(),
            total,
            "payload delivered"
        );
        Ok(total)
    }
}

impl std::fmt::Debug for Uplink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uplink")
            .field("destination", &self.transport.destination())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedavg_net::RecordingTransport;

    fn shared() -> Arc<NodeShared> {
        let identity = ClientIdentity::builder().total_rounds(2).build().unwrap();
        Arc::new(NodeShared::new(identity))
    }

    #[test]
    fn test_start_is_accepted_once() {
        let (tx, mut rx) = mpsc::channel(1);
        let endpoint = TransportEndpoint::new(shared(), tx);

        assert_eq!(endpoint.on_start(), Ok(()));
        assert_eq!(endpoint.on_start(), Err(Rejection::AlreadyStarted));
        assert_eq!(rx.try_recv().unwrap(), RoundTrigger::Start);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_received_bytes_counted_even_when_rejected() {
        let (tx, _rx) = mpsc::channel(1);
        let endpoint = TransportEndpoint::new(shared(), tx);

        assert_eq!(endpoint.on_receive_aggregate(vec![0; 10]), Ok(()));
        assert_eq!(endpoint.on_receive_aggregate(vec![0; 7]), Err(Rejection::Busy));
        assert_eq!(endpoint.cost().received, 17);
        assert_eq!(endpoint.cost().sent, 0);
    }

    #[test]
    fn test_discarded_bytes_still_counted() {
        let (tx, mut rx) = mpsc::channel(1);
        let endpoint = TransportEndpoint::new(shared(), tx);

        let rejection = Rejection::TooLarge { limit: 16 };
        assert_eq!(endpoint.on_discarded_aggregate(64, rejection), rejection);
        assert_eq!(endpoint.cost().received, 64);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_worker_rejects_and_rearms_start() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let endpoint = TransportEndpoint::new(shared(), tx);

        assert_eq!(endpoint.on_start(), Err(Rejection::Stopped));
        assert_eq!(endpoint.on_start(), Err(Rejection::Stopped));
        assert_eq!(endpoint.on_receive_aggregate(vec![1]), Err(Rejection::Stopped));
    }

    #[tokio::test]
    async fn test_uplink_records_only_delivered_bytes() {
        let shared = shared();
        let transport = Arc::new(RecordingTransport::new());
        let uplink = Uplink::new(transport.clone(), Arc::clone(&shared));

        assert_eq!(uplink.send_to_aggregator(&[1, 2, 3]).await.unwrap(), 3);
        transport.set_failing(true);
        assert!(uplink.send_to_aggregator(&[4, 5]).await.is_err());
        assert_eq!(shared.ledger.snapshot().sent, 3);
        assert_eq!(transport.sent(), vec![vec![1, 2, 3]]);
    }
}
