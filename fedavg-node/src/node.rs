//! Client node assembly
//!
//! Wires a [`RoundCoordinator`] worker to a [`TransportEndpoint`] through a
//! trigger queue of depth 1.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use fedavg_core::data::{DataPartition, Dataset};
use fedavg_core::identity::ClientIdentity;
use fedavg_core::traits::UnitFactory;
use fedavg_net::traits::AggregatorTransport;

use crate::coordinator::{FinalReport, NodeShared, RoundCoordinator};
use crate::endpoint::{TransportEndpoint, Uplink};
use crate::error::{NodeError, Result};

/// Triggers that may wait behind the round in flight
pub const TRIGGER_QUEUE_DEPTH: usize = 1;

/// Builder for [`ClientNode`]
#[derive(Default)]
pub struct NodeBuilder {
    identity: Option<ClientIdentity>,
    verbose: bool,
    factory: Option<Arc<dyn UnitFactory>>,
    partition: Option<DataPartition>,
    evaluation: Option<Dataset>,
    transport: Option<Arc<dyn AggregatorTransport>>,
}

impl NodeBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Log per-epoch progress during local training
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Source of trainable units; one is built for training, and a fresh one
    /// for the final evaluation
    pub fn unit_factory(mut self, factory: impl UnitFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// This client's private training data
    pub fn partition(mut self, partition: DataPartition) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Evaluation set shared by all clients
    pub fn evaluation(mut self, evaluation: Dataset) -> Self {
        self.evaluation = Some(evaluation);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn AggregatorTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate and spawn the round worker on the current tokio runtime
    pub fn spawn(self) -> Result<ClientNode> {
        let identity = self.identity.ok_or_else(|| missing("identity"))?;
        let factory = self.factory.ok_or_else(|| missing("unit factory"))?;
        let partition = self.partition.ok_or_else(|| missing("partition"))?;
        let evaluation = self.evaluation.ok_or_else(|| missing("evaluation set"))?;
        let transport = self.transport.ok_or_else(|| missing("transport"))?;

        if partition.client_index() != identity.client_index() {
            return Err(NodeError::Config(format!(
                "partition belongs to client {}, node is client {}",
                partition.client_index(),
                identity.client_index()
            )));
        }
        if partition.is_empty() {
            return Err(NodeError::Config("training partition is empty".into()));
        }
        if evaluation.is_empty() {
            return Err(NodeError::Config("evaluation set is empty".into()));
        }

        let shared = Arc::new(NodeShared::new(identity));
        let (tx, rx) = mpsc::channel(TRIGGER_QUEUE_DEPTH);
        let uplink = Uplink::new(transport, Arc::clone(&shared));
        let coordinator =
            RoundCoordinator::new(Arc::clone(&shared), factory, partition, evaluation, uplink, self.verbose);
        let worker = tokio::spawn(coordinator.run(rx));

        Ok(ClientNode {
            endpoint: TransportEndpoint::new(shared, tx),
            worker,
        })
    }
}

fn missing(what: &str) -> NodeError {
    NodeError::Config(format!("node builder: {what} not set"))
}

/// A running client: its endpoint and its round worker
#[derive(Debug)]
pub struct ClientNode {
    endpoint: TransportEndpoint,
    worker: JoinHandle<Result<FinalReport>>,
}

impl ClientNode {
    /// Create a new builder
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    pub fn endpoint(&self) -> &TransportEndpoint {
        &self.endpoint
    }

    /// Wait for the protocol to terminate or fail.
    ///
    /// Keep a clone of the endpoint serving requests; once every clone is
    /// dropped the worker stops with [`NodeError::WorkerStopped`]. A worker
    /// that panics surfaces as [`NodeError::TrainingAborted`].
    pub async fn wait(self) -> Result<FinalReport> {
        let Self { endpoint, worker } = self;
        let client = endpoint.identity().client_index();
        let status = endpoint.subscribe();
        drop(endpoint);
        worker.await.map_err(|e| NodeError::TrainingAborted {
            client,
            round: status.borrow().round,
            reason: e.to_string(),
        })?
    }
}
