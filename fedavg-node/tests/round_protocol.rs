//! In-process protocol tests: a node driven directly through its endpoint,
//! uploading into a recording transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fedavg_core::codec::encode;
use fedavg_core::data::{partition, Dataset};
use fedavg_core::identity::ClientIdentity;
use fedavg_core::params::{LayerArray, ParameterSet};
use fedavg_core::traits::{Evaluation, FitOptions, FitSummary, TrainableUnit};
use fedavg_net::traits::AggregatorTransport;
use fedavg_net::RecordingTransport;
use fedavg_node::coordinator::{NodeStatus, RoundPhase};
use fedavg_node::endpoint::TransportEndpoint;
use fedavg_node::node::ClientNode;
use fedavg_node::{NodeError, Rejection};

/// Observations shared by every unit a node builds
#[derive(Default)]
struct Observed {
    active: AtomicUsize,
    max_active: AtomicUsize,
    fits: AtomicUsize,
    installed: Mutex<Vec<ParameterSet>>,
    fail_fit: AtomicBool,
    fit_delay: Mutex<Duration>,
}

/// Adds 1.0 to every parameter per fit; reports the parameter sum as loss
struct ScriptedUnit {
    observed: Arc<Observed>,
    params: ParameterSet,
}

fn layout() -> Vec<Vec<usize>> {
    vec![vec![2, 2], vec![2]]
}

fn params(value: f64) -> ParameterSet {
    ParameterSet::new(
        layout()
            .into_iter()
            .map(|shape| {
                let n = shape.iter().product();
                LayerArray::new(shape, vec![value; n]).unwrap()
            })
            .collect(),
    )
}

fn sum(params: &ParameterSet) -> f64 {
    params.iter().flat_map(|layer| layer.values()).sum()
}

impl TrainableUnit for ScriptedUnit {
    fn set_parameters(&mut self, params: &ParameterSet) -> fedavg_core::Result<()> {
        params.check_layout(&layout())?;
        self.observed.installed.lock().unwrap().push(params.clone());
        self.params = params.clone();
        Ok(())
    }

    fn fit(&mut self, _data: &Dataset, options: &FitOptions) -> fedavg_core::Result<FitSummary> {
        let now = self.observed.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.observed.max_active.fetch_max(now, Ordering::SeqCst);
        let delay = *self.observed.fit_delay.lock().unwrap();
        std::thread::sleep(delay);
        self.observed.active.fetch_sub(1, Ordering::SeqCst);

        if self.observed.fail_fit.load(Ordering::SeqCst) {
            return Err(fedavg_core::Error::InvalidData("scripted failure"));
        }
        let shifted = self
            .params
            .iter()
            .map(|layer| {
                let values = layer.values().iter().map(|v| v + 1.0).collect();
                LayerArray::new(layer.shape().to_vec(), values).unwrap()
            })
            .collect();
        self.params = ParameterSet::new(shifted);
        self.observed.fits.fetch_add(1, Ordering::SeqCst);
        Ok(FitSummary {
            samples: 4,
            epochs: Vec::with_capacity(options.epochs),
        })
    }

    fn evaluate(&self, _data: &Dataset) -> fedavg_core::Result<Evaluation> {
        Ok(Evaluation {
            loss: sum(&self.params),
            accuracy: 0.5,
        })
    }

    fn parameters(&self) -> fedavg_core::Result<ParameterSet> {
        Ok(self.params.clone())
    }

    fn layout(&self) -> Vec<Vec<usize>> {
        layout()
    }
}

struct Harness {
    node: ClientNode,
    endpoint: TransportEndpoint,
    observed: Arc<Observed>,
    transport: Arc<RecordingTransport>,
}

fn harness(total_rounds: u64) -> Harness {
    let identity = ClientIdentity::builder()
        .total_rounds(total_rounds)
        .epochs_per_round(1)
        .batch_size(2)
        .build()
        .unwrap();
    let corpus = Dataset::new(1, vec![0.0, 1.0, 2.0, 3.0], vec![0, 1, 0, 1]).unwrap();
    let evaluation = Dataset::new(1, vec![0.5], vec![1]).unwrap();

    let observed = Arc::new(Observed::default());
    let transport = Arc::new(RecordingTransport::new());
    let factory_observed = Arc::clone(&observed);
    let node = ClientNode::builder()
        .identity(identity)
        .unit_factory(move || -> Box<dyn TrainableUnit> {
            Box::new(ScriptedUnit {
                observed: Arc::clone(&factory_observed),
                params: params(0.0),
            })
        })
        .partition(partition(&corpus, 1, 0).unwrap())
        .evaluation(evaluation)
        .transport(transport.clone())
        .spawn()
        .unwrap();
    let endpoint = node.endpoint().clone();

    Harness {
        node,
        endpoint,
        observed,
        transport,
    }
}

async fn wait_status<F>(endpoint: &TransportEndpoint, mut pred: F) -> NodeStatus
where
    F: FnMut(&NodeStatus) -> bool,
{
    let mut rx = endpoint.subscribe();
    let status = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| pred(s)))
        .await
        .expect("status did not change in time")
        .expect("status channel closed")
        .clone();
    status
}

async fn wait_completed(endpoint: &TransportEndpoint, rounds: u64) -> NodeStatus {
    wait_status(endpoint, |s| {
        matches!(s.phase, RoundPhase::AwaitingAggregate { completed, .. } if completed == rounds)
    })
    .await
}

fn sent_total(transport: &RecordingTransport) -> u64 {
    transport.sent().iter().map(|p| p.len() as u64).sum()
}

#[tokio::test]
async fn two_round_scenario() {
    let h = harness(2);

    h.endpoint.on_start().unwrap();
    let status = wait_completed(&h.endpoint, 1).await;
    assert_eq!(status.round, 1);
    assert_eq!(status.phase, RoundPhase::AwaitingAggregate { completed: 1, terminal: false });
    assert_eq!(h.transport.sent_count(), 1);
    assert_eq!(h.endpoint.cost().sent, sent_total(&h.transport));

    let params_a = params(10.0);
    let payload_a = encode(&params_a).unwrap();
    h.endpoint.on_receive_aggregate(payload_a.clone()).unwrap();
    let status = wait_completed(&h.endpoint, 2).await;
    assert_eq!(status.phase, RoundPhase::AwaitingAggregate { completed: 2, terminal: true });
    assert_eq!(h.observed.fits.load(Ordering::SeqCst), 2);
    assert_eq!(h.observed.installed.lock().unwrap()[0], params_a);
    assert_eq!(h.transport.sent_count(), 2);
    assert_eq!(status.rounds.len(), 2);
    // Round 1 trained on top of params_a: every value moved from 10 to 11.
    assert_eq!(status.rounds[1].evaluation.loss, 6.0 * 11.0);

    let final_params = params(3.0);
    let final_payload = encode(&final_params).unwrap();
    h.endpoint.on_receive_aggregate(final_payload.clone()).unwrap();

    let endpoint = h.endpoint.clone();
    let report = h.node.wait().await.unwrap();
    assert_eq!(report.evaluation.loss, 6.0 * 3.0);
    assert_eq!(report.rounds.len(), 2);
    assert_eq!(h.observed.fits.load(Ordering::SeqCst), 2);
    assert_eq!(h.transport.sent_count(), 2);
    assert_eq!(h.observed.installed.lock().unwrap().last(), Some(&final_params));

    let status = endpoint.status();
    assert_eq!(status.phase, RoundPhase::Terminated);
    assert_eq!(status.round, 2);
    assert_eq!(status.final_evaluation, Some(report.evaluation));
    assert!(status.timing.is_some());
    assert_eq!(
        status.cost.received,
        (payload_a.len() + final_payload.len()) as u64
    );
    assert_eq!(status.cost.sent, sent_total(&h.transport));
}

#[tokio::test]
async fn exactly_n_uploads_for_n_rounds() {
    let h = harness(4);

    h.endpoint.on_start().unwrap();
    for completed in 1..=4 {
        wait_completed(&h.endpoint, completed).await;
        assert_eq!(h.transport.sent_count() as u64, completed);
        // Echo the last upload back as the aggregate.
        let echoed = h.transport.sent().pop().unwrap();
        h.endpoint.on_receive_aggregate(echoed).unwrap();
    }

    let report = h.node.wait().await.unwrap();
    assert_eq!(h.transport.sent_count(), 4);
    assert_eq!(h.observed.fits.load(Ordering::SeqCst), 4);
    let rounds: Vec<u64> = report.rounds.iter().map(|r| r.round).collect();
    assert_eq!(rounds, vec![0, 1, 2, 3]);
    assert_eq!(report.cost.sent, sent_total(&h.transport));
}

#[tokio::test]
async fn queued_aggregate_runs_after_current_round() {
    let h = harness(3);
    *h.observed.fit_delay.lock().unwrap() = Duration::from_millis(300);

    h.endpoint.on_start().unwrap();
    wait_completed(&h.endpoint, 1).await;

    h.endpoint.on_receive_aggregate(encode(&params(1.0)).unwrap()).unwrap();
    wait_status(&h.endpoint, |s| s.phase == RoundPhase::Training { round: 1 }).await;

    // One trigger may wait behind the running round; a second is turned away.
    h.endpoint.on_receive_aggregate(encode(&params(2.0)).unwrap()).unwrap();
    assert_eq!(
        h.endpoint.on_receive_aggregate(encode(&params(9.0)).unwrap()),
        Err(Rejection::Busy)
    );

    let status = wait_completed(&h.endpoint, 3).await;
    assert_eq!(h.observed.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(h.observed.fits.load(Ordering::SeqCst), 3);
    assert_eq!(h.transport.sent_count(), 3);
    let installed = h.observed.installed.lock().unwrap().clone();
    assert_eq!(installed, vec![params(1.0), params(2.0)]);
    assert_eq!(status.rounds[2].evaluation.loss, 6.0 * 3.0);
}

#[tokio::test]
async fn duplicate_start_is_rejected() {
    let h = harness(2);

    assert_eq!(h.endpoint.on_start(), Ok(()));
    assert_eq!(h.endpoint.on_start(), Err(Rejection::AlreadyStarted));
    wait_completed(&h.endpoint, 1).await;
    assert_eq!(h.endpoint.on_start(), Err(Rejection::AlreadyStarted));

    assert_eq!(h.transport.sent_count(), 1);
    assert_eq!(h.observed.fits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn aggregate_before_start_is_ignored() {
    let h = harness(1);
    let early = encode(&params(5.0)).unwrap();
    let early_len = early.len() as u64;

    h.endpoint.on_receive_aggregate(early).unwrap();
    // The worker may still hold the ignored aggregate in its queue slot.
    let accepted = loop {
        match h.endpoint.on_start() {
            Err(Rejection::Busy) => tokio::time::sleep(Duration::from_millis(10)).await,
            other => break other,
        }
    };
    assert_eq!(accepted, Ok(()));

    let status = wait_completed(&h.endpoint, 1).await;
    assert!(h.observed.installed.lock().unwrap().is_empty());
    assert_eq!(h.observed.fits.load(Ordering::SeqCst), 1);
    // Training started from the initial parameters, not the early aggregate.
    assert_eq!(status.rounds[0].evaluation.loss, 6.0);
    assert_eq!(h.endpoint.cost().received, early_len);
}

#[tokio::test]
async fn malformed_aggregate_fails_the_round() {
    let h = harness(2);

    h.endpoint.on_start().unwrap();
    wait_completed(&h.endpoint, 1).await;
    h.endpoint.on_receive_aggregate(vec![0xff; 5]).unwrap();

    let endpoint = h.endpoint.clone();
    let err = h.node.wait().await.unwrap_err();
    assert!(
        matches!(err, NodeError::Decode { client: 0, round: 1, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(err.round(), Some(1));

    let status = endpoint.status();
    assert!(matches!(status.phase, RoundPhase::Failed { round: 1, .. }));
    assert_eq!(status.cost.received, 5);
    assert_eq!(h.observed.fits.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.sent_count(), 1);
}

#[tokio::test]
async fn failed_upload_is_fatal_and_not_counted() {
    let h = harness(2);
    h.transport.set_failing(true);

    h.endpoint.on_start().unwrap();
    let endpoint = h.endpoint.clone();
    let err = h.node.wait().await.unwrap_err();
    assert!(matches!(err, NodeError::Transport { client: 0, round: 0, .. }));

    assert_eq!(endpoint.cost().sent, 0);
    assert_eq!(h.observed.fits.load(Ordering::SeqCst), 1);
    assert!(matches!(endpoint.status().phase, RoundPhase::Failed { round: 0, .. }));
}

#[tokio::test]
async fn training_failure_is_fatal() {
    let h = harness(2);
    h.observed.fail_fit.store(true, Ordering::SeqCst);

    h.endpoint.on_start().unwrap();
    let err = h.node.wait().await.unwrap_err();
    assert!(matches!(
        err,
        NodeError::Training {
            client: 0,
            round: 0,
            source: fedavg_core::Error::InvalidData(_),
        }
    ));
    assert_eq!(h.transport.sent_count(), 0);
}

#[tokio::test]
async fn terminated_node_rejects_further_triggers() {
    let h = harness(1);

    h.endpoint.on_start().unwrap();
    wait_completed(&h.endpoint, 1).await;
    h.endpoint.on_receive_aggregate(encode(&params(1.0)).unwrap()).unwrap();

    let endpoint = h.endpoint.clone();
    h.node.wait().await.unwrap();
    let received = endpoint.cost().received;

    assert_eq!(endpoint.on_receive_aggregate(vec![1, 2, 3]), Err(Rejection::Stopped));
    assert_eq!(endpoint.cost().received, received + 3);
    assert_eq!(h.transport.sent_count(), 1);
    assert_eq!(h.observed.fits.load(Ordering::SeqCst), 1);
}

/// Accepts nothing; the worker task dies inside `send`
struct PanickingTransport;

#[async_trait::async_trait]
impl AggregatorTransport for PanickingTransport {
    async fn send(&self, _payload: &[u8]) -> fedavg_net::Result<()> {
        panic!("aggregator link torn down");
    }

    fn destination(&self) -> String {
        "nowhere".into()
    }
}

#[tokio::test]
async fn worker_panic_surfaces_as_aborted_training() {
    let identity = ClientIdentity::builder()
        .total_rounds(2)
        .batch_size(2)
        .build()
        .unwrap();
    let corpus = Dataset::new(1, vec![0.0, 1.0, 2.0, 3.0], vec![0, 1, 0, 1]).unwrap();
    let observed = Arc::new(Observed::default());
    let node = ClientNode::builder()
        .identity(identity)
        .unit_factory(move || -> Box<dyn TrainableUnit> {
            Box::new(ScriptedUnit {
                observed: Arc::clone(&observed),
                params: params(0.0),
            })
        })
        .partition(partition(&corpus, 1, 0).unwrap())
        .evaluation(Dataset::new(1, vec![0.5], vec![1]).unwrap())
        .transport(Arc::new(PanickingTransport))
        .spawn()
        .unwrap();

    node.endpoint().on_start().unwrap();
    let err = tokio::time::timeout(Duration::from_secs(10), node.wait())
        .await
        .unwrap()
        .unwrap_err();
    match err {
        NodeError::TrainingAborted {
            client: 0,
            round: 0,
            reason,
        } => assert!(reason.contains("panicked"), "reason: {reason}"),
        other => panic!("unexpected error: {other}"),
    }
}
