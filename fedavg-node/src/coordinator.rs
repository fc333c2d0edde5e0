//! Round coordinator
//!
//! The coordinator is the only owner of the round counter and of the
//! trainable unit. It runs as a single worker task that consumes round
//! triggers one at a time, so two rounds can never overlap:
//!
//! ```text
//! Idle --start--> Training --> Uploading --> AwaitingAggregate
//!                    ^                              |
//!                    +------ aggregate (round < N) -+
//!                                                   |
//!                         aggregate (round == N) ---+--> Terminated
//! ```
//!
//! Any decode, training, encode or upload error moves the node to `Failed`
//! and stops the worker.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use fedavg_core::codec::ParameterCodec;
use fedavg_core::data::{DataPartition, Dataset};
use fedavg_core::identity::ClientIdentity;
use fedavg_core::ledger::{CostLedger, CostSnapshot};
use fedavg_core::params::ParameterSet;
use fedavg_core::traits::{Evaluation, FitOptions, FitSummary, TrainableUnit, UnitFactory};

use crate::endpoint::Uplink;
use crate::error::{NodeError, Result};
use crate::timing::{RoundTimer, TimingSummary};

/// Work handed from the endpoint to the round worker
#[derive(Debug, Clone, PartialEq)]
pub enum RoundTrigger {
    /// Begin round 0
    Start,
    /// Aggregated parameters from the aggregator, still encoded
    Aggregate(Vec<u8>),
}

/// Where the coordinator is in the protocol
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RoundPhase {
    /// Waiting for `start`
    Idle,
    /// Local training of `round` (zero-based)
    Training { round: u64 },
    /// Sending the parameters of `round` to the aggregator
    Uploading { round: u64 },
    /// `completed` rounds are done; `terminal` when the next aggregate is the final one
    AwaitingAggregate { completed: u64, terminal: bool },
    /// The final aggregate was evaluated
    Terminated,
    /// A round-fatal error stopped the node
    Failed { round: u64, reason: String },
}

impl RoundPhase {
    /// No further triggers will be processed
    pub fn is_finished(&self) -> bool {
        matches!(self, RoundPhase::Terminated | RoundPhase::Failed { .. })
    }
}

/// Observability record of one completed round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundRecord {
    /// Zero-based round
    pub round: u64,
    /// Local training metrics
    pub fit: FitSummary,
    /// Evaluation on the shared evaluation set after training
    pub evaluation: Evaluation,
    /// Size of the uploaded payload
    pub upload_bytes: usize,
}

/// Snapshot served by `GET /status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub client_index: usize,
    /// Completed rounds
    pub round: u64,
    pub total_rounds: u64,
    pub phase: RoundPhase,
    pub cost: CostSnapshot,
    pub rounds: Vec<RoundRecord>,
    /// Evaluation of the final global parameters, once terminated
    pub final_evaluation: Option<Evaluation>,
    /// Busy/idle totals, once terminated
    pub timing: Option<TimingSummary>,
}

impl NodeStatus {
    fn initial(identity: &ClientIdentity) -> Self {
        Self {
            client_index: identity.client_index(),
            round: 0,
            total_rounds: identity.total_rounds(),
            phase: RoundPhase::Idle,
            cost: CostSnapshot::default(),
            rounds: Vec::new(),
            final_evaluation: None,
            timing: None,
        }
    }
}

/// Returned by the worker once the protocol terminates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalReport {
    pub client_index: usize,
    pub rounds: Vec<RoundRecord>,
    pub evaluation: Evaluation,
    pub cost: CostSnapshot,
    pub timing: TimingSummary,
}

/// State shared between the endpoint and the worker
#[derive(Debug)]
pub(crate) struct NodeShared {
    pub(crate) identity: ClientIdentity,
    pub(crate) ledger: CostLedger,
    pub(crate) status: watch::Sender<NodeStatus>,
    pub(crate) started: AtomicBool,
}

impl NodeShared {
    pub(crate) fn new(identity: ClientIdentity) -> Self {
        let (status, _) = watch::channel(NodeStatus::initial(&identity));
        Self {
            identity,
            ledger: CostLedger::new(),
            status,
            started: AtomicBool::new(false),
        }
    }
}

type SharedUnit = Arc<Mutex<Box<dyn TrainableUnit>>>;

/// The per-client round state machine
pub struct RoundCoordinator {
    shared: Arc<NodeShared>,
    unit: SharedUnit,
    factory: Arc<dyn UnitFactory>,
    partition: Arc<DataPartition>,
    evaluation: Arc<Dataset>,
    codec: ParameterCodec,
    uplink: Uplink,
    verbose: bool,
    round: u64,
    phase: RoundPhase,
    rounds: Vec<RoundRecord>,
    timer: RoundTimer,
}

impl RoundCoordinator {
    pub(crate) fn new(
        shared: Arc<NodeShared>,
        factory: Arc<dyn UnitFactory>,
        partition: DataPartition,
        evaluation: Dataset,
        uplink: Uplink,
        verbose: bool,
    ) -> Self {
        let unit = factory.build();
        let codec = ParameterCodec::new().with_layout(unit.layout());
        Self {
            shared,
            unit: Arc::new(Mutex::new(unit)),
            factory,
            partition: Arc::new(partition),
            evaluation: Arc::new(evaluation),
            codec,
            uplink,
            verbose,
            round: 0,
            phase: RoundPhase::Idle,
            rounds: Vec::new(),
            timer: RoundTimer::new(),
        }
    }

    /// Completed rounds
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn phase(&self) -> &RoundPhase {
        &self.phase
    }

    fn client(&self) -> usize {
        self.shared.identity.client_index()
    }

    fn total_rounds(&self) -> u64 {
        self.shared.identity.total_rounds()
    }

    /// Consume triggers until the protocol terminates, fails, or every
    /// sender is dropped.
    pub async fn run(mut self, mut triggers: mpsc::Receiver<RoundTrigger>) -> Result<FinalReport> {
        while let Some(trigger) = triggers.recv().await {
            match self.handle(trigger).await {
                Ok(Some(report)) => return Ok(report),
                Ok(None) => {}
                Err(e) => {
                    error!(client = self.client(), round = e.round(), "{e}");
                    self.set_phase(RoundPhase::Failed {
                        round: self.round,
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
        debug!(client = self.client(), "trigger channel closed");
        Err(NodeError::WorkerStopped)
    }

    /// Process one trigger. Returns the final report once terminated.
    pub async fn handle(&mut self, trigger: RoundTrigger) -> Result<Option<FinalReport>> {
        match trigger {
            RoundTrigger::Start => {
                if self.phase != RoundPhase::Idle {
                    warn!(client = self.client(), phase = ?self.phase, "start ignored: node already started");
                    return Ok(None);
                }
                self.timer.start_training();
                self.begin_round(None).await?;
                Ok(None)
            }
            RoundTrigger::Aggregate(payload) => {
                if !matches!(self.phase, RoundPhase::AwaitingAggregate { .. }) {
                    warn!(
                        client = self.client(),
                        phase = ?self.phase,
                        bytes = payload.len(),
                        "aggregate ignored: not awaiting one"
                    );
                    return Ok(None);
                }
                let params = self.codec.decode(&payload).map_err(|source| NodeError::Decode {
                    client: self.client(),
                    round: self.round,
                    source,
                })?;
                if self.round == self.total_rounds() {
                    self.finish(params).await.map(Some)
                } else {
                    self.begin_round(Some(params)).await?;
                    Ok(None)
                }
            }
        }
    }

    /// Train, evaluate, upload, and advance the round counter.
    ///
    /// `incoming` must be present for every round after the first.
    pub async fn begin_round(&mut self, incoming: Option<ParameterSet>) -> Result<()> {
        let client = self.client();
        let round = self.round;
        let id = self.shared.identity;
        if round > 0 && incoming.is_none() {
            return Err(NodeError::Protocol {
                client,
                round,
                reason: "rounds after the first need aggregated parameters",
            });
        }

        self.timer.client_busy();
        self.set_phase(RoundPhase::Training { round });
        info!(
            client,
            round,
            "Round {}/{}, Client {}/{}, Dataset Size: {}",
            round + 1,
            id.total_rounds(),
            client + 1,
            id.total_clients(),
            self.partition.len()
        );

        let options = FitOptions {
            epochs: id.epochs_per_round(),
            batch_size: id.batch_size(),
            validation_split: id.validation_split(),
            verbose: self.verbose,
        };
        let unit = Arc::clone(&self.unit);
        let partition = Arc::clone(&self.partition);
        let evaluation = Arc::clone(&self.evaluation);
        let (fit, local, params) = tokio::task::spawn_blocking(move || {
            let mut unit = unit.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(params) = &incoming {
                unit.set_parameters(params)?;
            }
            let fit = unit.fit(partition.data(), &options)?;
            let local = unit.evaluate(&evaluation)?;
            let params = unit.parameters()?;
            Ok::<_, fedavg_core::Error>((fit, local, params))
        })
        .await
        .map_err(|e| NodeError::TrainingAborted {
            client,
            round,
            reason: e.to_string(),
        })?
        .map_err(|source| NodeError::Training {
            client,
            round,
            source,
        })?;
        info!(client, round, loss = local.loss, accuracy = local.accuracy, "local evaluation");

        self.set_phase(RoundPhase::Uploading { round });
        let payload = self.codec.encode(&params).map_err(|source| NodeError::Encode {
            client,
            round,
            source,
        })?;
        self.uplink
            .send_to_aggregator(&payload)
            .await
            .map_err(|source| NodeError::Transport {
                client,
                round,
                source,
            })?;
        let cost = self.shared.ledger.snapshot();
        info!(client, round, bytes = payload.len(), "uploaded parameters");
        info!(
            client,
            round,
            downloaded = cost.received,
            uploaded = cost.sent,
            "cumulative network cost"
        );

        self.round += 1;
        self.rounds.push(RoundRecord {
            round,
            fit,
            evaluation: local,
            upload_bytes: payload.len(),
        });
        self.timer.client_idle();
        let completed = self.round;
        let terminal = completed == self.total_rounds();
        self.shared.status.send_modify(|s| {
            s.round = completed;
            s.rounds = self.rounds.clone();
        });
        self.set_phase(RoundPhase::AwaitingAggregate { completed, terminal });
        info!(client, round, "round completed");
        Ok(())
    }

    /// Evaluate the final global parameters on a fresh unit and terminate
    async fn finish(&mut self, params: ParameterSet) -> Result<FinalReport> {
        let client = self.client();
        let round = self.round;
        self.timer.client_busy();

        let factory = Arc::clone(&self.factory);
        let evaluation = Arc::clone(&self.evaluation);
        let final_eval = tokio::task::spawn_blocking(move || {
            let mut unit = factory.build();
            unit.set_parameters(&params)?;
            unit.evaluate(&evaluation)
        })
        .await
        .map_err(|e| NodeError::TrainingAborted {
            client,
            round,
            reason: e.to_string(),
        })?
        .map_err(|source| NodeError::Training {
            client,
            round,
            source,
        })?;
        self.timer.finish();

        let report = FinalReport {
            client_index: client,
            rounds: self.rounds.clone(),
            evaluation: final_eval,
            cost: self.shared.ledger.snapshot(),
            timing: self.timer.summary(),
        };
        info!(
            client,
            loss = report.evaluation.loss,
            accuracy = report.evaluation.accuracy,
            "final evaluation"
        );
        info!(
            client,
            total_secs = report.timing.total_secs,
            busy_secs = report.timing.busy_secs,
            idle_secs = report.timing.idle_secs,
            downloaded = report.cost.received,
            uploaded = report.cost.sent,
            "timing summary"
        );
        self.shared.status.send_modify(|s| {
            s.final_evaluation = Some(report.evaluation);
            s.timing = Some(report.timing);
        });
        self.set_phase(RoundPhase::Terminated);
        info!(client, "Training finished");
        Ok(report)
    }

    fn set_phase(&mut self, phase: RoundPhase) {
        debug!(client = self.client(), ?phase, "phase change");
        self.phase = phase.clone();
        self.shared.status.send_modify(|s| s.phase = phase);
    }
}
