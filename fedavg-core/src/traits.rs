//! Core traits for FedAvg clients
//!
//! The statistical model is opaque to the round protocol. It is reached only
//! through [`TrainableUnit`], and fresh instances are produced by a
//! [`UnitFactory`].

use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::params::ParameterSet;
use crate::Result;

/// Local training settings for one round
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// Passes over the local partition
    pub epochs: usize,
    /// Samples per gradient step
    pub batch_size: usize,
    /// Trailing fraction of the partition held out for validation
    pub validation_split: f32,
    /// Log per-epoch progress
    pub verbose: bool,
}

/// Metrics after one local epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// Zero-based epoch
    pub epoch: usize,
    /// Mean training loss
    pub loss: f64,
    /// Training accuracy
    pub accuracy: f64,
    /// Validation loss, when a split was held out
    pub val_loss: Option<f64>,
    /// Validation accuracy, when a split was held out
    pub val_accuracy: Option<f64>,
}

/// Outcome of a call to [`TrainableUnit::fit`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    /// Samples trained on (after the validation hold-out)
    pub samples: usize,
    /// Per-epoch metrics, in order
    pub epochs: Vec<EpochStats>,
}

impl FitSummary {
    /// Metrics of the final epoch
    pub fn last(&self) -> Option<&EpochStats> {
        self.epochs.last()
    }
}

/// Loss and accuracy on a dataset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Mean loss
    pub loss: f64,
    /// Fraction of correct predictions
    pub accuracy: f64,
}

/// A model that can participate in federated averaging
pub trait TrainableUnit: Send {
    /// Overwrite all trainable parameters
    fn set_parameters(&mut self, params: &ParameterSet) -> Result<()>;

    /// Train on `data` according to `options`
    fn fit(&mut self, data: &Dataset, options: &FitOptions) -> Result<FitSummary>;

    /// Evaluate without changing parameters
    fn evaluate(&self, data: &Dataset) -> Result<Evaluation>;

    /// Current parameters, normalized to f64
    fn parameters(&self) -> Result<ParameterSet>;

    /// Layer shapes of the architecture
    fn layout(&self) -> Vec<Vec<usize>>;
}

impl<U: TrainableUnit + ?Sized> TrainableUnit for Box<U> {
    fn set_parameters(&mut self, params: &ParameterSet) -> Result<()> {
        (**self).set_parameters(params)
    }

    fn fit(&mut self, data: &Dataset, options: &FitOptions) -> Result<FitSummary> {
        (**self).fit(data, options)
    }

    fn evaluate(&self, data: &Dataset) -> Result<Evaluation> {
        (**self).evaluate(data)
    }

    fn parameters(&self) -> Result<ParameterSet> {
        (**self).parameters()
    }

    fn layout(&self) -> Vec<Vec<usize>> {
        (**self).layout()
    }
}

/// Builds fresh, freshly initialized units of one architecture
pub trait UnitFactory: Send + Sync {
    /// Create a new unit
    fn build(&self) -> Box<dyn TrainableUnit>;
}

impl<F> UnitFactory for F
where
    F: Fn() -> Box<dyn TrainableUnit> + Send + Sync,
{
    fn build(&self) -> Box<dyn TrainableUnit> {
        self()
    }
}
