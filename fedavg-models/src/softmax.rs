//! Softmax regression
//!
//! A single dense layer followed by softmax, trained with cross-entropy and
//! plain mini-batch SGD. Parameters are kept in f32 and widened to f64 only
//! when exported.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use fedavg_core::data::Dataset;
use fedavg_core::params::{LayerArray, ParameterSet};
use fedavg_core::traits::{EpochStats, Evaluation, FitOptions, FitSummary, TrainableUnit};
use fedavg_core::{Error, Result};

/// Default SGD step size
pub const DEFAULT_LEARNING_RATE: f32 = 0.1;

/// Multinomial logistic regression
#[derive(Debug, Clone)]
pub struct SoftmaxRegression {
    input_dim: usize,
    num_classes: usize,
    /// Kernel, row-major `[input_dim, num_classes]`
    weights: Vec<f32>,
    bias: Vec<f32>,
    learning_rate: f32,
    rng: StdRng,
}

impl SoftmaxRegression {
    /// Create a model with Glorot-uniform kernel and zero bias
    pub fn new(input_dim: usize, num_classes: usize, seed: u64) -> Self {
        assert!(input_dim > 0, "input_dim must be non-zero");
        assert!(num_classes > 1, "softmax needs at least two classes");

        let mut rng = StdRng::seed_from_u64(seed);
        let limit = (6.0 / (input_dim + num_classes) as f32).sqrt();
        let weights = (0..input_dim * num_classes)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();

        Self {
            input_dim,
            num_classes,
            weights,
            bias: vec![0.0; num_classes],
            learning_rate: DEFAULT_LEARNING_RATE,
            rng,
        }
    }

    /// Set the SGD step size
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Input features expected per sample
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn layer_shapes(&self) -> Vec<Vec<usize>> {
        vec![vec![self.input_dim, self.num_classes], vec![self.num_classes]]
    }

    fn check_data(&self, data: &Dataset) -> Result<()> {
        if data.feature_dim() != self.input_dim {
            return Err(Error::ShapeMismatch {
                expected: self.input_dim,
                got: data.feature_dim(),
            });
        }
        if data.labels().iter().any(|&y| y as usize >= self.num_classes) {
            return Err(Error::InvalidData("label out of range"));
        }
        if data.features().iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData("non-finite feature"));
        }
        Ok(())
    }

    /// Class probabilities for one sample, written into `out`
    fn predict_into(&self, x: &[f32], out: &mut [f32]) {
        out.copy_from_slice(&self.bias);
        for (i, &xi) in x.iter().enumerate() {
            if xi == 0.0 {
                continue;
            }
            let row = &self.weights[i * self.num_classes..(i + 1) * self.num_classes];
            for (o, &w) in out.iter_mut().zip(row) {
                *o += xi * w;
            }
        }
        let max = out.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for o in out.iter_mut() {
            *o = (*o - max).exp();
            sum += *o;
        }
        for o in out.iter_mut() {
            *o /= sum;
        }
    }

    fn run_epoch(&mut self, data: &Dataset, batch_size: usize) -> (f64, f64) {
        let c = self.num_classes;
        let mut order: Vec<usize> = (0..data.len()).collect();
        order.shuffle(&mut self.rng);

        let mut probs = vec![0.0f32; c];
        let mut grad_w = vec![0.0f32; self.weights.len()];
        let mut grad_b = vec![0.0f32; c];
        let mut loss_sum = 0.0f64;
        let mut correct = 0usize;

        for batch in order.chunks(batch_size) {
            grad_w.iter_mut().for_each(|g| *g = 0.0);
            grad_b.iter_mut().for_each(|g| *g = 0.0);

            for &idx in batch {
                let (x, y) = data.sample(idx);
                let y = y as usize;
                self.predict_into(x, &mut probs);

                loss_sum += cross_entropy(probs[y]);
                if argmax(&probs) == y {
                    correct += 1;
                }

                probs[y] -= 1.0;
                for (i, &xi) in x.iter().enumerate() {
                    let row = &mut grad_w[i * c..(i + 1) * c];
                    for (g, &p) in row.iter_mut().zip(&probs) {
                        *g += xi * p;
                    }
                }
                for (g, &p) in grad_b.iter_mut().zip(&probs) {
                    *g += p;
                }
            }

            let step = self.learning_rate / batch.len() as f32;
            for (w, g) in self.weights.iter_mut().zip(&grad_w) {
                *w -= step * g;
            }
            for (b, g) in self.bias.iter_mut().zip(&grad_b) {
                *b -= step * g;
            }
        }

        let n = data.len() as f64;
        (loss_sum / n, correct as f64 / n)
    }
}

impl TrainableUnit for SoftmaxRegression {
    fn set_parameters(&mut self, params: &ParameterSet) -> Result<()> {
        params.check_layout(&self.layer_shapes())?;
        let layers = params.layers();
        self.weights = layers[0].to_f32();
        self.bias = layers[1].to_f32();
        Ok(())
    }

    fn fit(&mut self, data: &Dataset, options: &FitOptions) -> Result<FitSummary> {
        if options.batch_size == 0 {
            return Err(Error::InvalidData("batch size must be non-zero"));
        }
        self.check_data(data)?;
        let (train, validation) = data.split_validation(options.validation_split);
        if train.is_empty() {
            return Err(Error::InvalidData("no training samples after validation split"));
        }

        let mut summary = FitSummary {
            samples: train.len(),
            epochs: Vec::with_capacity(options.epochs),
        };
        for epoch in 0..options.epochs {
            let (loss, accuracy) = self.run_epoch(&train, options.batch_size);
            if !loss.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
                return Err(Error::Diverged { epoch });
            }
            let val = if validation.is_empty() {
                None
            } else {
                Some(self.evaluate(&validation)?)
            };
            let stats = EpochStats {
                epoch,
                loss,
                accuracy,
                val_loss: val.map(|v| v.loss),
                val_accuracy: val.map(|v| v.accuracy),
            };
            if options.verbose {
                info!(
                    epoch = epoch + 1,
                    epochs = options.epochs,
                    loss,
                    accuracy,
                    val_loss = stats.val_loss,
                    val_accuracy = stats.val_accuracy,
                    "epoch finished"
                );
            }
            summary.epochs.push(stats);
        }
        Ok(summary)
    }

    fn evaluate(&self, data: &Dataset) -> Result<Evaluation> {
        if data.is_empty() {
            return Err(Error::InvalidData("cannot evaluate on an empty dataset"));
        }
        self.check_data(data)?;

        let mut probs = vec![0.0f32; self.num_classes];
        let mut loss_sum = 0.0f64;
        let mut correct = 0usize;
        for i in 0..data.len() {
            let (x, y) = data.sample(i);
            self.predict_into(x, &mut probs);
            loss_sum += cross_entropy(probs[y as usize]);
            if argmax(&probs) == y as usize {
                correct += 1;
            }
        }
        let n = data.len() as f64;
        Ok(Evaluation {
            loss: loss_sum / n,
            accuracy: correct as f64 / n,
        })
    }

    fn parameters(&self) -> Result<ParameterSet> {
        Ok(ParameterSet::new(vec![
            LayerArray::from_f32(vec![self.input_dim, self.num_classes], &self.weights)?,
            LayerArray::from_f32(vec![self.num_classes], &self.bias)?,
        ]))
    }

    fn layout(&self) -> Vec<Vec<usize>> {
        self.layer_shapes()
    }
}

/// Cross-entropy of the true-class probability, clipped like Keras (1e-7)
fn cross_entropy(p: f32) -> f64 {
    -f64::from(p.max(1e-7)).ln()
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
        .0
}
