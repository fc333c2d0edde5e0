//! Datasets and client partitions
//!
//! A [`Dataset`] is a dense, row-major feature matrix with one class label per
//! row. The training corpus is split into disjoint, equally sized
//! [`DataPartition`]s, one per client; the evaluation set is shared by all
//! clients.

use std::ops::Range;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::{Error, Result};

/// Labelled samples with a fixed feature dimension
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    feature_dim: usize,
    features: Vec<f32>,
    labels: Vec<u32>,
}

impl Dataset {
    /// Create a dataset from row-major features and one label per row
    pub fn new(feature_dim: usize, features: Vec<f32>, labels: Vec<u32>) -> Result<Self> {
        if feature_dim == 0 {
            return Err(Error::InvalidData("feature dimension must be non-zero"));
        }
        if features.len() != labels.len() * feature_dim {
            return Err(Error::ShapeMismatch {
                expected: labels.len() * feature_dim,
                got: features.len(),
            });
        }
        Ok(Self {
            feature_dim,
            features,
            labels,
        })
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the dataset has no samples
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Features per sample
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Row-major feature matrix
    pub fn features(&self) -> &[f32] {
        &self.features
    }

    /// Labels, one per sample
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Features and label of sample `i`
    pub fn sample(&self, i: usize) -> (&[f32], u32) {
        let start = i * self.feature_dim;
        (
            &self.features[start..start + self.feature_dim],
            self.labels[i],
        )
    }

    /// Copy of the samples in `range`
    pub fn slice(&self, range: Range<usize>) -> Self {
        let features =
            self.features[range.start * self.feature_dim..range.end * self.feature_dim].to_vec();
        Self {
            feature_dim: self.feature_dim,
            features,
            labels: self.labels[range].to_vec(),
        }
    }

    /// Copy of the samples at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut features = Vec::with_capacity(indices.len() * self.feature_dim);
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            let (x, y) = self.sample(i);
            features.extend_from_slice(x);
            labels.push(y);
        }
        Self {
            feature_dim: self.feature_dim,
            features,
            labels,
        }
    }

    /// Hold out the trailing `fraction` of samples for validation.
    ///
    /// Returns `(train, validation)`. The split is taken before any
    /// shuffling so the validation rows are the same every epoch.
    pub fn split_validation(&self, fraction: f32) -> (Self, Self) {
        let held_out = ((self.len() as f64) * f64::from(fraction)).floor() as usize;
        let cut = self.len() - held_out.min(self.len());
        (self.slice(0..cut), self.slice(cut..self.len()))
    }

    /// Deterministically permuted copy
    pub fn shuffled(&self, seed: u64) -> Self {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        self.select(&order)
    }
}

/// One client's private slice of the training corpus
#[derive(Debug, Clone, PartialEq)]
pub struct DataPartition {
    client_index: usize,
    data: Dataset,
}

impl DataPartition {
    /// Index of the owning client
    pub fn client_index(&self) -> usize {
        self.client_index
    }

    /// The partition's samples
    pub fn data(&self) -> &Dataset {
        &self.data
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the partition is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Cut `corpus` into `total_clients` equal chunks and return chunk `client_index`.
///
/// Chunks are contiguous and disjoint; trailing samples that do not fill a
/// whole chunk are left out. Permute the corpus first (see
/// [`Dataset::shuffled`]) for i.i.d. partitions.
pub fn partition(corpus: &Dataset, total_clients: usize, client_index: usize) -> Result<DataPartition> {
    if total_clients == 0 {
        return Err(Error::InvalidIdentity("total_clients must be at least 1"));
    }
    if client_index >= total_clients {
        return Err(Error::InvalidIdentity(
            "client_index must be below total_clients",
        ));
    }
    let chunk = corpus.len() / total_clients;
    if chunk == 0 {
        return Err(Error::InvalidData("corpus smaller than the number of clients"));
    }
    let start = client_index * chunk;
    Ok(DataPartition {
        client_index,
        data: corpus.slice(start..start + chunk),
    })
}
