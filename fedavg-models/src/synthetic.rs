//! Synthetic corpora
//!
//! Seeded Gaussian clusters, one per class, split into a training corpus and a
//! shared evaluation set drawn around the same centroids.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use fedavg_core::data::Dataset;
use fedavg_core::Result;

/// Training corpus plus shared evaluation set
#[derive(Debug, Clone)]
pub struct SyntheticCorpus {
    /// Samples to be partitioned across clients
    pub train: Dataset,
    /// Evaluation samples shared by every client
    pub test: Dataset,
}

impl SyntheticCorpus {
    /// Start configuring a corpus
    pub fn builder() -> SyntheticCorpusBuilder {
        SyntheticCorpusBuilder::default()
    }
}

/// Builder for [`SyntheticCorpus`]
#[derive(Debug, Clone)]
pub struct SyntheticCorpusBuilder {
    train_samples: usize,
    test_samples: usize,
    feature_dim: usize,
    classes: usize,
    centroid_scale: f32,
    spread: f32,
    seed: u64,
}

impl Default for SyntheticCorpusBuilder {
    fn default() -> Self {
        Self {
            train_samples: 6000,
            test_samples: 1000,
            feature_dim: 16,
            classes: 10,
            centroid_scale: 2.0,
            spread: 0.5,
            seed: 0,
        }
    }
}

impl SyntheticCorpusBuilder {
    /// Training samples (before partitioning)
    pub fn train_samples(mut self, n: usize) -> Self {
        self.train_samples = n;
        self
    }

    /// Evaluation samples
    pub fn test_samples(mut self, n: usize) -> Self {
        self.test_samples = n;
        self
    }

    /// Features per sample
    pub fn feature_dim(mut self, n: usize) -> Self {
        self.feature_dim = n.max(1);
        self
    }

    /// Number of classes
    pub fn classes(mut self, n: usize) -> Self {
        self.classes = n.max(2);
        self
    }

    /// Centroid coordinates are drawn from `[-scale, scale]`
    pub fn centroid_scale(mut self, scale: f32) -> Self {
        self.centroid_scale = scale.abs();
        self
    }

    /// Standard deviation of samples around their centroid
    pub fn spread(mut self, spread: f32) -> Self {
        self.spread = spread.abs();
        self
    }

    /// Seed for centroids and samples
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Generate the corpus
    pub fn build(self) -> Result<SyntheticCorpus> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let centroids: Vec<Vec<f32>> = (0..self.classes)
            .map(|_| {
                (0..self.feature_dim)
                    .map(|_| {
                        if self.centroid_scale > 0.0 {
                            rng.gen_range(-self.centroid_scale..=self.centroid_scale)
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect();

        let train = self.draw(&centroids, self.train_samples, self.seed.wrapping_add(1))?;
        let test = self.draw(&centroids, self.test_samples, self.seed.wrapping_add(2))?;
        Ok(SyntheticCorpus { train, test })
    }

    /// Labels cycle through the classes so every class is equally represented.
    fn draw(&self, centroids: &[Vec<f32>], n: usize, seed: u64) -> Result<Dataset> {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0f32, self.spread).ok();

        let mut features = Vec::with_capacity(n * self.feature_dim);
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let class = i % self.classes;
            for &c in &centroids[class] {
                let jitter = noise.map_or(0.0, |d| d.sample(&mut rng));
                features.push(c + jitter);
            }
            labels.push(class as u32);
        }

        Dataset::new(self.feature_dim, features, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_and_labels() {
        let corpus = SyntheticCorpus::builder()
            .train_samples(90)
            .test_samples(30)
            .feature_dim(4)
            .classes(3)
            .build()
            .unwrap();
        assert_eq!(corpus.train.len(), 90);
        assert_eq!(corpus.test.len(), 30);
        assert_eq!(corpus.train.feature_dim(), 4);
        assert!(corpus.train.labels().iter().all(|&y| y < 3));
        assert_eq!(corpus.train.labels().iter().filter(|&&y| y == 2).count(), 30);
    }

    #[test]
    fn test_same_seed_same_corpus() {
        let a = SyntheticCorpus::builder().train_samples(20).seed(3).build().unwrap();
        let b = SyntheticCorpus::builder().train_samples(20).seed(3).build().unwrap();
        let c = SyntheticCorpus::builder().train_samples(20).seed(4).build().unwrap();
        assert_eq!(a.train, b.train);
        assert_ne!(a.train, c.train);
    }

    #[test]
    fn test_zero_spread_places_samples_on_centroids() {
        let corpus = SyntheticCorpus::builder()
            .train_samples(4)
            .test_samples(2)
            .feature_dim(3)
            .classes(2)
            .spread(0.0)
            .build()
            .unwrap();
        assert_eq!(corpus.train.sample(0).0, corpus.train.sample(2).0);
        assert_eq!(corpus.train.sample(0).0, corpus.test.sample(0).0);
    }
}
