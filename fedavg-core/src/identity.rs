//! Client identity
//!
//! The immutable settings that place one client in a federated run: which
//! client it is, how many peers and rounds there are, and how each round
//! trains locally.

use crate::{Error, Result};

/// Immutable per-process protocol settings
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "alloc", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientIdentity {
    client_index: usize,
    total_clients: usize,
    total_rounds: u64,
    epochs_per_round: usize,
    batch_size: usize,
    validation_split: f32,
}

impl ClientIdentity {
    /// Start building an identity
    pub fn builder() -> ClientIdentityBuilder {
        ClientIdentityBuilder::new()
    }

    /// Zero-based index of this client
    pub fn client_index(&self) -> usize {
        self.client_index
    }

    /// Number of clients in the run
    pub fn total_clients(&self) -> usize {
        self.total_clients
    }

    /// Number of rounds each client trains
    pub fn total_rounds(&self) -> u64 {
        self.total_rounds
    }

    /// Local epochs per round
    pub fn epochs_per_round(&self) -> usize {
        self.epochs_per_round
    }

    /// Mini-batch size for local training
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fraction of the local partition held out for validation
    pub fn validation_split(&self) -> f32 {
        self.validation_split
    }

    fn validate(self) -> Result<Self> {
        if self.total_clients == 0 {
            return Err(Error::InvalidIdentity("total_clients must be at least 1"));
        }
        if self.client_index >= self.total_clients {
            return Err(Error::InvalidIdentity(
                "client_index must be below total_clients",
            ));
        }
        if self.total_rounds == 0 {
            return Err(Error::InvalidIdentity("total_rounds must be at least 1"));
        }
        if self.epochs_per_round == 0 {
            return Err(Error::InvalidIdentity("epochs_per_round must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidIdentity("batch_size must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(Error::InvalidIdentity("validation_split must be in [0, 1)"));
        }
        Ok(self)
    }
}

/// Builder for [`ClientIdentity`]
#[derive(Debug, Clone)]
pub struct ClientIdentityBuilder {
    identity: ClientIdentity,
}

impl Default for ClientIdentityBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientIdentityBuilder {
    /// A single client, single round, one epoch of batch 32
    pub fn new() -> Self {
        Self {
            identity: ClientIdentity {
                client_index: 0,
                total_clients: 1,
                total_rounds: 1,
                epochs_per_round: 1,
                batch_size: 32,
                validation_split: 0.0,
            },
        }
    }

    /// Set the zero-based client index
    pub fn client_index(mut self, index: usize) -> Self {
        self.identity.client_index = index;
        self
    }

    /// Set the number of clients
    pub fn total_clients(mut self, n: usize) -> Self {
        self.identity.total_clients = n;
        self
    }

    /// Set the number of rounds
    pub fn total_rounds(mut self, n: u64) -> Self {
        self.identity.total_rounds = n;
        self
    }

    /// Set local epochs per round
    pub fn epochs_per_round(mut self, n: usize) -> Self {
        self.identity.epochs_per_round = n;
        self
    }

    /// Set the mini-batch size
    pub fn batch_size(mut self, n: usize) -> Self {
        self.identity.batch_size = n;
        self
    }

    /// Set the validation hold-out fraction
    pub fn validation_split(mut self, fraction: f32) -> Self {
        self.identity.validation_split = fraction;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<ClientIdentity> {
        self.identity.validate()
    }
}
