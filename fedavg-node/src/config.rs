//! Process configuration
//!
//! Settings are resolved once at startup, in increasing precedence:
//! built-in defaults, an optional JSON file, `FEDAVG_*` environment
//! variables, and finally the client index from the command line. Nothing
//! changes after the node starts.

use std::net::SocketAddr;
use std::path::Path;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use fedavg_core::identity::ClientIdentity;
use fedavg_net::route::AggregatorRoute;

use crate::error::{NodeError, Result};

/// Prefix of environment overrides; nested keys use `__`
pub const ENV_PREFIX: &str = "FEDAVG";

/// Default upper bound for inbound aggregate payloads
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Synthetic corpus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Samples in the shared training corpus
    pub train_samples: usize,
    /// Samples in the shared evaluation set
    pub test_samples: usize,
    /// Features per sample
    pub feature_dim: usize,
    /// Number of classes
    pub classes: usize,
    /// Corpus seed; must match on every client so partitions are disjoint
    pub seed: u64,
    /// Permute the corpus before partitioning
    pub permute: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_samples: 6000,
            test_samples: 1000,
            feature_dim: 16,
            classes: 10,
            seed: 42,
            permute: true,
        }
    }
}

/// Complete node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Zero-based index of this client
    pub client_index: usize,
    /// Clients in the run
    pub number_of_clients: usize,
    /// Rounds to train
    pub training_rounds: u64,
    /// Local epochs per round
    pub epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Validation hold-out fraction
    pub validation_split: f32,
    /// 0 = quiet, 1 = per-round and per-epoch progress, 2+ = debug
    pub verbose: u8,
    /// Interface the node listens on
    pub bind_host: String,
    /// Port of client 0; client `i` listens on `client_base_port + i`
    pub client_base_port: u16,
    /// Aggregator host
    pub server_host: String,
    /// Aggregator port for client 0
    pub server_base_port: u16,
    /// Largest accepted `/recv` body
    pub max_payload_bytes: usize,
    /// SGD step size of the reference model
    pub learning_rate: f32,
    /// Model initialization seed; shared so all clients start identical
    pub model_seed: u64,
    /// Training data settings
    pub data: DataConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            client_index: 0,
            number_of_clients: 1,
            training_rounds: 3,
            epochs: 1,
            batch_size: 32,
            validation_split: 0.1,
            verbose: 1,
            bind_host: "127.0.0.1".into(),
            client_base_port: 8500,
            server_host: "127.0.0.1".into(),
            server_base_port: 8000,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            learning_rate: 0.1,
            model_seed: 7,
            data: DataConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create a new builder
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::new()
    }

    /// Resolve the configuration of `client_index`: defaults, then `file`
    /// (JSON), then `FEDAVG_*` environment variables.
    pub fn load(client_index: usize, file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Json));
        }
        Self::resolve(builder.add_source(environment()), client_index)
    }

    /// Deserialize layered sources; absent keys keep their defaults
    fn resolve(builder: ConfigBuilder<DefaultState>, client_index: usize) -> Result<Self> {
        let mut config: Self = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| NodeError::Config(e.to_string()))?;
        config.client_index = client_index;
        config.validate()?;
        Ok(config)
    }

    /// Check every setting that could only fail later
    pub fn validate(&self) -> Result<()> {
        self.identity()?;
        if self.data.feature_dim == 0 {
            return Err(NodeError::Config("data.feature_dim must be non-zero".into()));
        }
        if self.data.classes < 2 {
            return Err(NodeError::Config("data.classes must be at least 2".into()));
        }
        if self.data.test_samples == 0 {
            return Err(NodeError::Config("data.test_samples must be non-zero".into()));
        }
        if self.data.train_samples < self.number_of_clients {
            return Err(NodeError::Config(
                "data.train_samples must cover every client".into(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(NodeError::Config("learning_rate must be positive".into()));
        }
        Ok(())
    }

    /// Validated protocol identity
    pub fn identity(&self) -> Result<ClientIdentity> {
        ClientIdentity::builder()
            .client_index(self.client_index)
            .total_clients(self.number_of_clients)
            .total_rounds(self.training_rounds)
            .epochs_per_round(self.epochs)
            .batch_size(self.batch_size)
            .validation_split(self.validation_split)
            .build()
            .map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Address this client listens on
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let port = u16::try_from(self.client_index)
            .ok()
            .and_then(|i| self.client_base_port.checked_add(i))
            .ok_or_else(|| NodeError::Config("client port exceeds 65535".into()))?;
        format!("{}:{}", self.bind_host, port)
            .parse()
            .map_err(|e| NodeError::Config(format!("bind address: {e}")))
    }

    /// Route to this client's aggregator peer
    pub fn aggregator_route(&self) -> AggregatorRoute {
        AggregatorRoute::new(self.server_host.clone(), self.server_base_port)
    }
}

/// `FEDAVG_TRAINING_ROUNDS`, `FEDAVG_DATA__SEED`, ...
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Builder for [`NodeConfig`]
#[derive(Debug, Default)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_index(mut self, index: usize) -> Self {
        self.config.client_index = index;
        self
    }

    pub fn number_of_clients(mut self, n: usize) -> Self {
        self.config.number_of_clients = n;
        self
    }

    pub fn training_rounds(mut self, n: u64) -> Self {
        self.config.training_rounds = n;
        self
    }

    pub fn epochs(mut self, n: usize) -> Self {
        self.config.epochs = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn validation_split(mut self, fraction: f32) -> Self {
        self.config.validation_split = fraction;
        self
    }

    pub fn verbose(mut self, level: u8) -> Self {
        self.config.verbose = level;
        self
    }

    /// Listen on `host`, port `base_port + client_index`
    pub fn listen(mut self, host: impl Into<String>, base_port: u16) -> Self {
        self.config.bind_host = host.into();
        self.config.client_base_port = base_port;
        self
    }

    /// Upload to `host`, port `base_port + client_index`
    pub fn aggregator(mut self, host: impl Into<String>, base_port: u16) -> Self {
        self.config.server_host = host.into();
        self.config.server_base_port = base_port;
        self
    }

    pub fn data(mut self, data: DataConfig) -> Self {
        self.config.data = data;
        self
    }

    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.config.learning_rate = learning_rate;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<NodeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
