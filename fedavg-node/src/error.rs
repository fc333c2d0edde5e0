//! Node error taxonomy
//!
//! Every round-fatal error carries the client index and the round it happened
//! in. None of them is retried.

use fedavg_core::codec::{DecodeError, EncodeError};

/// Result type for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Failures that stop the node
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Aggregate payload could not be decoded
    #[error("client {client}, round {round}: malformed aggregate payload: {source}")]
    Decode {
        client: usize,
        round: u64,
        source: DecodeError,
    },

    /// Local training or evaluation failed
    #[error("client {client}, round {round}: training failed: {source}")]
    Training {
        client: usize,
        round: u64,
        source: fedavg_core::Error,
    },

    /// The training task panicked or was cancelled
    #[error("client {client}, round {round}: training aborted: {reason}")]
    TrainingAborted {
        client: usize,
        round: u64,
        reason: String,
    },

    /// Trained parameters could not be serialized
    #[error("client {client}, round {round}: could not encode parameters: {source}")]
    Encode {
        client: usize,
        round: u64,
        source: EncodeError,
    },

    /// Upload to the aggregator failed
    #[error("client {client}, round {round}: upload to aggregator failed: {source}")]
    Transport {
        client: usize,
        round: u64,
        source: fedavg_net::Error,
    },

    /// The round state machine was driven into an impossible transition
    #[error("client {client}, round {round}: protocol violation: {reason}")]
    Protocol {
        client: usize,
        round: u64,
        reason: &'static str,
    },

    /// Invalid or incomplete configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Dataset could not be prepared
    #[error("data error: {0}")]
    Data(#[from] fedavg_core::Error),

    /// Logging could not be initialized
    #[error("logging setup failed: {0}")]
    Logging(String),

    /// The round worker exited without finishing the protocol
    #[error("round worker stopped before the protocol finished")]
    WorkerStopped,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Round the error refers to, if it is round-scoped
    pub fn round(&self) -> Option<u64> {
        match self {
            NodeError::Decode { round, .. }
            | NodeError::Training { round, .. }
            | NodeError::TrainingAborted { round, .. }
            | NodeError::Encode { round, .. }
            | NodeError::Transport { round, .. }
            | NodeError::Protocol { round, .. } => Some(*round),
            _ => None,
        }
    }
}

impl From<fedavg_net::Error> for NodeError {
    fn from(e: fedavg_net::Error) -> Self {
        NodeError::Config(e.to_string())
    }
}

/// Why an inbound request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// `start` was already accepted once
    #[error("node already started")]
    AlreadyStarted,
    /// A round trigger is already waiting behind the running round
    #[error("a round trigger is already queued")]
    Busy,
    /// The round worker has terminated or failed
    #[error("node is no longer accepting rounds")]
    Stopped,
    /// The aggregate body exceeded the configured payload limit
    #[error("aggregate exceeds {limit} bytes")]
    TooLarge { limit: usize },
    /// The aggregate body ended in a transport error
    #[error("aggregate body was cut short")]
    Truncated,
}
