//! # FedAvg Node
//!
//! A client node of a federated-averaging run.
//!
//! The node trains on its private partition, uploads its parameters to the
//! aggregator and waits for the averaged set before starting the next round.
//! The round that sees `completed rounds == total rounds` when an aggregate
//! arrives treats that aggregate as the final model and terminates.
//!
//! ```ignore
//! use fedavg_node::prelude::*;
//!
//! let node = ClientNode::builder()
//!     .identity(config.identity()?)
//!     .unit_factory(factory)
//!     .partition(partition)
//!     .evaluation(test_set)
//!     .transport(Arc::new(HttpTransport::new(&config.aggregator_route(), index)?))
//!     .spawn()?;
//!
//! let app = router(node.endpoint().clone(), config.max_payload_bytes);
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod node;
pub mod server;
pub mod timing;

pub use error::{NodeError, Rejection, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{DataConfig, NodeConfig, NodeConfigBuilder};
    pub use crate::coordinator::{FinalReport, NodeStatus, RoundPhase, RoundRecord, RoundTrigger};
    pub use crate::endpoint::{TransportEndpoint, Uplink};
    pub use crate::error::{NodeError, Rejection};
    pub use crate::node::{ClientNode, NodeBuilder};
    pub use crate::server::{router, serve};
    pub use crate::timing::{RoundTimer, TimingSummary};
}
