//! # FedAvg Network
//!
//! Outbound transport from a client node to its aggregator.
//!
//! This crate provides:
//! - The [`AggregatorTransport`](traits::AggregatorTransport) trait
//! - [`AggregatorRoute`](route::AggregatorRoute): base-port addressing of the aggregator
//! - An HTTP transport (`http-transport`, default)
//! - A recording mock transport for tests
//!
//! Sends are never retried: a failed upload is reported to the caller, which
//! treats it as fatal for the round.

pub mod route;
pub mod traits;

#[cfg(feature = "http-transport")]
pub mod http;

mod mock;
pub use mock::RecordingTransport;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::route::*;
    pub use crate::traits::*;

    #[cfg(feature = "http-transport")]
    pub use crate::http::*;
}

/// Result type for network operations
pub type Result<T> = core::result::Result<T, Error>;

/// Network error types
#[derive(Debug)]
pub enum Error {
    /// Could not connect to the aggregator
    ConnectionFailed(String),
    /// Connection established but the send failed
    SendFailed(String),
    /// Send did not complete in time
    Timeout,
    /// Aggregator answered with a non-success status
    Rejected {
        /// HTTP status code
        status: u16,
    },
    /// Aggregator address cannot be formed
    InvalidAddress(String),
}

impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::ConnectionFailed(e) => write!(f, "connection failed: {e}"),
            Error::SendFailed(e) => write!(f, "send failed: {e}"),
            Error::Timeout => write!(f, "timeout"),
            Error::Rejected { status } => write!(f, "aggregator rejected upload with status {status}"),
            Error::InvalidAddress(e) => write!(f, "invalid aggregator address: {e}"),
        }
    }
}
