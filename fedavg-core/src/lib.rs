//! # FedAvg Core
//!
//! Core primitives for a federated-averaging client node.
//!
//! This crate provides:
//! - [`ParameterSet`](params::ParameterSet): the ordered, shaped parameter arrays of a model
//! - [`ParameterCodec`](codec::ParameterCodec): the f64 wire format shared with the aggregator
//! - [`CostLedger`](ledger::CostLedger): cumulative bytes sent/received
//! - [`ClientIdentity`](identity::ClientIdentity): immutable per-process protocol settings
//! - [`TrainableUnit`](traits::TrainableUnit): the seam to the statistical model
//!
//! ## Feature Flags
//!
//! - `std` (default): Standard library support, datasets and the `TrainableUnit` seam
//! - `alloc`: Parameter sets and the codec without `std`

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod identity;
pub mod ledger;

#[cfg(feature = "alloc")]
pub mod codec;
#[cfg(feature = "alloc")]
pub mod params;

#[cfg(feature = "std")]
pub mod data;
#[cfg(feature = "std")]
pub mod traits;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::identity::*;
    pub use crate::ledger::*;

    #[cfg(feature = "alloc")]
    pub use crate::codec::*;
    #[cfg(feature = "alloc")]
    pub use crate::params::*;

    #[cfg(feature = "std")]
    pub use crate::data::*;
    #[cfg(feature = "std")]
    pub use crate::traits::*;
}

/// Result type for core operations
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for core operations
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A client identity field is out of range
    InvalidIdentity(&'static str),
    /// Number of values does not match the declared shape
    ShapeMismatch {
        /// Elements implied by the shape
        expected: usize,
        /// Values actually supplied
        got: usize,
    },
    /// Parameter set has the wrong number of layers for the architecture
    LayerCountMismatch {
        /// Layers the architecture defines
        expected: usize,
        /// Layers supplied
        got: usize,
    },
    /// Training or evaluation data is unusable
    InvalidData(&'static str),
    /// Training produced a non-finite loss
    Diverged {
        /// Zero-based epoch at which the loss stopped being finite
        epoch: usize,
    },
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidIdentity(what) => write!(f, "invalid client identity: {what}"),
            Error::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected {expected} values, got {got}")
            }
            Error::LayerCountMismatch { expected, got } => {
                write!(f, "layer count mismatch: expected {expected}, got {got}")
            }
            Error::InvalidData(what) => write!(f, "invalid data: {what}"),
            Error::Diverged { epoch } => write!(f, "training diverged at epoch {epoch}"),
        }
    }
}
