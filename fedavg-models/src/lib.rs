//! # FedAvg Models
//!
//! Reference model and data for FedAvg client nodes.
//!
//! This crate provides:
//! - [`SoftmaxRegression`](softmax::SoftmaxRegression), a multinomial logistic
//!   regression trained with mini-batch SGD in single precision
//! - [`SyntheticCorpus`](synthetic::SyntheticCorpus), seeded Gaussian class
//!   clusters standing in for a real dataset

#![forbid(unsafe_code)]

pub mod softmax;
pub mod synthetic;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::softmax::*;
    pub use crate::synthetic::*;
}
