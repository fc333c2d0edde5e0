//! Transport traits
//!
//! This module defines the outbound transport abstraction.

use crate::Result;

/// Delivers encoded parameter sets to this client's aggregator
#[async_trait::async_trait]
pub trait AggregatorTransport: Send + Sync {
    /// Send one payload. Resolves once the aggregator has accepted it.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Human-readable destination, for logs
    fn destination(&self) -> String;
}
