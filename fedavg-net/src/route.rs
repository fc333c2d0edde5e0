//! Aggregator addressing
//!
//! Every client talks to its own aggregator port: `base_port + client_index`.

use crate::{Error, Result};

/// Path on the aggregator that accepts client uploads
pub const UPLOAD_PATH: &str = "/recv";

/// Where the aggregator listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorRoute {
    /// Host name or IP of the aggregator
    pub host: String,
    /// Port of client 0's peer
    pub base_port: u16,
}

impl AggregatorRoute {
    /// Create a route
    pub fn new(host: impl Into<String>, base_port: u16) -> Self {
        Self {
            host: host.into(),
            base_port,
        }
    }

    /// Port assigned to `client_index`
    pub fn port_for(&self, client_index: usize) -> Result<u16> {
        u16::try_from(client_index)
            .ok()
            .and_then(|i| self.base_port.checked_add(i))
            .ok_or_else(|| {
                Error::InvalidAddress(format!(
                    "port {} + {} exceeds 65535",
                    self.base_port, client_index
                ))
            })
    }

    /// Upload URL for `client_index`
    pub fn upload_url(&self, client_index: usize) -> Result<String> {
        if self.host.is_empty() {
            return Err(Error::InvalidAddress("empty host".into()));
        }
        let port = self.port_for(client_index)?;
        Ok(format!("http://{}:{}{}", self.host, port, UPLOAD_PATH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_offsets_by_client_index() {
        let route = AggregatorRoute::new("10.0.0.1", 9000);
        assert_eq!(route.port_for(0).unwrap(), 9000);
        assert_eq!(route.port_for(7).unwrap(), 9007);
        assert_eq!(
            route.upload_url(3).unwrap(),
            "http://10.0.0.1:9003/recv"
        );
    }

    #[test]
    fn test_port_overflow_rejected() {
        let route = AggregatorRoute::new("localhost", 65530);
        assert!(route.port_for(5).is_ok());
        assert!(matches!(route.port_for(6), Err(Error::InvalidAddress(_))));
        assert!(route.port_for(usize::MAX).is_err());
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(AggregatorRoute::new("", 80).upload_url(0).is_err());
    }
}
