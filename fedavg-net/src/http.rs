//! HTTP transport
//!
//! Uploads are `POST {route}/recv` with the raw payload as body.

use std::time::Duration;

use tracing::debug;

use crate::route::AggregatorRoute;
use crate::traits::AggregatorTransport;
use crate::{Error, Result};

/// Connect timeout used when none is configured
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts payloads to the aggregator over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Transport for `client_index` on `route`
    pub fn new(route: &AggregatorRoute, client_index: usize) -> Result<Self> {
        Self::with_connect_timeout(route, client_index, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Transport with an explicit connect timeout. The body upload itself is
    /// not time limited: a slow aggregator stalls the round rather than
    /// triggering a resend.
    pub fn with_connect_timeout(
        route: &AggregatorRoute,
        client_index: usize,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let url = route.upload_url(client_index)?;
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        Ok(Self { client, url })
    }

    /// Upload URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl AggregatorTransport for HttpTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        debug!(url = %self.url, bytes = payload.len(), "posting payload");
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn destination(&self) -> String {
        self.url.clone()
    }
}

fn classify(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else if e.is_connect() {
        Error::ConnectionFailed(e.to_string())
    } else {
        Error::SendFailed(e.to_string())
    }
}
