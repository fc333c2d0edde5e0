//! Mock transport for testing
//!
//! This module provides a transport that keeps every payload in memory
//! instead of sending it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use crate::traits::AggregatorTransport;
use crate::{Error, Result};

/// Records payloads instead of sending them
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    failing: AtomicBool,
    latency: Option<Duration>,
    notify: Notify,
}

impl RecordingTransport {
    /// Create a new recording transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every send by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make subsequent sends fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Payloads delivered so far, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().clone()
    }

    /// Number of payloads delivered
    pub fn sent_count(&self) -> usize {
        self.lock().len()
    }

    /// Wait until at least `n` payloads have been delivered
    pub async fn wait_for_sends(&self, n: usize) {
        loop {
            let notified = self.notify.notified();
            if self.sent_count() >= n {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl AggregatorTransport for RecordingTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed("recording transport set to fail".into()));
        }
        self.lock().push(payload.to_vec());
        self.notify.notify_waiters();
        Ok(())
    }

    fn destination(&self) -> String {
        "memory".into()
    }
}
