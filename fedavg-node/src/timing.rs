//! Wall-clock accounting for a client's protocol lifetime.
//!
//! Time between `start` and termination is split into busy time (training and
//! uploading) and idle time (waiting for the aggregator).

use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Busy,
    Idle,
}

/// Busy/idle stopwatch
#[derive(Debug, Clone, Default)]
pub struct RoundTimer {
    started: Option<Instant>,
    finished: Option<Instant>,
    current: Option<(Phase, Instant)>,
    busy: Duration,
    idle: Duration,
}

/// Totals reported when the protocol ends
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingSummary {
    /// Seconds from `start` to termination (or to now, if still running)
    pub total_secs: f64,
    /// Seconds spent training and uploading
    pub busy_secs: f64,
    /// Seconds spent waiting for aggregates
    pub idle_secs: f64,
}

impl RoundTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the beginning of the protocol
    pub fn start_training(&mut self) {
        self.start_training_at(Instant::now());
    }

    /// Enter the busy phase
    pub fn client_busy(&mut self) {
        self.switch_at(Phase::Busy, Instant::now());
    }

    /// Enter the idle phase
    pub fn client_idle(&mut self) {
        self.switch_at(Phase::Idle, Instant::now());
    }

    /// Close the protocol
    pub fn finish(&mut self) {
        self.finish_at(Instant::now());
    }

    pub fn summary(&self) -> TimingSummary {
        self.summary_at(Instant::now())
    }

    fn start_training_at(&mut self, now: Instant) {
        self.started = Some(now);
        self.finished = None;
        self.current = None;
        self.busy = Duration::ZERO;
        self.idle = Duration::ZERO;
    }

    fn switch_at(&mut self, phase: Phase, now: Instant) {
        self.close_phase(now);
        self.current = Some((phase, now));
    }

    fn finish_at(&mut self, now: Instant) {
        self.close_phase(now);
        self.finished = Some(now);
    }

    fn close_phase(&mut self, now: Instant) {
        if let Some((phase, since)) = self.current.take() {
            let spent = now.saturating_duration_since(since);
            match phase {
                Phase::Busy => self.busy += spent,
                Phase::Idle => self.idle += spent,
            }
        }
    }

    fn summary_at(&self, now: Instant) -> TimingSummary {
        let end = self.finished.unwrap_or(now);
        let total = self
            .started
            .map(|s| end.saturating_duration_since(s))
            .unwrap_or_default();

        let (mut busy, mut idle) = (self.busy, self.idle);
        if self.finished.is_none() {
            if let Some((phase, since)) = self.current {
                let open = now.saturating_duration_since(since);
                match phase {
                    Phase::Busy => busy += open,
                    Phase::Idle => idle += open,
                }
            }
        }

        TimingSummary {
            total_secs: total.as_secs_f64(),
            busy_secs: busy.as_secs_f64(),
            idle_secs: idle.as_secs_f64(),
        }
    }
}
