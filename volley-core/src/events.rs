use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use volley_metrics::{Report, SessionStats};

use crate::config::Phase;
use crate::extract::MatchOutcome;

/// Outstanding-work counters driving shutdown detection and observability.
#[derive(Debug, Default)]
pub struct PendingCounters {
    scenarios: AtomicU64,
    requests: AtomicU64,
}

impl PendingCounters {
    pub fn inc_scenarios(&self) {
        self.scenarios.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_scenarios(&self) {
        let _ = self
            .scenarios
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    #[must_use]
    pub fn scenarios(&self) -> u64 {
        self.scenarios.load(Ordering::Relaxed)
    }

    pub fn inc_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_requests(&self) {
        let _ = self
            .requests
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// The uniform event surface protocol engines and compiled steps report
/// into. Events are applied synchronously to the shared aggregator and the
/// pending counters; cloning is cheap.
#[derive(Clone)]
pub struct EventSink {
    stats: Arc<SessionStats>,
    pending: Arc<PendingCounters>,
}

impl EventSink {
    #[must_use]
    pub fn new(stats: Arc<SessionStats>, pending: Arc<PendingCounters>) -> Self {
        Self { stats, pending }
    }

    /// A session was admitted and its pipeline is about to run.
    pub fn started(&self) {
        self.pending.inc_scenarios();
    }

    /// A request went out on the wire.
    pub fn request(&self) {
        self.stats.new_request();
        self.pending.inc_requests();
    }

    /// The matching response arrived.
    pub fn response(&self, latency: Duration, code: u16, uid: &str) {
        tracing::trace!(uid, code, ?latency, "response");
        self.stats.completed_request();
        self.stats.add_latency(latency);
        self.stats.add_code(code);
        self.pending.dec_requests();
    }

    pub fn error(&self, code: &str) {
        self.stats.add_error(code);
    }

    pub fn match_result(&self, outcome: &MatchOutcome) {
        tracing::trace!(
            expression = %outcome.expression,
            success = outcome.success,
            "match"
        );
        self.stats.add_match();
    }

    pub fn custom_stat(&self, name: &str, value: f64) {
        self.stats.add_custom_stat(name, value);
    }
}

/// External run-progress surface, delivered to the embedding caller.
#[derive(Debug, Clone)]
pub enum RunEvent {
    PhaseStarted { index: usize, phase: Phase },
    PhaseCompleted { index: usize, phase: Phase },
    /// Periodic intermediate report for the elapsed stats window.
    Stats(Report),
    /// Final cumulative report; emitted exactly once.
    Done(Report),
}

pub type EventFn = Arc<dyn Fn(RunEvent) + Send + Sync>;
