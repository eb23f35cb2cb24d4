use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::running::RunningStats;
use crate::snapshot::StatsSnapshot;

pub(crate) fn new_latency_histogram() -> Histogram<u64> {
    // Track up to 1 hour in microseconds (with 3 sigfigs).
    Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3)
        .unwrap_or_else(|err| panic!("failed to init histogram: {err}"))
}

/// The mutable statistics sink shared by all in-flight sessions.
///
/// Counters are atomics; the histograms and keyed maps sit behind short-held
/// mutexes. Sessions only ever append; the runner snapshots and resets on its
/// reporting interval.
#[derive(Debug)]
pub struct SessionStats {
    window_started: Mutex<Instant>,

    scenarios_created: AtomicU64,
    scenarios_completed: AtomicU64,
    requests_completed: AtomicU64,
    request_marks: AtomicU64,
    matches: AtomicU64,

    concurrency: AtomicU64,
    pending_requests: AtomicU64,

    latency_us: Mutex<Histogram<u64>>,
    scenario_latency_us: Mutex<Histogram<u64>>,

    codes: Mutex<HashMap<u16, u64>>,
    errors: Mutex<HashMap<String, u64>>,
    custom: Mutex<HashMap<String, RunningStats>>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            window_started: Mutex::new(Instant::now()),
            scenarios_created: AtomicU64::new(0),
            scenarios_completed: AtomicU64::new(0),
            requests_completed: AtomicU64::new(0),
            request_marks: AtomicU64::new(0),
            matches: AtomicU64::new(0),
            concurrency: AtomicU64::new(0),
            pending_requests: AtomicU64::new(0),
            latency_us: Mutex::new(new_latency_histogram()),
            scenario_latency_us: Mutex::new(new_latency_histogram()),
            codes: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            custom: Mutex::new(HashMap::new()),
        }
    }
}

impl SessionStats {
    pub fn new_scenario(&self) {
        self.scenarios_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed_scenario(&self) {
        self.scenarios_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// A request went out on the wire (feeds the rps meter).
    pub fn new_request(&self) {
        self.request_marks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed_request(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_latency(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        let _ = self.latency_us.lock().record(us.max(1));
    }

    pub fn add_scenario_latency(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        let _ = self.scenario_latency_us.lock().record(us.max(1));
    }

    pub fn add_code(&self, code: u16) {
        let mut codes = self.codes.lock();
        *codes.entry(code).or_insert(0) += 1;
    }

    pub fn add_error(&self, kind: &str) {
        let mut errors = self.errors.lock();
        match errors.get_mut(kind) {
            Some(count) => *count += 1,
            None => {
                errors.insert(kind.to_string(), 1);
            }
        }
    }

    pub fn add_match(&self) {
        self.matches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_custom_stat(&self, name: &str, value: f64) {
        let mut custom = self.custom.lock();
        match custom.get_mut(name) {
            Some(agg) => agg.push(value),
            None => {
                let mut agg = RunningStats::default();
                agg.push(value);
                custom.insert(name.to_string(), agg);
            }
        }
    }

    /// Gauges recorded by the runner just before a snapshot is taken.
    pub fn set_gauges(&self, concurrency: u64, pending_requests: u64) {
        self.concurrency.store(concurrency, Ordering::Relaxed);
        self.pending_requests
            .store(pending_requests, Ordering::Relaxed);
    }

    /// Point-in-time copy of everything recorded since the last reset.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            timestamp: SystemTime::now(),
            window: self.window_started.lock().elapsed(),
            scenarios_created: self.scenarios_created.load(Ordering::Relaxed),
            scenarios_completed: self.scenarios_completed.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            request_marks: self.request_marks.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
            concurrency: self.concurrency.load(Ordering::Relaxed),
            pending_requests: self.pending_requests.load(Ordering::Relaxed),
            latency_us: self.latency_us.lock().clone(),
            scenario_latency_us: self.scenario_latency_us.lock().clone(),
            codes: self.codes.lock().clone(),
            errors: self.errors.lock().clone(),
            custom: self.custom.lock().clone(),
        }
    }

    /// Clears counters in place while preserving identity; the next window
    /// starts now.
    pub fn reset(&self) {
        *self.window_started.lock() = Instant::now();
        self.scenarios_created.store(0, Ordering::Relaxed);
        self.scenarios_completed.store(0, Ordering::Relaxed);
        self.requests_completed.store(0, Ordering::Relaxed);
        self.request_marks.store(0, Ordering::Relaxed);
        self.matches.store(0, Ordering::Relaxed);
        self.latency_us.lock().reset();
        self.scenario_latency_us.lock().reset();
        self.codes.lock().clear();
        self.errors.lock().clear();
        self.custom.lock().clear();
    }

    /// snapshot + reset as one logical step for the reporting interval.
    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let snap = self.snapshot();
        self.reset();
        snap
    }
}
