use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hdrhistogram::Histogram;

use crate::running::RunningStats;
use crate::stats::new_latency_histogram;

/// Immutable point-in-time copy of the aggregator. Snapshots taken over a
/// run merge associatively: counts sum, histograms combine by union of
/// samples.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub timestamp: SystemTime,
    /// Wall-clock span this snapshot covers (since the previous reset).
    pub window: Duration,

    pub scenarios_created: u64,
    pub scenarios_completed: u64,
    pub requests_completed: u64,
    /// Requests put on the wire during the window (feeds the rps meter).
    pub request_marks: u64,
    pub matches: u64,

    pub concurrency: u64,
    pub pending_requests: u64,

    pub latency_us: Histogram<u64>,
    pub scenario_latency_us: Histogram<u64>,

    pub codes: HashMap<u16, u64>,
    pub errors: HashMap<String, u64>,
    pub custom: HashMap<String, RunningStats>,
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            window: Duration::ZERO,
            scenarios_created: 0,
            scenarios_completed: 0,
            requests_completed: 0,
            request_marks: 0,
            matches: 0,
            concurrency: 0,
            pending_requests: 0,
            latency_us: new_latency_histogram(),
            scenario_latency_us: new_latency_histogram(),
            codes: HashMap::new(),
            errors: HashMap::new(),
            custom: HashMap::new(),
        }
    }
}

impl StatsSnapshot {
    pub fn merge(&mut self, other: &StatsSnapshot) {
        self.timestamp = self.timestamp.min(other.timestamp);
        self.window = self.window.saturating_add(other.window);

        self.scenarios_created += other.scenarios_created;
        self.scenarios_completed += other.scenarios_completed;
        self.requests_completed += other.requests_completed;
        self.request_marks += other.request_marks;
        self.matches += other.matches;

        // Gauges: the latest observation wins.
        self.concurrency = other.concurrency;
        self.pending_requests = other.pending_requests;

        let _ = self.latency_us.add(&other.latency_us);
        let _ = self.scenario_latency_us.add(&other.scenario_latency_us);

        for (code, n) in &other.codes {
            *self.codes.entry(*code).or_insert(0) += n;
        }
        for (kind, n) in &other.errors {
            *self.errors.entry(kind.clone()).or_insert(0) += n;
        }
        for (name, agg) in &other.custom {
            self.custom
                .entry(name.clone())
                .or_default()
                .merge(agg);
        }
    }

    pub fn combine(snapshots: &[StatsSnapshot]) -> StatsSnapshot {
        let mut out = StatsSnapshot::default();
        if let Some(first) = snapshots.first() {
            out.timestamp = first.timestamp;
        }
        for snap in snapshots {
            out.merge(snap);
        }
        out
    }

    pub fn report(&self) -> Report {
        let timestamp_ms = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis()
            .min(u64::MAX as u128) as u64;

        let secs = self.window.as_secs_f64();
        let rps_mean = if secs > 0.0 {
            round2(self.request_marks as f64 / secs)
        } else {
            0.0
        };

        let mut codes: BTreeMap<u16, u64> = BTreeMap::new();
        for (code, n) in &self.codes {
            codes.insert(*code, *n);
        }
        let mut errors: BTreeMap<String, u64> = BTreeMap::new();
        for (kind, n) in &self.errors {
            errors.insert(kind.clone(), *n);
        }

        let mut custom_stats: BTreeMap<String, CustomStatReport> = BTreeMap::new();
        for (name, agg) in &self.custom {
            custom_stats.insert(
                name.clone(),
                CustomStatReport {
                    count: agg.count(),
                    mean: round2(agg.mean()),
                    stdev: round2(agg.stdev()),
                    min: round2(agg.min()),
                    max: round2(agg.max()),
                },
            );
        }

        Report {
            timestamp_ms,
            scenarios_created: self.scenarios_created,
            scenarios_completed: self.scenarios_completed,
            requests_completed: self.requests_completed,
            rps: RpsReport {
                mean: rps_mean,
                count: self.request_marks,
            },
            latency: DistributionReport::from_histogram_us(&self.latency_us),
            scenario_duration: DistributionReport::from_histogram_us(&self.scenario_latency_us),
            codes,
            errors,
            matches: self.matches,
            custom_stats,
            concurrency: self.concurrency,
            pending_requests: self.pending_requests,
        }
    }
}

/// Final/periodic report shape: counts, rate meter, millisecond
/// distributions.
#[derive(Debug, Clone)]
pub struct Report {
    pub timestamp_ms: u64,
    pub scenarios_created: u64,
    pub scenarios_completed: u64,
    pub requests_completed: u64,
    pub rps: RpsReport,
    pub latency: DistributionReport,
    pub scenario_duration: DistributionReport,
    pub codes: BTreeMap<u16, u64>,
    pub errors: BTreeMap<String, u64>,
    pub matches: u64,
    pub custom_stats: BTreeMap<String, CustomStatReport>,
    pub concurrency: u64,
    pub pending_requests: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RpsReport {
    pub mean: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct CustomStatReport {
    pub count: u64,
    pub mean: f64,
    pub stdev: f64,
    pub min: f64,
    pub max: f64,
}

/// min/max/median/p95/p99 in milliseconds, rounded to two decimals.
/// All `None` when no samples were recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistributionReport {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub median: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

impl DistributionReport {
    fn from_histogram_us(h: &Histogram<u64>) -> Self {
        #[allow(clippy::len_zero)]
        if h.len() == 0 {
            return Self::default();
        }

        let ms = |us: u64| round2(us as f64 / 1000.0);

        Self {
            min: Some(ms(h.min())),
            max: Some(ms(h.max())),
            median: Some(ms(h.value_at_quantile(0.50))),
            p95: Some(ms(h.value_at_quantile(0.95))),
            p99: Some(ms(h.value_at_quantile(0.99))),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
