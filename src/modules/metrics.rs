//! Acquisition metrics.
//!
//! Aggregated global and per-domain statistics with latency percentiles and
//! per-engine success counts for observability.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Aggregated metrics across all domains.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub total_acquisitions: u64,
    pub successes: u64,
    pub failures: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_acquisitions: 0,
            successes: 0,
            failures: 0,
            average_latency: None,
            p95_latency: None,
        }
    }
}

/// Domain-scoped metrics snapshot.
#[derive(Debug, Clone)]
pub struct DomainStats {
    pub domain: String,
    pub total_acquisitions: u64,
    pub successes: u64,
    pub failures: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub consecutive_failures: u32,
    pub last_status: Option<u16>,
    /// Successful acquisitions per engine name.
    pub engine_successes: HashMap<String, u64>,
}

impl DomainStats {
    fn from_accumulator(domain: &str, acc: &DomainAccumulator) -> Self {
        let (avg, p95) = acc.latency_stats();
        Self {
            domain: domain.to_string(),
            total_acquisitions: acc.total,
            successes: acc.successes,
            failures: acc.failures,
            average_latency: avg,
            p95_latency: p95,
            consecutive_failures: acc.consecutive_failures,
            last_status: acc.last_status,
            engine_successes: acc.engine_successes.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub domains: Vec<DomainStats>,
}

#[derive(Debug)]
struct DomainAccumulator {
    total: u64,
    successes: u64,
    failures: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
    consecutive_failures: u32,
    last_status: Option<u16>,
    engine_successes: HashMap<String, u64>,
}

impl DomainAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            total: 0,
            successes: 0,
            failures: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            consecutive_failures: 0,
            last_status: None,
            engine_successes: HashMap::new(),
        }
    }

    fn record_success(&mut self, engine: &str, status: u16, latency: Duration) {
        self.total += 1;
        self.successes += 1;
        self.consecutive_failures = 0;
        self.last_status = Some(status);
        *self.engine_successes.entry(engine.to_string()).or_insert(0) += 1;
        self.push_latency(latency);
    }

    fn record_failure(&mut self, status: Option<u16>) {
        self.total += 1;
        self.failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_status = status;
    }

    fn push_latency(&mut self, latency: Duration) {
        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        if self.latencies.is_empty() {
            return (None, None);
        }
        let mut samples: Vec<_> = self.latencies.iter().cloned().collect();
        samples.sort_unstable();
        let avg =
            samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
        let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        (Some(Duration::from_secs_f64(avg)), Some(samples[p95_index]))
    }
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    domains: HashMap<String, DomainAccumulator>,
}

impl MetricsState {
    fn accumulator_mut(&mut self, domain: &str) -> &mut DomainAccumulator {
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainAccumulator::new(self.max_window))
    }
}

/// Thread-safe metrics collector fed by the scraper facade.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(128)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                global: GlobalStats::default(),
                max_window: window.max(16),
                domains: HashMap::new(),
            })),
        }
    }

    /// Record a completed acquisition.
    pub fn record_acquisition(&self, domain: &str, engine: &str, status: u16, latency: Duration) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.total_acquisitions += 1;
        guard.global.successes += 1;

        if let Some(avg) = guard.global.average_latency {
            let blended = (avg.as_secs_f64() * 0.9) + (latency.as_secs_f64() * 0.1);
            guard.global.average_latency = Some(Duration::from_secs_f64(blended));
        } else {
            guard.global.average_latency = Some(latency);
        }

        guard
            .accumulator_mut(domain)
            .record_success(engine, status, latency);

        let mut samples: Vec<_> = guard
            .domains
            .values()
            .flat_map(|acc| acc.latencies.iter())
            .cloned()
            .collect();
        samples.sort_unstable();
        if !samples.is_empty() {
            let idx = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
            guard.global.p95_latency = Some(samples[idx]);
        }
    }

    /// Record a failed acquisition.
    pub fn record_failure(&self, domain: &str, status: Option<u16>) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.total_acquisitions += 1;
        guard.global.failures += 1;
        guard.accumulator_mut(domain).record_failure(status);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        let domains = guard
            .domains
            .iter()
            .map(|(domain, acc)| DomainStats::from_accumulator(domain, acc))
            .collect();
        MetricsSnapshot {
            global: guard.global.clone(),
            domains,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
