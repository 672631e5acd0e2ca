//! Per-domain engine affinity.
//!
//! Remembers which engine historically worked for a domain and reorders the
//! cascade accordingly. Scores use Laplace smoothing so a single lucky
//! success does not dominate, and response-time EMAs break ties in favour of
//! faster engines. Records expire after a TTL and the whole cache is LRU
//! bounded.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

/// EMA weights: `avg <- 0.7 * avg + 0.3 * sample`.
const EMA_KEEP: f64 = 0.7;
const EMA_BLEND: f64 = 0.3;

/// Samples longer than this are treated as measurement noise.
const MAX_VALID_SAMPLE_MS: f64 = 600_000.0;

/// Tunables for [`EngineAffinityCache`].
#[derive(Debug, Clone)]
pub struct AffinityConfig {
    pub max_entries: usize,
    pub ttl: Duration,
    pub preferred_min_samples: u32,
    pub preferred_min_success_rate: f64,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl: Duration::from_secs(24 * 60 * 60),
            preferred_min_samples: 2,
            preferred_min_success_rate: 0.6,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct EngineStats {
    successes: u32,
    failures: u32,
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
    avg_response_ms: Option<f64>,
}

impl EngineStats {
    fn total(&self) -> u32 {
        self.successes + self.failures
    }

    fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.successes as f64 / self.total() as f64
        }
    }

    /// `(successes + 1) / (total + 2)` — unseen engines score 0.5.
    fn laplace_score(&self) -> f64 {
        (self.successes as f64 + 1.0) / (self.total() as f64 + 2.0)
    }

    fn observe(&mut self, success: bool, response_ms: Option<f64>, now: Instant) {
        if success {
            self.successes = self.successes.saturating_add(1);
            self.last_success = Some(now);
        } else {
            self.failures = self.failures.saturating_add(1);
            self.last_failure = Some(now);
        }

        if let Some(sample) = response_ms
            && sample.is_finite()
            && sample >= 0.0
            && sample <= MAX_VALID_SAMPLE_MS
        {
            self.avg_response_ms = Some(match self.avg_response_ms {
                None => sample,
                Some(avg) => EMA_KEEP * avg + EMA_BLEND * sample,
            });
        }
    }
}

#[derive(Debug, Clone, Default)]
struct DomainRecord {
    engines: HashMap<String, EngineStats>,
    preferred: Option<String>,
    updated_at: Option<Instant>,
}

/// Read-only view of one domain's affinity state.
#[derive(Debug, Clone)]
pub struct DomainAffinitySnapshot {
    pub domain: String,
    pub preferred_engine: Option<String>,
    pub engines: Vec<EngineAffinitySnapshot>,
}

#[derive(Debug, Clone)]
pub struct EngineAffinitySnapshot {
    pub engine: String,
    pub successes: u32,
    pub failures: u32,
    pub success_rate: f64,
    pub last_success: Option<Instant>,
    pub last_failure: Option<Instant>,
    pub avg_response_ms: Option<f64>,
}

/// LRU + TTL cache of per-domain engine performance.
pub struct EngineAffinityCache {
    config: AffinityConfig,
    inner: Mutex<LruCache<String, DomainRecord>>,
}

impl EngineAffinityCache {
    pub fn new(config: AffinityConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_entries.max(1)).expect("nonzero cap");
        Self {
            config,
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Record one engine attempt for a domain.
    pub fn record_result(
        &self,
        domain: &str,
        engine: &str,
        success: bool,
        response_ms: Option<f64>,
    ) {
        let now = Instant::now();
        let mut cache = self.inner.lock().expect("affinity lock poisoned");

        let mut record = cache.pop(domain).unwrap_or_default();
        if self.expired(&record, now) {
            record = DomainRecord::default();
        }

        record
            .engines
            .entry(engine.to_string())
            .or_default()
            .observe(success, response_ms, now);
        record.updated_at = Some(now);
        record.preferred = self.elect_preferred(&record);

        cache.put(domain.to_string(), record);
    }

    /// Cascade order for a domain. Falls back to `default_order` untouched
    /// when nothing (valid) is known.
    pub fn get_ordered_engines(&self, domain: &str, default_order: &[&str]) -> Vec<String> {
        let now = Instant::now();
        let mut cache = self.inner.lock().expect("affinity lock poisoned");

        let Some(record) = cache.get(domain) else {
            return default_order.iter().map(|s| s.to_string()).collect();
        };
        if self.expired(record, now) {
            cache.pop(domain);
            return default_order.iter().map(|s| s.to_string()).collect();
        }

        let mut ranked: Vec<(usize, &str)> = default_order.iter().copied().enumerate().collect();
        let neutral = EngineStats::default();
        ranked.sort_by(|&(index_a, a), &(index_b, b)| {
            let stats_a = record.engines.get(a).unwrap_or(&neutral);
            let stats_b = record.engines.get(b).unwrap_or(&neutral);

            stats_b
                .laplace_score()
                .partial_cmp(&stats_a.laplace_score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| stats_b.total().cmp(&stats_a.total()))
                .then_with(|| stats_b.last_success.cmp(&stats_a.last_success))
                .then_with(|| {
                    let avg_a = stats_a.avg_response_ms.unwrap_or(f64::INFINITY);
                    let avg_b = stats_b.avg_response_ms.unwrap_or(f64::INFINITY);
                    avg_a
                        .partial_cmp(&avg_b)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| index_a.cmp(&index_b))
        });

        ranked.into_iter().map(|(_, name)| name.to_string()).collect()
    }

    /// Engine with enough samples and a good enough rate, or `None`.
    pub fn get_preferred_engine(&self, domain: &str) -> Option<String> {
        let now = Instant::now();
        let mut cache = self.inner.lock().expect("affinity lock poisoned");
        let record = cache.get(domain)?;
        if self.expired(record, now) {
            cache.pop(domain);
            return None;
        }
        record.preferred.clone()
    }

    /// Read-only view; expires the record lazily like any other access.
    pub fn get_domain_snapshot(&self, domain: &str) -> Option<DomainAffinitySnapshot> {
        let now = Instant::now();
        let mut cache = self.inner.lock().expect("affinity lock poisoned");
        let record = cache.get(domain)?;
        if self.expired(record, now) {
            cache.pop(domain);
            return None;
        }

        let mut engines: Vec<EngineAffinitySnapshot> = record
            .engines
            .iter()
            .map(|(name, stats)| EngineAffinitySnapshot {
                engine: name.clone(),
                successes: stats.successes,
                failures: stats.failures,
                success_rate: stats.success_rate(),
                last_success: stats.last_success,
                last_failure: stats.last_failure,
                avg_response_ms: stats.avg_response_ms,
            })
            .collect();
        engines.sort_by(|a, b| a.engine.cmp(&b.engine));

        Some(DomainAffinitySnapshot {
            domain: domain.to_string(),
            preferred_engine: record.preferred.clone(),
            engines,
        })
    }

    /// Forget one domain's record, or everything.
    pub fn reset(&self, domain: Option<&str>) {
        let mut cache = self.inner.lock().expect("affinity lock poisoned");
        match domain {
            Some(domain) => {
                cache.pop(domain);
            }
            None => cache.clear(),
        }
    }

    fn expired(&self, record: &DomainRecord, now: Instant) -> bool {
        match record.updated_at {
            Some(updated_at) => now.duration_since(updated_at) > self.config.ttl,
            None => false,
        }
    }

    fn elect_preferred(&self, record: &DomainRecord) -> Option<String> {
        record
            .engines
            .iter()
            .filter(|(_, stats)| {
                stats.total() >= self.config.preferred_min_samples
                    && stats.success_rate() >= self.config.preferred_min_success_rate
            })
            .max_by(|(_, a), (_, b)| {
                a.success_rate()
                    .partial_cmp(&b.success_rate())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.total().cmp(&b.total()))
            })
            .map(|(name, _)| name.clone())
    }
}

impl Default for EngineAffinityCache {
    fn default() -> Self {
        Self::new(AffinityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_ORDER: &[&str] = &["http", "tlsclient", "hero"];

    #[test]
    fn unknown_domain_keeps_default_order() {
        let cache = EngineAffinityCache::default();
        assert_eq!(
            cache.get_ordered_engines("example.com", DEFAULT_ORDER),
            vec!["http", "tlsclient", "hero"]
        );
    }

    #[test]
    fn successful_engine_moves_to_front() {
        let cache = EngineAffinityCache::default();
        cache.record_result("example.com", "hero", true, Some(900.0));
        cache.record_result("example.com", "hero", true, Some(1100.0));
        cache.record_result("example.com", "http", false, Some(200.0));

        let order = cache.get_ordered_engines("example.com", DEFAULT_ORDER);
        assert_eq!(order[0], "hero");
        // http (one failure, laplace 1/3) ranks below the untouched
        // tlsclient (laplace 1/2).
        assert_eq!(order, vec!["hero", "tlsclient", "http"]);
    }

    #[test]
    fn ema_blends_response_samples() {
        let cache = EngineAffinityCache::default();
        cache.record_result("example.com", "http", true, Some(1000.0));
        cache.record_result("example.com", "http", true, Some(2000.0));

        let snapshot = cache.get_domain_snapshot("example.com").unwrap();
        let http = snapshot.engines.iter().find(|e| e.engine == "http").unwrap();
        // 0.7 * 1000 + 0.3 * 2000
        assert!((http.avg_response_ms.unwrap() - 1300.0).abs() < 1e-6);
    }

    #[test]
    fn invalid_samples_do_not_touch_the_ema() {
        let cache = EngineAffinityCache::default();
        cache.record_result("example.com", "http", true, Some(1000.0));
        cache.record_result("example.com", "http", true, Some(f64::NAN));
        cache.record_result("example.com", "http", true, Some(10_000_000.0));
        cache.record_result("example.com", "http", true, None);

        let snapshot = cache.get_domain_snapshot("example.com").unwrap();
        let http = snapshot.engines.iter().find(|e| e.engine == "http").unwrap();
        assert!((http.avg_response_ms.unwrap() - 1000.0).abs() < 1e-6);
        assert_eq!(http.successes, 4);
    }

    #[test]
    fn preferred_requires_samples_and_rate() {
        let cache = EngineAffinityCache::default();
        assert_eq!(cache.get_preferred_engine("example.com"), None);

        cache.record_result("example.com", "tlsclient", true, None);
        // One sample is below the minimum.
        assert_eq!(cache.get_preferred_engine("example.com"), None);

        cache.record_result("example.com", "tlsclient", true, None);
        assert_eq!(
            cache.get_preferred_engine("example.com").as_deref(),
            Some("tlsclient")
        );

        // An engine with a poor rate never wins.
        cache.record_result("example.com", "http", false, None);
        cache.record_result("example.com", "http", false, None);
        assert_eq!(
            cache.get_preferred_engine("example.com").as_deref(),
            Some("tlsclient")
        );
    }

    #[test]
    fn score_ties_break_by_recency_of_success() {
        let cache = EngineAffinityCache::default();
        // Equal Laplace scores and totals; hero succeeded more recently.
        cache.record_result("example.com", "tlsclient", true, None);
        cache.record_result("example.com", "hero", true, None);

        let order = cache.get_ordered_engines("example.com", DEFAULT_ORDER);
        assert_eq!(order[0], "hero");
        assert_eq!(order[1], "tlsclient");
        assert_eq!(order[2], "http");
    }

    #[test]
    fn ttl_expiry_resets_the_record() {
        let cache = EngineAffinityCache::new(AffinityConfig {
            ttl: Duration::from_millis(5),
            ..AffinityConfig::default()
        });
        cache.record_result("example.com", "hero", true, None);
        cache.record_result("example.com", "hero", true, None);
        assert_eq!(
            cache.get_preferred_engine("example.com").as_deref(),
            Some("hero")
        );

        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.get_preferred_engine("example.com"), None);
        assert_eq!(
            cache.get_ordered_engines("example.com", DEFAULT_ORDER),
            vec!["http", "tlsclient", "hero"]
        );
    }

    #[test]
    fn reset_clears_one_domain_or_everything() {
        let cache = EngineAffinityCache::default();
        cache.record_result("a.com", "hero", true, None);
        cache.record_result("b.com", "http", true, None);

        cache.reset(Some("a.com"));
        assert!(cache.get_domain_snapshot("a.com").is_none());
        assert!(cache.get_domain_snapshot("b.com").is_some());
        assert_eq!(
            cache.get_ordered_engines("a.com", DEFAULT_ORDER),
            vec!["http", "tlsclient", "hero"]
        );

        cache.reset(None);
        assert!(cache.get_domain_snapshot("b.com").is_none());
    }

    #[test]
    fn lru_evicts_oldest_domain() {
        let cache = EngineAffinityCache::new(AffinityConfig {
            max_entries: 2,
            ..AffinityConfig::default()
        });
        cache.record_result("a.com", "http", true, None);
        cache.record_result("b.com", "http", true, None);
        // Touch a.com so b.com becomes the LRU entry.
        let _ = cache.get_ordered_engines("a.com", DEFAULT_ORDER);
        cache.record_result("c.com", "http", true, None);

        assert!(cache.get_domain_snapshot("a.com").is_some());
        assert!(cache.get_domain_snapshot("b.com").is_none());
        assert!(cache.get_domain_snapshot("c.com").is_some());
    }
}
