//! Jittered per-instance rate limiting.
//!
//! A single-slot serializer: callers queue on one async lock and are released
//! in FIFO order once the minimum interval (plus jitter) has elapsed. A
//! robots.txt crawl delay can override the configured request rate.

use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Tuning knobs for [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub requests_per_second: f64,
    /// Fraction of the delay randomised in both directions.
    pub jitter_factor: f64,
    /// Overrides `1000 / requests_per_second` when set.
    pub crawl_delay_ms: Option<u64>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            jitter_factor: 0.3,
            crawl_delay_ms: None,
        }
    }
}

struct SlotState {
    last_release: Option<Instant>,
}

/// Serialized token spacer with jitter.
pub struct RateLimiter {
    requests_per_second: f64,
    jitter_factor: f64,
    crawl_delay_ms: StdMutex<Option<u64>>,
    slot: Mutex<SlotState>,
    rng: StdMutex<StdRng>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: RateLimiterConfig, rng: StdRng) -> Self {
        Self {
            requests_per_second: config.requests_per_second.max(0.001),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
            crawl_delay_ms: StdMutex::new(config.crawl_delay_ms),
            slot: Mutex::new(SlotState { last_release: None }),
            rng: StdMutex::new(rng),
        }
    }

    /// Minimum spacing currently in force, in milliseconds.
    pub fn min_interval_ms(&self) -> u64 {
        let override_ms = *self.crawl_delay_ms.lock().expect("crawl delay lock");
        override_ms.unwrap_or_else(|| (1000.0 / self.requests_per_second) as u64)
    }

    /// Install or clear a robots.txt crawl-delay override.
    pub fn set_crawl_delay(&self, delay_ms: Option<u64>) {
        *self.crawl_delay_ms.lock().expect("crawl delay lock") = delay_ms;
    }

    /// Block until this caller may issue its request. Callers are admitted
    /// one at a time in arrival order.
    pub async fn wait_for_next_slot(&self) {
        let mut slot = self.slot.lock().await;
        let min_interval = self.min_interval_ms();

        let elapsed_ms = slot
            .last_release
            .map(|at| at.elapsed().as_millis() as u64)
            .unwrap_or(u64::MAX);

        if elapsed_ms < min_interval {
            let wait = self.jittered_delay(min_interval - elapsed_ms);
            sleep(Duration::from_millis(wait)).await;
        } else if self.jitter_factor > 0.0 {
            // A small stagger even for idle limiters keeps request spacing
            // from looking machine-regular.
            let wait = self.jittered_delay(50);
            if wait > 10 {
                sleep(Duration::from_millis(wait)).await;
            }
        }

        slot.last_release = Some(Instant::now());
    }

    fn jittered_delay(&self, base_ms: u64) -> u64 {
        let draw: f64 = self.rng.lock().expect("rate rng lock").r#gen();
        jittered_delay_with(base_ms, self.jitter_factor, draw)
    }
}

/// `floor(base·(1−f) + draw·base·2f)` for a uniform `draw` in `[0, 1)`.
pub fn jittered_delay_with(base_ms: u64, factor: f64, draw: f64) -> u64 {
    let base = base_ms as f64;
    (base * (1.0 - factor) + draw * base * 2.0 * factor).floor() as u64
}
