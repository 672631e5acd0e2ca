//! Per-domain circuit breaker.
//!
//! A domain that keeps failing gets cut off for a cooldown period instead of
//! burning engine attempts. States follow the classic closed → open →
//! half-open cycle; the open → half-open transition is lazy, performed by
//! `can_request` once the cooldown has elapsed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Breaker position for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Tunables for [`DomainCircuitBreaker`].
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub half_open_max_attempts: u32,
    pub reset_on_success: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_millis(60_000),
            half_open_max_attempts: 1,
            reset_on_success: true,
        }
    }
}

#[derive(Debug, Clone)]
struct DomainBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_attempts: u32,
}

impl Default for DomainBreaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_attempts: 0,
        }
    }
}

/// Thread-safe per-domain failure governor.
pub struct DomainCircuitBreaker {
    config: BreakerConfig,
    domains: Mutex<HashMap<String, DomainBreaker>>,
}

impl DomainCircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a request to `domain` may proceed. In `open`, performs the
    /// lazy half-open transition once the cooldown has elapsed; in
    /// `half_open`, admits at most `half_open_max_attempts` probes.
    pub fn can_request(&self, domain: &str) -> bool {
        let mut domains = self.domains.lock().expect("breaker lock poisoned");
        let breaker = domains.entry(domain.to_string()).or_default();

        match breaker.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = breaker
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.cooldown {
                    breaker.state = BreakerState::HalfOpen;
                    breaker.half_open_attempts = 1;
                    log::debug!("breaker half-open for {domain}");
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if breaker.half_open_attempts < self.config.half_open_max_attempts {
                    breaker.half_open_attempts += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, domain: &str) {
        let mut domains = self.domains.lock().expect("breaker lock poisoned");
        let breaker = domains.entry(domain.to_string()).or_default();

        match breaker.state {
            BreakerState::HalfOpen => {
                breaker.state = BreakerState::Closed;
                breaker.opened_at = None;
                breaker.half_open_attempts = 0;
                if self.config.reset_on_success {
                    breaker.consecutive_failures = 0;
                }
                log::debug!("breaker closed for {domain}");
            }
            BreakerState::Closed => {
                if self.config.reset_on_success {
                    breaker.consecutive_failures = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self, domain: &str) {
        let mut domains = self.domains.lock().expect("breaker lock poisoned");
        let breaker = domains.entry(domain.to_string()).or_default();

        match breaker.state {
            BreakerState::Closed => {
                breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
                if breaker.consecutive_failures >= self.config.failure_threshold {
                    breaker.state = BreakerState::Open;
                    breaker.opened_at = Some(Instant::now());
                    log::warn!(
                        "breaker open for {domain} after {} consecutive failures",
                        breaker.consecutive_failures
                    );
                }
            }
            BreakerState::HalfOpen => {
                // The probe failed; restart the cooldown from scratch.
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(Instant::now());
                breaker.half_open_attempts = 0;
            }
            BreakerState::Open => {
                // Late failures while already open do not extend the cooldown.
            }
        }
    }

    /// Observational state. Stays `open` past the cooldown until a
    /// `can_request` call performs the transition.
    pub fn state(&self, domain: &str) -> BreakerState {
        self.domains
            .lock()
            .expect("breaker lock poisoned")
            .get(domain)
            .map(|b| b.state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Remaining cooldown, clamped to zero. `None` when not open.
    pub fn cooldown_remaining(&self, domain: &str) -> Option<Duration> {
        let domains = self.domains.lock().expect("breaker lock poisoned");
        let breaker = domains.get(domain)?;
        if breaker.state != BreakerState::Open {
            return None;
        }
        let elapsed = breaker.opened_at?.elapsed();
        Some(self.config.cooldown.saturating_sub(elapsed))
    }

    /// Clear one domain, or everything.
    pub fn reset(&self, domain: Option<&str>) {
        let mut domains = self.domains.lock().expect("breaker lock poisoned");
        match domain {
            Some(domain) => {
                domains.remove(domain);
            }
            None => domains.clear(),
        }
    }
}

impl Default for DomainCircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
