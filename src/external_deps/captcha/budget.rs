//! Per-domain daily solve budget.
//!
//! Paid solver APIs bill per captcha; a misbehaving site must not drain the
//! account. Counters are keyed by UTC day and domain, so they roll over at
//! midnight UTC without any timer.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use url::Url;

use super::CaptchaError;

/// Process-local counter of solves per `(UTC day, domain)`.
#[derive(Debug)]
pub struct CaptchaBudget {
    max_per_domain_per_day: u32,
    counters: Mutex<HashMap<String, u32>>,
}

impl CaptchaBudget {
    pub fn new(max_per_domain_per_day: u32) -> Self {
        Self {
            max_per_domain_per_day,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve one solve for the page's domain, or fail with a
    /// non-retryable budget error.
    pub fn check_and_record(&self, page_url: &str) -> Result<(), CaptchaError> {
        self.check_and_record_on(page_url, Utc::now().date_naive())
    }

    /// Date-injected variant for deterministic tests.
    pub fn check_and_record_on(
        &self,
        page_url: &str,
        day: NaiveDate,
    ) -> Result<(), CaptchaError> {
        let domain = domain_of(page_url);
        let key = format!("{}:{domain}", day.format("%Y-%m-%d"));

        let mut counters = self.counters.lock().expect("budget lock poisoned");
        let count = counters.entry(key).or_insert(0);
        if *count >= self.max_per_domain_per_day {
            return Err(CaptchaError::BudgetExceeded {
                domain,
                limit: self.max_per_domain_per_day,
            });
        }
        *count += 1;
        Ok(())
    }

    /// Solves consumed today by the page's domain.
    pub fn used_today(&self, page_url: &str) -> u32 {
        let key = format!(
            "{}:{}",
            Utc::now().date_naive().format("%Y-%m-%d"),
            domain_of(page_url)
        );
        *self
            .counters
            .lock()
            .expect("budget lock poisoned")
            .get(&key)
            .unwrap_or(&0)
    }
}

fn domain_of(page_url: &str) -> String {
    Url::parse(page_url)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_else(|| "unknown".to_string())
}
