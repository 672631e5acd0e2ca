//! CAPTCHA provider integrations.
//!
//! These adapters give the challenge handler a unified interface over
//! third-party solving services (CapSolver, 2Captcha). The handler stays
//! agnostic of vendor wire formats while still retrieving challenge tokens
//! when a page demands one. Solving never happens in-process.

mod budget;
mod capsolver;
mod multi;
mod sitekey;
mod twocaptcha;

pub use budget::CaptchaBudget;
pub use capsolver::CapSolverClient;
pub use multi::{solve_with_fallback, CaptchaSolver, ProviderKind, ProviderSpec};
pub use sitekey::{extract_site_keys, SiteKey};
pub use twocaptcha::TwoCaptchaClient;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// CAPTCHA widget families the pipeline can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptchaType {
    Turnstile,
    RecaptchaV2,
    RecaptchaV3,
}

impl CaptchaType {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptchaType::Turnstile => "turnstile",
            CaptchaType::RecaptchaV2 => "recaptcha_v2",
            CaptchaType::RecaptchaV3 => "recaptcha_v3",
        }
    }
}

/// Details describing the CAPTCHA a page issued.
#[derive(Debug, Clone)]
pub struct CaptchaSolveRequest {
    pub captcha_type: CaptchaType,
    pub page_url: String,
    pub site_key: String,
    /// reCAPTCHA v3 action, when the page declares one.
    pub action: Option<String>,
    /// reCAPTCHA v3 minimum score.
    pub min_score: Option<f64>,
}

/// Resolved token and provenance.
#[derive(Debug, Clone)]
pub struct CaptchaSolveResult {
    pub provider: String,
    pub token: String,
    pub raw: Option<serde_json::Value>,
}

/// Common result type returned by CAPTCHA providers.
pub type CaptchaResult = Result<CaptchaSolveResult, CaptchaError>;

/// Per-request behaviour shared by provider clients.
#[derive(Debug, Clone)]
pub struct ProviderTiming {
    /// Timeout for each HTTP request to the provider.
    pub request_timeout: Duration,
    /// Interval between result polls.
    pub poll_interval: Duration,
    /// Maximum number of result polls before giving up.
    pub max_polls: usize,
}

impl ProviderTiming {
    pub fn capsolver_default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(1500),
            max_polls: 40,
        }
    }

    pub fn twocaptcha_default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            max_polls: 24,
        }
    }
}

/// Shared interface implemented by CAPTCHA vendors.
#[async_trait]
pub trait CaptchaProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn solve(&self, request: &CaptchaSolveRequest) -> CaptchaResult;
}

/// Errors surfaced by the CAPTCHA pipeline.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha budget exceeded for {domain} ({limit}/day)")]
    BudgetExceeded { domain: String, limit: u32 },
    #[error("no captcha provider configured")]
    NoProvider,
    #[error("captcha provider request failed: {0}")]
    RequestFailed(String),
    #[error("captcha provider returned an unusable response: {0}")]
    BadResponse(String),
    #[error("no captcha site key found on page")]
    SiteKeyNotFound,
    #[error("unsupported captcha: {0}")]
    Unsupported(String),
}

impl CaptchaError {
    /// Whether another provider is worth trying after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaptchaError::RequestFailed(_) | CaptchaError::BadResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_classification() {
        assert!(CaptchaError::RequestFailed("io".into()).is_retryable());
        assert!(CaptchaError::BadResponse("garbage".into()).is_retryable());
        assert!(!CaptchaError::BudgetExceeded {
            domain: "example.com".into(),
            limit: 10
        }
        .is_retryable());
        assert!(!CaptchaError::NoProvider.is_retryable());
        assert!(!CaptchaError::SiteKeyNotFound.is_retryable());
        assert!(!CaptchaError::Unsupported("hcaptcha".into()).is_retryable());
    }
}
