//! Active challenge resolution.
//!
//! Cloudflare-style interstitials resolve on their own (JS proof-of-work) or
//! after a CAPTCHA token is submitted. The handler polls the live page for
//! either outcome: navigation away from the challenge URL, or the challenge
//! signals disappearing in place. Detection failures never abort a poll —
//! the page may be mid-navigation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::challenges::detector::{LiveChallengeDetector, LiveChallengeType};
use crate::external_deps::browser::BrowserPage;
use crate::external_deps::captcha::{
    extract_site_keys, CaptchaSolveRequest, CaptchaSolver, CaptchaType, SiteKey,
};

/// How a challenge stopped being a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMethod {
    UrlRedirect,
    SignalsCleared,
    Timeout,
}

/// Outcome of waiting on a live challenge.
#[derive(Debug, Clone, Copy)]
pub struct ChallengeResolution {
    pub resolved: bool,
    pub method: ResolutionMethod,
    pub waited_ms: u64,
}

/// Outcome of a full `handle_challenge` pass.
#[derive(Debug, Clone)]
pub struct ChallengeOutcome {
    pub was_challenge: bool,
    pub challenge_type: LiveChallengeType,
    pub captcha_attempted: bool,
    pub resolution: Option<ChallengeResolution>,
    pub signals: Vec<String>,
}

/// Tuning for the polling loop.
#[derive(Debug, Clone)]
pub struct ChallengeHandlerConfig {
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for ChallengeHandlerConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(30),
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// Waits out (and optionally solves) live challenges.
pub struct ChallengeHandler {
    detector: LiveChallengeDetector,
    solver: Option<Arc<CaptchaSolver>>,
    config: ChallengeHandlerConfig,
}

impl ChallengeHandler {
    pub fn new(config: ChallengeHandlerConfig) -> Self {
        Self {
            detector: LiveChallengeDetector::new(),
            solver: None,
            config,
        }
    }

    pub fn with_solver(mut self, solver: Arc<CaptchaSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    /// Poll until the page leaves `initial_url` or the challenge signals
    /// clear. Times out after `max_wait`.
    pub async fn wait_for_resolution(
        &self,
        page: &dyn BrowserPage,
        initial_url: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> ChallengeResolution {
        let started = Instant::now();

        loop {
            let waited = started.elapsed();
            if waited >= max_wait {
                return ChallengeResolution {
                    resolved: false,
                    method: ResolutionMethod::Timeout,
                    waited_ms: waited.as_millis() as u64,
                };
            }

            if let Ok(current) = page.current_url().await
                && current != initial_url
            {
                // Give the destination document a moment to finish painting
                // before anyone reads it.
                let _ = page.wait_for_stable().await;
                return ChallengeResolution {
                    resolved: true,
                    method: ResolutionMethod::UrlRedirect,
                    waited_ms: started.elapsed().as_millis() as u64,
                };
            }

            let detection = self.detector.detect(page).await;
            if !detection.is_challenge {
                return ChallengeResolution {
                    resolved: true,
                    method: ResolutionMethod::SignalsCleared,
                    waited_ms: started.elapsed().as_millis() as u64,
                };
            }

            sleep(poll_interval).await;
        }
    }

    /// Detect, optionally solve, then passively wait for resolution.
    ///
    /// At most one CAPTCHA solve is attempted per call, before the wait
    /// begins; token application is best-effort.
    pub async fn handle_challenge(&self, page: &dyn BrowserPage) -> ChallengeOutcome {
        let detection = self.detector.detect(page).await;
        if !detection.is_challenge {
            return ChallengeOutcome {
                was_challenge: false,
                challenge_type: LiveChallengeType::None,
                captcha_attempted: false,
                resolution: None,
                signals: detection.signals,
            };
        }

        if detection.challenge_type == LiveChallengeType::Blocked {
            // A block page never resolves; waiting on it wastes the budget.
            return ChallengeOutcome {
                was_challenge: true,
                challenge_type: LiveChallengeType::Blocked,
                captcha_attempted: false,
                resolution: None,
                signals: detection.signals,
            };
        }

        let initial_url = page.current_url().await.unwrap_or_default();
        let mut captcha_attempted = false;

        if let Some(ref solver) = self.solver
            && let Ok(html) = page.html().await
        {
            let site_keys = extract_site_keys(&html);
            if let Some(site_key) = preferred_site_key(&site_keys) {
                captcha_attempted = true;
                let request = CaptchaSolveRequest {
                    captcha_type: site_key.captcha_type,
                    page_url: initial_url.clone(),
                    site_key: site_key.key.clone(),
                    action: None,
                    min_score: None,
                };
                match solver.solve(&request).await {
                    Ok(result) => {
                        log::info!(
                            "captcha solved by {} for {initial_url}",
                            result.provider
                        );
                        self.apply_token(page, site_key.captcha_type, &result.token)
                            .await;
                    }
                    Err(err) => {
                        log::warn!("captcha solve failed for {initial_url}: {err}");
                    }
                }
            }
        }

        let resolution = self
            .wait_for_resolution(
                page,
                &initial_url,
                self.config.max_wait,
                self.config.poll_interval,
            )
            .await;

        ChallengeOutcome {
            was_challenge: true,
            challenge_type: detection.challenge_type,
            captcha_attempted,
            resolution: Some(resolution),
            signals: detection.signals,
        }
    }

    /// Inject the solved token into the widget's response field and submit
    /// the surrounding form. Every step is optional on real pages, so
    /// failures are logged and ignored.
    async fn apply_token(&self, page: &dyn BrowserPage, captcha_type: CaptchaType, token: &str) {
        let field = match captcha_type {
            CaptchaType::Turnstile => "cf-turnstile-response",
            CaptchaType::RecaptchaV2 | CaptchaType::RecaptchaV3 => "g-recaptcha-response",
        };
        let quoted = serde_json::Value::String(token.to_string()).to_string();
        let script = format!(
            r#"(function() {{
    var el = document.querySelector('textarea[name="{field}"], input[name="{field}"]');
    if (!el) return false;
    el.value = {quoted};
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    var form = el.form || el.closest('form');
    if (form) {{
        if (form.requestSubmit) {{ form.requestSubmit(); }}
        else if (form.submit) {{ form.submit(); }}
        else {{
            var btn = form.querySelector('button[type="submit"], input[type="submit"]');
            if (btn) btn.click();
        }}
    }}
    return true;
}})()"#
        );
        if let Err(err) = page.evaluate(&script).await {
            log::warn!("captcha token application failed: {err}");
        }
    }
}

impl Default for ChallengeHandler {
    fn default() -> Self {
        Self::new(ChallengeHandlerConfig::default())
    }
}

/// Turnstile widgets take priority: on Cloudflare interstitials the
/// reCAPTCHA markup is usually a decoy inside the footer.
fn preferred_site_key(keys: &[SiteKey]) -> Option<&SiteKey> {
    keys.iter()
        .find(|k| k.captcha_type == CaptchaType::Turnstile)
        .or_else(|| keys.first())
}
