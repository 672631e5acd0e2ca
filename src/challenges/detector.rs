//! Live challenge detection against a rendered page.
//!
//! Unlike the passive WAF detector, this one runs inside a browser session:
//! it reads the current DOM and probes challenge-specific selectors, so it
//! can tell an in-progress interstitial from the real page it eventually
//! resolves into.

use crate::external_deps::browser::{BrowserPage, BrowserError};

/// Cloudflare infrastructure markers inside page HTML.
const INFRA_MARKERS: &[&str] = &["/cdn-cgi/", "cloudflare", "__cf_bm", "cf-ray"];

/// Elements only present while a challenge is being served.
const CHALLENGE_SELECTORS: &[&str] = &[
    "#challenge-running",
    "#challenge-form",
    "#turnstile-wrapper",
    "#cf-hcaptcha-container",
];

/// Interstitial copy, matched case-insensitively.
const CHALLENGE_TEXTS: &[&str] = &["checking if the site connection is secure"];

/// "Waiting for <site> to respond" has a variable middle, so both halves
/// must appear.
const WAITING_PREFIX: &str = "waiting for";
const WAITING_SUFFIX: &str = "to respond";

const BLOCK_TEXT: &str = "sorry, you have been blocked";
const RAY_ID_MARKER: &str = "ray id";

/// Challenge classification for a live page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveChallengeType {
    None,
    JsChallenge,
    Blocked,
}

/// Result of one live detection pass.
#[derive(Debug, Clone)]
pub struct LiveChallengeDetection {
    pub is_challenge: bool,
    pub challenge_type: LiveChallengeType,
    /// 0 or 100 — the live signals are unambiguous when present.
    pub confidence: u8,
    pub signals: Vec<String>,
}

impl LiveChallengeDetection {
    fn none(signals: Vec<String>) -> Self {
        Self {
            is_challenge: false,
            challenge_type: LiveChallengeType::None,
            confidence: 0,
            signals,
        }
    }
}

/// Scans a live page for Cloudflare-style challenge signals.
#[derive(Debug, Default)]
pub struct LiveChallengeDetector;

impl LiveChallengeDetector {
    pub fn new() -> Self {
        Self
    }

    pub async fn detect(&self, page: &dyn BrowserPage) -> LiveChallengeDetection {
        let html = match page.html().await {
            Ok(html) if !html.trim().is_empty() => html,
            Ok(_) | Err(_) => {
                return LiveChallengeDetection::none(vec![
                    "No document available".to_string(),
                ]);
            }
        };
        let html_lower = html.to_lowercase();
        let mut signals = Vec::new();

        for marker in INFRA_MARKERS {
            if html_lower.contains(marker) {
                signals.push(format!("infra marker: {marker}"));
            }
        }

        // A block page is terminal; report it before challenge probing.
        if html_lower.contains(BLOCK_TEXT) && html_lower.contains(RAY_ID_MARKER) {
            signals.push(format!("block text: {BLOCK_TEXT}"));
            signals.push(format!("marker: {RAY_ID_MARKER}"));
            return LiveChallengeDetection {
                is_challenge: true,
                challenge_type: LiveChallengeType::Blocked,
                confidence: 100,
                signals,
            };
        }

        let mut challenge_hit = false;

        for selector in CHALLENGE_SELECTORS {
            match page.query_selector_exists(selector).await {
                Ok(true) => {
                    challenge_hit = true;
                    signals.push(format!("selector: {selector}"));
                }
                Ok(false) => {}
                Err(err) => {
                    // A broken selector probe must not mask the remaining
                    // checks.
                    signals.push(format!("selector {selector} failed: {err}"));
                }
            }
        }

        for text in CHALLENGE_TEXTS {
            if html_lower.contains(text) {
                challenge_hit = true;
                signals.push(format!("text: {text}"));
            }
        }
        if html_lower.contains(WAITING_PREFIX) && html_lower.contains(WAITING_SUFFIX) {
            challenge_hit = true;
            signals.push(format!("text: {WAITING_PREFIX} ... {WAITING_SUFFIX}"));
        }

        if challenge_hit {
            LiveChallengeDetection {
                is_challenge: true,
                challenge_type: LiveChallengeType::JsChallenge,
                confidence: 100,
                signals,
            }
        } else {
            LiveChallengeDetection::none(signals)
        }
    }
}

/// Convenience used by the handler when a page handle is gone mid-poll.
pub fn detection_unavailable(err: &BrowserError) -> LiveChallengeDetection {
    LiveChallengeDetection::none(vec![format!("No document available: {err}")])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_deps::browser::RequestSink;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakePage {
        html: Mutex<String>,
        selectors: Mutex<HashSet<String>>,
        failing_selector: Option<String>,
    }

    impl FakePage {
        fn new(html: &str) -> Self {
            Self {
                html: Mutex::new(html.to_string()),
                selectors: Mutex::new(HashSet::new()),
                failing_selector: None,
            }
        }

        fn with_selector(self, selector: &str) -> Self {
            self.selectors.lock().unwrap().insert(selector.to_string());
            self
        }
    }

    #[async_trait]
    impl BrowserPage for FakePage {
        async fn goto(&self, _url: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn wait_for_stable(&self) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn current_url(&self) -> Result<String, BrowserError> {
            Ok("https://example.com/".to_string())
        }
        async fn html(&self) -> Result<String, BrowserError> {
            Ok(self.html.lock().unwrap().clone())
        }
        async fn query_selector_exists(&self, selector: &str) -> Result<bool, BrowserError> {
            if self.failing_selector.as_deref() == Some(selector) {
                return Err(BrowserError::Evaluation("detached frame".to_string()));
            }
            Ok(self.selectors.lock().unwrap().contains(selector))
        }
        async fn evaluate(&self, _script: &str) -> Result<serde_json::Value, BrowserError> {
            Ok(serde_json::Value::Null)
        }
        fn set_request_sink(&self, _sink: Option<RequestSink>) {}
    }

    #[tokio::test]
    async fn clean_page_is_not_a_challenge() {
        let page = FakePage::new("<html><body><h1>Welcome</h1></body></html>");
        let detection = LiveChallengeDetector::new().detect(&page).await;
        assert!(!detection.is_challenge);
        assert_eq!(detection.challenge_type, LiveChallengeType::None);
        assert_eq!(detection.confidence, 0);
    }

    #[tokio::test]
    async fn challenge_selector_marks_js_challenge() {
        let page = FakePage::new(
            "<html><body><div>/cdn-cgi/challenge-platform/</div></body></html>",
        )
        .with_selector("#challenge-running");
        let detection = LiveChallengeDetector::new().detect(&page).await;
        assert!(detection.is_challenge);
        assert_eq!(detection.challenge_type, LiveChallengeType::JsChallenge);
        assert_eq!(detection.confidence, 100);
        assert!(detection.signals.iter().any(|s| s.contains("#challenge-running")));
    }

    #[tokio::test]
    async fn connection_check_text_detected() {
        let page = FakePage::new(
            "<html><body>Checking if the site connection is secure</body></html>",
        );
        let detection = LiveChallengeDetector::new().detect(&page).await;
        assert!(detection.is_challenge);
    }

    #[tokio::test]
    async fn block_requires_both_markers() {
        let partial = FakePage::new("<html>Sorry, you have been blocked</html>");
        let detection = LiveChallengeDetector::new().detect(&partial).await;
        assert_ne!(detection.challenge_type, LiveChallengeType::Blocked);

        let full = FakePage::new(
            "<html>Sorry, you have been blocked <footer>Ray ID: abc</footer></html>",
        );
        let detection = LiveChallengeDetector::new().detect(&full).await;
        assert_eq!(detection.challenge_type, LiveChallengeType::Blocked);
        assert_eq!(detection.confidence, 100);
    }

    #[tokio::test]
    async fn selector_failure_is_recorded_not_fatal() {
        let mut page = FakePage::new(
            "<html>waiting for example.com to respond /cdn-cgi/</html>",
        );
        page.failing_selector = Some("#challenge-running".to_string());
        let detection = LiveChallengeDetector::new().detect(&page).await;
        assert!(detection.is_challenge);
        assert!(detection
            .signals
            .iter()
            .any(|s| s.contains("#challenge-running") && s.contains("failed")));
    }

    #[tokio::test]
    async fn empty_document_reports_unavailable() {
        let page = FakePage::new("");
        let detection = LiveChallengeDetector::new().detect(&page).await;
        assert!(!detection.is_challenge);
        assert_eq!(detection.signals, vec!["No document available".to_string()]);
    }
}
