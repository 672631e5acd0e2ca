//! 2Captcha form-based solving client.
//!
//! Protocol: a form `POST /in.php` enqueues the captcha and answers
//! `OK|<id>`; `POST /res.php` is polled with `action=get` until the token
//! arrives as `OK|<token>`.

use async_trait::async_trait;
use tokio::time::sleep;

use super::{
    CaptchaError, CaptchaProvider, CaptchaResult, CaptchaSolveRequest, CaptchaSolveResult,
    CaptchaType, ProviderTiming,
};

const DEFAULT_BASE_URL: &str = "https://2captcha.com";
const NOT_READY: &str = "CAPCHA_NOT_READY";

/// 2Captcha API adapter.
#[derive(Debug, Clone)]
pub struct TwoCaptchaClient {
    api_key: String,
    base_url: String,
    timing: ProviderTiming,
    client: reqwest::Client,
}

impl TwoCaptchaClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Custom endpoint, mainly for tests.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let timing = ProviderTiming::twocaptcha_default();
        let client = reqwest::Client::builder()
            .timeout(timing.request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timing,
            client,
        }
    }

    pub fn with_timing(mut self, timing: ProviderTiming) -> Self {
        self.timing = timing;
        self
    }

    async fn submit(&self, request: &CaptchaSolveRequest) -> Result<String, CaptchaError> {
        let mut form: Vec<(&str, String)> = vec![
            ("key", self.api_key.clone()),
            ("method", "userrecaptcha".to_string()),
            ("googlekey", request.site_key.clone()),
            ("pageurl", request.page_url.clone()),
        ];
        if request.captcha_type == CaptchaType::RecaptchaV3 {
            form.push(("version", "v3".to_string()));
            if let Some(ref action) = request.action {
                form.push(("action", action.clone()));
            }
            if let Some(min_score) = request.min_score {
                form.push(("min_score", min_score.to_string()));
            }
        }

        let response = self
            .client
            .post(format!("{}/in.php", self.base_url))
            .form(&form)
            .send()
            .await
            .map_err(|err| CaptchaError::RequestFailed(err.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|err| CaptchaError::BadResponse(err.to_string()))?;

        match body.trim().split_once('|') {
            Some(("OK", id)) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(CaptchaError::BadResponse(format!(
                "in.php answered `{}`",
                body.trim()
            ))),
        }
    }

    async fn poll(&self, request_id: &str) -> CaptchaResult {
        for _ in 0..self.timing.max_polls {
            sleep(self.timing.poll_interval).await;

            let form = [
                ("key", self.api_key.as_str()),
                ("action", "get"),
                ("id", request_id),
            ];
            let response = self
                .client
                .post(format!("{}/res.php", self.base_url))
                .form(&form)
                .send()
                .await
                .map_err(|err| CaptchaError::RequestFailed(err.to_string()))?;
            let body = response
                .text()
                .await
                .map_err(|err| CaptchaError::BadResponse(err.to_string()))?;
            let body = body.trim().to_string();

            if body == NOT_READY {
                continue;
            }
            if let Some(("OK", token)) = body.split_once('|') {
                return Ok(CaptchaSolveResult {
                    provider: self.name().to_string(),
                    token: token.to_string(),
                    raw: Some(serde_json::Value::String(body.clone())),
                });
            }
            return Err(CaptchaError::BadResponse(format!(
                "res.php answered `{body}`"
            )));
        }
        Err(CaptchaError::BadResponse(format!(
            "request {request_id} not ready after {} polls",
            self.timing.max_polls
        )))
    }
}

#[async_trait]
impl CaptchaProvider for TwoCaptchaClient {
    fn name(&self) -> &'static str {
        "2captcha"
    }

    async fn solve(&self, request: &CaptchaSolveRequest) -> CaptchaResult {
        let request_id = self.submit(request).await?;
        log::debug!("2captcha request {request_id} submitted for {}", request.page_url);
        self.poll(&request_id).await
    }
}
