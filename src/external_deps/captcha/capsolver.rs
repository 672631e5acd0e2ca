//! CapSolver task-based solving client.
//!
//! Protocol: `POST /createTask` registers the solve job, then
//! `POST /getTaskResult` is polled until the task reports `ready`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::sleep;

use super::{
    CaptchaError, CaptchaProvider, CaptchaResult, CaptchaSolveRequest, CaptchaSolveResult,
    CaptchaType, ProviderTiming,
};

const DEFAULT_BASE_URL: &str = "https://api.capsolver.com";

/// CapSolver API adapter.
#[derive(Debug, Clone)]
pub struct CapSolverClient {
    api_key: String,
    base_url: String,
    timing: ProviderTiming,
    client: reqwest::Client,
}

impl CapSolverClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Custom endpoint, mainly for tests.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let timing = ProviderTiming::capsolver_default();
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

    fn task_type(captcha_type: CaptchaType) -> &'static str {
        match captcha_type {
            CaptchaType::Turnstile => "TurnstileTaskProxyLess",
            CaptchaType::RecaptchaV2 => "ReCaptchaV2TaskProxyLess",
            CaptchaType::RecaptchaV3 => "ReCaptchaV3TaskProxyLess",
        }
    }

    async fn create_task(&self, request: &CaptchaSolveRequest) -> Result<String, CaptchaError> {
        let mut task = json!({
            "type": Self::task_type(request.captcha_type),
            "websiteURL": request.page_url,
            "websiteKey": request.site_key,
        });
        if let Some(ref action) = request.action {
            task["pageAction"] = json!(action);
        }
        if let Some(min_score) = request.min_score {
            task["minScore"] = json!(min_score);
        }

        let body = json!({ "clientKey": self.api_key, "task": task });
        let response = self
            .client
            .post(format!("{}/createTask", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|err| CaptchaError::RequestFailed(err.to_string()))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|err| CaptchaError::BadResponse(err.to_string()))?;

        if payload.get("errorId").and_then(Value::as_i64).unwrap_or(0) != 0 {
            let description = payload
                .get("errorDescription")
                .and_then(Value::as_str)
                .unwrap_or("createTask rejected");
            return Err(CaptchaError::BadResponse(description.to_string()));
        }

        payload
            .get("taskId")
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| CaptchaError::BadResponse("createTask returned no taskId".to_string()))
    }

    async fn poll_result(&self, task_id: &str) -> CaptchaResult {
        for _ in 0..self.timing.max_polls {
            sleep(self.timing.poll_interval).await;

            let body = json!({ "clientKey": self.api_key, "taskId": task_id });
            let response = self
                .client
                .post(format!("{}/getTaskResult", self.base_url))
                .json(&body)
                .send()
                .await
                .map_err(|err| CaptchaError::RequestFailed(err.to_string()))?;
            let payload: Value = response
                .json()
                .await
                .map_err(|err| CaptchaError::BadResponse(err.to_string()))?;

            if payload.get("errorId").and_then(Value::as_i64).unwrap_or(0) != 0 {
                let description = payload
                    .get("errorDescription")
                    .and_then(Value::as_str)
                    .unwrap_or("getTaskResult rejected");
                return Err(CaptchaError::BadResponse(description.to_string()));
            }

            match payload.get("status").and_then(Value::as_str) {
                Some("ready") => {
                    let solution = payload.get("solution").cloned().unwrap_or(Value::Null);
                    let token = solution
                        .get("token")
                        .and_then(Value::as_str)
                        .or_else(|| solution.get("gRecaptchaResponse").and_then(Value::as_str))
                        .ok_or_else(|| {
                            CaptchaError::BadResponse("ready task without token".to_string())
                        })?
                        .to_string();
                    return Ok(CaptchaSolveResult {
                        provider: self.name().to_string(),
                        token,
                        raw: Some(payload),
                    });
                }
                Some(_) | None => continue,
            }
        }
        Err(CaptchaError::BadResponse(format!(
            "task {task_id} not ready after {} polls",
            self.timing.max_polls
        )))
    }
}

#[async_trait]
impl CaptchaProvider for CapSolverClient {
    fn name(&self) -> &'static str {
        "capsolver"
    }

    async fn solve(&self, request: &CaptchaSolveRequest) -> CaptchaResult {
        let task_id = self.create_task(request).await?;
        log::debug!("capsolver task {task_id} created for {}", request.page_url);
        self.poll_result(&task_id).await
    }
}
