//! Browser fetch engine.
//!
//! Last rung of the cascade and the only one that executes JavaScript. It
//! drives a pooled browser page: navigate, wait for paint, optionally ride
//! out a challenge via the [`ChallengeHandler`], and harvest the rendered
//! DOM. With interception enabled, XHR/fetch traffic observed during the
//! load is folded into `EngineResult::artifacts`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;

use super::error::EngineError;
use super::{
    ensure_sufficient_content, EngineArtifacts, EngineConfig, EngineFeatures, EngineMeta,
    EngineResult, FetchEngine,
};
use crate::challenges::detector::LiveChallengeType;
use crate::challenges::handler::ChallengeHandler;
use crate::discovery::ApiInterceptor;
use crate::external_deps::browser::{BrowserError, BrowserPool};

const ENGINE_NAME: &str = "hero";

/// Full-browser engine backed by an injected [`BrowserPool`].
pub struct BrowserEngine {
    config: EngineConfig,
    pool: Option<Arc<dyn BrowserPool>>,
    challenge_handler: Option<Arc<ChallengeHandler>>,
    intercept_apis: bool,
}

impl BrowserEngine {
    pub fn new(pool: Option<Arc<dyn BrowserPool>>) -> Self {
        Self {
            config: EngineConfig {
                name: ENGINE_NAME,
                max_timeout: Duration::from_millis(45_000),
                features: EngineFeatures {
                    tls_fingerprint: false,
                    javascript: true,
                },
            },
            pool,
            challenge_handler: None,
            intercept_apis: false,
        }
    }

    pub fn with_challenge_handler(mut self, handler: Arc<ChallengeHandler>) -> Self {
        self.challenge_handler = Some(handler);
        self
    }

    pub fn with_api_interception(mut self, enabled: bool) -> Self {
        self.intercept_apis = enabled;
        self
    }

    fn map_browser_error(&self, err: BrowserError) -> EngineError {
        match err {
            BrowserError::Unavailable(reason) => EngineError::Unavailable {
                engine: ENGINE_NAME.to_string(),
                reason,
            },
            other => EngineError::other(ENGINE_NAME, other.to_string()),
        }
    }
}

#[async_trait]
impl FetchEngine for BrowserEngine {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn is_available(&self) -> bool {
        self.pool.is_some()
    }

    async fn scrape(&self, meta: &EngineMeta) -> Result<EngineResult, EngineError> {
        let Some(ref pool) = self.pool else {
            return Err(EngineError::Unavailable {
                engine: ENGINE_NAME.to_string(),
                reason: "no browser pool configured".to_string(),
            });
        };

        let started = Instant::now();
        let page = pool.page().await.map_err(|err| self.map_browser_error(err))?;

        let interceptor = self.intercept_apis.then(|| Arc::new(ApiInterceptor::new()));
        if let Some(ref interceptor) = interceptor {
            page.set_request_sink(Some(interceptor.sink()));
        }

        page.goto(&meta.url)
            .await
            .map_err(|err| self.map_browser_error(err))?;
        let _ = page.wait_for_stable().await;

        if let Some(ref handler) = self.challenge_handler {
            let outcome = handler.handle_challenge(page.as_ref()).await;
            if outcome.was_challenge {
                let resolved = outcome
                    .resolution
                    .map(|resolution| resolution.resolved)
                    .unwrap_or(false);
                if !resolved {
                    page.set_request_sink(None);
                    let challenge_type = match outcome.challenge_type {
                        LiveChallengeType::Blocked => "cloudflare-blocked",
                        _ => "cloudflare",
                    };
                    return Err(EngineError::ChallengeDetected {
                        engine: ENGINE_NAME.to_string(),
                        challenge_type: challenge_type.to_string(),
                        waf: None,
                    });
                }
            }
        }

        let html = page.html().await.map_err(|err| self.map_browser_error(err))?;
        let final_url = page
            .current_url()
            .await
            .unwrap_or_else(|_| meta.url.clone());
        page.set_request_sink(None);

        ensure_sufficient_content(ENGINE_NAME, &html)?;

        let artifacts = interceptor.map(|interceptor| EngineArtifacts {
            discovered_apis: interceptor.patterns(),
        });

        Ok(EngineResult {
            html: Bytes::from(html),
            final_url,
            // The page rendered; browsers do not expose the document status.
            status_code: 200,
            content_type: Some("text/html".to_string()),
            headers: http::HeaderMap::new(),
            engine_name: ENGINE_NAME.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            artifacts,
        })
    }
}
