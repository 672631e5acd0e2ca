//! Plain HTTP fetch engine.
//!
//! First rung of the cascade: a native HTTP client with shaped headers. No
//! TLS fingerprinting and no JavaScript, which keeps it fast — most pages
//! still come back fine.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::redirect::Policy;
use tokio::sync::Mutex;

use super::error::EngineError;
use super::{
    classify_challenge, ensure_sufficient_content, find_challenge_pattern, EngineConfig,
    EngineFeatures, EngineMeta, EngineResult, FetchEngine, RequestShaper,
};

const ENGINE_NAME: &str = "http";

/// Reqwest client pool keyed by proxy endpoint.
struct ClientPool {
    timeout: Duration,
    clients: Mutex<HashMap<Option<String>, reqwest::Client>>,
}

impl ClientPool {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, proxy: Option<&str>) -> Result<reqwest::Client, EngineError> {
        let mut guard = self.clients.lock().await;
        let key = proxy.map(str::to_string);
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(Policy::limited(10))
            .timeout(self.timeout);
        if let Some(endpoint) = proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(endpoint)
                    .map_err(|err| EngineError::other(ENGINE_NAME, err.to_string()))?,
            );
        }

        let client = builder
            .build()
            .map_err(|err| EngineError::other(ENGINE_NAME, err.to_string()))?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

/// Always-available baseline engine.
pub struct HttpEngine {
    config: EngineConfig,
    shaper: RequestShaper,
    pool: ClientPool,
}

impl HttpEngine {
    pub fn new(shaper: RequestShaper) -> Self {
        let config = EngineConfig {
            name: ENGINE_NAME,
            max_timeout: Duration::from_millis(10_000),
            features: EngineFeatures::default(),
        };
        let pool = ClientPool::new(config.max_timeout);
        Self {
            config,
            shaper,
            pool,
        }
    }
}

impl Default for HttpEngine {
    fn default() -> Self {
        Self::new(RequestShaper::default())
    }
}

#[async_trait]
impl FetchEngine for HttpEngine {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn scrape(&self, meta: &EngineMeta) -> Result<EngineResult, EngineError> {
        let started = Instant::now();
        let headers = self.shaper.build_headers(meta, false);
        let client = self.pool.client(meta.options.proxy.as_deref()).await?;

        let mut request = client.get(meta.url.as_str());
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                EngineError::Timeout {
                    engine: ENGINE_NAME.to_string(),
                    timeout_ms: self.config.max_timeout.as_millis() as u64,
                }
            } else {
                EngineError::other(ENGINE_NAME, err.to_string())
            }
        })?;

        let status = response.status();
        let final_url = response.url().to_string();
        let response_headers = response.headers().clone();
        let content_type = response_headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|err| EngineError::other(ENGINE_NAME, err.to_string()))?;
        let body_text = String::from_utf8_lossy(&body).to_string();

        if status.as_u16() >= 400 {
            if find_challenge_pattern(&body_text).is_some() {
                return Err(EngineError::ChallengeDetected {
                    engine: ENGINE_NAME.to_string(),
                    challenge_type: classify_challenge(&body_text).to_string(),
                    waf: None,
                });
            }
            return Err(EngineError::Http {
                engine: ENGINE_NAME.to_string(),
                status: status.as_u16(),
                status_text: status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
            });
        }

        if find_challenge_pattern(&body_text).is_some() {
            return Err(EngineError::ChallengeDetected {
                engine: ENGINE_NAME.to_string(),
                challenge_type: classify_challenge(&body_text).to_string(),
                waf: None,
            });
        }

        ensure_sufficient_content(ENGINE_NAME, &body_text)?;

        Ok(EngineResult {
            html: Bytes::from(body),
            final_url,
            status_code: status.as_u16(),
            content_type,
            headers: response_headers,
            engine_name: ENGINE_NAME.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            artifacts: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> String {
        format!("<html><body><p>{body}</p></body></html>")
    }

    #[tokio::test]
    async fn fetches_ordinary_page() {
        let mut server = mockito::Server::new_async().await;
        let body = page(&"lorem ipsum dolor sit amet ".repeat(10));
        server
            .mock("GET", "/article")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body(body.as_str())
            .create_async()
            .await;

        let engine = HttpEngine::default();
        let meta = EngineMeta::new(format!("{}/article", server.url()));
        let result = engine.scrape(&meta).await.unwrap();
        assert_eq!(result.engine_name, "http");
        assert_eq!(result.status_code, 200);
        assert!(result.content_type.unwrap().starts_with("text/html"));
    }

    #[tokio::test]
    async fn challenge_markup_raises_challenge_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/cf")
            .with_status(503)
            .with_body(
                "<html>cf-browser-verification \
                 <script src=\"/cdn-cgi/challenge-platform/h\"></script></html>",
            )
            .create_async()
            .await;

        let engine = HttpEngine::default();
        let meta = EngineMeta::new(format!("{}/cf", server.url()));
        let err = engine.scrape(&meta).await.unwrap_err();
        match err {
            EngineError::ChallengeDetected { challenge_type, .. } => {
                assert_eq!(challenge_type, "cloudflare");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn challenge_markup_on_success_status_still_raises() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/soft")
            .with_status(200)
            .with_body("<html>are you a robot?</html>")
            .create_async()
            .await;

        let engine = HttpEngine::default();
        let meta = EngineMeta::new(format!("{}/soft", server.url()));
        let err = engine.scrape(&meta).await.unwrap_err();
        match err {
            EngineError::ChallengeDetected { challenge_type, .. } => {
                assert_eq!(challenge_type, "bot-detection");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn plain_error_status_raises_http_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("<html>not found</html>")
            .create_async()
            .await;

        let engine = HttpEngine::default();
        let meta = EngineMeta::new(format!("{}/missing", server.url()));
        let err = engine.scrape(&meta).await.unwrap_err();
        match err {
            EngineError::Http { status, .. } => assert_eq!(status, 404),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn thin_page_raises_insufficient_content() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/thin")
            .with_status(200)
            .with_body("<html><body>ok</body></html>")
            .create_async()
            .await;

        let engine = HttpEngine::default();
        let meta = EngineMeta::new(format!("{}/thin", server.url()));
        let err = engine.scrape(&meta).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientContent { .. }));
    }
}
