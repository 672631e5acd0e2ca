//! End-to-end acquisition scenarios across the cascade, breaker, affinity,
//! robots gate, and captcha fallback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use ironfetch::engines::affinity::EngineAffinityCache;
use ironfetch::engines::breaker::{BreakerConfig, DomainCircuitBreaker};
use ironfetch::engines::http::HttpEngine;
use ironfetch::engines::orchestrator::{EngineOrchestrator, OrchestratorConfig};
use ironfetch::engines::tlsclient::{TlsClientEngine, TlsTransport, TransportResponse};
use ironfetch::engines::{EngineMeta, EngineResult, FetchEngine, RequestShaper};
use ironfetch::external_deps::browser::{
    BrowserError, BrowserPage, BrowserPool, RequestSink,
};
use ironfetch::modules::rate_limit::RateLimiterConfig;
use ironfetch::{
    CaptchaError, CaptchaProvider, CaptchaSolveRequest, CaptchaSolveResult, CaptchaSolver,
    CaptchaType, EngineError, Scraper, ScraperConfig,
};

fn long_page(text: &str) -> String {
    format!("<html><body><p>{}</p></body></html>", text.repeat(12))
}

const CHALLENGE_PAGE: &str = "<html><head><title>Just a moment...</title></head>\
<body>cf-browser-verification \
<script src=\"/cdn-cgi/challenge-platform/h/b/orchestrate\"></script></body></html>";

/// TLS transport that always answers with a healthy page.
struct HealthyTransport;

#[async_trait]
impl TlsTransport for HealthyTransport {
    async fn fetch(
        &self,
        url: &str,
        _headers: &HashMap<String, String>,
        _proxy: Option<&str>,
    ) -> Result<TransportResponse, ironfetch::engines::tlsclient::TransportError> {
        Ok(TransportResponse {
            status: 200,
            final_url: url.to_string(),
            headers: http::HeaderMap::new(),
            body: Bytes::from(long_page("served by the fingerprinting transport ")),
        })
    }
}

/// Browser pool whose pages always render a healthy document.
struct HealthyPool;

struct HealthyPage;

#[async_trait]
impl BrowserPage for HealthyPage {
    async fn goto(&self, _url: &str) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn wait_for_stable(&self) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok("https://rendered.example/".to_string())
    }
    async fn html(&self) -> Result<String, BrowserError> {
        Ok(long_page("rendered by the browser engine "))
    }
    async fn query_selector_exists(&self, _selector: &str) -> Result<bool, BrowserError> {
        Ok(false)
    }
    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value, BrowserError> {
        Ok(serde_json::Value::Null)
    }
    fn set_request_sink(&self, _sink: Option<RequestSink>) {}
}

#[async_trait]
impl BrowserPool for HealthyPool {
    async fn page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        Ok(Box::new(HealthyPage))
    }
}

fn fast_config() -> ScraperConfig {
    ScraperConfig {
        rate_limit: RateLimiterConfig {
            requests_per_second: 1000.0,
            jitter_factor: 0.0,
            crawl_delay_ms: None,
        },
        ..ScraperConfig::default()
    }
}

// Scenario 1: the HTTP engine succeeds on the first try.
#[tokio::test]
async fn http_engine_succeeds_first_try() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/robots.txt")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", "/article")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(long_page("Lorem ipsum dolor sit amet consectetur "))
        .create_async()
        .await;

    let scraper = Scraper::builder().with_config(fast_config()).build();
    let outcome = scraper
        .scrape_url(&format!("{}/article", server.url()))
        .await;

    assert!(outcome.success, "error: {:?}", outcome.error);
    let result = outcome.result.unwrap();
    assert_eq!(result.engine_name, "http");
    assert_eq!(result.status_code, 200);
    assert_eq!(outcome.attempted_engines, vec!["http"]);
}

// Scenario 2: a Cloudflare challenge on the first engine cascades to the
// TLS engine, which succeeds.
#[tokio::test]
async fn challenge_cascades_to_tls_engine() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/guarded")
        .with_status(503)
        .with_body(CHALLENGE_PAGE)
        .create_async()
        .await;

    let shaper = RequestShaper::default();
    let orchestrator = EngineOrchestrator::new(
        vec![
            Arc::new(HttpEngine::new(shaper.clone())) as Arc<dyn FetchEngine>,
            Arc::new(TlsClientEngine::new(
                shaper,
                Some(Arc::new(HealthyTransport)),
            )),
        ],
        OrchestratorConfig::default(),
    );

    let meta = EngineMeta::new(format!("{}/guarded", server.url()));
    let outcome = orchestrator.scrape(&meta).await.unwrap();

    assert_eq!(outcome.result.engine_name, "tlsclient");
    assert_eq!(outcome.attempted_engines, vec!["http", "tlsclient"]);
    match outcome.engine_errors.get("http") {
        Some(EngineError::ChallengeDetected { challenge_type, .. }) => {
            assert_eq!(challenge_type, "cloudflare");
        }
        other => panic!("expected a challenge error from http, got {other:?}"),
    }
}

/// Engine that always fails with a generic retryable error.
struct AlwaysFailing {
    config: ironfetch::EngineConfig,
    calls: AtomicUsize,
}

impl AlwaysFailing {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            config: ironfetch::EngineConfig {
                name,
                max_timeout: Duration::from_millis(200),
                features: Default::default(),
            },
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FetchEngine for AlwaysFailing {
    fn config(&self) -> &ironfetch::EngineConfig {
        &self.config
    }
    fn is_available(&self) -> bool {
        true
    }
    async fn scrape(&self, _meta: &EngineMeta) -> Result<EngineResult, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::other(self.config.name, "synthetic failure"))
    }
}

// Scenario 3: with failure_threshold=2 the third scrape is rejected by the
// breaker with no engine invocations.
#[tokio::test]
async fn breaker_opens_after_two_failed_scrapes() {
    let failing = AlwaysFailing::new("http");
    let breaker = Arc::new(DomainCircuitBreaker::new(BreakerConfig {
        failure_threshold: 2,
        cooldown: Duration::from_secs(60),
        half_open_max_attempts: 1,
        reset_on_success: true,
    }));
    let orchestrator = EngineOrchestrator::new(
        vec![failing.clone() as Arc<dyn FetchEngine>],
        OrchestratorConfig::default(),
    )
    .with_breaker(breaker);

    let meta = EngineMeta::new("https://example.com/x");
    for _ in 0..2 {
        let err = orchestrator.scrape(&meta).await.unwrap_err();
        assert!(matches!(err, EngineError::AllEnginesFailed { .. }));
    }
    assert_eq!(failing.calls.load(Ordering::SeqCst), 2);

    let err = orchestrator.scrape(&meta).await.unwrap_err();
    match err {
        EngineError::AllEnginesFailed {
            attempted_engines,
            blocked_by_circuit_breaker,
            ..
        } => {
            assert!(attempted_engines.is_empty());
            assert!(blocked_by_circuit_breaker);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
}

// Scenario 4: after the first scrape falls through to the browser engine,
// affinity sends the second scrape straight there.
#[tokio::test]
async fn affinity_prefers_the_engine_that_worked() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/spa")
        .with_status(503)
        .with_body(CHALLENGE_PAGE)
        .expect_at_least(1)
        .create_async()
        .await;

    let shaper = RequestShaper::default();
    let http = Arc::new(HttpEngine::new(shaper)) as Arc<dyn FetchEngine>;
    let hero =
        Arc::new(ironfetch::BrowserEngine::new(Some(Arc::new(HealthyPool)))) as Arc<dyn FetchEngine>;
    let orchestrator = EngineOrchestrator::new(
        vec![http, hero],
        OrchestratorConfig::default(),
    )
    .with_affinity(Arc::new(EngineAffinityCache::default()));

    let meta = EngineMeta::new(format!("{}/spa", server.url()));

    let first = orchestrator.scrape(&meta).await.unwrap();
    assert_eq!(first.attempted_engines, vec!["http", "hero"]);
    assert_eq!(first.result.engine_name, "hero");

    let second = orchestrator.scrape(&meta).await.unwrap();
    assert_eq!(second.attempted_engines, vec!["hero"]);
    assert_eq!(second.result.engine_name, "hero");
}

// Scenario 5: robots.txt disallow surfaces as a per-URL failure whose
// message names robots.txt, while the batch keeps going.
#[tokio::test]
async fn robots_disallow_blocks_the_url() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/robots.txt")
        .with_body("User-agent: *\nDisallow: /blocked\n")
        .create_async()
        .await;

    let scraper = Scraper::builder().with_config(fast_config()).build();
    let outcome = scraper
        .scrape_url(&format!("{}/blocked/x", server.url()))
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().contains("robots.txt"));
    assert!(outcome.attempted_engines.is_empty());
}

/// Captcha provider scripted for fallback scenarios.
struct ScriptedCaptcha {
    name: &'static str,
    calls: AtomicUsize,
    outcome: fn() -> Result<CaptchaSolveResult, CaptchaError>,
}

#[async_trait]
impl CaptchaProvider for ScriptedCaptcha {
    fn name(&self) -> &'static str {
        self.name
    }
    async fn solve(
        &self,
        _request: &CaptchaSolveRequest,
    ) -> Result<CaptchaSolveResult, CaptchaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.outcome)()
    }
}

fn captcha_request() -> CaptchaSolveRequest {
    CaptchaSolveRequest {
        captcha_type: CaptchaType::Turnstile,
        page_url: "https://example.com/login".to_string(),
        site_key: "0xKEY".to_string(),
        action: None,
        min_score: None,
    }
}

// Scenario 6a: a retryable primary failure falls back to the second
// provider, whose identity is preserved in the result.
#[tokio::test]
async fn captcha_fallback_on_retryable_error() {
    let primary = Arc::new(ScriptedCaptcha {
        name: "capsolver",
        calls: AtomicUsize::new(0),
        outcome: || Err(CaptchaError::RequestFailed("connect refused".to_string())),
    });
    let fallback = Arc::new(ScriptedCaptcha {
        name: "2captcha",
        calls: AtomicUsize::new(0),
        outcome: || {
            Ok(CaptchaSolveResult {
                provider: "2captcha".to_string(),
                token: "tok".to_string(),
                raw: None,
            })
        },
    });
    let solver = CaptchaSolver::new(
        vec![
            primary.clone() as Arc<dyn CaptchaProvider>,
            fallback.clone(),
        ],
        None,
    );

    let result = solver.solve(&captcha_request()).await.unwrap();
    assert_eq!(result.provider, "2captcha");
    assert_eq!(result.token, "tok");
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
}

// Scenario 6b: non-retryable primary errors never reach the fallback.
#[tokio::test]
async fn captcha_fallback_skipped_on_terminal_error() {
    let primary = Arc::new(ScriptedCaptcha {
        name: "capsolver",
        calls: AtomicUsize::new(0),
        outcome: || Err(CaptchaError::Unsupported("image captcha".to_string())),
    });
    let fallback = Arc::new(ScriptedCaptcha {
        name: "2captcha",
        calls: AtomicUsize::new(0),
        outcome: || {
            Ok(CaptchaSolveResult {
                provider: "2captcha".to_string(),
                token: "tok".to_string(),
                raw: None,
            })
        },
    });
    let solver = CaptchaSolver::new(
        vec![
            primary as Arc<dyn CaptchaProvider>,
            fallback.clone(),
        ],
        None,
    );

    let err = solver.solve(&captcha_request()).await.unwrap_err();
    assert!(matches!(err, CaptchaError::Unsupported(_)));
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
}

// Forced engine: no other engine is ever invoked, even when it fails.
#[tokio::test]
async fn forced_engine_never_touches_the_rest() {
    let failing = AlwaysFailing::new("tlsclient");
    let other = AlwaysFailing::new("http");
    let orchestrator = EngineOrchestrator::new(
        vec![
            other.clone() as Arc<dyn FetchEngine>,
            failing.clone(),
        ],
        OrchestratorConfig {
            force_engine: Some("tlsclient".to_string()),
            ..OrchestratorConfig::default()
        },
    );

    let err = orchestrator
        .scrape(&EngineMeta::new("https://example.com/"))
        .await
        .unwrap_err();
    match err {
        EngineError::AllEnginesFailed {
            attempted_engines, ..
        } => assert_eq!(attempted_engines, vec!["tlsclient"]),
        unexpected => panic!("unexpected error: {unexpected}"),
    }
    assert_eq!(other.calls.load(Ordering::SeqCst), 0);
}
