//! High level acquisition facade.
//!
//! Wires together the engine cascade, request shaping, robots policy, rate
//! limiting, discovery, and metrics behind a batch-oriented surface.
//! Individual URLs succeed or fail independently; a batch always runs to
//! completion and reports per-URL outcomes.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use url::Url;

use crate::challenges::handler::ChallengeHandler;
use crate::config::ScraperConfig;
use crate::discovery::{DiscoveryProfiler, ProfileCache, SiteProfile};
use crate::engines::affinity::EngineAffinityCache;
use crate::engines::breaker::DomainCircuitBreaker;
use crate::engines::browser::BrowserEngine;
use crate::engines::http::HttpEngine;
use crate::engines::orchestrator::EngineOrchestrator;
use crate::engines::tlsclient::{TlsClientEngine, TlsTransport};
use crate::engines::{
    EngineError, EngineMeta, EngineResult, FetchEngine, RequestShaper, ScrapeOptions,
};
use crate::external_deps::browser::BrowserPool;
use crate::external_deps::captcha::{CaptchaBudget, CaptchaSolver};
use crate::modules::geo::GeoResolver;
use crate::modules::honeypot::{assess_link, HoneypotAssessment, LinkCandidate};
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::modules::rate_limit::RateLimiter;
use crate::modules::robots::RobotsPolicy;
use crate::modules::user_agents::UaRotator;

/// Per-URL acquisition outcome. Failures carry the first usable error
/// message from the cascade (or the robots gate), plus the attempt trail
/// the cascade actually walked.
#[derive(Debug)]
pub struct UrlOutcome {
    pub url: String,
    pub success: bool,
    pub result: Option<EngineResult>,
    pub attempted_engines: Vec<String>,
    /// Per-engine failure messages accumulated before the outcome.
    pub engine_errors: HashMap<String, String>,
    pub error: Option<String>,
}

impl UrlOutcome {
    /// Failure that never reached the cascade (robots gate, bad URL).
    fn rejected(url: &str, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            result: None,
            attempted_engines: Vec::new(),
            engine_errors: HashMap::new(),
            error: Some(error.into()),
        }
    }

    /// Failure out of the cascade, keeping its attempt trail.
    fn from_cascade_error(url: &str, err: EngineError) -> Self {
        let message = err.first_message();
        let (attempted_engines, engine_errors) = match err {
            EngineError::AllEnginesFailed {
                attempted_engines,
                errors,
                ..
            } => (
                attempted_engines,
                errors
                    .into_iter()
                    .map(|(engine, error)| (engine, error.to_string()))
                    .collect(),
            ),
            _ => (Vec::new(), HashMap::new()),
        };
        Self {
            url: url.to_string(),
            success: false,
            result: None,
            attempted_engines,
            engine_errors,
            error: Some(message),
        }
    }
}

/// Builder wiring external dependencies into a [`Scraper`].
pub struct ScraperBuilder {
    config: ScraperConfig,
    tls_transport: Option<Arc<dyn TlsTransport>>,
    browser_pool: Option<Arc<dyn BrowserPool>>,
}

impl ScraperBuilder {
    pub fn new() -> Self {
        Self {
            config: ScraperConfig::default(),
            tls_transport: None,
            browser_pool: None,
        }
    }

    pub fn with_config(mut self, config: ScraperConfig) -> Self {
        self.config = config;
        self
    }

    /// Plug in a TLS-fingerprinting transport; without one the tlsclient
    /// engine stays out of the cascade.
    pub fn with_tls_transport(mut self, transport: Arc<dyn TlsTransport>) -> Self {
        self.tls_transport = Some(transport);
        self
    }

    /// Plug in a browser pool; without one the hero engine stays out of the
    /// cascade.
    pub fn with_browser_pool(mut self, pool: Arc<dyn BrowserPool>) -> Self {
        self.browser_pool = Some(pool);
        self
    }

    pub fn build(self) -> Scraper {
        let config = self.config;

        let shaper = RequestShaper {
            ua_rotator: Arc::new(UaRotator::new(config.user_agent.clone())),
            geo: Arc::new(GeoResolver::new()),
        };

        let captcha_solver = config.captcha.as_ref().map(|settings| {
            Arc::new(CaptchaSolver::from_specs(
                settings.primary.clone(),
                settings.fallback.clone(),
                Some(Arc::new(CaptchaBudget::new(settings.max_per_domain_per_day))),
            ))
        });

        let mut challenge_handler = ChallengeHandler::new(config.challenge.clone());
        if let Some(ref solver) = captcha_solver {
            challenge_handler = challenge_handler.with_solver(Arc::clone(solver));
        }

        let browser_engine = BrowserEngine::new(self.browser_pool)
            .with_challenge_handler(Arc::new(challenge_handler))
            .with_api_interception(config.intercept_apis);

        let engines: Vec<Arc<dyn FetchEngine>> = vec![
            Arc::new(HttpEngine::new(shaper.clone())),
            Arc::new(TlsClientEngine::new(shaper.clone(), self.tls_transport)),
            Arc::new(browser_engine),
        ];

        let affinity = Arc::new(EngineAffinityCache::new(config.affinity.clone()));
        let breaker = Arc::new(DomainCircuitBreaker::new(config.breaker.clone()));
        let orchestrator = EngineOrchestrator::new(engines, config.orchestrator.clone())
            .with_affinity(affinity)
            .with_breaker(breaker);

        let robots = RobotsPolicy::new(config.robots_agent.clone());
        let rate_limiter = RateLimiter::new(config.rate_limit.clone());
        let metrics = config.enable_metrics.then(MetricsCollector::new);
        let profiler = DiscoveryProfiler::new(config.discovery.clone());
        let profile_cache = ProfileCache::new(config.profile_cache.clone());

        Scraper {
            config,
            orchestrator,
            robots,
            rate_limiter,
            metrics,
            profiler,
            profile_cache,
        }
    }
}

impl Default for ScraperBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Batch-oriented hardened scraper.
pub struct Scraper {
    config: ScraperConfig,
    orchestrator: EngineOrchestrator,
    robots: RobotsPolicy,
    rate_limiter: RateLimiter,
    metrics: Option<MetricsCollector>,
    profiler: DiscoveryProfiler,
    profile_cache: ProfileCache,
}

impl Scraper {
    pub fn builder() -> ScraperBuilder {
        ScraperBuilder::new()
    }

    /// Acquire a single URL through the full stack.
    pub async fn scrape_url(&self, url: &str) -> UrlOutcome {
        let Ok(parsed) = Url::parse(url) else {
            return UrlOutcome::rejected(url, format!("invalid URL: {url}"));
        };
        let domain = parsed.host_str().unwrap_or_default().to_lowercase();

        if self.config.respect_robots {
            let verdict = self.robots.check(&parsed).await;
            if !verdict.allowed {
                log::info!("{url} blocked by robots.txt");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_failure(&domain, None);
                }
                return UrlOutcome::rejected(url, format!("{url} is blocked by robots.txt"));
            }
            if let Some(delay_ms) = verdict.crawl_delay_ms {
                self.rate_limiter.set_crawl_delay(Some(delay_ms));
            }
        }

        self.rate_limiter.wait_for_next_slot().await;

        let meta = EngineMeta {
            url: url.to_string(),
            options: ScrapeOptions {
                proxy: self.config.proxy.clone(),
                verbose: self.config.orchestrator.verbose,
                ..ScrapeOptions::default()
            },
        };

        match self.orchestrator.scrape(&meta).await {
            Ok(outcome) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.record_acquisition(
                        &domain,
                        &outcome.result.engine_name,
                        outcome.result.status_code,
                        std::time::Duration::from_millis(outcome.result.duration_ms),
                    );
                }
                UrlOutcome {
                    url: url.to_string(),
                    success: true,
                    attempted_engines: outcome.attempted_engines,
                    engine_errors: outcome
                        .engine_errors
                        .into_iter()
                        .map(|(engine, error)| (engine, error.to_string()))
                        .collect(),
                    result: Some(outcome.result),
                    error: None,
                }
            }
            Err(err) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.record_failure(&domain, None);
                }
                UrlOutcome::from_cascade_error(url, err)
            }
        }
    }

    /// Acquire a batch, at most `batch_concurrency` URLs in flight.
    /// Outcomes come back in input order; failures never abort the batch.
    pub async fn scrape_urls(&self, urls: &[String]) -> Vec<UrlOutcome> {
        stream::iter(urls)
            .map(|url| self.scrape_url(url))
            .buffered(self.config.batch_concurrency)
            .collect()
            .await
    }

    /// Site profile for the URL's domain: cached on disk, computed at most
    /// once across concurrent callers.
    pub async fn profile_site(&self, url: &str) -> Arc<SiteProfile> {
        let origin = Url::parse(url)
            .map(|parsed| parsed.origin().ascii_serialization())
            .unwrap_or_else(|_| url.to_string());
        let domain = Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_else(|| url.to_string());
        self.profile_cache
            .get_or_compute(&domain, || self.profiler.profile(&origin))
            .await
    }

    /// Honeypot verdict for an extracted link.
    pub fn assess_link(&self, candidate: &LinkCandidate) -> HoneypotAssessment {
        assess_link(candidate, &self.config.honeypot)
    }

    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.metrics.as_ref().map(MetricsCollector::snapshot)
    }

    /// Clear per-domain adaptive state (affinity + breaker) for a domain,
    /// or everywhere.
    pub fn reset_domain_state(&self, domain: Option<&str>) {
        if let Some(affinity) = self.orchestrator.affinity() {
            affinity.reset(domain);
        }
        if let Some(breaker) = self.orchestrator.breaker() {
            breaker.reset(domain);
        }
    }
}
