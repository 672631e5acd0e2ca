//! # ironfetch
//!
//! Hardened web-content acquisition. Given one or more URLs, ironfetch
//! returns page content plus provenance metadata while coping with
//! adversarial intermediaries (WAFs, bot detection, JS challenges,
//! CAPTCHAs) and respecting crawl etiquette (robots.txt, crawl delays).
//!
//! The interesting machinery:
//!
//! - A multi-engine fetch cascade (plain HTTP, TLS-fingerprinting
//!   transport, full browser) with per-domain engine affinity and a
//!   per-domain circuit breaker.
//! - Passive WAF detection, live challenge polling, and dispatch to
//!   external CAPTCHA providers with daily budgets and fallback.
//! - Request shaping: weighted user-agent rotation with client hints,
//!   geo-consistent headers derived from proxy exit countries, and a
//!   jittered rate limiter that honours robots.txt crawl delays.
//! - A per-site discovery profiler that probes well-known paths, sitemaps,
//!   OpenAPI documents, and GraphQL introspection into a cached profile.
//!
//! ## Example
//!
//! ```no_run
//! use ironfetch::Scraper;
//!
//! #[tokio::main]
//! async fn main() {
//!     let scraper = Scraper::builder().build();
//!     let outcome = scraper.scrape_url("https://example.com").await;
//!     if outcome.success {
//!         println!("fetched via {}", outcome.result.unwrap().engine_name);
//!     }
//! }
//! ```

mod scraper;

pub mod challenges;
pub mod config;
pub mod discovery;
pub mod engines;
pub mod external_deps;
pub mod modules;

pub use crate::scraper::{Scraper, ScraperBuilder, UrlOutcome};

pub use crate::config::{CaptchaSettings, ScraperConfig, ScraperConfigBuilder};

pub use crate::engines::{
    AffinityConfig, BreakerConfig, BreakerState, BrowserEngine, DomainCircuitBreaker,
    EngineAffinityCache, EngineArtifacts, EngineConfig, EngineError, EngineMeta,
    EngineOrchestrator, EngineResult, FetchEngine, HttpEngine, OrchestratorConfig,
    ScrapeOptions, ScrapeOutcome, TlsClientEngine, TlsTransport, TransportResponse,
};

pub use crate::challenges::{
    detect_waf, format_waf_challenge_type, ChallengeHandler, ChallengeHandlerConfig,
    LiveChallengeDetector, WafCategory, WafDetection, WafProvider,
};

pub use crate::external_deps::browser::{
    BrowserError, BrowserPage, BrowserPool, NetworkExchange, RequestSink,
};

pub use crate::external_deps::captcha::{
    CaptchaBudget, CaptchaError, CaptchaProvider, CaptchaSolveRequest, CaptchaSolveResult,
    CaptchaSolver, CaptchaType, ProviderKind, ProviderSpec,
};

pub use crate::modules::{
    HoneypotAssessment, HoneypotOptions, LinkCandidate, MetricsCollector, MetricsSnapshot,
    RateLimiter, RateLimiterConfig, RobotsPolicy, RotationStrategy, UaRotator,
    UaRotatorOptions,
};

pub use crate::discovery::{
    AcquisitionStrategy, ApiInterceptor, ApiPattern, DiscoveryConfig, DiscoveryProfiler,
    ProfileCache, ProfileCacheConfig, SiteProfile,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
