//! Unified scraper configuration.
//!
//! Pure data: every tunable of the acquisition stack in one struct with a
//! fluent builder. Runtime dependencies (TLS transport, browser pool) are
//! injected on the `Scraper` builder instead, so this type stays cheap to
//! clone and serialise into logs.

use crate::challenges::handler::ChallengeHandlerConfig;
use crate::discovery::{DiscoveryConfig, ProfileCacheConfig};
use crate::engines::affinity::AffinityConfig;
use crate::engines::breaker::BreakerConfig;
use crate::engines::orchestrator::OrchestratorConfig;
use crate::external_deps::captcha::ProviderSpec;
use crate::modules::honeypot::HoneypotOptions;
use crate::modules::rate_limit::RateLimiterConfig;
use crate::modules::user_agents::UaRotatorOptions;

/// CAPTCHA solving settings for the facade.
#[derive(Debug, Clone)]
pub struct CaptchaSettings {
    pub primary: ProviderSpec,
    pub fallback: Option<ProviderSpec>,
    /// Paid solves allowed per domain per UTC day.
    pub max_per_domain_per_day: u32,
}

/// Everything the scraper facade can be tuned with.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub user_agent: UaRotatorOptions,
    pub rate_limit: RateLimiterConfig,
    /// Obey robots.txt and its crawl delay.
    pub respect_robots: bool,
    /// Agent name matched against robots.txt groups.
    pub robots_agent: String,
    pub honeypot: HoneypotOptions,
    pub affinity: AffinityConfig,
    pub breaker: BreakerConfig,
    pub orchestrator: OrchestratorConfig,
    pub challenge: ChallengeHandlerConfig,
    pub captcha: Option<CaptchaSettings>,
    pub discovery: DiscoveryConfig,
    pub profile_cache: ProfileCacheConfig,
    /// Parallel URL acquisitions per batch call.
    pub batch_concurrency: usize,
    pub enable_metrics: bool,
    /// Record XHR/fetch traffic during browser fetches.
    pub intercept_apis: bool,
    pub proxy: Option<String>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: UaRotatorOptions::default(),
            rate_limit: RateLimiterConfig::default(),
            respect_robots: true,
            robots_agent: "ironfetch".to_string(),
            honeypot: HoneypotOptions::default(),
            affinity: AffinityConfig::default(),
            breaker: BreakerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            challenge: ChallengeHandlerConfig::default(),
            captcha: None,
            discovery: DiscoveryConfig::default(),
            profile_cache: ProfileCacheConfig::default(),
            batch_concurrency: 5,
            enable_metrics: true,
            intercept_apis: false,
            proxy: None,
        }
    }
}

/// Fluent builder for [`ScraperConfig`].
#[derive(Default)]
pub struct ScraperConfigBuilder {
    config: ScraperConfig,
}

impl ScraperConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, options: UaRotatorOptions) -> Self {
        self.config.user_agent = options;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimiterConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn respect_robots(mut self, respect: bool) -> Self {
        self.config.respect_robots = respect;
        self
    }

    pub fn robots_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.robots_agent = agent.into();
        self
    }

    pub fn honeypot(mut self, options: HoneypotOptions) -> Self {
        self.config.honeypot = options;
        self
    }

    pub fn affinity(mut self, affinity: AffinityConfig) -> Self {
        self.config.affinity = affinity;
        self
    }

    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.config.breaker = breaker;
        self
    }

    pub fn orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.config.orchestrator = orchestrator;
        self
    }

    pub fn force_engine(mut self, engine: impl Into<String>) -> Self {
        self.config.orchestrator.force_engine = Some(engine.into());
        self
    }

    pub fn challenge(mut self, challenge: ChallengeHandlerConfig) -> Self {
        self.config.challenge = challenge;
        self
    }

    pub fn captcha(mut self, settings: CaptchaSettings) -> Self {
        self.config.captcha = Some(settings);
        self
    }

    pub fn discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.config.discovery = discovery;
        self
    }

    pub fn profile_cache(mut self, cache: ProfileCacheConfig) -> Self {
        self.config.profile_cache = cache;
        self
    }

    pub fn batch_concurrency(mut self, concurrency: usize) -> Self {
        self.config.batch_concurrency = concurrency.max(1);
        self
    }

    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.config.enable_metrics = enable;
        self
    }

    pub fn intercept_apis(mut self, enable: bool) -> Self {
        self.config.intercept_apis = enable;
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.proxy = Some(proxy.into());
        self
    }

    pub fn build(self) -> ScraperConfig {
        self.config
    }
}
