//! Fetch engines and the cascade that drives them.
//!
//! Three engines implement one contract: a plain HTTP client, a
//! TLS-fingerprinting transport, and a full browser. The orchestrator walks
//! them in affinity order until one produces content, recording outcomes
//! into the affinity cache and the per-domain circuit breaker.

pub mod affinity;
pub mod breaker;
pub mod browser;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod tlsclient;

pub use affinity::{AffinityConfig, DomainAffinitySnapshot, EngineAffinityCache};
pub use breaker::{BreakerConfig, BreakerState, DomainCircuitBreaker};
pub use browser::BrowserEngine;
pub use error::EngineError;
pub use self::http::HttpEngine;
pub use orchestrator::{EngineOrchestrator, OrchestratorConfig, ScrapeOutcome};
pub use tlsclient::{TlsClientEngine, TlsTransport, TransportResponse};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ::http as http_types;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::discovery::ApiPattern;
use crate::modules::geo::GeoResolver;
use crate::modules::user_agents::UaRotator;

/// Minimum extracted-text length for a response to count as content.
pub const MIN_CONTENT_CHARS: usize = 100;

/// Capabilities an engine brings to the cascade.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineFeatures {
    pub tls_fingerprint: bool,
    pub javascript: bool,
}

/// Static description of an engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub name: &'static str,
    pub max_timeout: Duration,
    pub features: EngineFeatures,
}

/// Caller-supplied options for one acquisition.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub user_agent: Option<String>,
    pub headers: HashMap<String, String>,
    /// Synthesise a plausible Referer when the caller supplied none.
    pub spoof_referer: bool,
    pub proxy: Option<String>,
    pub verbose: bool,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            user_agent: None,
            headers: HashMap::new(),
            spoof_referer: true,
            proxy: None,
            verbose: false,
        }
    }
}

/// Everything an engine needs for one scrape call.
#[derive(Debug, Clone)]
pub struct EngineMeta {
    pub url: String,
    pub options: ScrapeOptions,
}

impl EngineMeta {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: ScrapeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ScrapeOptions) -> Self {
        self.options = options;
        self
    }
}

/// Artifacts some engines attach beyond the page itself.
#[derive(Debug, Clone, Default)]
pub struct EngineArtifacts {
    /// API traffic observed while the page loaded (browser engine only).
    pub discovered_apis: Vec<ApiPattern>,
}

/// Successful fetch output. Immutable once produced.
#[derive(Debug, Clone)]
pub struct EngineResult {
    pub html: Bytes,
    pub final_url: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub headers: http_types::HeaderMap,
    pub engine_name: String,
    pub duration_ms: u64,
    pub artifacts: Option<EngineArtifacts>,
}

/// Contract every fetch strategy satisfies.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    fn config(&self) -> &EngineConfig;

    /// Whether the engine can run in this process right now.
    fn is_available(&self) -> bool;

    /// Fetch the page or throw a classified [`EngineError`]. Engines never
    /// retry internally.
    async fn scrape(&self, meta: &EngineMeta) -> Result<EngineResult, EngineError>;
}

/// Request-shaping dependencies shared by the engines.
#[derive(Clone)]
pub struct RequestShaper {
    pub ua_rotator: Arc<UaRotator>,
    pub geo: Arc<GeoResolver>,
}

impl Default for RequestShaper {
    fn default() -> Self {
        Self {
            ua_rotator: Arc::new(UaRotator::default()),
            geo: Arc::new(GeoResolver::default()),
        }
    }
}

impl RequestShaper {
    /// Build the outbound header map for one request.
    ///
    /// Layering, later entries winning: baseline browser headers, client
    /// hints for the resolved agent, geo-consistent headers (opt-in),
    /// caller headers, explicit user-agent override, resolved Referer.
    pub fn build_headers(
        &self,
        meta: &EngineMeta,
        include_geo_headers: bool,
    ) -> HashMap<String, String> {
        let user_agent = self.resolve_user_agent(meta);

        let mut headers: HashMap<String, String> = HashMap::new();
        headers.insert(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
                .to_string(),
        );
        headers.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
        headers.insert("Accept-Encoding".to_string(), "gzip, deflate, br".to_string());
        headers.insert("Upgrade-Insecure-Requests".to_string(), "1".to_string());
        headers.insert("Sec-Fetch-Dest".to_string(), "document".to_string());
        headers.insert("Sec-Fetch-Mode".to_string(), "navigate".to_string());

        for (name, value) in self.ua_rotator.client_hints(&user_agent) {
            headers.insert(name, value);
        }

        if include_geo_headers {
            for (name, value) in self
                .geo
                .geo_consistent_headers(meta.options.proxy.as_deref())
            {
                headers.insert(name, value);
            }
        }

        for (name, value) in &meta.options.headers {
            headers.insert(name.clone(), value.clone());
        }

        headers.insert("User-Agent".to_string(), user_agent);

        let referer = header_value(&meta.options.headers, "referer")
            .map(str::to_string)
            .or_else(|| {
                meta.options
                    .spoof_referer
                    .then(|| self.ua_rotator.generate_referer(&meta.url))
                    .flatten()
            });
        if let Some(referer) = referer {
            headers.insert(
                "Sec-Fetch-Site".to_string(),
                if same_origin(&referer, &meta.url) {
                    "same-origin".to_string()
                } else {
                    "cross-site".to_string()
                },
            );
            headers.insert("Referer".to_string(), referer);
        }

        headers
    }

    /// UA precedence: explicit option, caller header, rotator.
    pub fn resolve_user_agent(&self, meta: &EngineMeta) -> String {
        meta.options
            .user_agent
            .clone()
            .or_else(|| header_value(&meta.options.headers, "user-agent").map(str::to_string))
            .unwrap_or_else(|| self.ua_rotator.get(Some(&meta.url)))
    }
}

/// Case-insensitive lookup in a caller-supplied header map.
pub fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn same_origin(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.origin() == b.origin(),
        _ => false,
    }
}

/// Body markers shared by the HTTP-level engines: when any of these appear
/// the response is an interstitial, not the page.
pub const BASE_CHALLENGE_PATTERNS: &[&str] = &[
    "cf-browser-verification",
    "_cf_chl_tk",
    "just a moment",
    "ddos protection by",
    "access denied",
    "bot detection",
    "are you a robot",
    "checking your browser",
    "attention required",
];

/// Cloudflare infrastructure substrings used to attribute a challenge.
pub const CF_INFRA_PATTERNS: &[&str] = &["cloudflare", "/cdn-cgi/", "cf-ray", "__cf_bm"];

/// First challenge marker present in `html`, if any.
pub fn find_challenge_pattern(html: &str) -> Option<&'static str> {
    let lower = html.to_lowercase();
    BASE_CHALLENGE_PATTERNS
        .iter()
        .find(|pattern| lower.contains(**pattern))
        .copied()
}

/// `cloudflare` when CF infrastructure markers accompany the challenge,
/// otherwise generic `bot-detection`.
pub fn classify_challenge(html: &str) -> &'static str {
    let lower = html.to_lowercase();
    if CF_INFRA_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        "cloudflare"
    } else {
        "bot-detection"
    }
}

static SCRIPT_STYLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)>").expect("valid strip regex")
});
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Visible text of an HTML document: scripts and styles removed, tags
/// stripped, entities decoded, whitespace collapsed.
pub fn extract_text(html: &str) -> String {
    let without_blocks = SCRIPT_STYLE_RE.replace_all(html, " ");
    let without_tags = TAG_RE.replace_all(&without_blocks, " ");
    let decoded = html_escape::decode_html_entities(without_tags.as_ref()).to_string();
    WS_RE.replace_all(decoded.trim(), " ").to_string()
}

/// Enforce the minimum-content rule of the shared scrape pipeline.
pub fn ensure_sufficient_content(engine: &str, html: &str) -> Result<(), EngineError> {
    let text = extract_text(html);
    if text.len() < MIN_CONTENT_CHARS {
        return Err(EngineError::InsufficientContent {
            engine: engine.to_string(),
            length: text.len(),
            threshold: MIN_CONTENT_CHARS,
        });
    }
    Ok(())
}
