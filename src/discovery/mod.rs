//! Per-site discovery profiling.
//!
//! Before acquiring a site in volume it pays to learn its shape: sitemaps,
//! API documents, GraphQL endpoints, feeds. The profiler probes well-known
//! paths, expands what it finds, scores a few endpoints, and condenses
//! everything into a cacheable [`SiteProfile`] with an acquisition
//! recommendation.

pub mod cache;
pub mod endpoints;
pub mod graphql;
pub mod interceptor;
pub mod openapi;
pub mod profile;
pub mod sitemap;
pub mod well_known;

pub use cache::{ProfileCache, ProfileCacheConfig};
pub use endpoints::{profile_endpoint, scrapability_score, EndpointProfile};
pub use graphql::{probe_graphql, GraphqlProbe, INTROSPECTION_QUERY};
pub use interceptor::{ApiInterceptor, ApiPattern, QueryParamInfo, DEFAULT_DOMAIN_BLOCKLIST};
pub use openapi::{parse_openapi, ApiEndpoint, ApiParameter, OpenApiError, OpenApiSummary};
pub use profile::{
    compute_content_hash, finalize_profile, AcquisitionStrategy, ProfileSummary, SiteProfile,
    PROFILE_SCHEMA_VERSION,
};
pub use sitemap::{
    collect_sitemaps, parse_sitemap_document, sitemap_candidates_from_robots, SitemapEntry,
    SitemapOptions, SitemapReport,
};
pub use well_known::{
    probe_well_known, WellKnownCategory, WellKnownResult, FEED_PATHS, GRAPHQL_PATHS,
    OPENAPI_PATHS, SERVICE_PATHS, SITEMAP_PATHS,
};

use std::time::Duration;

use url::Url;

/// Profiler tunables.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Concurrent well-known probes.
    pub probe_concurrency: usize,
    pub fetch_timeout: Duration,
    pub sitemap: SitemapOptions,
    pub max_graphql_samples: usize,
    /// Public API endpoints to probe-and-score per site; 0 disables.
    pub max_profiled_endpoints: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_concurrency: 4,
            fetch_timeout: Duration::from_secs(15),
            sitemap: SitemapOptions::default(),
            max_graphql_samples: 5,
            max_profiled_endpoints: 5,
        }
    }
}

/// Runs the discovery pipeline for one site.
pub struct DiscoveryProfiler {
    client: reqwest::Client,
    config: DiscoveryConfig,
}

impl DiscoveryProfiler {
    pub fn new(config: DiscoveryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Build a finalized [`SiteProfile`] for the URL's origin.
    pub async fn profile(&self, base_url: &str) -> SiteProfile {
        let Ok(base) = Url::parse(base_url) else {
            let mut empty = SiteProfile::empty(base_url);
            finalize_profile(&mut empty);
            return empty;
        };
        let domain = base.host_str().unwrap_or(base_url).to_lowercase();
        let mut profile = SiteProfile::empty(&domain);

        let robots_txt = self.fetch_robots(&base).await;

        log::info!("profiling {domain}");
        let well_known = probe_well_known(&self.client, &base, self.config.probe_concurrency).await;

        // Sitemaps: robots.txt directives first, then probe hits.
        let mut candidates = robots_txt
            .as_deref()
            .map(sitemap_candidates_from_robots)
            .unwrap_or_default();
        candidates.extend(found_urls(&well_known, WellKnownCategory::Sitemap));
        profile.sitemap = collect_sitemaps(&self.client, candidates, &self.config.sitemap).await;

        profile.openapi = self
            .first_openapi(found_urls(&well_known, WellKnownCategory::Openapi))
            .await;

        for endpoint in found_urls(&well_known, WellKnownCategory::Graphql) {
            let probe =
                probe_graphql(&self.client, &endpoint, self.config.max_graphql_samples).await;
            let keep = probe.introspectable || probe.introspection_disabled;
            if keep {
                profile.graphql = Some(probe);
                break;
            }
        }

        profile.feeds = found_urls(&well_known, WellKnownCategory::Feed);
        profile.well_known_results = well_known;

        if self.config.max_profiled_endpoints > 0 {
            profile.endpoint_profiles = self.profile_public_endpoints(&base, &profile).await;
        }

        finalize_profile(&mut profile);
        profile
    }

    async fn fetch_robots(&self, base: &Url) -> Option<String> {
        let robots_url = base.join("/robots.txt").ok()?;
        let response = self.client.get(robots_url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.text().await.ok()
    }

    async fn first_openapi(&self, candidates: Vec<String>) -> Option<OpenApiSummary> {
        for candidate in candidates {
            let Ok(response) = self.client.get(candidate.as_str()).send().await else {
                continue;
            };
            if !response.status().is_success() {
                continue;
            }
            let Ok(text) = response.text().await else {
                continue;
            };
            match parse_openapi(&text) {
                Ok(summary) => return Some(summary),
                Err(err) => log::debug!("openapi candidate {candidate} rejected: {err}"),
            }
        }
        None
    }

    async fn profile_public_endpoints(
        &self,
        base: &Url,
        profile: &SiteProfile,
    ) -> Vec<EndpointProfile> {
        let Some(ref openapi) = profile.openapi else {
            return Vec::new();
        };
        let server = openapi
            .servers
            .first()
            .cloned()
            .unwrap_or_else(|| base.origin().ascii_serialization());

        let mut profiles = Vec::new();
        for endpoint in openapi
            .public_endpoints()
            .into_iter()
            .take(self.config.max_profiled_endpoints)
        {
            // Templated path parameters make the URL unresolvable; probe the
            // literal paths only.
            if endpoint.path.contains('{') {
                continue;
            }
            let url = format!(
                "{}{}",
                server.trim_end_matches('/'),
                endpoint.path
            );
            profiles.push(profile_endpoint(&self.client, &url, &endpoint.method).await);
        }
        profiles
    }
}

impl Default for DiscoveryProfiler {
    fn default() -> Self {
        Self::new(DiscoveryConfig::default())
    }
}

fn found_urls(results: &[WellKnownResult], category: WellKnownCategory) -> Vec<String> {
    results
        .iter()
        .filter(|result| result.category == category && result.found)
        .map(|result| result.url.clone())
        .collect()
}
