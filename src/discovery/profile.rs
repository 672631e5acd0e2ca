//! Site profile model.
//!
//! A [`SiteProfile`] is the cacheable output of a discovery run. The
//! content hash covers everything except the volatile fields (timestamp,
//! the hash itself, and the derived summary), so two runs over unchanged
//! site surface produce byte-identical hashes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::endpoints::EndpointProfile;
use super::graphql::GraphqlProbe;
use super::interceptor::ApiPattern;
use super::openapi::OpenApiSummary;
use super::sitemap::SitemapReport;
use super::well_known::WellKnownResult;

pub const PROFILE_SCHEMA_VERSION: u32 = 1;

/// How a site is best acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionStrategy {
    Api,
    Sitemap,
    Graphql,
    HtmlScraping,
    Mixed,
}

/// Derived recommendation attached to a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub recommended_strategy: AcquisitionStrategy,
    pub reasoning: String,
    pub overall_score: u8,
}

impl Default for ProfileSummary {
    fn default() -> Self {
        Self {
            recommended_strategy: AcquisitionStrategy::HtmlScraping,
            reasoning: String::new(),
            overall_score: 0,
        }
    }
}

/// Everything discovery learned about one domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    pub domain: String,
    pub generated_at: DateTime<Utc>,
    pub schema_version: u32,
    pub content_hash: String,
    pub sitemap: SitemapReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openapi: Option<OpenApiSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graphql: Option<GraphqlProbe>,
    pub discovered_apis: Vec<ApiPattern>,
    pub endpoint_profiles: Vec<EndpointProfile>,
    pub feeds: Vec<String>,
    pub well_known_results: Vec<WellKnownResult>,
    pub summary: ProfileSummary,
}

impl SiteProfile {
    pub fn empty(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            generated_at: Utc::now(),
            schema_version: PROFILE_SCHEMA_VERSION,
            content_hash: String::new(),
            sitemap: SitemapReport::default(),
            openapi: None,
            graphql: None,
            discovered_apis: Vec::new(),
            endpoint_profiles: Vec::new(),
            feeds: Vec::new(),
            well_known_results: Vec::new(),
            summary: ProfileSummary::default(),
        }
    }
}

/// SHA-256 over the canonical JSON of the stable profile fields.
///
/// `summary`, `content_hash` and `generated_at` are excluded: the first two
/// are derived, the last is volatile by definition.
pub fn compute_content_hash(profile: &SiteProfile) -> String {
    let mut value = serde_json::to_value(profile).unwrap_or_default();
    if let Some(object) = value.as_object_mut() {
        object.remove("summary");
        object.remove("content_hash");
        object.remove("generated_at");
    }
    // serde_json maps are key-sorted, so this string form is canonical.
    let canonical = value.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
}

/// Fill in the derived fields. Idempotent modulo `generated_at`.
pub fn finalize_profile(profile: &mut SiteProfile) {
    profile.schema_version = PROFILE_SCHEMA_VERSION;
    profile.summary = summarise(profile);
    profile.content_hash = compute_content_hash(profile);
}

fn summarise(profile: &SiteProfile) -> ProfileSummary {
    let mut candidates: Vec<(AcquisitionStrategy, u32, String)> = Vec::new();

    if let Some(ref openapi) = profile.openapi {
        let public = openapi.public_endpoints().len();
        if !openapi.endpoints.is_empty() {
            let score = 50 + (public as u32 * 5).min(40);
            candidates.push((
                AcquisitionStrategy::Api,
                score,
                format!(
                    "OpenAPI document with {} endpoints ({} public)",
                    openapi.endpoints.len(),
                    public
                ),
            ));
        }
    }

    if !profile.discovered_apis.is_empty() {
        candidates.push((
            AcquisitionStrategy::Api,
            40 + (profile.discovered_apis.len() as u32 * 2).min(20),
            format!("{} API patterns observed in traffic", profile.discovered_apis.len()),
        ));
    }

    if let Some(ref graphql) = profile.graphql
        && graphql.introspectable
    {
        candidates.push((
            AcquisitionStrategy::Graphql,
            45 + (graphql.query_fields.len() as u32 * 2).min(25),
            format!(
                "introspectable GraphQL schema with {} root fields",
                graphql.query_fields.len()
            ),
        ));
    }

    if !profile.sitemap.urls.is_empty() {
        let count = profile.sitemap.urls.len();
        candidates.push((
            AcquisitionStrategy::Sitemap,
            35 + (count as u32 / 100).min(35),
            format!("sitemaps enumerate {count} URLs"),
        ));
    }

    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    match candidates.len() {
        0 => ProfileSummary {
            recommended_strategy: AcquisitionStrategy::HtmlScraping,
            reasoning: "no machine-readable surface found; crawl rendered HTML".to_string(),
            overall_score: 20,
        },
        1 => {
            let (strategy, score, reason) = candidates.into_iter().next().expect("one candidate");
            ProfileSummary {
                recommended_strategy: strategy,
                reasoning: reason,
                overall_score: score.min(100) as u8,
            }
        }
        _ => {
            let top_score = candidates[0].1;
            let distinct: Vec<&AcquisitionStrategy> = {
                let mut seen = Vec::new();
                for (strategy, _, _) in &candidates {
                    if !seen.contains(&strategy) {
                        seen.push(strategy);
                    }
                }
                seen
            };
            let reasoning = candidates
                .iter()
                .map(|(_, _, reason)| reason.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            if distinct.len() > 1 && candidates[1].1 + 10 >= top_score {
                ProfileSummary {
                    recommended_strategy: AcquisitionStrategy::Mixed,
                    reasoning,
                    overall_score: top_score.min(100) as u8,
                }
            } else {
                ProfileSummary {
                    recommended_strategy: *distinct[0],
                    reasoning,
                    overall_score: top_score.min(100) as u8,
                }
            }
        }
    }
}
