//! Well-known path probing.
//!
//! Cheap HEAD requests against conventional locations reveal most of a
//! site's machine-readable surface before any crawling happens. Servers
//! that reject HEAD get a ranged GET instead. A 401/403/429 still counts as
//! "found" — the endpoint exists, it just wants credentials or patience.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use url::Url;

/// What a well-known path would give us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WellKnownCategory {
    Sitemap,
    Openapi,
    Graphql,
    Feed,
    Service,
}

/// One probe target.
#[derive(Debug, Clone, Copy)]
pub struct WellKnownProbe {
    pub path: &'static str,
    pub category: WellKnownCategory,
}

macro_rules! probes {
    ($category:ident : $($path:literal),+ $(,)?) => {
        &[$(WellKnownProbe { path: $path, category: WellKnownCategory::$category }),+]
    };
}

pub const SITEMAP_PATHS: &[WellKnownProbe] = probes!(Sitemap:
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap/",
    "/sitemaps/sitemap.xml",
    "/sitemap.txt",
    "/sitemap.xml.gz",
    "/wp-sitemap.xml",
    "/news-sitemap.xml",
    "/video-sitemap.xml",
    "/image-sitemap.xml",
);

pub const OPENAPI_PATHS: &[WellKnownProbe] = probes!(Openapi:
    "/openapi.json",
    "/openapi.yaml",
    "/swagger.json",
    "/swagger.yaml",
    "/swagger/v1/swagger.json",
    "/api-docs",
    "/api-docs.json",
    "/v1/api-docs",
    "/v2/api-docs",
    "/v3/api-docs",
    "/api/openapi.json",
    "/api/swagger.json",
    "/docs/openapi.json",
    "/api/docs/openapi.json",
    "/.well-known/openapi.json",
    "/.well-known/openapi.yaml",
);

pub const GRAPHQL_PATHS: &[WellKnownProbe] = probes!(Graphql:
    "/graphql",
    "/api/graphql",
    "/v1/graphql",
    "/gql",
    "/query",
);

pub const FEED_PATHS: &[WellKnownProbe] = probes!(Feed:
    "/feed",
    "/feed.xml",
    "/rss",
    "/rss.xml",
    "/atom.xml",
    "/feed/atom",
    "/feed/rss",
    "/index.xml",
);

pub const SERVICE_PATHS: &[WellKnownProbe] = probes!(Service:
    "/.well-known/ai-plugin.json",
    "/.well-known/security.txt",
    "/.well-known/change-password",
    "/manifest.json",
    "/browserconfig.xml",
);

/// Every probe target, in category order.
pub fn all_probes() -> impl Iterator<Item = WellKnownProbe> {
    SITEMAP_PATHS
        .iter()
        .chain(OPENAPI_PATHS)
        .chain(GRAPHQL_PATHS)
        .chain(FEED_PATHS)
        .chain(SERVICE_PATHS)
        .copied()
}

/// Outcome of probing one path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellKnownResult {
    pub path: String,
    pub url: String,
    pub category: WellKnownCategory,
    pub found: bool,
    pub status: Option<u16>,
}

/// Statuses that prove the path exists in some form.
fn counts_as_found(status: u16) -> bool {
    (200..300).contains(&status) || matches!(status, 401 | 403 | 405 | 429)
}

/// Statuses after which a ranged GET is worth trying.
fn head_needs_get_fallback(status: u16) -> bool {
    matches!(status, 400 | 405)
}

/// Probe every well-known path on `base`, at most `concurrency` in flight.
pub async fn probe_well_known(
    client: &reqwest::Client,
    base: &Url,
    concurrency: usize,
) -> Vec<WellKnownResult> {
    let targets: Vec<WellKnownProbe> = all_probes().collect();
    stream::iter(targets)
        .map(|probe| async move { probe_one(client, base, probe).await })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
}

async fn probe_one(
    client: &reqwest::Client,
    base: &Url,
    probe: WellKnownProbe,
) -> WellKnownResult {
    let url = match base.join(probe.path) {
        Ok(url) => url,
        Err(_) => {
            return WellKnownResult {
                path: probe.path.to_string(),
                url: String::new(),
                category: probe.category,
                found: false,
                status: None,
            };
        }
    };

    let head_status = match client.head(url.clone()).send().await {
        Ok(response) => Some(response.status().as_u16()),
        Err(_) => None,
    };

    // Some servers refuse HEAD outright; retry with a tiny ranged GET.
    let status = match head_status {
        Some(status) if head_needs_get_fallback(status) => {
            ranged_get(client, &url).await.or(Some(status))
        }
        None => ranged_get(client, &url).await,
        other => other,
    };

    WellKnownResult {
        path: probe.path.to_string(),
        url: url.to_string(),
        category: probe.category,
        found: status.map(counts_as_found).unwrap_or(false),
        status,
    }
}

async fn ranged_get(client: &reqwest::Client, url: &Url) -> Option<u16> {
    client
        .get(url.clone())
        .header("Range", "bytes=0-2047")
        .send()
        .await
        .ok()
        .map(|response| response.status().as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_probe_list_is_complete() {
        assert_eq!(OPENAPI_PATHS.len(), 16);
        assert_eq!(SITEMAP_PATHS.len(), 10);
        assert_eq!(GRAPHQL_PATHS.len(), 5);
        assert_eq!(FEED_PATHS.len(), 8);
        assert_eq!(SERVICE_PATHS.len(), 5);
    }

    #[test]
    fn found_statuses() {
        for status in [200u16, 204, 401, 403, 405, 429] {
            assert!(counts_as_found(status), "{status}");
        }
        for status in [301u16, 404, 410, 500, 503] {
            assert!(!counts_as_found(status), "{status}");
        }
    }

    #[tokio::test]
    async fn head_probe_marks_existing_paths() {
        let mut server = mockito::Server::new_async().await;
        // Catch-all first: mockito gives later mocks higher priority.
        server
            .mock("HEAD", mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("HEAD", "/sitemap.xml")
            .with_status(200)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let base = Url::parse(&server.url()).unwrap();
        let results = probe_well_known(&client, &base, 4).await;
        eprintln!("{:#?}", results);

        let sitemap = results
            .iter()
            .find(|r| r.path == "/sitemap.xml")
            .expect("sitemap probed");
        assert!(sitemap.found);
        assert_eq!(sitemap.status, Some(200));
        assert_eq!(sitemap.category, WellKnownCategory::Sitemap);

        let graphql = results.iter().find(|r| r.path == "/graphql").unwrap();
        assert!(!graphql.found);
    }

    #[tokio::test]
    async fn head_405_falls_back_to_ranged_get() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("HEAD", "/graphql")
            .with_status(405)
            .create_async()
            .await;
        server
            .mock("GET", "/graphql")
            .match_header("Range", "bytes=0-2047")
            .with_status(200)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let base = Url::parse(&server.url()).unwrap();
        let results = probe_well_known(&client, &base, 4).await;

        let graphql = results.iter().find(|r| r.path == "/graphql").unwrap();
        assert!(graphql.found);
        assert_eq!(graphql.status, Some(200));
    }

    #[tokio::test]
    async fn auth_guarded_endpoints_count_as_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("HEAD", "/v3/api-docs")
            .with_status(401)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let base = Url::parse(&server.url()).unwrap();
        let results = probe_well_known(&client, &base, 2).await;
        let api_docs = results.iter().find(|r| r.path == "/v3/api-docs").unwrap();
        assert!(api_docs.found);
    }
}
