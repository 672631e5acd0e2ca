//! Sitemap discovery and parsing.
//!
//! Candidates come from robots.txt `Sitemap:` lines and the well-known
//! probes. Each candidate may be a urlset, a sitemapindex (recursed, depth
//! bounded), a plain-text URL list, or any of those gzipped. Collection is
//! deduplicated and capped so a hostile sitemap cannot balloon memory.

use std::collections::{HashSet, VecDeque};
use std::io::Read;

use chrono::{DateTime, NaiveDate, Utc};
use flate2::read::GzDecoder;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Collection limits and filters.
#[derive(Debug, Clone)]
pub struct SitemapOptions {
    pub max_depth: usize,
    pub max_urls: usize,
    /// Skip entries whose `lastmod` is older than this.
    pub since: Option<DateTime<Utc>>,
    pub include_pattern: Option<Regex>,
    pub exclude_pattern: Option<Regex>,
}

impl Default for SitemapOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_urls: 50_000,
            since: None,
            include_pattern: None,
            exclude_pattern: None,
        }
    }
}

/// One URL discovered in a sitemap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapEntry {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Everything learned from the sitemap pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SitemapReport {
    /// Sitemap documents actually fetched.
    pub sitemaps_fetched: Vec<String>,
    pub urls: Vec<SitemapEntry>,
    /// True when `max_urls` stopped collection early.
    pub truncated: bool,
}

/// `Sitemap:` lines from a robots.txt document.
pub fn sitemap_candidates_from_robots(robots_txt: &str) -> Vec<String> {
    robots_txt
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (field, value) = line.split_once(':')?;
            if !field.trim().eq_ignore_ascii_case("sitemap") {
                return None;
            }
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        })
        .collect()
}

/// Parsed shape of one sitemap document.
#[derive(Debug, Clone, PartialEq)]
pub enum SitemapDocument {
    UrlSet(Vec<SitemapEntry>),
    Index(Vec<String>),
}

/// Parse XML (urlset/sitemapindex) or a plain-text URL list.
pub fn parse_sitemap_document(content: &str) -> SitemapDocument {
    let trimmed = content.trim_start();
    if trimmed.starts_with('<') {
        parse_sitemap_xml(trimmed)
    } else {
        SitemapDocument::UrlSet(
            content
                .lines()
                .map(str::trim)
                .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
                .map(|line| SitemapEntry {
                    url: line.to_string(),
                    last_modified: None,
                })
                .collect(),
        )
    }
}

fn parse_sitemap_xml(xml: &str) -> SitemapDocument {
    let mut reader = Reader::from_reader(xml.as_bytes());

    let mut is_index = false;
    let mut in_loc = false;
    let mut in_lastmod = false;
    let mut current_loc: Option<String> = None;
    let mut current_lastmod: Option<DateTime<Utc>> = None;
    let mut entries: Vec<SitemapEntry> = Vec::new();
    let mut children: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => match element.local_name().as_ref() {
                b"sitemapindex" => is_index = true,
                b"loc" => in_loc = true,
                b"lastmod" => in_lastmod = true,
                _ => {}
            },
            Ok(Event::Text(text)) => {
                if let Ok(value) = text.unescape() {
                    if in_loc {
                        current_loc = Some(value.trim().to_string());
                    } else if in_lastmod {
                        current_lastmod = parse_lastmod(value.trim());
                    }
                }
            }
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"loc" => in_loc = false,
                b"lastmod" => in_lastmod = false,
                b"url" | b"sitemap" => {
                    if let Some(loc) = current_loc.take() {
                        if is_index {
                            children.push(loc);
                        } else {
                            entries.push(SitemapEntry {
                                url: loc,
                                last_modified: current_lastmod.take(),
                            });
                        }
                    }
                    current_lastmod = None;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                log::debug!("sitemap xml parse stopped: {err}");
                break;
            }
        }
        buf.clear();
    }

    if is_index {
        SitemapDocument::Index(children)
    } else {
        SitemapDocument::UrlSet(entries)
    }
}

fn parse_lastmod(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(value) {
        return Some(stamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Inflate a fetched body when it arrived gzipped.
pub fn maybe_gunzip(url: &str, content_type: Option<&str>, body: &[u8]) -> String {
    let looks_gzipped = url.ends_with(".gz")
        || content_type
            .map(|ct| ct.contains("gzip"))
            .unwrap_or(false)
        || body.starts_with(&[0x1f, 0x8b]);
    if looks_gzipped {
        let mut decoder = GzDecoder::new(body);
        let mut inflated = String::new();
        if decoder.read_to_string(&mut inflated).is_ok() {
            return inflated;
        }
    }
    String::from_utf8_lossy(body).to_string()
}

fn entry_passes(entry: &SitemapEntry, options: &SitemapOptions) -> bool {
    if let (Some(since), Some(modified)) = (options.since, entry.last_modified)
        && modified < since
    {
        return false;
    }
    if let Some(ref include) = options.include_pattern
        && !include.is_match(&entry.url)
    {
        return false;
    }
    if let Some(ref exclude) = options.exclude_pattern
        && exclude.is_match(&entry.url)
    {
        return false;
    }
    true
}

/// Fetch and recursively expand sitemap candidates.
pub async fn collect_sitemaps(
    client: &reqwest::Client,
    candidates: Vec<String>,
    options: &SitemapOptions,
) -> SitemapReport {
    let mut report = SitemapReport::default();
    let mut seen_documents: HashSet<String> = HashSet::new();
    let mut seen_urls: HashSet<String> = HashSet::new();
    // (url, depth) frontier; breadth-first keeps shallow sitemaps first.
    let mut frontier: VecDeque<(String, usize)> =
        candidates.into_iter().map(|url| (url, 0)).collect();

    while let Some((sitemap_url, depth)) = frontier.pop_front() {
        if depth >= options.max_depth || !seen_documents.insert(sitemap_url.clone()) {
            continue;
        }
        if report.urls.len() >= options.max_urls {
            report.truncated = true;
            break;
        }

        let Ok(response) = client.get(sitemap_url.as_str()).send().await else {
            continue;
        };
        if !response.status().is_success() {
            continue;
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let Ok(body) = response.bytes().await else {
            continue;
        };
        let content = maybe_gunzip(&sitemap_url, content_type.as_deref(), &body);
        report.sitemaps_fetched.push(sitemap_url.clone());

        match parse_sitemap_document(&content) {
            SitemapDocument::Index(children) => {
                for child in children {
                    frontier.push_back((child, depth + 1));
                }
            }
            SitemapDocument::UrlSet(entries) => {
                for entry in entries {
                    if report.urls.len() >= options.max_urls {
                        report.truncated = true;
                        break;
                    }
                    if entry_passes(&entry, options) && seen_urls.insert(entry.url.clone()) {
                        report.urls.push(entry);
                    }
                }
            }
        }
    }

    report
}
