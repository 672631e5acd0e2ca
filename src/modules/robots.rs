//! robots.txt fetching, parsing, and path matching.
//!
//! Rules are resolved per origin and cached. A fetch failure yields no rules
//! at all, which callers treat as "everything allowed" — a site that cannot
//! serve robots.txt should not become unscrapable because of it.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use regex::{Regex, RegexBuilder};
use url::Url;

/// Origins remembered by the rules cache.
const ROBOTS_CACHE_CAP: usize = 1000;

/// robots.txt is fetched with a browser-like identity; an obvious crawler
/// string gets served different (often stricter) rules.
const ROBOTS_FETCH_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
struct PathPattern {
    raw: String,
    regex: Regex,
}

impl PathPattern {
    fn compile(raw: &str) -> Option<Self> {
        let mut pattern = String::from("^");
        let (body, anchored) = match raw.strip_suffix('$') {
            Some(stripped) => (stripped, true),
            None => (raw, false),
        };
        for ch in body.chars() {
            match ch {
                '*' => pattern.push_str(".*"),
                c => pattern.push_str(&regex::escape(&c.to_string())),
            }
        }
        if anchored {
            pattern.push('$');
        }
        let regex = RegexBuilder::new(&pattern).build().ok()?;
        Some(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// Effective rules for one origin, already merged for the configured agent.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    allow: Vec<PathPattern>,
    disallow: Vec<PathPattern>,
    crawl_delay_ms: Option<u64>,
}

impl RobotsRules {
    pub fn crawl_delay_ms(&self) -> Option<u64> {
        self.crawl_delay_ms
    }

    /// Raw patterns, mostly for diagnostics.
    pub fn disallow_patterns(&self) -> impl Iterator<Item = &str> {
        self.disallow.iter().map(|p| p.raw.as_str())
    }
}

struct Group {
    agents: Vec<String>,
    allow: Vec<String>,
    disallow: Vec<String>,
    crawl_delay_ms: Option<u64>,
}

/// Parse a robots.txt document and merge the `*` group with any group whose
/// name matches `agent`.
pub fn parse_robots(content: &str, agent: &str) -> RobotsRules {
    let mut groups: Vec<Group> = Vec::new();
    let mut current: Option<Group> = None;
    let mut awaiting_rules = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim().to_ascii_lowercase();
        let value = value.trim();

        match field.as_str() {
            "user-agent" => {
                if awaiting_rules {
                    // Consecutive user-agent lines share the next rule block.
                    if let Some(ref mut group) = current {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                } else {
                    if let Some(group) = current.take() {
                        groups.push(group);
                    }
                    current = Some(Group {
                        agents: vec![value.to_ascii_lowercase()],
                        allow: Vec::new(),
                        disallow: Vec::new(),
                        crawl_delay_ms: None,
                    });
                    awaiting_rules = true;
                }
            }
            "disallow" => {
                awaiting_rules = false;
                if let Some(ref mut group) = current
                    && !value.is_empty()
                {
                    group.disallow.push(value.to_string());
                }
            }
            "allow" => {
                awaiting_rules = false;
                if let Some(ref mut group) = current
                    && !value.is_empty()
                {
                    group.allow.push(value.to_string());
                }
            }
            "crawl-delay" => {
                awaiting_rules = false;
                if let Some(ref mut group) = current
                    && let Ok(seconds) = value.parse::<f64>()
                    && seconds >= 0.0
                {
                    group.crawl_delay_ms = Some((seconds * 1000.0) as u64);
                }
            }
            _ => {
                awaiting_rules = false;
            }
        }
    }
    if let Some(group) = current.take() {
        groups.push(group);
    }

    let agent_lower = agent.to_ascii_lowercase();
    let mut rules = RobotsRules::default();
    for group in &groups {
        let applies = group.agents.iter().any(|name| {
            name == "*" || name == &agent_lower || agent_lower.contains(name.as_str())
        });
        if !applies {
            continue;
        }
        rules
            .allow
            .extend(group.allow.iter().filter_map(|p| PathPattern::compile(p)));
        rules
            .disallow
            .extend(group.disallow.iter().filter_map(|p| PathPattern::compile(p)));
        if group.crawl_delay_ms.is_some() {
            rules.crawl_delay_ms = group.crawl_delay_ms;
        }
    }
    rules
}

/// Whether `path` may be fetched under `rules`. Any matching `Allow` wins
/// over `Disallow`.
pub fn is_path_allowed(path: &str, rules: &RobotsRules) -> bool {
    let normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    if rules.allow.iter().any(|p| p.matches(&normalized)) {
        return true;
    }
    !rules.disallow.iter().any(|p| p.matches(&normalized))
}

/// Whether `url` may be fetched. Absent rules mean everything is allowed.
pub fn is_url_allowed(url: &Url, rules: Option<&RobotsRules>) -> bool {
    match rules {
        Some(rules) => is_path_allowed(url.path(), rules),
        None => true,
    }
}

/// Fetches and caches per-origin robots rules.
pub struct RobotsPolicy {
    agent: String,
    client: reqwest::Client,
    cache: Mutex<LruCache<String, Option<RobotsRules>>>,
}

impl RobotsPolicy {
    pub fn new(agent: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            agent: agent.into(),
            client,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(ROBOTS_CACHE_CAP).expect("nonzero cap"),
            )),
        }
    }

    /// Rules for the URL's origin. `None` means no usable robots.txt.
    pub async fn rules_for(&self, url: &Url) -> Option<RobotsRules> {
        let origin = url.origin().ascii_serialization();
        {
            let mut cache = self.cache.lock().expect("robots cache lock");
            if let Some(cached) = cache.get(&origin) {
                return cached.clone();
            }
        }

        let fetched = self.fetch_rules(&origin).await;
        let mut cache = self.cache.lock().expect("robots cache lock");
        cache.put(origin, fetched.clone());
        fetched
    }

    /// Convenience: robots verdict plus crawl delay in one lookup.
    pub async fn check(&self, url: &Url) -> RobotsVerdict {
        let rules = self.rules_for(url).await;
        RobotsVerdict {
            allowed: is_url_allowed(url, rules.as_ref()),
            crawl_delay_ms: rules.as_ref().and_then(|r| r.crawl_delay_ms()),
        }
    }

    async fn fetch_rules(&self, origin: &str) -> Option<RobotsRules> {
        let robots_url = format!("{origin}/robots.txt");
        let response = self
            .client
            .get(robots_url.as_str())
            .header("User-Agent", ROBOTS_FETCH_UA)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body = response.text().await.ok()?;
        Some(parse_robots(&body, &self.agent))
    }

    /// Drop all cached rules.
    pub fn clear(&self) {
        self.cache.lock().expect("robots cache lock").clear();
    }
}

/// Outcome of a robots lookup for one URL.
#[derive(Debug, Clone, Copy)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub crawl_delay_ms: Option<u64>,
}
