//! User-Agent rotation.
//!
//! Responsibilities:
//! - Maintain a pool of desktop browser user agents with per-family weights.
//! - Select agents by strategy (weighted, random, round-robin, per-domain).
//! - Keep per-domain selections sticky so a host always sees one identity.
//! - Emit client-hint headers consistent with the selected agent.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use url::Url;

/// Hosts remembered by the sticky per-domain map.
const STICKY_DOMAIN_CAP: usize = 5000;

/// Browser family of a user-agent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserFamily {
    Chrome,
    Edge,
    Firefox,
    Safari,
    Unknown,
}

impl BrowserFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            BrowserFamily::Chrome => "chrome",
            BrowserFamily::Edge => "edge",
            BrowserFamily::Firefox => "firefox",
            BrowserFamily::Safari => "safari",
            BrowserFamily::Unknown => "unknown",
        }
    }

    fn is_chromium(self) -> bool {
        matches!(self, BrowserFamily::Chrome | BrowserFamily::Edge)
    }
}

/// Selection strategy applied on every `get` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// Cumulative browser-family weights (the default).
    #[default]
    Weighted,
    /// Uniform pick over the whole pool.
    Random,
    /// Deterministic cycle through the pool.
    RoundRobin,
    /// Weighted pick, sticky once a domain has been seen.
    PerDomain,
}

/// One pool entry: the agent string plus its family weight share.
struct PoolEntry {
    user_agent: &'static str,
    weight: u32,
}

// Family weight shares sum to 100.
const POOL: &[PoolEntry] = &[
    PoolEntry {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        weight: 40,
    },
    PoolEntry {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        weight: 18,
    },
    PoolEntry {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
        weight: 12,
    },
    PoolEntry {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
        weight: 11,
    },
    PoolEntry {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
        weight: 8,
    },
    PoolEntry {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        weight: 4,
    },
    PoolEntry {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
        weight: 4,
    },
    PoolEntry {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0",
        weight: 3,
    },
];

/// Options controlling rotation behaviour.
#[derive(Debug, Clone)]
pub struct UaRotatorOptions {
    pub strategy: RotationStrategy,
    /// Remember the first agent handed to a hostname and keep returning it.
    pub sticky_per_domain: bool,
}

impl Default for UaRotatorOptions {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::Weighted,
            sticky_per_domain: true,
        }
    }
}

struct RotatorState {
    rng: StdRng,
    round_robin_index: usize,
    domain_map: LruCache<String, usize>,
}

/// Rotates user agents and synthesises matching request headers.
pub struct UaRotator {
    options: UaRotatorOptions,
    state: Mutex<RotatorState>,
}

impl UaRotator {
    pub fn new(options: UaRotatorOptions) -> Self {
        Self::with_rng(options, StdRng::from_entropy())
    }

    /// Deterministic construction for tests.
    pub fn with_rng(options: UaRotatorOptions, rng: StdRng) -> Self {
        let cap = NonZeroUsize::new(STICKY_DOMAIN_CAP).expect("nonzero cap");
        Self {
            options,
            state: Mutex::new(RotatorState {
                rng,
                round_robin_index: 0,
                domain_map: LruCache::new(cap),
            }),
        }
    }

    /// Select a user agent, optionally keyed by the target URL's host.
    pub fn get(&self, url: Option<&str>) -> String {
        let mut state = self.state.lock().expect("rotator lock poisoned");

        let host = url.and_then(host_of);
        if self.options.sticky_per_domain
            && let Some(ref host) = host
            && let Some(&index) = state.domain_map.get(host)
        {
            return POOL[index].user_agent.to_string();
        }

        let index = match self.options.strategy {
            RotationStrategy::Weighted => pick_weighted(&mut state.rng),
            RotationStrategy::Random => state.rng.gen_range(0..POOL.len()),
            RotationStrategy::RoundRobin => {
                let index = state.round_robin_index % POOL.len();
                state.round_robin_index = state.round_robin_index.wrapping_add(1);
                index
            }
            // Per-domain falls back to weighted when no URL is supplied.
            RotationStrategy::PerDomain => pick_weighted(&mut state.rng),
        };

        if self.options.sticky_per_domain
            && let Some(host) = host
        {
            state.domain_map.put(host, index);
        }

        POOL[index].user_agent.to_string()
    }

    /// Forget sticky selections and restart the round-robin cycle.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("rotator lock poisoned");
        state.round_robin_index = 0;
        state.domain_map.clear();
    }

    /// Client-hint headers matching the agent. Empty for non-Chromium agents.
    pub fn client_hints(&self, user_agent: &str) -> HashMap<String, String> {
        client_hints(user_agent)
    }

    /// Synthesise a plausible Referer for the request, or `None` for direct
    /// navigation.
    pub fn generate_referer(&self, url: &str) -> Option<String> {
        let mut state = self.state.lock().expect("rotator lock poisoned");
        let draw: f64 = state.rng.r#gen();
        drop(state);
        referer_for_draw(url, draw)
    }
}

impl Default for UaRotator {
    fn default() -> Self {
        Self::new(UaRotatorOptions::default())
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

fn pick_weighted(rng: &mut StdRng) -> usize {
    let total: u32 = POOL.iter().map(|entry| entry.weight).sum();
    let mut draw = rng.gen_range(0..total);
    for (index, entry) in POOL.iter().enumerate() {
        if draw < entry.weight {
            return index;
        }
        draw -= entry.weight;
    }
    POOL.len() - 1
}

/// Classify a user-agent string into a browser family.
///
/// Precedence matters: Edge and desktop Safari both embed `Chrome/`-style
/// tokens, so the more specific markers are checked first.
pub fn identify_family(user_agent: &str) -> BrowserFamily {
    if user_agent.contains("Edg/") {
        BrowserFamily::Edge
    } else if user_agent.contains("Firefox/") {
        BrowserFamily::Firefox
    } else if user_agent.contains("Safari/") && !user_agent.contains("Chrome/") {
        BrowserFamily::Safari
    } else if user_agent.contains("Chrome/") {
        BrowserFamily::Chrome
    } else {
        BrowserFamily::Unknown
    }
}

/// `Sec-CH-UA*` headers for Chromium agents; empty map otherwise.
pub fn client_hints(user_agent: &str) -> HashMap<String, String> {
    let family = identify_family(user_agent);
    if !family.is_chromium() {
        return HashMap::new();
    }

    let major = chrome_major_version(user_agent).unwrap_or("131");
    let brand = match family {
        BrowserFamily::Edge => "Microsoft Edge",
        _ => "Google Chrome",
    };

    let mut headers = HashMap::new();
    headers.insert(
        "Sec-CH-UA".to_string(),
        format!(
            "\"Chromium\";v=\"{major}\", \"{brand}\";v=\"{major}\", \"Not_A Brand\";v=\"24\""
        ),
    );
    headers.insert("Sec-CH-UA-Mobile".to_string(), "?0".to_string());
    headers.insert(
        "Sec-CH-UA-Platform".to_string(),
        format!("\"{}\"", platform_of(user_agent)),
    );
    headers
}

fn chrome_major_version(user_agent: &str) -> Option<&str> {
    let start = user_agent.find("Chrome/")? + "Chrome/".len();
    let rest = &user_agent[start..];
    let end = rest.find('.').unwrap_or(rest.len());
    let major = &rest[..end];
    (!major.is_empty()).then_some(major)
}

fn platform_of(user_agent: &str) -> &'static str {
    if user_agent.contains("Windows") {
        "Windows"
    } else if user_agent.contains("Macintosh") || user_agent.contains("Mac OS X") {
        "macOS"
    } else {
        "Linux"
    }
}

/// Map a uniform `[0, 1]` draw onto the referer distribution.
fn referer_for_draw(url: &str, draw: f64) -> Option<String> {
    if draw < 0.40 {
        let query = match Url::parse(url) {
            Ok(parsed) => parsed
                .host_str()
                .and_then(|host| host.split('.').next().map(str::to_string)),
            Err(_) => None,
        };
        return Some(match query {
            Some(term) => format!(
                "https://www.google.com/search?q={}",
                urlencode(&term)
            ),
            None => "https://www.google.com/".to_string(),
        });
    }
    if draw < 0.55 {
        return None;
    }
    let referer = if draw < 0.70 {
        "https://www.google.com/"
    } else if draw < 0.80 {
        "https://www.bing.com/"
    } else if draw < 0.88 {
        "https://duckduckgo.com/"
    } else if draw < 0.93 {
        "https://t.co/"
    } else if draw < 0.97 {
        "https://www.reddit.com/"
    } else {
        "https://www.linkedin.com/"
    };
    Some(referer.to_string())
}

fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            b' ' => encoded.push('+'),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(strategy: RotationStrategy, sticky: bool) -> UaRotator {
        UaRotator::with_rng(
            UaRotatorOptions {
                strategy,
                sticky_per_domain: sticky,
            },
            StdRng::seed_from_u64(7),
        )
    }

    #[test]
    fn sticky_domain_returns_same_agent() {
        let rotator = seeded(RotationStrategy::Weighted, true);
        let first = rotator.get(Some("https://example.com/a"));
        for _ in 0..20 {
            assert_eq!(first, rotator.get(Some("https://example.com/b")));
        }
        rotator.reset();
        // After reset the domain may legitimately re-draw the same agent,
        // but the sticky map must be empty again.
        let _ = rotator.get(Some("https://example.com/c"));
    }

    #[test]
    fn round_robin_cycles_and_resets() {
        let rotator = seeded(RotationStrategy::RoundRobin, false);
        let first = rotator.get(None);
        for _ in 1..POOL.len() {
            rotator.get(None);
        }
        assert_eq!(first, rotator.get(None));
        rotator.reset();
        assert_eq!(first, rotator.get(None));
    }

    #[test]
    fn family_identification_precedence() {
        assert_eq!(
            identify_family("Mozilla/5.0 ... Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0"),
            BrowserFamily::Edge
        );
        assert_eq!(
            identify_family("Mozilla/5.0 ... Gecko/20100101 Firefox/133.0"),
            BrowserFamily::Firefox
        );
        assert_eq!(
            identify_family("Mozilla/5.0 ... Version/18.1 Safari/605.1.15"),
            BrowserFamily::Safari
        );
        assert_eq!(
            identify_family("Mozilla/5.0 ... Chrome/131.0.0.0 Safari/537.36"),
            BrowserFamily::Chrome
        );
        assert_eq!(identify_family("curl/8.0"), BrowserFamily::Unknown);
    }

    #[test]
    fn client_hints_only_for_chromium() {
        let chrome = POOL[0].user_agent;
        let hints = client_hints(chrome);
        assert_eq!(hints.get("Sec-CH-UA-Mobile").map(String::as_str), Some("?0"));
        assert_eq!(
            hints.get("Sec-CH-UA-Platform").map(String::as_str),
            Some("\"Windows\"")
        );
        assert!(hints.get("Sec-CH-UA").unwrap().contains("Chromium"));

        let firefox = POOL[4].user_agent;
        assert!(client_hints(firefox).is_empty());
    }

    #[test]
    fn referer_distribution_branches() {
        let search = referer_for_draw("https://news.example.com/x", 0.1).unwrap();
        assert!(search.starts_with("https://www.google.com/search?q=news"));
        assert_eq!(referer_for_draw("https://example.com", 0.45), None);
        assert_eq!(
            referer_for_draw("https://example.com", 0.6).as_deref(),
            Some("https://www.google.com/")
        );
        assert_eq!(
            referer_for_draw("https://example.com", 0.75).as_deref(),
            Some("https://www.bing.com/")
        );
        assert_eq!(
            referer_for_draw("https://example.com", 0.85).as_deref(),
            Some("https://duckduckgo.com/")
        );
        assert_eq!(
            referer_for_draw("https://example.com", 0.90).as_deref(),
            Some("https://t.co/")
        );
        assert_eq!(
            referer_for_draw("https://example.com", 0.95).as_deref(),
            Some("https://www.reddit.com/")
        );
        assert_eq!(
            referer_for_draw("https://example.com", 0.99).as_deref(),
            Some("https://www.linkedin.com/")
        );
    }

    #[test]
    fn referer_falls_back_on_unparseable_url() {
        assert_eq!(
            referer_for_draw("not a url", 0.1).as_deref(),
            Some("https://www.google.com/")
        );
    }

    #[test]
    fn weights_sum_to_one_hundred() {
        assert_eq!(POOL.iter().map(|e| e.weight).sum::<u32>(), 100);
    }
}
