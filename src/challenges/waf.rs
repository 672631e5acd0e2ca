//! Passive WAF detection over response headers and HTML.
//!
//! Each vendor is described by two signal sets: *infra* fingerprints
//! (headers and cookies the vendor's edge always injects) and *action*
//! patterns (markup served when the vendor actively intervenes). Infra alone
//! is not a detection — plenty of sites sit behind Cloudflare and serve
//! content happily. A single action signal plus infra, or two action
//! signals on their own, is.

use std::fmt;

use http::HeaderMap;

/// WAF / bot-management vendors recognised by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WafProvider {
    Cloudflare,
    Akamai,
    DataDome,
    PerimeterX,
    Imperva,
    Sucuri,
}

impl WafProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            WafProvider::Cloudflare => "cloudflare",
            WafProvider::Akamai => "akamai",
            WafProvider::DataDome => "datadome",
            WafProvider::PerimeterX => "perimeterx",
            WafProvider::Imperva => "imperva",
            WafProvider::Sucuri => "sucuri",
        }
    }
}

impl fmt::Display for WafProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the WAF is doing to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WafCategory {
    Challenge,
    Captcha,
    RateLimit,
    Block,
}

impl WafCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            WafCategory::Challenge => "challenge",
            WafCategory::Captcha => "captcha",
            WafCategory::RateLimit => "rate-limit",
            WafCategory::Block => "block",
        }
    }
}

/// Response context handed to the detector.
#[derive(Debug, Clone, Copy)]
pub struct WafInput<'a> {
    pub url: Option<&'a str>,
    pub status_code: Option<u16>,
    pub headers: &'a HeaderMap,
    pub html: &'a str,
}

/// Positive detection with the evidence that produced it.
#[derive(Debug, Clone)]
pub struct WafDetection {
    pub provider: WafProvider,
    pub category: WafCategory,
    pub confidence: f32,
    pub signals: Vec<String>,
}

/// Header- or cookie-level fingerprint.
struct InfraSignal {
    header: &'static str,
    value_contains: Option<&'static str>,
}

/// HTML marker, optionally gated on a minimum status code.
struct ActionSignal {
    pattern: &'static str,
    min_status: Option<u16>,
}

struct ProviderSignals {
    provider: WafProvider,
    infra: &'static [InfraSignal],
    action: &'static [ActionSignal],
}

const SIGNALS: &[ProviderSignals] = &[
    ProviderSignals {
        provider: WafProvider::Cloudflare,
        infra: &[
            InfraSignal { header: "cf-ray", value_contains: None },
            InfraSignal { header: "server", value_contains: Some("cloudflare") },
            InfraSignal { header: "set-cookie", value_contains: Some("__cf_bm") },
            InfraSignal { header: "set-cookie", value_contains: Some("cf_clearance") },
            InfraSignal { header: "cf-mitigated", value_contains: None },
        ],
        action: &[
            ActionSignal { pattern: "/cdn-cgi/challenge-platform/", min_status: None },
            ActionSignal { pattern: "just a moment", min_status: None },
            ActionSignal { pattern: "checking your browser", min_status: None },
            ActionSignal { pattern: "cf-browser-verification", min_status: None },
            ActionSignal { pattern: "ray id", min_status: Some(400) },
            ActionSignal { pattern: "cloudflare to restrict access", min_status: None },
        ],
    },
    ProviderSignals {
        provider: WafProvider::Akamai,
        infra: &[
            InfraSignal { header: "set-cookie", value_contains: Some("ak_bmsc") },
            InfraSignal { header: "set-cookie", value_contains: Some("bm_sv") },
            InfraSignal { header: "server", value_contains: Some("akamai") },
            InfraSignal { header: "x-akamai-transformed", value_contains: None },
        ],
        action: &[
            ActionSignal { pattern: "access denied", min_status: Some(400) },
            ActionSignal { pattern: "reference&#32;#", min_status: None },
            ActionSignal { pattern: "errors.edgesuite.net", min_status: None },
            ActionSignal { pattern: "you don't have permission to access", min_status: None },
        ],
    },
    ProviderSignals {
        provider: WafProvider::DataDome,
        infra: &[
            InfraSignal { header: "x-datadome", value_contains: None },
            InfraSignal { header: "set-cookie", value_contains: Some("datadome") },
            InfraSignal { header: "x-datadome-cid", value_contains: None },
        ],
        action: &[
            ActionSignal { pattern: "captcha-delivery.com", min_status: None },
            ActionSignal { pattern: "geo.captcha-delivery.com", min_status: None },
            ActionSignal { pattern: "datadome", min_status: Some(400) },
        ],
    },
    ProviderSignals {
        provider: WafProvider::PerimeterX,
        infra: &[
            InfraSignal { header: "set-cookie", value_contains: Some("_px3") },
            InfraSignal { header: "set-cookie", value_contains: Some("_pxvid") },
            InfraSignal { header: "x-px-authorization", value_contains: None },
        ],
        action: &[
            ActionSignal { pattern: "px-captcha", min_status: None },
            ActionSignal { pattern: "perimeterx", min_status: None },
            ActionSignal { pattern: "please verify you are a human", min_status: None },
        ],
    },
    ProviderSignals {
        provider: WafProvider::Imperva,
        infra: &[
            InfraSignal { header: "set-cookie", value_contains: Some("incap_ses") },
            InfraSignal { header: "set-cookie", value_contains: Some("visid_incap") },
            InfraSignal { header: "x-iinfo", value_contains: None },
            InfraSignal { header: "x-cdn", value_contains: Some("incapsula") },
        ],
        action: &[
            ActionSignal { pattern: "_incapsula_resource", min_status: None },
            ActionSignal { pattern: "incident id", min_status: Some(400) },
            ActionSignal { pattern: "powered by incapsula", min_status: None },
        ],
    },
    ProviderSignals {
        provider: WafProvider::Sucuri,
        infra: &[
            InfraSignal { header: "x-sucuri-id", value_contains: None },
            InfraSignal { header: "x-sucuri-cache", value_contains: None },
            InfraSignal { header: "server", value_contains: Some("sucuri") },
        ],
        action: &[
            ActionSignal { pattern: "sucuri website firewall", min_status: None },
            ActionSignal { pattern: "access denied - sucuri", min_status: None },
            ActionSignal { pattern: "cloudproxy", min_status: Some(400) },
        ],
    },
];

/// Scan a response for WAF intervention. Returns the strongest detection.
pub fn detect_waf(input: &WafInput<'_>) -> Option<WafDetection> {
    let html_lower = input.html.to_lowercase();
    let status = input.status_code.unwrap_or(0);

    let mut best: Option<WafDetection> = None;

    for provider in SIGNALS {
        let mut signals = Vec::new();
        let mut infra_hits = 0usize;
        let mut action_hits = 0usize;

        for signal in provider.infra {
            if header_matches(input.headers, signal.header, signal.value_contains) {
                infra_hits += 1;
                signals.push(match signal.value_contains {
                    Some(value) => format!("header {}~{}", signal.header, value),
                    None => format!("header {}", signal.header),
                });
            }
        }

        for signal in provider.action {
            if let Some(min) = signal.min_status
                && status < min
            {
                continue;
            }
            if html_lower.contains(signal.pattern) {
                action_hits += 1;
                signals.push(format!("html {}", signal.pattern));
            }
        }

        // Infra alone only proves the CDN is in front, not that it acted.
        if action_hits >= 1 && (infra_hits >= 1 || action_hits >= 2) {
            let total = (provider.infra.len() + provider.action.len()) as f32;
            let confidence =
                (0.5 + ((infra_hits + action_hits) as f32 / total) * 0.5).min(1.0);
            let detection = WafDetection {
                provider: provider.provider,
                category: derive_category(status, &html_lower),
                confidence,
                signals,
            };
            let replace = best
                .as_ref()
                .map(|current| detection.confidence > current.confidence)
                .unwrap_or(true);
            if replace {
                best = Some(detection);
            }
        }
    }

    if let Some(ref detection) = best {
        log::debug!(
            "waf detected: provider={} category={} confidence={:.2} url={}",
            detection.provider,
            detection.category.as_str(),
            detection.confidence,
            input.url.unwrap_or("-")
        );
    }

    best
}

fn header_matches(headers: &HeaderMap, name: &str, value_contains: Option<&str>) -> bool {
    for (header_name, header_value) in headers.iter() {
        if !header_name.as_str().eq_ignore_ascii_case(name) {
            continue;
        }
        match value_contains {
            None => return true,
            Some(needle) => {
                if let Ok(value) = header_value.to_str()
                    && value.to_lowercase().contains(needle)
                {
                    return true;
                }
            }
        }
    }
    false
}

fn derive_category(status: u16, html_lower: &str) -> WafCategory {
    if status == 429 {
        return WafCategory::RateLimit;
    }
    if html_lower.contains("turnstile")
        || html_lower.contains("recaptcha")
        || html_lower.contains("hcaptcha")
    {
        return WafCategory::Captcha;
    }
    if html_lower.contains("access denied")
        || html_lower.contains("you have been blocked")
        || html_lower.contains("request blocked")
    {
        return WafCategory::Block;
    }
    WafCategory::Challenge
}

/// Challenge-type token used by engines when raising a challenge error.
///
/// Cloudflare keeps its historical short tokens; every other vendor gets the
/// generic `waf:<provider>:<category>` form.
pub fn format_waf_challenge_type(detection: &WafDetection) -> String {
    match detection.provider {
        WafProvider::Cloudflare => match detection.category {
            WafCategory::Challenge => "cloudflare".to_string(),
            WafCategory::Captcha => "cloudflare-captcha".to_string(),
            WafCategory::RateLimit => "cloudflare-rate-limit".to_string(),
            WafCategory::Block => "cloudflare-blocked".to_string(),
        },
        provider => format!("waf:{}:{}", provider, detection.category.as_str()),
    }
}
