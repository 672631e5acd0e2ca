//! Site-key extraction from page HTML.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use super::CaptchaType;

/// A widget site key discovered in markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteKey {
    pub captcha_type: CaptchaType,
    pub key: String,
}

fn pattern(raw: &str) -> Regex {
    RegexBuilder::new(raw)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid site-key regex `{raw}`: {err}"))
}

// Widget elements: a tag whose class mentions the widget plus a
// data-sitekey attribute, in either attribute order.
static TURNSTILE_ELEMENT: Lazy<Regex> =
    Lazy::new(|| pattern(r#"<[^>]*class\s*=\s*["'][^"']*cf-turnstile[^"']*["'][^>]*>"#));
static RECAPTCHA_ELEMENT: Lazy<Regex> =
    Lazy::new(|| pattern(r#"<[^>]*class\s*=\s*["'][^"']*g-recaptcha[^"']*["'][^>]*>"#));
static DATA_SITEKEY: Lazy<Regex> =
    Lazy::new(|| pattern(r#"data-sitekey\s*=\s*["']([^"']+)["']"#));

// Programmatic render calls.
static TURNSTILE_RENDER: Lazy<Regex> = Lazy::new(|| {
    pattern(r#"turnstile\.render\s*\([^)]*sitekey\s*[:=]\s*["']([^"']+)["']"#)
});
static RECAPTCHA_RENDER: Lazy<Regex> = Lazy::new(|| {
    pattern(r#"grecaptcha\.render\s*\([^)]*sitekey\s*[:=]\s*["']([^"']+)["']"#)
});

/// Extract every CAPTCHA site key declared in `html`, deduplicated per
/// `(type, key)`.
pub fn extract_site_keys(html: &str) -> Vec<SiteKey> {
    let mut keys: Vec<SiteKey> = Vec::new();
    let mut push = |captcha_type: CaptchaType, key: &str| {
        let candidate = SiteKey {
            captcha_type,
            key: key.to_string(),
        };
        if !keys.contains(&candidate) {
            keys.push(candidate);
        }
    };

    for element in TURNSTILE_ELEMENT.find_iter(html) {
        if let Some(capture) = DATA_SITEKEY.captures(element.as_str()) {
            push(CaptchaType::Turnstile, &capture[1]);
        }
    }
    for capture in TURNSTILE_RENDER.captures_iter(html) {
        push(CaptchaType::Turnstile, &capture[1]);
    }
    for element in RECAPTCHA_ELEMENT.find_iter(html) {
        if let Some(capture) = DATA_SITEKEY.captures(element.as_str()) {
            push(CaptchaType::RecaptchaV2, &capture[1]);
        }
    }
    for capture in RECAPTCHA_RENDER.captures_iter(html) {
        push(CaptchaType::RecaptchaV2, &capture[1]);
    }

    keys
}
