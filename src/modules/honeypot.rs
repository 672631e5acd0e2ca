//! Honeypot link assessment.
//!
//! Crawler traps are anchors a human can never interact with: hidden by CSS,
//! parked on admin/destructive endpoints, or stuffed with decoy parameters.
//! Each signal contributes a fixed score; links at or above the threshold are
//! blocked from the crawl frontier.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// Candidate link extracted from a page.
#[derive(Debug, Clone, Default)]
pub struct LinkCandidate {
    pub href: String,
    pub resolved_url: String,
    /// Outer HTML of the `<a>` element, when available.
    pub anchor_html: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HoneypotOptions {
    pub enabled: bool,
    pub threshold: u32,
}

impl Default for HoneypotOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 8,
        }
    }
}

/// Scored verdict for one link.
#[derive(Debug, Clone)]
pub struct HoneypotAssessment {
    pub blocked: bool,
    pub score: u32,
    pub threshold: u32,
    pub reasons: Vec<String>,
}

static SUSPICIOUS_VERBS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(delete|remove|destroy|unsubscribe|trap|honeypot)\b")
        .expect("valid verb regex")
});

static LOGOUT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(log[-_]?out|sign[-_]?out)").expect("valid logout regex")
});

static SCREEN_READER_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(sr-only|screen-reader|visually-hidden)").expect("valid sr regex")
});

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a").expect("valid anchor selector"));

/// Assess a link for honeypot characteristics.
pub fn assess_link(candidate: &LinkCandidate, options: &HoneypotOptions) -> HoneypotAssessment {
    let mut score = 0u32;
    let mut reasons = Vec::new();

    if !options.enabled {
        return HoneypotAssessment {
            blocked: false,
            score: 0,
            threshold: options.threshold,
            reasons,
        };
    }

    if let Some(ref html) = candidate.anchor_html {
        score_anchor(html, &mut score, &mut reasons);
    }
    score_url(&candidate.resolved_url, &mut score, &mut reasons);

    HoneypotAssessment {
        blocked: score >= options.threshold,
        score,
        threshold: options.threshold,
        reasons,
    }
}

fn score_anchor(anchor_html: &str, score: &mut u32, reasons: &mut Vec<String>) {
    let fragment = Html::parse_fragment(anchor_html);
    let Some(element) = fragment.select(&ANCHOR_SELECTOR).next() else {
        return;
    };

    let attr = |name: &str| element.value().attr(name).unwrap_or("");

    if element.value().attr("hidden").is_some() {
        *score += 6;
        reasons.push("hidden attribute".to_string());
    }
    if attr("aria-hidden").eq_ignore_ascii_case("true") {
        *score += 4;
        reasons.push("aria-hidden".to_string());
    }

    let style = normalize_style(attr("style"));
    let class = attr("class").to_string();

    if style.contains("display:none")
        || style.contains("visibility:hidden")
        || style.contains("color:transparent")
        || opacity_at_most(&style, 0.01)
    {
        *score += 6;
        reasons.push("invisible style".to_string());
    }
    if is_pixel_box(&style) {
        *score += 8;
        reasons.push("1x1 pixel box".to_string());
    }
    if tiny_typography(&style) {
        *score += 4;
        reasons.push("unreadably small text".to_string());
    }
    if off_screen(&style) && !SCREEN_READER_CLASS.is_match(&class) {
        *score += 2;
        reasons.push("positioned off-screen".to_string());
    }

    let text: String = element.text().collect::<String>();
    if text.trim().is_empty() {
        *score += 1;
        reasons.push("empty anchor text".to_string());
    }
}

fn score_url(resolved: &str, score: &mut u32, reasons: &mut Vec<String>) {
    let lower = resolved.to_lowercase();

    if lower.contains("wp-admin") || lower.contains("wp-login.php") {
        *score += 10;
        reasons.push("admin path".to_string());
    }
    if LOGOUT_PATTERN.is_match(&lower) {
        *score += 6;
        reasons.push("logout link".to_string());
    }
    if SUSPICIOUS_VERBS.is_match(&lower) {
        *score += 3;
        reasons.push("destructive verb in url".to_string());
    }

    let Ok(parsed) = Url::parse(resolved) else {
        return;
    };

    if let Some(query) = parsed.query() {
        if query.len() >= 512 {
            *score += 3;
            reasons.push("very long query string".to_string());
        }
        let pairs: Vec<_> = parsed.query_pairs().collect();
        let total = pairs.len();
        let max_same_name = pairs
            .iter()
            .map(|(name, _)| pairs.iter().filter(|(other, _)| other == name).count())
            .max()
            .unwrap_or(0);
        if max_same_name >= 4 || total >= 20 {
            *score += 3;
            reasons.push("repeated query parameters".to_string());
        }
    }

    if let Some(host) = parsed.host_str() {
        let labels: Vec<&str> = host.split('.').collect();
        let leftmost_numeric = labels
            .first()
            .map(|label| label.len() >= 6 && label.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
        if labels.len() >= 5 || leftmost_numeric {
            *score += 2;
            reasons.push("suspicious subdomain".to_string());
        }
    }
}

fn normalize_style(style: &str) -> String {
    style
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

fn style_value(style: &str, property: &str) -> Option<String> {
    for declaration in style.split(';') {
        if let Some((name, value)) = declaration.split_once(':')
            && name == property
        {
            return Some(value.to_string());
        }
    }
    None
}

fn opacity_at_most(style: &str, limit: f64) -> bool {
    style_value(style, "opacity")
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| v <= limit)
        .unwrap_or(false)
}

fn px_value(style: &str, property: &str) -> Option<f64> {
    style_value(style, property)
        .and_then(|v| v.strip_suffix("px").map(str::to_string))
        .and_then(|v| v.parse::<f64>().ok())
}

fn is_pixel_box(style: &str) -> bool {
    let width = px_value(style, "width");
    let height = px_value(style, "height");
    matches!((width, height), (Some(w), Some(h)) if w <= 1.0 && h <= 1.0)
}

fn tiny_typography(style: &str) -> bool {
    let tiny_font = px_value(style, "font-size").map(|v| v <= 2.0).unwrap_or(false);
    let zero_line = style_value(style, "line-height")
        .map(|v| v == "0" || v == "0px")
        .unwrap_or(false);
    tiny_font || zero_line
}

fn off_screen(style: &str) -> bool {
    for property in ["left", "top", "text-indent", "margin-left"] {
        if let Some(value) = px_value(style, property)
            && value <= -999.0
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assess(href: &str, anchor: Option<&str>) -> HoneypotAssessment {
        assess_link(
            &LinkCandidate {
                href: href.to_string(),
                resolved_url: href.to_string(),
                anchor_html: anchor.map(str::to_string),
                base_url: None,
            },
            &HoneypotOptions::default(),
        )
    }

    #[test]
    fn visible_ordinary_link_passes() {
        let verdict = assess(
            "https://example.com/articles/rust",
            Some(r#"<a href="/articles/rust">Rust articles</a>"#),
        );
        assert!(!verdict.blocked);
        assert_eq!(verdict.score, 0);
    }

    #[test]
    fn hidden_empty_anchor_is_blocked() {
        let verdict = assess(
            "https://example.com/page",
            Some(r#"<a href="/page" hidden style="display: none"></a>"#),
        );
        // hidden (+6) + invisible style (+6) + empty text (+1)
        assert_eq!(verdict.score, 13);
        assert!(verdict.blocked);
    }

    #[test]
    fn pixel_box_is_blocked() {
        let verdict = assess(
            "https://example.com/p",
            Some(r#"<a href="/p" style="width:1px;height:1px">x</a>"#),
        );
        assert_eq!(verdict.score, 8);
        assert!(verdict.blocked);
    }

    #[test]
    fn admin_path_is_blocked_without_dom_signals() {
        let verdict = assess("https://example.com/wp-admin/post.php?action=delete", None);
        // admin (+10) + destructive verb (+3)
        assert_eq!(verdict.score, 13);
        assert!(verdict.blocked);
    }

    #[test]
    fn screen_reader_class_excuses_offscreen_position() {
        let verdict = assess(
            "https://example.com/skip",
            Some(r##"<a href="#main" class="sr-only" style="left:-9999px">Skip to content</a>"##),
        );
        assert_eq!(verdict.score, 0);
        assert!(!verdict.blocked);
    }

    #[test]
    fn repeated_params_and_long_query_score() {
        let long_query: String = format!(
            "https://example.com/search?{}",
            (0..25)
                .map(|i| format!("page={i}"))
                .collect::<Vec<_>>()
                .join("&")
        );
        let verdict = assess(&long_query, None);
        assert!(verdict.reasons.iter().any(|r| r.contains("repeated")));

        let weird = assess("https://a.b.c.d.example.com/x", None);
        assert!(weird.reasons.iter().any(|r| r.contains("subdomain")));
        assert!(!weird.blocked);
    }

    #[test]
    fn disabled_assessor_blocks_nothing() {
        let verdict = assess_link(
            &LinkCandidate {
                href: "https://example.com/wp-admin".to_string(),
                resolved_url: "https://example.com/wp-admin".to_string(),
                anchor_html: None,
                base_url: None,
            },
            &HoneypotOptions {
                enabled: false,
                threshold: 8,
            },
        );
        assert!(!verdict.blocked);
        assert_eq!(verdict.score, 0);
    }

    #[test]
    fn logout_scores_but_does_not_block_alone() {
        let verdict = assess("https://example.com/account/logout", None);
        assert_eq!(verdict.score, 6);
        assert!(!verdict.blocked);
    }
}
