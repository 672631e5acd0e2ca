//! API traffic interception.
//!
//! While the browser engine loads a page, XHR/fetch exchanges stream into an
//! interceptor. Afterwards the captured traffic is grouped into endpoint
//! patterns: path segments that look like identifiers are templated, query
//! parameters and headers are ranked by prevalence, and response bodies get
//! a naive schema sketch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::external_deps::browser::{NetworkExchange, RequestSink};

/// Request bodies above this size are dropped, not truncated.
const MAX_REQUEST_BODY: usize = 64 * 1024;
/// Response bodies above this size are dropped, not truncated.
const MAX_RESPONSE_BODY: usize = 256 * 1024;

/// Query parameters present in at least this share of samples are flagged
/// as likely required.
const REQUIRED_PREVALENCE: f64 = 0.9;
/// Headers present in at least this share of samples are reported.
const COMMON_HEADER_PREVALENCE: f64 = 0.8;

/// Hosts whose traffic is never API-relevant (analytics, tag managers, CDNs).
pub const DEFAULT_DOMAIN_BLOCKLIST: &[&str] = &[
    "google-analytics.com",
    "googletagmanager.com",
    "doubleclick.net",
    "facebook.net",
    "connect.facebook.com",
    "segment.io",
    "sentry.io",
    "cloudflareinsights.com",
    "hotjar.com",
    "clarity.ms",
    "fonts.googleapis.com",
    "fonts.gstatic.com",
    "cdn.jsdelivr.net",
    "unpkg.com",
    "cdnjs.cloudflare.com",
];

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[1-5][0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$")
        .expect("valid uuid regex")
});
static HEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{24,}$").expect("valid hex regex"));

/// Fields whose presence in a response suggests pagination.
const PAGINATION_FIELDS: &[&str] = &[
    "next",
    "nextPage",
    "nextCursor",
    "cursor",
    "page",
    "offset",
    "hasMore",
    "total",
];

/// One query parameter's prevalence across captured samples.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryParamInfo {
    pub name: String,
    pub prevalence: f64,
    pub likely_required: bool,
}

/// A discovered API endpoint shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiPattern {
    pub method: String,
    pub host: String,
    pub path_template: String,
    pub sample_count: usize,
    pub query_params: Vec<QueryParamInfo>,
    pub common_headers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    pub pagination_fields: Vec<String>,
}

/// Collects network exchanges and folds them into [`ApiPattern`]s.
pub struct ApiInterceptor {
    blocklist: Vec<String>,
    captured: Mutex<Vec<NetworkExchange>>,
}

impl ApiInterceptor {
    pub fn new() -> Self {
        Self::with_blocklist(
            DEFAULT_DOMAIN_BLOCKLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    pub fn with_blocklist(blocklist: Vec<String>) -> Self {
        Self {
            blocklist,
            captured: Mutex::new(Vec::new()),
        }
    }

    /// Sink suitable for [`BrowserPage::set_request_sink`].
    ///
    /// [`BrowserPage::set_request_sink`]: crate::external_deps::browser::BrowserPage::set_request_sink
    pub fn sink(self: &Arc<Self>) -> RequestSink {
        let interceptor = Arc::clone(self);
        Arc::new(move |exchange| interceptor.record(exchange))
    }

    /// Record one exchange, applying resource-type, blocklist and size
    /// filters.
    pub fn record(&self, mut exchange: NetworkExchange) {
        if !matches!(exchange.resource_type.as_str(), "xhr" | "fetch") {
            return;
        }
        let Ok(parsed) = Url::parse(&exchange.url) else {
            return;
        };
        let host = parsed.host_str().unwrap_or("").to_lowercase();
        if self.blocklist.iter().any(|blocked| host.ends_with(blocked)) {
            return;
        }
        if exchange
            .request_body
            .as_ref()
            .map(|b| b.len() > MAX_REQUEST_BODY)
            .unwrap_or(false)
        {
            exchange.request_body = None;
        }
        if exchange
            .response_body
            .as_ref()
            .map(|b| b.len() > MAX_RESPONSE_BODY)
            .unwrap_or(false)
        {
            exchange.response_body = None;
        }
        self.captured.lock().expect("interceptor lock").push(exchange);
    }

    /// Number of exchanges currently held.
    pub fn captured_count(&self) -> usize {
        self.captured.lock().expect("interceptor lock").len()
    }

    /// Fold the captured traffic into endpoint patterns.
    pub fn patterns(&self) -> Vec<ApiPattern> {
        let captured = self.captured.lock().expect("interceptor lock");
        let mut groups: HashMap<(String, String, String), Vec<&NetworkExchange>> = HashMap::new();

        for exchange in captured.iter() {
            let Ok(parsed) = Url::parse(&exchange.url) else {
                continue;
            };
            let host = parsed.host_str().unwrap_or("").to_lowercase();
            let template = template_path(parsed.path());
            groups
                .entry((exchange.method.to_uppercase(), host, template))
                .or_default()
                .push(exchange);
        }

        let mut patterns: Vec<ApiPattern> = groups
            .into_iter()
            .map(|((method, host, path_template), samples)| {
                build_pattern(method, host, path_template, &samples)
            })
            .collect();
        patterns.sort_by(|a, b| {
            b.sample_count
                .cmp(&a.sample_count)
                .then_with(|| a.path_template.cmp(&b.path_template))
        });
        patterns
    }
}

impl Default for ApiInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace identifier-looking path segments with placeholders.
pub fn template_path(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                String::new()
            } else if UUID_RE.is_match(segment) {
                ":uuid".to_string()
            } else if HEX_RE.is_match(segment) {
                ":hex".to_string()
            } else if segment.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else {
                segment.to_string()
            }
        })
        .collect();
    let joined = segments.join("/");
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

fn build_pattern(
    method: String,
    host: String,
    path_template: String,
    samples: &[&NetworkExchange],
) -> ApiPattern {
    let total = samples.len() as f64;

    let mut query_counts: HashMap<String, usize> = HashMap::new();
    for exchange in samples {
        if let Ok(parsed) = Url::parse(&exchange.url) {
            let mut seen: Vec<String> = Vec::new();
            for (name, _) in parsed.query_pairs() {
                let name = name.to_string();
                if !seen.contains(&name) {
                    seen.push(name);
                }
            }
            for name in seen {
                *query_counts.entry(name).or_insert(0) += 1;
            }
        }
    }
    let mut query_params: Vec<QueryParamInfo> = query_counts
        .into_iter()
        .map(|(name, count)| {
            let prevalence = count as f64 / total;
            QueryParamInfo {
                name,
                prevalence,
                likely_required: prevalence >= REQUIRED_PREVALENCE,
            }
        })
        .collect();
    query_params.sort_by(|a, b| a.name.cmp(&b.name));

    let mut header_counts: HashMap<String, usize> = HashMap::new();
    for exchange in samples {
        for name in exchange.request_headers.keys() {
            *header_counts.entry(name.to_lowercase()).or_insert(0) += 1;
        }
    }
    let mut common_headers: Vec<String> = header_counts
        .into_iter()
        .filter(|(_, count)| *count as f64 / total >= COMMON_HEADER_PREVALENCE)
        .map(|(name, _)| name)
        .collect();
    common_headers.sort();

    let parsed_response = samples
        .iter()
        .filter_map(|exchange| exchange.response_body.as_deref())
        .find_map(|body| serde_json::from_str::<Value>(body).ok());
    let response_schema = parsed_response.as_ref().map(|value| infer_schema(value, 0));
    let pagination_fields = parsed_response
        .as_ref()
        .map(|value| detect_pagination(value))
        .unwrap_or_default();

    ApiPattern {
        method,
        host,
        path_template,
        sample_count: samples.len(),
        query_params,
        common_headers,
        response_schema,
        pagination_fields,
    }
}

/// Shallow structural sketch of a JSON value.
fn infer_schema(value: &Value, depth: usize) -> Value {
    if depth >= 4 {
        return Value::String("any".to_string());
    }
    match value {
        Value::Null => Value::String("null".to_string()),
        Value::Bool(_) => Value::String("boolean".to_string()),
        Value::Number(_) => Value::String("number".to_string()),
        Value::String(_) => Value::String("string".to_string()),
        Value::Array(items) => match items.first() {
            Some(first) => Value::Array(vec![infer_schema(first, depth + 1)]),
            None => Value::Array(Vec::new()),
        },
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| (key.clone(), infer_schema(val, depth + 1)))
                .collect(),
        ),
    }
}

fn detect_pagination(value: &Value) -> Vec<String> {
    let Some(object) = value.as_object() else {
        return Vec::new();
    };
    PAGINATION_FIELDS
        .iter()
        .filter(|field| object.contains_key(**field))
        .map(|field| field.to_string())
        .collect()
}
