//! Endpoint probing and scrapability scoring.
//!
//! For a handful of discovered endpoints the profiler sends a HEAD and a
//! typed request, then condenses status, content type, auth demands, and
//! rate-limit signals into a 0–100 scrapability score. The score is a
//! ranking aid, not a promise.

use serde::{Deserialize, Serialize};

/// Probe outcome for one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointProfile {
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub requires_auth: bool,
    pub rate_limited: bool,
    pub scrapability_score: u8,
}

/// Condense probe signals into a 0–100 score.
pub fn scrapability_score(
    status: Option<u16>,
    content_type: Option<&str>,
    requires_auth: bool,
    rate_limited: bool,
) -> u8 {
    let mut score: i32 = 0;

    match status {
        Some(status) if (200..300).contains(&status) => score += 50,
        Some(status) if (300..400).contains(&status) => score += 30,
        Some(401) | Some(403) => score += 10,
        Some(405) => score += 15,
        Some(429) => score += 20,
        _ => {}
    }

    if let Some(content_type) = content_type {
        let content_type = content_type.to_lowercase();
        if content_type.contains("json") {
            score += 30;
        } else if content_type.contains("xml") {
            score += 25;
        } else if content_type.contains("html") {
            score += 20;
        } else if content_type.contains("text/") {
            score += 15;
        }
    }

    if requires_auth {
        score -= 20;
    }
    if rate_limited {
        score -= 15;
    }

    score.clamp(0, 100) as u8
}

/// HEAD then a typed request against one endpoint.
pub async fn profile_endpoint(
    client: &reqwest::Client,
    url: &str,
    method: &str,
) -> EndpointProfile {
    let head_status = client
        .head(url)
        .send()
        .await
        .ok()
        .map(|response| response.status().as_u16());

    let typed = match method.to_uppercase().as_str() {
        "POST" => {
            client
                .post(url)
                .header("Accept", "application/json")
                .json(&serde_json::json!({}))
                .send()
                .await
        }
        _ => {
            client
                .get(url)
                .header("Accept", "application/json")
                .send()
                .await
        }
    };

    let (status, content_type, auth_header) = match typed {
        Ok(response) => {
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let auth_header = response.headers().contains_key("www-authenticate");
            (Some(status), content_type, auth_header)
        }
        Err(_) => (head_status, None, false),
    };

    let requires_auth = auth_header || matches!(status, Some(401) | Some(403));
    let rate_limited = matches!(status, Some(429));

    EndpointProfile {
        url: url.to_string(),
        method: method.to_uppercase(),
        status,
        content_type: content_type.clone(),
        requires_auth,
        rate_limited,
        scrapability_score: scrapability_score(
            status,
            content_type.as_deref(),
            requires_auth,
            rate_limited,
        ),
    }
}
