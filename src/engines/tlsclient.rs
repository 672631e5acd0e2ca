//! TLS-fingerprinting fetch engine.
//!
//! Second rung of the cascade. The actual transport is pluggable — anything
//! that can speak HTTP with a browser-grade TLS ClientHello (curl-impersonate
//! bindings, a JA3-shaping proxy). This engine owns the request shaping,
//! response classification, and WAF enrichment around that transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use super::error::EngineError;
use super::{
    classify_challenge, ensure_sufficient_content, find_challenge_pattern, EngineConfig,
    EngineFeatures, EngineMeta, EngineResult, FetchEngine, RequestShaper, CF_INFRA_PATTERNS,
};
use crate::challenges::waf::{detect_waf, format_waf_challenge_type, WafInput};

const ENGINE_NAME: &str = "tlsclient";

/// Raw response handed back by a TLS transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub final_url: String,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

/// Errors a transport may raise.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport timeout")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

/// Pluggable TLS-fingerprinting HTTP transport.
#[async_trait]
pub trait TlsTransport: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        proxy: Option<&str>,
    ) -> Result<TransportResponse, TransportError>;
}

/// Markers of pages that refuse to render without JavaScript.
const JS_REQUIRED_PATTERNS: &[&str] = &[
    "enable javascript",
    "javascript is required",
    "please turn on javascript",
];

/// Fetch engine wrapping an injected TLS transport.
pub struct TlsClientEngine {
    config: EngineConfig,
    shaper: RequestShaper,
    transport: Option<Arc<dyn TlsTransport>>,
}

impl TlsClientEngine {
    pub fn new(shaper: RequestShaper, transport: Option<Arc<dyn TlsTransport>>) -> Self {
        Self {
            config: EngineConfig {
                name: ENGINE_NAME,
                max_timeout: Duration::from_millis(15_000),
                features: EngineFeatures {
                    tls_fingerprint: true,
                    javascript: false,
                },
            },
            shaper,
            transport,
        }
    }

    fn challenge_error(&self, challenge_type: String, waf: Option<crate::challenges::waf::WafDetection>) -> EngineError {
        EngineError::ChallengeDetected {
            engine: ENGINE_NAME.to_string(),
            challenge_type,
            waf,
        }
    }
}

#[async_trait]
impl FetchEngine for TlsClientEngine {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn is_available(&self) -> bool {
        self.transport.is_some()
    }

    async fn scrape(&self, meta: &EngineMeta) -> Result<EngineResult, EngineError> {
        let Some(ref transport) = self.transport else {
            return Err(EngineError::Unavailable {
                engine: ENGINE_NAME.to_string(),
                reason: "no TLS transport configured".to_string(),
            });
        };

        let started = Instant::now();
        // The TLS engine is the one place geo-consistent headers apply: the
        // transport's fingerprint should agree with the exit locale.
        let headers = self.shaper.build_headers(meta, true);

        let response = transport
            .fetch(&meta.url, &headers, meta.options.proxy.as_deref())
            .await
            .map_err(|err| match err {
                TransportError::Timeout => EngineError::Timeout {
                    engine: ENGINE_NAME.to_string(),
                    timeout_ms: self.config.max_timeout.as_millis() as u64,
                },
                TransportError::Other(message)
                    if message.to_lowercase().contains("timeout") =>
                {
                    EngineError::Timeout {
                        engine: ENGINE_NAME.to_string(),
                        timeout_ms: self.config.max_timeout.as_millis() as u64,
                    }
                }
                TransportError::Other(message) => EngineError::other(ENGINE_NAME, message),
            })?;

        let body_text = String::from_utf8_lossy(&response.body).to_string();
        let waf = detect_waf(&WafInput {
            url: Some(&meta.url),
            status_code: Some(response.status),
            headers: &response.headers,
            html: &body_text,
        });

        let challenge_pattern = find_challenge_pattern(&body_text);
        if response.status >= 400 {
            if challenge_pattern.is_some() || waf.is_some() {
                let challenge_type = waf
                    .as_ref()
                    .map(format_waf_challenge_type)
                    .unwrap_or_else(|| classify_challenge(&body_text).to_string());
                return Err(self.challenge_error(challenge_type, waf));
            }
            return Err(EngineError::Http {
                engine: ENGINE_NAME.to_string(),
                status: response.status,
                status_text: http::StatusCode::from_u16(response.status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("unknown status")
                    .to_string(),
            });
        }

        if challenge_pattern.is_some() {
            let challenge_type = waf
                .as_ref()
                .map(format_waf_challenge_type)
                .unwrap_or_else(|| classify_challenge(&body_text).to_string());
            return Err(self.challenge_error(challenge_type, waf));
        }

        let body_lower = body_text.to_lowercase();
        if JS_REQUIRED_PATTERNS
            .iter()
            .any(|pattern| body_lower.contains(pattern))
        {
            let challenge_type = if CF_INFRA_PATTERNS
                .iter()
                .any(|pattern| body_lower.contains(pattern))
            {
                "cloudflare-js"
            } else {
                "js-required"
            };
            return Err(self.challenge_error(challenge_type.to_string(), waf));
        }

        ensure_sufficient_content(ENGINE_NAME, &body_text)?;

        let content_type = response
            .headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(EngineResult {
            html: response.body,
            final_url: response.final_url,
            status_code: response.status,
            content_type,
            headers: response.headers,
            engine_name: ENGINE_NAME.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            artifacts: None,
        })
    }
}
