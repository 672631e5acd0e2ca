//! Engine error taxonomy.
//!
//! Engines never retry internally: they classify what happened and throw.
//! The orchestrator decides whether the next engine in the cascade gets a
//! turn. Every variant carries the name of the engine that produced it.

use std::collections::HashMap;

use thiserror::Error;

use crate::challenges::waf::WafDetection;

/// Classified failure from one engine attempt (or the whole cascade).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Non-success HTTP status with no challenge markup.
    #[error("[{engine}] http {status} {status_text}")]
    Http {
        engine: String,
        status: u16,
        status_text: String,
    },

    /// The response is an anti-bot interstitial, not content.
    #[error("[{engine}] challenge detected: {challenge_type}")]
    ChallengeDetected {
        engine: String,
        challenge_type: String,
        waf: Option<WafDetection>,
    },

    /// The page answered but carried less text than the floor.
    #[error("[{engine}] insufficient content: {length} < {threshold} chars")]
    InsufficientContent {
        engine: String,
        length: usize,
        threshold: usize,
    },

    /// The engine's own deadline (or an external abort) fired.
    #[error("[{engine}] timed out after {timeout_ms} ms")]
    Timeout { engine: String, timeout_ms: u64 },

    /// The engine cannot run at all (missing transport, no browser pool).
    #[error("[{engine}] unavailable: {reason}")]
    Unavailable { engine: String, reason: String },

    /// Fallback wrapper for anything the engine could not classify.
    #[error("[{engine}] {message}")]
    Other {
        engine: String,
        message: String,
        retryable: bool,
    },

    /// Aggregate raised when the cascade is exhausted.
    #[error("all engines failed (attempted: {})", attempted_engines.join(", "))]
    AllEnginesFailed {
        attempted_engines: Vec<String>,
        errors: HashMap<String, EngineError>,
        blocked_by_circuit_breaker: bool,
    },
}

impl EngineError {
    pub fn other(engine: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Other {
            engine: engine.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Name of the engine that raised this error. `None` for the aggregate.
    pub fn engine_name(&self) -> Option<&str> {
        match self {
            EngineError::Http { engine, .. }
            | EngineError::ChallengeDetected { engine, .. }
            | EngineError::InsufficientContent { engine, .. }
            | EngineError::Timeout { engine, .. }
            | EngineError::Unavailable { engine, .. }
            | EngineError::Other { engine, .. } => Some(engine),
            EngineError::AllEnginesFailed { .. } => None,
        }
    }

    /// Whether the same engine could plausibly succeed on a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Http { status, .. } => *status == 429 || *status >= 500,
            EngineError::ChallengeDetected { .. } => true,
            EngineError::InsufficientContent { .. } => true,
            EngineError::Timeout { .. } => true,
            EngineError::Unavailable { .. } => false,
            EngineError::Other { retryable, .. } => *retryable,
            EngineError::AllEnginesFailed { .. } => false,
        }
    }

    /// First human-readable message out of an aggregate, or this error's own.
    pub fn first_message(&self) -> String {
        match self {
            EngineError::AllEnginesFailed {
                attempted_engines,
                errors,
                blocked_by_circuit_breaker,
            } => {
                if *blocked_by_circuit_breaker {
                    return "circuit breaker open for domain".to_string();
                }
                attempted_engines
                    .iter()
                    .find_map(|engine| errors.get(engine).map(|err| err.to_string()))
                    .unwrap_or_else(|| self.to_string())
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_retryability_follows_status() {
        let retryable = [429u16, 500, 502, 503];
        let terminal = [400u16, 401, 403, 404, 418];
        for status in retryable {
            assert!(
                EngineError::Http {
                    engine: "http".into(),
                    status,
                    status_text: String::new()
                }
                .is_retryable(),
                "{status} should be retryable"
            );
        }
        for status in terminal {
            assert!(
                !EngineError::Http {
                    engine: "http".into(),
                    status,
                    status_text: String::new()
                }
                .is_retryable(),
                "{status} should not be retryable"
            );
        }
    }

    #[test]
    fn aggregate_reports_first_engine_error() {
        let mut errors = HashMap::new();
        errors.insert(
            "http".to_string(),
            EngineError::ChallengeDetected {
                engine: "http".to_string(),
                challenge_type: "cloudflare".to_string(),
                waf: None,
            },
        );
        errors.insert(
            "tlsclient".to_string(),
            EngineError::Timeout {
                engine: "tlsclient".to_string(),
                timeout_ms: 15000,
            },
        );
        let aggregate = EngineError::AllEnginesFailed {
            attempted_engines: vec!["http".to_string(), "tlsclient".to_string()],
            errors,
            blocked_by_circuit_breaker: false,
        };
        assert!(aggregate.first_message().contains("cloudflare"));
        assert!(!aggregate.is_retryable());
        assert!(aggregate.engine_name().is_none());
    }

    #[test]
    fn breaker_block_message() {
        let aggregate = EngineError::AllEnginesFailed {
            attempted_engines: Vec::new(),
            errors: HashMap::new(),
            blocked_by_circuit_breaker: true,
        };
        assert!(aggregate.first_message().contains("circuit breaker"));
    }
}
