//! The engine cascade.
//!
//! For each URL the orchestrator resolves an engine order (affinity first,
//! configured order as the fallback), asks the circuit breaker for
//! admission, then walks the engines under their own timeouts. Retryable
//! errors hand the URL to the next engine; terminal ones stop the cascade.
//! Every attempt is recorded into the affinity cache and the breaker,
//! exactly once, in invocation order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::time::timeout;
use url::Url;

use super::affinity::EngineAffinityCache;
use super::breaker::DomainCircuitBreaker;
use super::error::EngineError;
use super::{EngineMeta, EngineResult, FetchEngine};

/// Cascade-level options.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Engines never considered, by name.
    pub skip_engines: Vec<String>,
    /// When set, the cascade consists of exactly this engine.
    pub force_engine: Option<String>,
    pub verbose: bool,
}

/// Successful cascade output: the winning result plus the attempt trail.
#[derive(Debug)]
pub struct ScrapeOutcome {
    pub result: EngineResult,
    pub attempted_engines: Vec<String>,
    pub engine_errors: HashMap<String, EngineError>,
}

/// Drives the multi-engine cascade for single URLs.
pub struct EngineOrchestrator {
    engines: Vec<Arc<dyn FetchEngine>>,
    config: OrchestratorConfig,
    affinity: Option<Arc<EngineAffinityCache>>,
    breaker: Option<Arc<DomainCircuitBreaker>>,
}

impl EngineOrchestrator {
    /// `engines` defines the default cascade order.
    pub fn new(engines: Vec<Arc<dyn FetchEngine>>, config: OrchestratorConfig) -> Self {
        Self {
            engines,
            config,
            affinity: None,
            breaker: None,
        }
    }

    pub fn with_affinity(mut self, affinity: Arc<EngineAffinityCache>) -> Self {
        self.affinity = Some(affinity);
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<DomainCircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn affinity(&self) -> Option<&Arc<EngineAffinityCache>> {
        self.affinity.as_ref()
    }

    pub fn breaker(&self) -> Option<&Arc<DomainCircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Engines eligible for this process right now, in configured order.
    fn available_engines(&self) -> Vec<Arc<dyn FetchEngine>> {
        self.engines
            .iter()
            .filter(|engine| {
                let name = engine.config().name;
                if let Some(ref forced) = self.config.force_engine {
                    return name == forced;
                }
                !self.config.skip_engines.iter().any(|skip| skip == name)
            })
            .filter(|engine| engine.is_available())
            .cloned()
            .collect()
    }

    /// Run the cascade for one URL.
    pub async fn scrape(&self, meta: &EngineMeta) -> Result<ScrapeOutcome, EngineError> {
        let domain = domain_of(&meta.url);
        let available = self.available_engines();
        let available_names: Vec<&str> =
            available.iter().map(|engine| engine.config().name).collect();

        // Snapshot the order up front: affinity updates mid-cascade must not
        // reshuffle a cascade already in flight.
        let ordered_names: Vec<String> = match self.affinity {
            Some(ref affinity) => affinity.get_ordered_engines(&domain, &available_names),
            None => available_names.iter().map(|s| s.to_string()).collect(),
        };
        let ordered: Vec<Arc<dyn FetchEngine>> = ordered_names
            .iter()
            .filter_map(|name| {
                available
                    .iter()
                    .find(|engine| engine.config().name == name.as_str())
                    .cloned()
            })
            .collect();

        if ordered.is_empty() {
            return Err(EngineError::AllEnginesFailed {
                attempted_engines: Vec::new(),
                errors: HashMap::new(),
                blocked_by_circuit_breaker: false,
            });
        }

        let mut attempted_engines: Vec<String> = Vec::new();
        let mut engine_errors: HashMap<String, EngineError> = HashMap::new();
        let mut blocked_by_circuit_breaker = false;

        for engine in &ordered {
            let name = engine.config().name;

            if let Some(ref breaker) = self.breaker
                && !breaker.can_request(&domain)
            {
                log::warn!("circuit breaker open for {domain}, aborting cascade");
                blocked_by_circuit_breaker = true;
                break;
            }

            attempted_engines.push(name.to_string());
            if self.config.verbose {
                log::info!("engine {name} fetching {}", meta.url);
            }

            let started = Instant::now();
            let attempt = timeout(engine.config().max_timeout, engine.scrape(meta)).await;
            let elapsed_ms = started.elapsed().as_millis() as f64;

            let result = match attempt {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout {
                    engine: name.to_string(),
                    timeout_ms: engine.config().max_timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(result) => {
                    if let Some(ref affinity) = self.affinity {
                        affinity.record_result(&domain, name, true, Some(elapsed_ms));
                    }
                    if let Some(ref breaker) = self.breaker {
                        breaker.record_success(&domain);
                    }
                    return Ok(ScrapeOutcome {
                        result,
                        attempted_engines,
                        engine_errors,
                    });
                }
                Err(err) => {
                    log::debug!("engine {name} failed for {}: {err}", meta.url);
                    if let Some(ref affinity) = self.affinity {
                        affinity.record_result(&domain, name, false, Some(elapsed_ms));
                    }
                    if let Some(ref breaker) = self.breaker {
                        breaker.record_failure(&domain);
                    }
                    let proceed = should_retry(&err);
                    engine_errors.insert(name.to_string(), err);
                    if !proceed {
                        break;
                    }
                }
            }
        }

        Err(EngineError::AllEnginesFailed {
            attempted_engines,
            errors: engine_errors,
            blocked_by_circuit_breaker,
        })
    }
}

/// Whether the cascade should proceed to the next engine after `err`.
pub fn should_retry(err: &EngineError) -> bool {
    match err {
        EngineError::ChallengeDetected { .. }
        | EngineError::InsufficientContent { .. }
        | EngineError::Timeout { .. } => true,
        EngineError::Http { status, .. } => {
            matches!(status, 403 | 404 | 429) || *status >= 500
        }
        // The engine cannot run here; the next one might.
        EngineError::Unavailable { .. } => true,
        EngineError::Other { retryable, .. } => *retryable,
        EngineError::AllEnginesFailed { .. } => false,
    }
}

fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.to_lowercase()))
        .unwrap_or_else(|| url.to_string())
}
