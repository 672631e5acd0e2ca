//! Multi-provider solving with budgets and config-level fallback.

use std::sync::Arc;

use super::{
    CapSolverClient, CaptchaBudget, CaptchaError, CaptchaProvider, CaptchaResult,
    CaptchaSolveRequest, ProviderTiming, TwoCaptchaClient,
};

/// Supported solver vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    CapSolver,
    TwoCaptcha,
}

/// Declarative description of one provider client.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub kind: ProviderKind,
    pub api_key: String,
    /// Endpoint override, mainly for tests.
    pub base_url: Option<String>,
    pub timing: Option<ProviderTiming>,
}

impl ProviderSpec {
    pub fn new(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: api_key.into(),
            base_url: None,
            timing: None,
        }
    }

    fn build(&self) -> Arc<dyn CaptchaProvider> {
        match self.kind {
            ProviderKind::CapSolver => {
                let mut client = match self.base_url {
                    Some(ref base) => CapSolverClient::with_base_url(&self.api_key, base),
                    None => CapSolverClient::new(&self.api_key),
                };
                if let Some(ref timing) = self.timing {
                    client = client.with_timing(timing.clone());
                }
                Arc::new(client)
            }
            ProviderKind::TwoCaptcha => {
                let mut client = match self.base_url {
                    Some(ref base) => TwoCaptchaClient::with_base_url(&self.api_key, base),
                    None => TwoCaptchaClient::new(&self.api_key),
                };
                if let Some(ref timing) = self.timing {
                    client = client.with_timing(timing.clone());
                }
                Arc::new(client)
            }
        }
    }
}

/// Solver that walks an ordered provider list, consuming budget first.
pub struct CaptchaSolver {
    providers: Vec<Arc<dyn CaptchaProvider>>,
    budget: Option<Arc<CaptchaBudget>>,
}

impl CaptchaSolver {
    /// Build from provider handles (tests inject fakes here).
    pub fn new(
        providers: Vec<Arc<dyn CaptchaProvider>>,
        budget: Option<Arc<CaptchaBudget>>,
    ) -> Self {
        let mut deduped: Vec<Arc<dyn CaptchaProvider>> = Vec::new();
        for provider in providers {
            if !deduped.iter().any(|p| p.name() == provider.name()) {
                deduped.push(provider);
            }
        }
        Self {
            providers: deduped,
            budget,
        }
    }

    /// Build from declarative specs: `[primary, fallback?]`, deduped.
    pub fn from_specs(
        primary: ProviderSpec,
        fallback: Option<ProviderSpec>,
        budget: Option<Arc<CaptchaBudget>>,
    ) -> Self {
        let mut providers = vec![primary.build()];
        if let Some(fallback) = fallback {
            providers.push(fallback.build());
        }
        Self::new(providers, budget)
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Solve via the provider chain. The budget is charged exactly once,
    /// before the first attempt.
    pub async fn solve(&self, request: &CaptchaSolveRequest) -> CaptchaResult {
        if self.providers.is_empty() {
            return Err(CaptchaError::NoProvider);
        }
        if let Some(ref budget) = self.budget {
            budget.check_and_record(&request.page_url)?;
        }

        let last = self.providers.len() - 1;
        for (index, provider) in self.providers.iter().enumerate() {
            match provider.solve(request).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retryable() && index < last => {
                    log::warn!(
                        "captcha provider {} failed ({err}), trying {}",
                        provider.name(),
                        self.providers[index + 1].name()
                    );
                }
                Err(err) => return Err(err),
            }
        }
        unreachable!("provider loop always returns")
    }
}

/// Try `primary`'s whole solver; on any error fall back to `fallback`'s.
///
/// Returns `None` when neither config exists.
pub async fn solve_with_fallback(
    primary: Option<&CaptchaSolver>,
    fallback: Option<&CaptchaSolver>,
    request: &CaptchaSolveRequest,
) -> Option<CaptchaResult> {
    match (primary, fallback) {
        (None, None) => None,
        (Some(solver), None) | (None, Some(solver)) => Some(solver.solve(request).await),
        (Some(primary), Some(fallback)) => match primary.solve(request).await {
            Ok(result) => Some(Ok(result)),
            Err(err) => {
                log::warn!("primary captcha config failed ({err}), using fallback config");
                Some(fallback.solve(request).await)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_deps::captcha::{CaptchaSolveResult, CaptchaType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        name: &'static str,
        calls: AtomicUsize,
        outcome: fn() -> CaptchaResult,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, outcome: fn() -> CaptchaResult) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                outcome,
            })
        }
    }

    #[async_trait]
    impl CaptchaProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn solve(&self, _request: &CaptchaSolveRequest) -> CaptchaResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn ok_result() -> CaptchaResult {
        Ok(CaptchaSolveResult {
            provider: "2captcha".to_string(),
            token: "tok".to_string(),
            raw: None,
        })
    }

    fn request() -> CaptchaSolveRequest {
        CaptchaSolveRequest {
            captcha_type: CaptchaType::Turnstile,
            page_url: "https://example.com/".to_string(),
            site_key: "k".to_string(),
            action: None,
            min_score: None,
        }
    }

    #[tokio::test]
    async fn retryable_error_falls_through_to_next_provider() {
        let primary = ScriptedProvider::new("capsolver", || {
            Err(CaptchaError::RequestFailed("timeout".to_string()))
        });
        let fallback = ScriptedProvider::new("2captcha", ok_result);
        let solver = CaptchaSolver::new(
            vec![primary.clone() as Arc<dyn CaptchaProvider>, fallback.clone()],
            None,
        );

        let result = solver.solve(&request()).await.unwrap();
        assert_eq!(result.provider, "2captcha");
        assert_eq!(result.token, "tok");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_the_chain() {
        let primary = ScriptedProvider::new("capsolver", || {
            Err(CaptchaError::Unsupported("hcaptcha".to_string()))
        });
        let fallback = ScriptedProvider::new("2captcha", ok_result);
        let solver = CaptchaSolver::new(
            vec![primary as Arc<dyn CaptchaProvider>, fallback.clone()],
            None,
        );

        let err = solver.solve(&request()).await.unwrap_err();
        assert!(matches!(err, CaptchaError::Unsupported(_)));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_providers_collapse() {
        let one = ScriptedProvider::new("capsolver", ok_result);
        let two = ScriptedProvider::new("capsolver", ok_result);
        let solver = CaptchaSolver::new(vec![one as Arc<dyn CaptchaProvider>, two], None);
        assert_eq!(solver.provider_names(), vec!["capsolver"]);
    }

    #[tokio::test]
    async fn budget_is_charged_once_per_solve() {
        let budget = Arc::new(CaptchaBudget::new(1));
        let primary = ScriptedProvider::new("capsolver", || {
            Err(CaptchaError::RequestFailed("io".to_string()))
        });
        let fallback = ScriptedProvider::new("2captcha", ok_result);
        let solver = CaptchaSolver::new(
            vec![primary as Arc<dyn CaptchaProvider>, fallback],
            Some(budget.clone()),
        );

        // Two providers, one budget unit: the cascade still completes.
        assert!(solver.solve(&request()).await.is_ok());
        // Second solve exceeds the daily budget before any provider runs.
        let err = solver.solve(&request()).await.unwrap_err();
        assert!(matches!(err, CaptchaError::BudgetExceeded { .. }));
    }

    #[tokio::test]
    async fn empty_chain_reports_no_provider() {
        let solver = CaptchaSolver::new(Vec::new(), None);
        let err = solver.solve(&request()).await.unwrap_err();
        assert!(matches!(err, CaptchaError::NoProvider));
    }

    #[tokio::test]
    async fn config_fallback_covers_whole_solver() {
        let failing = CaptchaSolver::new(
            vec![ScriptedProvider::new("capsolver", || {
                Err(CaptchaError::Unsupported("x".to_string()))
            }) as Arc<dyn CaptchaProvider>],
            None,
        );
        let healthy = CaptchaSolver::new(
            vec![ScriptedProvider::new("2captcha", ok_result) as Arc<dyn CaptchaProvider>],
            None,
        );

        let result = solve_with_fallback(Some(&failing), Some(&healthy), &request())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.provider, "2captcha");

        assert!(solve_with_fallback(None, None, &request()).await.is_none());
    }
}
