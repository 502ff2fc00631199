//! Dual-Tier Inference Routing
//!
//! The central routing state machine:
//! `classify → quote → dispatch (retry loop) → [fallback] → charge → record`.
//!
//! Deep classifications are budget-checked before dispatch and downgraded
//! to the rote tier when the estimate is unaffordable. Provider errors and
//! timeouts retry with linear backoff; when the deep tier exhausts its
//! retries the same thought is dispatched once to the rote provider unless
//! fallback is disabled. A budget overrun discovered only at the charge
//! step, after the deep call already happened, is logged and swallowed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::budget::BudgetManager;
use crate::classifier::ThoughtClassifier;
use crate::core::cancel::CancelToken;
use crate::core::types::{InferenceResult, Thought, Tier};
use crate::providers::{GenerateOptions, Generation, InferenceProvider};

/// Router tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Dispatch attempts per tier
    pub max_retries: u32,
    /// Per-call deadline
    pub deadline: Duration,
    /// Token estimate used for the pre-dispatch budget quote
    pub deep_estimate: u64,
    /// Disable the deep→rote fallback
    pub no_fallback: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            deadline: Duration::from_secs(30),
            deep_estimate: 2_000,
            no_fallback: false,
        }
    }
}

/// Terminal routing failures
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    /// Every attempt on the selected tier failed and no fallback applied
    #[error("{tier} tier failed after {attempts} attempts: {reason}")]
    Exhausted {
        tier: Tier,
        attempts: u32,
        reason: String,
    },

    /// Deep retries and the rote fallback both failed
    #[error("fallback failed ({fallback_reason}) after deep errors ({deep_reason})")]
    FallbackExhausted {
        deep_reason: String,
        fallback_reason: String,
    },

    /// Root cancellation observed mid-route
    #[error("routing cancelled")]
    Cancelled,
}

/// Per-route context handed in by the engine
#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    /// Recent thoughts, newest last; feeds novelty scoring
    pub recent_thoughts: Vec<Thought>,
    /// The cycle this route belongs to
    pub current_cycle: u64,
}

/// Classify-and-dispatch router over the two inference tiers
pub struct InferenceRouter {
    config: RouterConfig,
    classifier: Arc<ThoughtClassifier>,
    budget: Arc<BudgetManager>,
    deep: Arc<dyn InferenceProvider>,
    rote: Arc<dyn InferenceProvider>,
}

impl InferenceRouter {
    /// Wire a router over its tiers
    #[must_use]
    pub fn new(
        config: RouterConfig,
        classifier: Arc<ThoughtClassifier>,
        budget: Arc<BudgetManager>,
        deep: Arc<dyn InferenceProvider>,
        rote: Arc<dyn InferenceProvider>,
    ) -> Self {
        Self {
            config,
            classifier,
            budget,
            deep,
            rote,
        }
    }

    /// Route one thought through classification, budget, and dispatch
    ///
    /// # Errors
    ///
    /// [`RouterError::Exhausted`] when the selected tier fails every attempt
    /// and no fallback applies, [`RouterError::FallbackExhausted`] when the
    /// rote fallback also fails, [`RouterError::Cancelled`] when the root
    /// scope cancels mid-route.
    pub async fn route(
        &self,
        thought: &Thought,
        ctx: &RouteContext,
        cancel: &CancelToken,
    ) -> Result<InferenceResult, RouterError> {
        // enriched context: classification sees the recent window, and the
        // budget snapshot drives the quote below
        let classification = self.classifier.classify(thought, &ctx.recent_thoughts);
        let classified_tier = classification.tier;
        debug!(
            cycle = ctx.current_cycle,
            tier = %classified_tier,
            score = classification.deep_score,
            reason = %classification.reason,
            "thought routed"
        );

        // budget gate: an unaffordable deep estimate downgrades to rote
        let mut tier = classified_tier;
        let mut budget_overridden = false;
        if tier == Tier::Deep {
            let quote = self.budget.quote(self.config.deep_estimate);
            if !quote.affordable {
                info!(
                    remaining = quote.remaining,
                    estimate = self.config.deep_estimate,
                    "deep tier unaffordable, downgrading to rote"
                );
                tier = Tier::Rote;
                budget_overridden = true;
            }
        }

        let started = Instant::now();
        let dispatched = self.dispatch(tier, &thought.content, cancel).await;

        let (generation, served_tier, fallback_reason) = match dispatched {
            Ok(generation) => (generation, tier, None),
            Err(DispatchFailure::Cancelled) => return Err(RouterError::Cancelled),
            Err(DispatchFailure::AllAttemptsFailed { reason }) => {
                if tier == Tier::Deep && !self.config.no_fallback {
                    // one rote shot with the same thought, no further retries
                    warn!(deep_reason = %reason, "deep tier exhausted, falling back to rote");
                    let opts = GenerateOptions {
                        deadline: self.config.deadline,
                    };
                    match self
                        .attempt(Tier::Rote, &thought.content, &opts, cancel)
                        .await
                    {
                        Ok(generation) => (generation, Tier::Rote, Some(reason)),
                        Err(AttemptFailure::Cancelled) => return Err(RouterError::Cancelled),
                        Err(AttemptFailure::Provider(fallback_reason)) => {
                            self.classifier.record_outcome(classified_tier, false);
                            return Err(RouterError::FallbackExhausted {
                                deep_reason: reason,
                                fallback_reason,
                            });
                        }
                    }
                } else {
                    self.classifier.record_outcome(classified_tier, false);
                    return Err(RouterError::Exhausted {
                        tier,
                        attempts: self.config.max_retries,
                        reason,
                    });
                }
            }
        };

        // deep successes are charged; a cap overrun at this point is
        // logged only, the tokens are already spent
        if served_tier == Tier::Deep && generation.tokens_used > 0 {
            if let Err(e) = self.budget.charge(generation.tokens_used, Tier::Deep) {
                warn!(error = %e, tokens = generation.tokens_used, "post-hoc charge over cap");
            }
        }

        let ok_on_classified = fallback_reason.is_none();
        self.classifier
            .record_outcome(classified_tier, ok_on_classified);

        Ok(InferenceResult {
            text: generation.text,
            tier: served_tier,
            tokens_used: generation.tokens_used,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            budget_overridden,
            fallback_reason,
        })
    }

    /// Retry loop over one tier with linear backoff
    async fn dispatch(
        &self,
        tier: Tier,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<Generation, DispatchFailure> {
        let opts = GenerateOptions {
            deadline: self.config.deadline,
        };
        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.attempt(tier, prompt, &opts, cancel).await {
                Ok(generation) => return Ok(generation),
                Err(AttemptFailure::Cancelled) => return Err(DispatchFailure::Cancelled),
                Err(AttemptFailure::Provider(reason)) => {
                    warn!(%tier, attempt, %reason, "inference attempt failed");
                    last_error = reason;
                }
            }

            if attempt < attempts {
                let backoff = Duration::from_secs(u64::from(attempt));
                tokio::select! {
                    () = cancel.cancelled() => return Err(DispatchFailure::Cancelled),
                    () = tokio::time::sleep(backoff) => {}
                }
            }
        }

        Err(DispatchFailure::AllAttemptsFailed { reason: last_error })
    }

    /// One provider call under deadline and cancellation
    async fn attempt(
        &self,
        tier: Tier,
        prompt: &str,
        opts: &GenerateOptions,
        cancel: &CancelToken,
    ) -> Result<Generation, AttemptFailure> {
        if cancel.is_cancelled() {
            return Err(AttemptFailure::Cancelled);
        }
        let provider = match tier {
            Tier::Deep => &self.deep,
            Tier::Rote => &self.rote,
        };

        tokio::select! {
            () = cancel.cancelled() => Err(AttemptFailure::Cancelled),
            outcome = tokio::time::timeout(opts.deadline, provider.generate(prompt, opts)) => {
                match outcome {
                    Ok(Ok(generation)) => Ok(generation),
                    Ok(Err(e)) => Err(AttemptFailure::Provider(e.to_string())),
                    Err(_) => Err(AttemptFailure::Provider(format!(
                        "deadline of {:?} exceeded",
                        opts.deadline
                    ))),
                }
            }
        }
    }
}

impl std::fmt::Debug for InferenceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceRouter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

enum DispatchFailure {
    AllAttemptsFailed { reason: String },
    Cancelled,
}

enum AttemptFailure {
    Provider(String),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cancel::cancel_pair;
    use crate::core::types::ThoughtKind;
    use crate::test_support::{FailingProvider, FlakyProvider, ScriptedProvider};

    fn deep_thought() -> Thought {
        Thought::new("Design a lock-free queue", ThoughtKind::Architecture)
    }

    fn rote_thought() -> Thought {
        Thought::new("list files", ThoughtKind::Command)
    }

    fn router_with(
        budget: Arc<BudgetManager>,
        deep: Arc<dyn InferenceProvider>,
        rote: Arc<dyn InferenceProvider>,
    ) -> InferenceRouter {
        let config = RouterConfig {
            deadline: Duration::from_secs(2),
            ..RouterConfig::default()
        };
        InferenceRouter::new(
            config,
            Arc::new(ThoughtClassifier::new(0.6, true)),
            budget,
            deep,
            rote,
        )
    }

    #[tokio::test]
    async fn happy_deep_path_charges_budget() {
        let budget = Arc::new(BudgetManager::new(1_000_000));
        budget.charge(50_000, Tier::Deep).unwrap(); // 950k remaining
        let deep = Arc::new(ScriptedProvider::always("a queue design").with_tokens(1_800));
        let rote = Arc::new(ScriptedProvider::always("unused"));
        let router = router_with(Arc::clone(&budget), deep.clone(), rote.clone());
        let (_handle, cancel) = cancel_pair();

        let result = router
            .route(&deep_thought(), &RouteContext::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(result.tier, Tier::Deep);
        assert_eq!(result.tokens_used, 1_800);
        assert!(!result.budget_overridden);
        assert!(result.fallback_reason.is_none());

        let state = budget.snapshot();
        assert_eq!(state.used, 51_800);
        assert_eq!(state.used_by_tier.deep, 51_800);
        assert_eq!(deep.calls(), 1);
        assert_eq!(rote.calls(), 0);
    }

    #[tokio::test]
    async fn unaffordable_deep_downgrades_to_rote() {
        let budget = Arc::new(BudgetManager::new(1_000));
        budget.charge(500, Tier::Deep).unwrap(); // 500 remaining < 2000 estimate
        let deep = Arc::new(ScriptedProvider::always("never called"));
        let rote = Arc::new(ScriptedProvider::always("cheap answer").with_tokens(40));
        let router = router_with(Arc::clone(&budget), deep.clone(), rote.clone());
        let (_handle, cancel) = cancel_pair();

        let result = router
            .route(&deep_thought(), &RouteContext::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(result.tier, Tier::Rote);
        assert!(result.budget_overridden);
        assert_eq!(deep.calls(), 0);
        assert_eq!(rote.calls(), 1);
        // rote successes never charge
        assert_eq!(budget.snapshot().used, 500);
    }

    #[tokio::test]
    async fn deep_failure_falls_back_to_rote_once() {
        tokio::time::pause();
        let budget = Arc::new(BudgetManager::new(1_000_000));
        let deep = Arc::new(FailingProvider::new("upstream 500"));
        let rote = Arc::new(ScriptedProvider::always("rescued").with_tokens(25));
        let router = router_with(Arc::clone(&budget), deep.clone(), rote.clone());
        let (_handle, cancel) = cancel_pair();

        let result = router
            .route(&deep_thought(), &RouteContext::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(result.tier, Tier::Rote);
        assert_eq!(result.fallback_reason.as_deref(), Some("upstream 500"));
        assert_eq!(deep.calls(), 3, "deep tier retries exactly max_retries");
        assert_eq!(rote.calls(), 1, "fallback dispatches exactly once");
        assert_eq!(budget.snapshot().used, 0, "no deep charge on fallback");
    }

    #[tokio::test]
    async fn no_fallback_surfaces_exhaustion() {
        tokio::time::pause();
        let budget = Arc::new(BudgetManager::new(1_000_000));
        let deep = Arc::new(FailingProvider::new("down"));
        let rote = Arc::new(ScriptedProvider::always("unused"));
        let config = RouterConfig {
            no_fallback: true,
            deadline: Duration::from_secs(2),
            ..RouterConfig::default()
        };
        let router = InferenceRouter::new(
            config,
            Arc::new(ThoughtClassifier::new(0.6, true)),
            budget,
            deep,
            rote.clone(),
        );
        let (_handle, cancel) = cancel_pair();

        let err = router
            .route(&deep_thought(), &RouteContext::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::Exhausted {
                tier: Tier::Deep,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(rote.calls(), 0);
    }

    #[tokio::test]
    async fn fallback_failure_is_terminal() {
        tokio::time::pause();
        let budget = Arc::new(BudgetManager::new(1_000_000));
        let deep = Arc::new(FailingProvider::new("deep down"));
        let rote = Arc::new(FailingProvider::new("rote down"));
        let router = router_with(budget, deep, rote);
        let (_handle, cancel) = cancel_pair();

        let err = router
            .route(&deep_thought(), &RouteContext::default(), &cancel)
            .await
            .unwrap_err();
        match err {
            RouterError::FallbackExhausted {
                deep_reason,
                fallback_reason,
            } => {
                assert_eq!(deep_reason, "deep down");
                assert_eq!(fallback_reason, "rote down");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_deep_failure_recovers_within_retries() {
        tokio::time::pause();
        let budget = Arc::new(BudgetManager::new(1_000_000));
        let deep = Arc::new(FlakyProvider::failing_times(2, "recovered", 900));
        let rote = Arc::new(ScriptedProvider::always("unused"));
        let router = router_with(Arc::clone(&budget), deep.clone(), rote.clone());
        let (_handle, cancel) = cancel_pair();

        let result = router
            .route(&deep_thought(), &RouteContext::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(result.tier, Tier::Deep);
        assert_eq!(result.text, "recovered");
        assert_eq!(deep.calls(), 3);
        assert_eq!(rote.calls(), 0);
        assert_eq!(budget.snapshot().used, 900);
    }

    #[tokio::test]
    async fn rote_thought_never_consults_the_deep_tier() {
        let budget = Arc::new(BudgetManager::new(1_000_000));
        let deep = Arc::new(ScriptedProvider::always("unused"));
        let rote = Arc::new(ScriptedProvider::always("done").with_tokens(10));
        let router = router_with(Arc::clone(&budget), deep.clone(), rote.clone());
        let (_handle, cancel) = cancel_pair();

        let result = router
            .route(&rote_thought(), &RouteContext::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(result.tier, Tier::Rote);
        assert_eq!(deep.calls(), 0);
        assert_eq!(budget.snapshot().used, 0);
    }

    #[tokio::test]
    async fn cancellation_cuts_the_retry_loop() {
        let budget = Arc::new(BudgetManager::new(1_000_000));
        let deep = Arc::new(FailingProvider::new("down"));
        let rote = Arc::new(ScriptedProvider::always("unused"));
        let router = router_with(budget, deep, rote);
        let (handle, cancel) = cancel_pair();
        handle.cancel();

        let err = router
            .route(&deep_thought(), &RouteContext::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Cancelled));
    }

    #[tokio::test]
    async fn post_success_budget_overflow_is_swallowed() {
        let budget = Arc::new(BudgetManager::new(2_500));
        // quote passes (2500 >= 2000 estimate) but the real usage overruns
        let deep = Arc::new(ScriptedProvider::always("pricey").with_tokens(3_000));
        let rote = Arc::new(ScriptedProvider::always("unused"));
        let router = router_with(Arc::clone(&budget), deep, rote);
        let (_handle, cancel) = cancel_pair();

        let result = router
            .route(&deep_thought(), &RouteContext::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(result.tier, Tier::Deep);
        // the failed charge left the ledger untouched
        assert_eq!(budget.snapshot().used, 0);
    }

    #[tokio::test]
    async fn outcomes_feed_the_classifier() {
        tokio::time::pause();
        let budget = Arc::new(BudgetManager::new(1_000_000));
        let deep = Arc::new(FailingProvider::new("down"));
        let rote = Arc::new(ScriptedProvider::always("rescued"));
        let classifier = Arc::new(ThoughtClassifier::new(0.6, true));
        let router = InferenceRouter::new(
            RouterConfig {
                deadline: Duration::from_secs(2),
                ..RouterConfig::default()
            },
            Arc::clone(&classifier),
            budget,
            deep,
            rote,
        );
        let (_handle, cancel) = cancel_pair();

        router
            .route(&deep_thought(), &RouteContext::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(classifier.outcome_count(), 1);
    }
}
