//! The invocation gateway facade.
//!
//! Every advice-generation request flows through
//! [`Gateway::generate_or_retrieve`]: fingerprint → cache lookup → quota
//! admission → resilient provider call → contract enforcement → cache write
//! and quota recording. Cache hits bypass quota and invocation entirely and
//! are re-enforced on the way out so entries written under an older, looser
//! contract still satisfy today's invariants.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheStore, ResponseCache};
use crate::config::GatewayConfig;
use crate::contract::{self, ActionPlan};
use crate::error::{GatewayError, Result};
use crate::fingerprint::{self, FingerprintInput};
use crate::profile::{Baseline, BaselineCache, BaselineStore};
use crate::providers::{CompletionRequest, LlmProvider, ResilientInvoker};
use crate::quota::{QuotaAdmission, QuotaStore, UsageReport};

/// Instructions sent as the system prompt with every generation call.
const SYSTEM_PROMPT: &str = "You are a pragmatic productivity coach. Respond with a single JSON \
     object containing: headline (string), immediate_actions (1-3 objects \
     with title, detail, time_to_impact), risks (1-2 objects with \
     description, mitigation, deep_dive), and module_steps (exactly 3 \
     strings). No prose outside the JSON.";

/// Longest title stored on a cache entry.
const MAX_TITLE_CHARS: usize = 80;

/// The outcome of one logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub plan: ActionPlan,
    pub was_cached: bool,
}

struct Inner {
    cache: ResponseCache,
    quota: QuotaAdmission,
    invoker: ResilientInvoker,
    baselines: Arc<dyn BaselineStore>,
    baseline_cache: BaselineCache,
    config: GatewayConfig,
}

/// The LLM invocation gateway. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        cache_store: Arc<dyn CacheStore>,
        quota_store: Arc<dyn QuotaStore>,
        baselines: Arc<dyn BaselineStore>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        let cache = ResponseCache::new(
            cache_store,
            config.cache_ttl(),
            config.baseline_shift_threshold,
        );
        let quota = QuotaAdmission::new(quota_store, config.daily_token_limit);
        let invoker = ResilientInvoker::new(provider, config.retry_policy());
        let baseline_cache = BaselineCache::new(
            config.baseline_cache_capacity,
            config.baseline_cache_ttl(),
        );
        Self {
            inner: Arc::new(Inner {
                cache,
                quota,
                invoker,
                baselines,
                baseline_cache,
                config,
            }),
        }
    }

    /// The one exposed operation: return the plan for this request, from
    /// cache when possible, freshly generated otherwise.
    ///
    /// `presented_signature` is the client's claimed fingerprint; when
    /// present it must verify against the payload. `caller_id` is the
    /// opaque identity supplied by the authorization layer; `None` means an
    /// internal/unauthenticated caller and bypasses quota by design.
    pub async fn generate_or_retrieve(
        &self,
        input: FingerprintInput,
        presented_signature: Option<&str>,
        caller_id: Option<&str>,
    ) -> Result<GatewayResponse> {
        validate(&input)?;

        let signature = fingerprint::sign(&input);
        if let Some(presented) = presented_signature {
            if !fingerprint::verify(&input, presented) {
                return Err(GatewayError::SignatureMismatch);
            }
        }

        if let Some(entry) = self.inner.cache.get(&signature).await {
            // Re-enforce for backward compatibility with entries written
            // under an older, looser contract.
            let plan = contract::enforce(entry.plan.into(), &signature);
            return Ok(GatewayResponse {
                plan,
                was_cached: true,
            });
        }

        let request = build_completion_request(&input, &self.inner.config);
        let estimated =
            QuotaAdmission::estimate(request.prompt_chars(), request.max_output_tokens);
        if !self.inner.quota.can_use(caller_id, estimated).await {
            let report = self.inner.quota.usage(caller_id.unwrap_or_default()).await;
            return Err(GatewayError::QuotaExceeded {
                used: report.used,
                limit: report.limit,
            });
        }

        // The production tail runs detached: a caller disconnecting must
        // not abort the in-flight provider call, and its result is still
        // cached and recorded.
        let inner = Arc::clone(&self.inner);
        let caller = caller_id.map(str::to_string);
        let handle = tokio::spawn(async move {
            inner
                .produce_and_persist(input, signature, request, caller, estimated)
                .await
        });
        let plan = handle.await.map_err(|e| GatewayError::Upstream {
            status: None,
            message: format!("generation task aborted: {e}"),
        })??;

        Ok(GatewayResponse {
            plan,
            was_cached: false,
        })
    }

    /// Report an outcome event for a subject; a large enough shift flushes
    /// both the memoized plans and the cached baseline.
    pub async fn report_outcome_shift(&self, owner_id: &str, delta_magnitude: f64) {
        self.inner
            .cache
            .invalidate_on_baseline_shift(owner_id, delta_magnitude)
            .await;
        self.inner.baseline_cache.forget(owner_id);
    }

    /// Current usage report for the UI's remaining/limit display.
    pub async fn usage(&self, caller_id: &str) -> UsageReport {
        self.inner.quota.usage(caller_id).await
    }
}

impl Inner {
    async fn produce_and_persist(
        &self,
        input: FingerprintInput,
        signature: String,
        request: CompletionRequest,
        caller: Option<String>,
        estimated_cost: u64,
    ) -> Result<ActionPlan> {
        let completion = self.invoker.invoke(&request).await?;

        let raw = contract::parse_plan(&completion.text).map_err(|e| {
            GatewayError::Upstream {
                status: None,
                message: format!("provider output was not a structured plan: {e}"),
            }
        })?;
        let plan = contract::enforce(raw, &signature);

        let baseline = self.read_baseline(&input.profile_id).await;
        let canonical = fingerprint::canonicalize(&input);
        self.cache
            .set(
                &signature,
                &input.profile_id,
                &canonical,
                plan.clone(),
                baseline,
                Some(plan_title(&input.goal)),
            )
            .await;

        let actual_cost = completion.total_tokens.unwrap_or(estimated_cost);
        self.quota.record(caller.as_deref(), actual_cost).await;

        debug!(signature = %&signature[..8.min(signature.len())], "plan generated and cached");
        Ok(plan)
    }

    /// Baseline read-through: bounded cache first, then the store. A store
    /// failure degrades to a zeroed baseline; the entry seed is context,
    /// not a correctness dependency.
    async fn read_baseline(&self, profile_id: &str) -> Baseline {
        if let Some(baseline) = self.baseline_cache.get(profile_id) {
            return baseline;
        }
        match self.baselines.get_baseline(profile_id).await {
            Ok(baseline) => {
                self.baseline_cache.put(profile_id, baseline);
                baseline
            }
            Err(e) => {
                warn!(error = %e, profile = %profile_id, "baseline read failed, seeding zeroed");
                Baseline::default()
            }
        }
    }
}

fn validate(input: &FingerprintInput) -> Result<()> {
    if input.profile_id.trim().is_empty() {
        return Err(GatewayError::Validation("profile_id is required".into()));
    }
    if input.situation.trim().is_empty() {
        return Err(GatewayError::Validation("situation is required".into()));
    }
    if input.goal.trim().is_empty() {
        return Err(GatewayError::Validation("goal is required".into()));
    }
    Ok(())
}

fn build_completion_request(input: &FingerprintInput, config: &GatewayConfig) -> CompletionRequest {
    let mut user_prompt = format!(
        "Situation: {}\nGoal: {}",
        input.situation.trim(),
        input.goal.trim()
    );
    if !input.steps.trim().is_empty() {
        user_prompt.push_str(&format!("\nSteps so far: {}", input.steps.trim()));
    }
    let constraints = fingerprint::normalize_list(&input.constraints);
    if !constraints.is_empty() {
        user_prompt.push_str(&format!("\nConstraints: {}", constraints.join(", ")));
    }
    CompletionRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt,
        max_output_tokens: config.max_output_tokens,
        temperature: config.temperature,
    }
}

fn plan_title(goal: &str) -> String {
    let goal = goal.trim();
    if goal.chars().count() <= MAX_TITLE_CHARS {
        goal.to_string()
    } else {
        goal.chars().take(MAX_TITLE_CHARS).collect()
    }
}
