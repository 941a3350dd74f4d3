//! The resolver: prompt, metered model call, cleanup, decode, hint override.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use spendtrack_core::{
    BackendError, BudgetGate, CategoryHint, CoarseRecord, GateDecision, RetryPolicy,
};

use crate::backend::ModelBackend;
use crate::cleanup::clean_model_response;
use crate::hints::hint_category;
use crate::prompt::build_prompt;

/// Per-candidate resolver failure. Never aborts the batch.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("model returned undecodable JSON: {0}")]
    Decode(serde_json::Error),

    #[error("model call denied by budget gate")]
    BudgetDenied,
}

/// One metered model invocation, attributable for cost accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub model: String,
    pub estimated_cost: f64,
}

/// Resolves a coarse record into untrusted transaction JSON.
///
/// The only network caller in the pipeline that is metered: every
/// invocation consults the budget gate first and is recorded in `calls`.
pub struct CategoryResolver<B> {
    backend: B,
    model: String,
    cost_per_call: f64,
    policy: RetryPolicy,
    hints: Vec<CategoryHint>,
    calls: Vec<CallRecord>,
}

impl<B: ModelBackend> CategoryResolver<B> {
    pub fn new(
        backend: B,
        model: impl Into<String>,
        cost_per_call: f64,
        policy: RetryPolicy,
        hints: Vec<CategoryHint>,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            cost_per_call,
            policy,
            hints,
            calls: Vec::new(),
        }
    }

    /// Calls made so far in this run.
    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    pub fn estimated_spend(&self) -> f64 {
        self.calls.iter().map(|c| c.estimated_cost).sum()
    }

    /// Resolve one record into decoded (still untrusted) JSON.
    ///
    /// Transient backend errors are retried per the policy. A response that
    /// arrives but fails to decode is NOT retried; it becomes a decode
    /// failure and validation never sees it. Hint overrides are applied to
    /// the decoded value before it is handed back.
    pub async fn resolve(
        &mut self,
        record: &CoarseRecord,
        gate: &mut dyn BudgetGate,
    ) -> Result<Value, ResolveError> {
        let prompt = build_prompt(record);
        let raw = self.generate_with_retry(&prompt, gate).await?;

        let cleaned = clean_model_response(&raw);
        let mut value: Value = serde_json::from_str(&cleaned).map_err(|e| {
            warn!(response = %raw, "model response failed JSON decoding");
            ResolveError::Decode(e)
        })?;

        self.apply_hints(&mut value);
        Ok(value)
    }

    async fn generate_with_retry(
        &mut self,
        prompt: &str,
        gate: &mut dyn BudgetGate,
    ) -> Result<String, ResolveError> {
        let mut attempt = 1;
        loop {
            self.wait_for_gate(gate).await?;
            self.calls.push(CallRecord {
                model: self.model.clone(),
                estimated_cost: self.cost_per_call,
            });

            match self.backend.generate(prompt).await {
                Ok(raw) => {
                    debug!(model = %self.model, attempt, "model call succeeded");
                    return Ok(raw);
                }
                Err(err) if self.policy.should_retry(&err, attempt) => {
                    warn!(%err, attempt, "model call failed, retrying");
                    tokio::time::sleep(self.policy.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn wait_for_gate(&self, gate: &mut dyn BudgetGate) -> Result<(), ResolveError> {
        loop {
            match gate.before_call(self.cost_per_call) {
                GateDecision::Proceed => return Ok(()),
                GateDecision::Deny => return Err(ResolveError::BudgetDenied),
                GateDecision::Wait(pause) => {
                    debug!(?pause, "rate limit reached, waiting");
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    /// Hints win over the model's stated category.
    fn apply_hints(&self, value: &mut Value) {
        let Some(merchant) = value.get("merchant").and_then(Value::as_str) else {
            return;
        };
        if let Some(category) = hint_category(merchant, &self.hints) {
            debug!(%merchant, %category, "applying category hint override");
            value["category"] = Value::String(category.label().to_string());
        }
    }
}
