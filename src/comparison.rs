//! Multi-model comparison orchestrator.
//!
//! Fans one prompt out to several local models (strictly sequentially; the
//! sidecar hosts them on shared hardware), scores each response with the
//! heuristic evaluator, and picks a winner under a configurable policy.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::evaluator::evaluate;
use crate::sidecar::{ChatRequest, ClientError, LocalModelClient, Message};
use crate::store::{tokens_per_second, MetricRecord, MetricsStore};

// =============================================================================
// Constants
// =============================================================================

/// Most models compared in one invocation.
pub const COMPARISON_MODEL_CAP: usize = 5;

/// Balanced-policy weights: quality versus inverse latency.
pub const BALANCED_QUALITY_WEIGHT: f64 = 0.6;
pub const BALANCED_SPEED_WEIGHT: f64 = 0.4;

/// Latency floor for the inverse-latency term.
pub const BALANCED_LATENCY_FLOOR: f64 = 0.1;

/// `use_case` label on metric records written by the orchestrator.
pub const COMPARISON_USE_CASE: &str = "comparison";

/// Category label under which comparison responses are evaluated.
const COMPARISON_EVAL_CATEGORY: &str = "general";

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ComparisonError {
    /// No models supplied and the sidecar reported none.
    #[error("no local model available")]
    NoModelAvailable,
}

/// How the winner is chosen among successful responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WinnerPolicy {
    /// Minimum latency.
    Speed,
    /// Maximum quality score.
    Quality,
    /// Quality blended with inverse latency (the default).
    #[default]
    Balanced,
}

/// Parameters for one comparison.
#[derive(Debug, Clone)]
pub struct ComparisonRequest {
    /// Models to compare; the sidecar's first
    /// [`COMPARISON_MODEL_CAP`] models when unset.
    pub models: Option<Vec<String>>,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub policy: WinnerPolicy,
}

impl ComparisonRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            models: None,
            prompt: prompt.into(),
            system_prompt: None,
            policy: WinnerPolicy::default(),
        }
    }
}

/// One model's showing in a comparison.
#[derive(Debug, Clone, Serialize)]
pub struct ModelOutcome {
    pub model_id: String,
    pub success: bool,
    /// Present only on success.
    pub response: Option<String>,
    /// Present only on success; failures carry no quality signal.
    pub quality_score: Option<f64>,
    pub latency_seconds: f64,
    pub tokens_per_second: f64,
    pub error: Option<String>,
}

/// Full comparison result, winner included.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub prompt: String,
    pub policy: WinnerPolicy,
    /// Absent when no model succeeded.
    pub winner: Option<String>,
    pub outcomes: Vec<ModelOutcome>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Run one prompt against several models and rank them.
///
/// A failing model stays in the result set with `success = false` and is
/// excluded from winner selection; it never aborts the comparison.
pub async fn compare_models(
    client: &dyn LocalModelClient,
    store: &MetricsStore,
    req: ComparisonRequest,
) -> Result<ComparisonReport, ComparisonError> {
    let models = select_models(client, req.models.clone()).await?;
    debug!(models = models.len(), policy = ?req.policy, "starting model comparison");

    let mut outcomes = Vec::with_capacity(models.len());
    for model_id in models {
        let outcome = run_one_model(client, store, &model_id, &req).await;
        outcomes.push(outcome);
    }

    let winner = select_winner(&outcomes, req.policy).map(|o| o.model_id.clone());
    Ok(ComparisonReport {
        prompt: req.prompt,
        policy: req.policy,
        winner,
        outcomes,
    })
}

async fn select_models(
    client: &dyn LocalModelClient,
    requested: Option<Vec<String>>,
) -> Result<Vec<String>, ComparisonError> {
    let mut models = match requested {
        Some(models) => models,
        None => match client.list_models().await {
            Ok(models) => models,
            Err(err) => {
                warn!(error = %err, "sidecar model listing failed");
                return Err(ComparisonError::NoModelAvailable);
            }
        },
    };
    models.truncate(COMPARISON_MODEL_CAP);
    if models.is_empty() {
        return Err(ComparisonError::NoModelAvailable);
    }
    Ok(models)
}

async fn run_one_model(
    client: &dyn LocalModelClient,
    store: &MetricsStore,
    model_id: &str,
    req: &ComparisonRequest,
) -> ModelOutcome {
    let mut messages = Vec::new();
    if let Some(system) = &req.system_prompt {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(&req.prompt));

    let start = Instant::now();
    let result = client.chat(ChatRequest::new(model_id, messages)).await;
    let latency_seconds = start.elapsed().as_secs_f64();

    match result {
        Ok(response) => {
            let evaluation = evaluate(&req.prompt, &response.content, COMPARISON_EVAL_CATEGORY);
            let record = MetricRecord::new(
                model_id,
                response.prompt_tokens,
                response.completion_tokens,
                latency_seconds,
                true,
                None,
                Some(COMPARISON_USE_CASE.to_string()),
            );
            if let Err(err) = store.record_metric(&record).await {
                warn!(error = %err, "failed to record comparison metric");
            }

            ModelOutcome {
                model_id: model_id.to_string(),
                success: true,
                tokens_per_second: tokens_per_second(response.completion_tokens, latency_seconds),
                response: Some(response.content),
                quality_score: Some(evaluation.score),
                latency_seconds,
                error: None,
            }
        }
        Err(err) => {
            warn!(model = model_id, error = %err, "comparison invocation failed");
            let record = MetricRecord::new(
                model_id,
                0,
                0,
                latency_seconds,
                false,
                Some(err.to_string()),
                Some(COMPARISON_USE_CASE.to_string()),
            );
            if let Err(store_err) = store.record_metric(&record).await {
                warn!(error = %store_err, "failed to record comparison metric");
            }

            ModelOutcome {
                model_id: model_id.to_string(),
                success: false,
                response: None,
                quality_score: None,
                latency_seconds,
                tokens_per_second: 0.0,
                error: Some(display_error(&err)),
            }
        }
    }
}

fn display_error(err: &ClientError) -> String {
    if err.is_timeout() {
        format!("timed out: {err}")
    } else {
        err.to_string()
    }
}

/// Throughput-normalized quality score used by the balanced policy.
///
/// The inverse-latency term is capped at 1.0 so a sub-second response can
/// contribute at most [`BALANCED_SPEED_WEIGHT`]; speed sweetens the ranking
/// but never outvotes quality.
pub fn balanced_score(quality: f64, latency_seconds: f64) -> f64 {
    let speed = (1.0 / latency_seconds.max(BALANCED_LATENCY_FLOOR)).min(1.0);
    quality * BALANCED_QUALITY_WEIGHT + speed * BALANCED_SPEED_WEIGHT
}

/// Pick the winner among successful outcomes. Ties go to encounter order.
/// Returns `None` when nothing succeeded.
pub fn select_winner(outcomes: &[ModelOutcome], policy: WinnerPolicy) -> Option<&ModelOutcome> {
    let mut best: Option<(&ModelOutcome, f64)> = None;
    for outcome in outcomes {
        let Some(quality) = outcome.quality_score.filter(|_| outcome.success) else {
            continue;
        };
        // Higher key wins under every policy; speed negates latency.
        let key = match policy {
            WinnerPolicy::Speed => -outcome.latency_seconds,
            WinnerPolicy::Quality => quality,
            WinnerPolicy::Balanced => balanced_score(quality, outcome.latency_seconds),
        };
        match best {
            Some((_, best_key)) if key <= best_key => {}
            _ => best = Some((outcome, key)),
        }
    }
    best.map(|(outcome, _)| outcome)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(model: &str, score: Option<f64>, latency: f64) -> ModelOutcome {
        ModelOutcome {
            model_id: model.to_string(),
            success: score.is_some(),
            response: score.map(|_| "response".to_string()),
            quality_score: score,
            latency_seconds: latency,
            tokens_per_second: 0.0,
            error: score.is_none().then(|| "boom".to_string()),
        }
    }

    #[test]
    fn balanced_prefers_quality_over_raw_speed() {
        // 0.9 * 0.6 + (1/2.0) * 0.4 = 0.74
        let slow_good = balanced_score(0.9, 2.0);
        assert!((slow_good - 0.74).abs() < 1e-9);

        // Inverse latency caps at 1.0: 0.5 * 0.6 + 1.0 * 0.4 = 0.70.
        let fast_poor = balanced_score(0.5, 0.5);
        assert!((fast_poor - 0.70).abs() < 1e-9);

        let outcomes = vec![
            outcome("slow-good", Some(0.9), 2.0),
            outcome("fast-poor", Some(0.5), 0.5),
        ];
        let winner = select_winner(&outcomes, WinnerPolicy::Balanced).unwrap();
        assert_eq!(winner.model_id, "slow-good");
    }

    #[test]
    fn speed_policy_picks_lowest_latency() {
        let outcomes = vec![
            outcome("slow", Some(0.9), 2.0),
            outcome("fast", Some(0.2), 0.3),
        ];
        let winner = select_winner(&outcomes, WinnerPolicy::Speed).unwrap();
        assert_eq!(winner.model_id, "fast");
    }

    #[test]
    fn quality_policy_picks_highest_score() {
        let outcomes = vec![
            outcome("fast", Some(0.2), 0.3),
            outcome("good", Some(0.9), 2.0),
        ];
        let winner = select_winner(&outcomes, WinnerPolicy::Quality).unwrap();
        assert_eq!(winner.model_id, "good");
    }

    #[test]
    fn failed_models_are_excluded_from_selection() {
        let outcomes = vec![
            outcome("broken", None, 0.0),
            outcome("ok", Some(0.5), 1.0),
        ];
        let winner = select_winner(&outcomes, WinnerPolicy::Balanced).unwrap();
        assert_eq!(winner.model_id, "ok");
    }

    #[test]
    fn no_winner_when_nothing_succeeded() {
        let outcomes = vec![outcome("a", None, 0.0), outcome("b", None, 0.0)];
        assert!(select_winner(&outcomes, WinnerPolicy::Balanced).is_none());
    }

    #[test]
    fn ties_break_by_encounter_order() {
        let outcomes = vec![
            outcome("first", Some(0.5), 1.0),
            outcome("second", Some(0.5), 1.0),
        ];
        let winner = select_winner(&outcomes, WinnerPolicy::Balanced).unwrap();
        assert_eq!(winner.model_id, "first");
    }
}
