//! Calibration test harness.
//!
//! One run walks a fixed state machine: pick a model, pick a prompt set,
//! then per prompt invoke the sidecar, score the response, and persist the
//! outcome. A failing prompt never aborts the run; it is recorded as a
//! failed test and the run moves on.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::evaluator::evaluate;
use crate::prompts::{category_by_name, smoke_set, GENERAL_CATEGORY};
use crate::sidecar::{ChatRequest, LocalModelClient, Message};
use crate::store::{
    now_rfc3339, tokens_per_second, CalibrationTest, MetricRecord, MetricsStore, StoreError,
};

// =============================================================================
// Constants
// =============================================================================

/// Quality score at or above which a test passes, unless overridden.
pub const DEFAULT_PASSING_THRESHOLD: f64 = 0.6;

/// Fixed sampling parameters for calibration invocations.
pub const CALIBRATION_TEMPERATURE: f32 = 0.7;
pub const CALIBRATION_MAX_TOKENS: u32 = 1024;

/// `use_case` label on metric records written by the harness.
pub const CALIBRATION_USE_CASE: &str = "calibration";

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    /// Sidecar unreachable or hosting no models, and no model id was given.
    #[error("no local model available")]
    NoModelAvailable,
    /// Category is neither built-in nor "general".
    #[error("unknown prompt category: {0}")]
    UnknownCategory(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Parameters for one calibration run.
#[derive(Debug, Clone)]
pub struct CalibrationRequest {
    /// Model to test; the first sidecar model when unset.
    pub model_id: Option<String>,
    /// Built-in category, or "general" for a cross-category smoke test.
    /// Ignored as a prompt selector when `custom_prompt` is set, but still
    /// used as the category label.
    pub category: String,
    /// When set, the run consists of exactly this prompt.
    pub custom_prompt: Option<String>,
    pub passing_threshold: f64,
}

impl Default for CalibrationRequest {
    fn default() -> Self {
        Self {
            model_id: None,
            category: GENERAL_CATEGORY.to_string(),
            custom_prompt: None,
            passing_threshold: DEFAULT_PASSING_THRESHOLD,
        }
    }
}

/// Aggregate over one run's tests.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub total_tests: usize,
    pub passed: usize,
    /// Percentage in [0,100]; 0 for an empty run.
    pub pass_rate: f64,
    /// Mean quality score; 0 for an empty run.
    pub average_score: f64,
}

impl RunSummary {
    pub fn from_tests(tests: &[CalibrationTest]) -> Self {
        let total_tests = tests.len();
        if total_tests == 0 {
            return Self {
                total_tests: 0,
                passed: 0,
                pass_rate: 0.0,
                average_score: 0.0,
            };
        }
        let passed = tests.iter().filter(|t| t.passed).count();
        let average_score =
            tests.iter().map(|t| t.quality_score).sum::<f64>() / total_tests as f64;
        Self {
            total_tests,
            passed,
            pass_rate: passed as f64 / total_tests as f64 * 100.0,
            average_score,
        }
    }
}

/// Result of one calibration run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CalibrationOutcome {
    pub run_id: Uuid,
    pub model_id: String,
    pub category: String,
    pub summary: RunSummary,
    pub tests: Vec<CalibrationTest>,
}

// =============================================================================
// Harness
// =============================================================================

/// Run one calibration pass against a local model.
///
/// Per-prompt sidecar failures are captured as failed tests; only storage
/// failures on the calibration rows abort the run (the summary depends on
/// them). Metric records are best-effort.
pub async fn run_calibration(
    client: &dyn LocalModelClient,
    store: &MetricsStore,
    req: CalibrationRequest,
) -> Result<CalibrationOutcome, CalibrationError> {
    let model_id = select_model(client, req.model_id.as_deref()).await?;
    let prompts = select_prompts(&req)?;
    let run_id = Uuid::new_v4();
    debug!(%run_id, model = %model_id, prompts = prompts.len(), "starting calibration run");

    let mut tests = Vec::with_capacity(prompts.len());
    for (category, prompt) in &prompts {
        let test = run_single_test(client, store, &model_id, category, prompt, &req).await;
        store.save_calibration_result(&test).await?;
        tests.push(test);
    }

    let summary = RunSummary::from_tests(&tests);
    Ok(CalibrationOutcome {
        run_id,
        model_id,
        category: req.category,
        summary,
        tests,
    })
}

async fn select_model(
    client: &dyn LocalModelClient,
    requested: Option<&str>,
) -> Result<String, CalibrationError> {
    if let Some(model_id) = requested {
        return Ok(model_id.to_string());
    }
    match client.list_models().await {
        Ok(models) => models
            .into_iter()
            .next()
            .ok_or(CalibrationError::NoModelAvailable),
        Err(err) => {
            warn!(error = %err, "sidecar model listing failed");
            Err(CalibrationError::NoModelAvailable)
        }
    }
}

fn select_prompts(req: &CalibrationRequest) -> Result<Vec<(String, String)>, CalibrationError> {
    if let Some(prompt) = &req.custom_prompt {
        return Ok(vec![(req.category.clone(), prompt.clone())]);
    }
    if req.category == GENERAL_CATEGORY {
        return Ok(smoke_set()
            .into_iter()
            .map(|(c, p)| (c.to_string(), p.to_string()))
            .collect());
    }
    let category = category_by_name(&req.category)
        .ok_or_else(|| CalibrationError::UnknownCategory(req.category.clone()))?;
    Ok(category
        .prompts
        .iter()
        .map(|p| (category.name.to_string(), p.to_string()))
        .collect())
}

async fn run_single_test(
    client: &dyn LocalModelClient,
    store: &MetricsStore,
    model_id: &str,
    category: &str,
    prompt: &str,
    req: &CalibrationRequest,
) -> CalibrationTest {
    let timestamp = now_rfc3339();
    let test_id = derive_test_id(model_id, category, prompt, &timestamp);

    let chat = ChatRequest::new(model_id, vec![Message::user(prompt)])
        .temperature(CALIBRATION_TEMPERATURE)
        .max_tokens(CALIBRATION_MAX_TOKENS);

    match client.chat(chat).await {
        Ok(response) => {
            let latency = response.latency.as_secs_f64();
            let evaluation = evaluate(prompt, &response.content, category);
            let passed = evaluation.score >= req.passing_threshold;

            record_metric_best_effort(
                store,
                MetricRecord::new(
                    model_id,
                    response.prompt_tokens,
                    response.completion_tokens,
                    latency,
                    true,
                    None,
                    Some(CALIBRATION_USE_CASE.to_string()),
                ),
            )
            .await;

            CalibrationTest {
                test_id,
                model_id: model_id.to_string(),
                prompt_category: category.to_string(),
                prompt: prompt.to_string(),
                local_response: response.content,
                quality_score: evaluation.score,
                evaluation_notes: evaluation.notes,
                tokens_per_second: tokens_per_second(response.completion_tokens, latency),
                timestamp,
                passed,
            }
        }
        Err(err) => {
            warn!(model = model_id, category, error = %err, "calibration invocation failed");

            record_metric_best_effort(
                store,
                MetricRecord::new(
                    model_id,
                    0,
                    0,
                    0.0,
                    false,
                    Some(err.to_string()),
                    Some(CALIBRATION_USE_CASE.to_string()),
                ),
            )
            .await;

            CalibrationTest {
                test_id,
                model_id: model_id.to_string(),
                prompt_category: category.to_string(),
                prompt: prompt.to_string(),
                local_response: String::new(),
                quality_score: 0.0,
                evaluation_notes: vec![format!("invocation failed: {err}")],
                tokens_per_second: 0.0,
                timestamp,
                passed: false,
            }
        }
    }
}

/// Metric records are best-effort: a storage hiccup must not fail the test.
async fn record_metric_best_effort(store: &MetricsStore, record: MetricRecord) {
    if let Err(err) = store.record_metric(&record).await {
        warn!(error = %err, "failed to record invocation metric");
    }
}

/// Deterministic test id from model, category, prompt, and run instant.
pub fn derive_test_id(model_id: &str, category: &str, prompt: &str, timestamp: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    for field in [model_id, category, prompt, timestamp] {
        hasher.update(field.as_bytes());
        hasher.update(b"|");
    }
    hasher.finalize().to_hex().to_string()[..16].to_string()
}

// =============================================================================
// TESTS
// =============================================================================
