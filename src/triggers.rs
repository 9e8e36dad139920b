//! Handoff trigger detection.
//!
//! Mines recent calibration outcomes for categories the local model keeps
//! failing, and maintains a deduplicated trigger registry in the store. A
//! trigger is a signal that work of that shape should escalate to a more
//! capable remote model; acting on it is the caller's business.

use std::collections::BTreeMap;

use tracing::debug;

use crate::store::{HandoffTrigger, MetricsStore, StoreError};

// =============================================================================
// Constants
// =============================================================================

/// Failures in one category before a trigger is recorded.
pub const DEFAULT_FAILURE_THRESHOLD: usize = 3;

/// How many recent calibration results the detector examines.
pub const DEFAULT_RECENT_WINDOW: usize = 100;

/// Confidence assigned to manually recorded triggers.
pub const MANUAL_TRIGGER_CONFIDENCE: f64 = 0.7;

/// Failure count at which confidence saturates at 1.0.
const CONFIDENCE_DIVISOR: f64 = 10.0;

/// Pattern type for automatically detected category failures.
pub const CATEGORY_FAILURE_PATTERN: &str = "category_failure";

// =============================================================================
// Detector
// =============================================================================

/// Tunables for automatic detection.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub failure_threshold: usize,
    pub recent_window: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recent_window: DEFAULT_RECENT_WINDOW,
        }
    }
}

/// Confidence as a deterministic function of the failure count at detection
/// time: `min(count / 10, 1.0)`. Not an accumulating average.
pub fn confidence_for_failures(count: usize) -> f64 {
    (count as f64 / CONFIDENCE_DIVISOR).min(1.0)
}

/// Scan recent calibration results and upsert triggers for categories with
/// repeated failures. Returns the active trigger set, most-triggered first.
pub async fn detect_triggers(
    store: &MetricsStore,
    config: DetectorConfig,
) -> Result<Vec<HandoffTrigger>, StoreError> {
    let recent = store.calibration_results(None, config.recent_window).await?;

    // BTreeMap keeps category iteration deterministic.
    let mut failures: BTreeMap<String, usize> = BTreeMap::new();
    for test in recent.iter().filter(|t| !t.passed) {
        *failures.entry(test.prompt_category.clone()).or_default() += 1;
    }

    for (category, count) in &failures {
        if *count < config.failure_threshold {
            continue;
        }
        let confidence = confidence_for_failures(*count);
        debug!(category, count, confidence, "category failure trigger");
        store
            .record_handoff_trigger(
                CATEGORY_FAILURE_PATTERN,
                &category_failure_description(category),
                confidence,
            )
            .await?;
    }

    store.handoff_triggers(true).await
}

/// Record a caller-supplied trigger through the same upsert path as
/// automatic detection. `confidence` defaults to
/// [`MANUAL_TRIGGER_CONFIDENCE`].
pub async fn record_manual_trigger(
    store: &MetricsStore,
    pattern_type: &str,
    description: &str,
    confidence: Option<f64>,
) -> Result<(), StoreError> {
    store
        .record_handoff_trigger(
            pattern_type,
            description,
            confidence.unwrap_or(MANUAL_TRIGGER_CONFIDENCE),
        )
        .await
}

fn category_failure_description(category: &str) -> String {
    format!("Repeated local-model failures in category '{category}'")
}

// =============================================================================
// TESTS
// =============================================================================
