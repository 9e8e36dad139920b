#![forbid(unsafe_code)]

//! # sidecar-harness
//!
//! Calibration and performance harness for locally-hosted LLMs.
//!
//! A desktop AI app serves local models through an OpenAI-compatible
//! "sidecar" process. This crate layers an intelligence system on top of it:
//! it records per-invocation performance metrics, runs standardized
//! calibration prompts against local models, scores the responses with a
//! deterministic heuristic rubric, mines recurring category failures into
//! handoff triggers (signals to escalate to a more capable remote model),
//! and compares several local models head-to-head on one prompt.
//!
//! The [`store::MetricsStore`] is the single persistence owner; the
//! calibration harness, trigger detector, and comparison orchestrator all
//! take a shared handle plus a [`sidecar::LocalModelClient`] and never hold
//! ambient global state.

pub mod calibration;
pub mod comparison;
pub mod evaluator;
pub mod prompts;
pub mod sidecar;
pub mod store;
pub mod triggers;

pub use calibration::{
    run_calibration, CalibrationError, CalibrationOutcome, CalibrationRequest, RunSummary,
    DEFAULT_PASSING_THRESHOLD,
};
pub use comparison::{
    compare_models, ComparisonError, ComparisonReport, ComparisonRequest, ModelOutcome,
    WinnerPolicy, COMPARISON_MODEL_CAP,
};
pub use evaluator::{evaluate, Evaluation};
pub use sidecar::{
    ChatRequest, ChatResponse, ClientError, HttpSidecarClient, LocalModelClient, Message, Role,
};
pub use store::{
    CalibrationTest, HandoffTrigger, MetricRecord, MetricsStore, ModelSummary, StoreError,
};
pub use triggers::{detect_triggers, record_manual_trigger, DetectorConfig};
