#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sidecar_harness::calibration::{run_calibration, CalibrationRequest};
use sidecar_harness::comparison::{compare_models, ComparisonRequest, WinnerPolicy};
use sidecar_harness::sidecar::HttpSidecarClient;
use sidecar_harness::store::MetricsStore;
use sidecar_harness::triggers::{detect_triggers, record_manual_trigger, DetectorConfig};
use sidecar_harness::DEFAULT_PASSING_THRESHOLD;

#[derive(Parser)]
#[command(name = "sidecar-harness", version, about = "Local model calibration harness CLI")]
struct Cli {
    /// Metrics database path (default: ~/.sidecar-harness/metrics.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the metrics database schema and print its path
    Init,
    /// Run a calibration pass against a local model
    Calibrate {
        /// Model id; defaults to the first model the sidecar reports
        #[arg(long)]
        model: Option<String>,
        /// Prompt category, or "general" for a cross-category smoke test
        #[arg(long, default_value = "general")]
        category: String,
        /// Run exactly this prompt instead of a built-in set
        #[arg(long)]
        prompt: Option<String>,
        /// Quality score at or above which a test passes
        #[arg(long, default_value_t = DEFAULT_PASSING_THRESHOLD)]
        threshold: f64,
    },
    /// Compare several local models on one prompt
    Compare {
        /// Models to compare; defaults to the sidecar's first five
        #[arg(long)]
        model: Vec<String>,
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        system_prompt: Option<String>,
        #[arg(long, value_enum, default_value_t = CliPolicy::Balanced)]
        policy: CliPolicy,
    },
    /// Detect category-failure triggers and list the active set
    Triggers {
        /// List stored triggers without running detection
        #[arg(long)]
        list_only: bool,
        /// Include deactivated triggers when listing
        #[arg(long)]
        all: bool,
        /// Record a manual trigger: pattern type
        #[arg(long, requires = "description")]
        pattern_type: Option<String>,
        /// Record a manual trigger: description
        #[arg(long, requires = "pattern_type")]
        description: Option<String>,
        /// Confidence for a manual trigger (default 0.7)
        #[arg(long)]
        confidence: Option<f64>,
    },
    /// Summarize recorded model metrics
    Metrics {
        #[arg(long)]
        model: Option<String>,
        /// Recency window in days
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliPolicy {
    Speed,
    Quality,
    Balanced,
}

impl From<CliPolicy> for WinnerPolicy {
    fn from(p: CliPolicy) -> Self {
        match p {
            CliPolicy::Speed => WinnerPolicy::Speed,
            CliPolicy::Quality => WinnerPolicy::Quality,
            CliPolicy::Balanced => WinnerPolicy::Balanced,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = MetricsStore::open(cli.db.unwrap_or_else(MetricsStore::default_path))?;

    match cli.command {
        Commands::Init => {
            println!("{}", store.path().display());
        }
        Commands::Calibrate {
            model,
            category,
            prompt,
            threshold,
        } => {
            let client = HttpSidecarClient::from_env()?;
            let outcome = run_calibration(
                &client,
                &store,
                CalibrationRequest {
                    model_id: model,
                    category,
                    custom_prompt: prompt,
                    passing_threshold: threshold,
                },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Compare {
            model,
            prompt,
            system_prompt,
            policy,
        } => {
            let client = HttpSidecarClient::from_env()?;
            let report = compare_models(
                &client,
                &store,
                ComparisonRequest {
                    models: (!model.is_empty()).then_some(model),
                    prompt,
                    system_prompt,
                    policy: policy.into(),
                },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Triggers {
            list_only,
            all,
            pattern_type,
            description,
            confidence,
        } => {
            if let (Some(pattern_type), Some(description)) = (pattern_type, description) {
                record_manual_trigger(&store, &pattern_type, &description, confidence).await?;
            }
            let triggers = if list_only {
                store.handoff_triggers(!all).await?
            } else {
                detect_triggers(&store, DetectorConfig::default()).await?
            };
            println!("{}", serde_json::to_string_pretty(&triggers)?);
        }
        Commands::Metrics { model, days } => {
            let summaries = store.summarize_metrics(model.as_deref(), days).await?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
    }

    Ok(())
}
