use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::analysis::{analysis_budget, ErrorAnalyzer};
use crate::config::Config;
use crate::context::{ErrorAnalysis, ErrorContext};
use crate::errors::FaultmendError;
use crate::graph::GraphAnalyzer;
use crate::observability::telemetry;
use crate::remediation::{RemediationPlan, RemediationValidator};

#[derive(Parser)]
#[command(name = "faultmend")]
#[command(about = "Analyse service errors and validate remediation plans")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<String>,

    /// Log filter (e.g. `faultmend=debug`)
    #[arg(short = 'l', long, value_name = "FILTER", global = true)]
    pub log: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyse an error context (graph, patterns, analysis service)
    #[command(alias = "a")]
    Analyze {
        /// Error context as JSON
        context: PathBuf,
        /// Also derive a remediation plan
        #[arg(long)]
        plan: bool,
    },

    /// Impact and root-cause analysis only
    #[command(alias = "g")]
    Graph {
        /// Error context as JSON
        context: PathBuf,
    },

    /// Validate a remediation plan against an error context
    #[command(name = "validate-plan", alias = "v")]
    ValidatePlan {
        /// Remediation plan as JSON
        plan: PathBuf,
        /// Error context as JSON
        context: PathBuf,
    },
}

async fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {} from {}", what, path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {} JSON", what))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match (&cli.log, cli.json_logs) {
        (Some(filter), true) => telemetry::init_json_tracing(filter),
        (None, true) => telemetry::init_json_tracing("faultmend=info"),
        (Some(filter), false) => telemetry::init_tracing_with_filter(filter),
        (None, false) => telemetry::init_tracing(),
    }

    execute(cli).await
}

/// Load configuration and run one parsed command.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze { context, plan } => {
            let ctx: ErrorContext = read_json(&context, "error context").await?;
            let analyzer = ErrorAnalyzer::from_config(&config)?;
            let analysis = match tokio::time::timeout(
                analysis_budget(&config),
                analyzer.analyze(&ctx),
            )
            .await
            {
                Ok(analysis) => analysis,
                Err(_) => ErrorAnalysis::fallback(&ctx, "analysis timed out"),
            };

            let mut output = json!({ "analysis": analysis });
            if plan {
                output["plan"] = serde_json::to_value(analyzer.derive_plan(&analysis, &ctx))?;
            }
            print_json(&output)
        }

        Commands::Graph { context } => {
            let ctx: ErrorContext = read_json(&context, "error context").await?;
            let analyzer = GraphAnalyzer::new(config.graph.clone());
            let (graph, impact, root_cause) =
                analyzer.analyze(&ctx).map_err(FaultmendError::from)?;
            print_json(&json!({
                "graph": graph,
                "impact": impact,
                "root_cause": root_cause,
            }))
        }

        Commands::ValidatePlan { plan, context } => {
            let mut plan: RemediationPlan = read_json(&plan, "remediation plan").await?;
            let ctx: ErrorContext = read_json(&context, "error context").await?;
            let validator =
                RemediationValidator::new(config.remediation.clone(), config.metrics.clone());

            match validator.validate_plan(&mut plan, &ctx).await {
                Ok(()) => print_json(&json!({ "plan_id": plan.id, "valid": true })),
                Err(e) => {
                    print_json(&json!({
                        "plan_id": plan.id,
                        "valid": false,
                        "error": e.to_string(),
                    }))?;
                    Err(FaultmendError::Validation(e).into())
                }
            }
        }
    }
}
