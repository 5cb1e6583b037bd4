mod config;
mod errors;
mod llm_client;
mod scoring;
mod store;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::errors::PipelineError;
use crate::llm_client::LlmClient;
use crate::scoring::engine::{EngineKind, ScorerEngine};
use crate::scoring::{run_scoring, run_single_intake, IntakeOutcome, ScoringContext};
use crate::store::RecordStoreClient;

/// Pause between records in batch mode, to stay inside API rate limits.
const RECORD_DELAY: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "jobscore", about = "Job posting fit-scoring pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score unscored job records in the store
    Score {
        /// Maximum number of records to process
        #[arg(long, default_value_t = 10)]
        max: u32,
        /// Log intended writes without persisting anything
        #[arg(long)]
        dry_run: bool,
        /// Scorer engine to run (v1 | precision_v1)
        #[arg(long, conflicts_with = "ab_test")]
        engine: Option<String>,
        /// Comma-separated engine list to run side by side with arbitration
        #[arg(long)]
        ab_test: Option<String>,
    },
    /// Intake a single job by URL and score it immediately
    Run {
        /// Canonical posting URL (dedup key)
        #[arg(long)]
        job_url: String,
        /// File with the raw job description HTML/text
        #[arg(long)]
        jd_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting jobscore v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    let llm = LlmClient::new(config.llm_api_key.clone(), config.llm_api_url.clone());
    let store = RecordStoreClient::new(
        config.store_token.clone(),
        &config.store_base_id,
        config.store_api_url.clone(),
    )?;

    match cli.command {
        Command::Score {
            max,
            dry_run,
            engine,
            ab_test,
        } => {
            let engines = resolve_engines(
                engine.as_deref(),
                ab_test.as_deref(),
                Path::new(&config.prompt_dir),
            )?;
            let ctx = ScoringContext {
                store: &store,
                llm: &llm,
                jobs_table: &config.jobs_table,
                candidate_table: &config.candidate_table,
                parse_model: &config.parse_model,
                score_model: &config.score_model,
                engines,
                dry_run,
                record_delay: RECORD_DELAY,
            };
            let stats = run_scoring(&ctx, max).await?;
            info!(
                "Done: {} total, {} scored, {} skipped, {} failed",
                stats.total, stats.scored, stats.skipped, stats.failed
            );
        }
        Command::Run { job_url, jd_file } => {
            let raw = match jd_file {
                Some(path) => Some(std::fs::read_to_string(path)?),
                None => None,
            };
            let engines = resolve_engines(None, None, Path::new(&config.prompt_dir))?;
            let ctx = ScoringContext {
                store: &store,
                llm: &llm,
                jobs_table: &config.jobs_table,
                candidate_table: &config.candidate_table,
                parse_model: &config.parse_model,
                score_model: &config.score_model,
                engines,
                dry_run: false,
                record_delay: RECORD_DELAY,
            };
            match run_single_intake(&ctx, &job_url, raw).await? {
                IntakeOutcome::Duplicate(id) => info!("Already tracked as {id}, nothing to do"),
                IntakeOutcome::Scored(id) => info!("Created and scored {id}"),
                IntakeOutcome::Skipped(id) => info!("Created {id}; no description to score yet"),
            }
        }
    }

    Ok(())
}

/// Resolves the engine set from CLI flags. No flag runs the preferred engine
/// alone; `--ab-test` runs every listed engine with arbitration.
fn resolve_engines(
    engine: Option<&str>,
    ab_test: Option<&str>,
    prompt_dir: &Path,
) -> Result<Vec<ScorerEngine>, PipelineError> {
    let kinds: Vec<EngineKind> = match (engine, ab_test) {
        (_, Some(list)) => list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(EngineKind::parse)
            .collect::<Result<_, _>>()?,
        (Some(name), None) => vec![EngineKind::parse(name)?],
        (None, None) => vec![EngineKind::PREFERRED],
    };
    if kinds.is_empty() {
        return Err(PipelineError::Config(
            "at least one scorer engine is required".to_string(),
        ));
    }
    kinds
        .into_iter()
        .map(|kind| ScorerEngine::load(kind, prompt_dir))
        .collect()
}
