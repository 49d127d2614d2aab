//! cliprank CLI
//!
//! Runs the clip recommendation pipeline against a local content corpus,
//! inspects stored runs, and resumes them from arbitrary stages.

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cliprank::oracle::ChatOracle;
use cliprank::sources::{FixtureCatalog, FixtureSource};
use cliprank::store::JsonRunStore;
use cliprank::{
    build_runtime, recommendations, resume_pipeline, run_pipeline, Collaborators, Config,
    PipelineOutcome, RunId, RunStore,
};

const DEFAULT_STORE_DIR: &str = ".cliprank/runs";

#[derive(Parser)]
#[command(name = "cliprank")]
#[command(about = "Recommend video clips for a social handle", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recommendation pipeline
    Run {
        /// Override the configured handle
        #[arg(long)]
        handle: Option<String>,

        /// JSON content corpus backing the post/search/transcript sources
        #[arg(long)]
        fixtures: PathBuf,
    },

    /// Clone a stored run and resume it from a stage
    Resume {
        /// Run to clone from
        #[arg(long)]
        run_id: String,

        /// Stage to resume at
        #[arg(long)]
        stage: String,

        /// JSON content corpus backing the post/search/transcript sources
        #[arg(long)]
        fixtures: PathBuf,
    },

    /// Print a context field from a stored run's stage result
    Print {
        #[arg(long)]
        run_id: String,

        /// Stage whose result to read (defaults to the last recorded)
        #[arg(long)]
        stage: Option<String>,

        /// Context field to print
        #[arg(long)]
        key: String,
    },

    /// List stored run ids
    Runs,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { handle, fixtures } => run_command(cli.config, handle, fixtures),
        Commands::Resume {
            run_id,
            stage,
            fixtures,
        } => resume_command(cli.config, run_id, stage, fixtures),
        Commands::Print {
            run_id,
            stage,
            key,
        } => print_command(cli.config, run_id, stage, key),
        Commands::Runs => runs_command(cli.config),
        Commands::Validate => validate_command(cli.config),
        Commands::GenerateConfig { output } => generate_config_command(output),
    }
}

fn open_store(config: &Config) -> Result<JsonRunStore> {
    let dir = config
        .store
        .path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
    JsonRunStore::new(dir)
}

fn collaborators(config: &Config, fixtures: &Path) -> Result<Collaborators> {
    let catalog = FixtureCatalog::from_file(fixtures)?;
    let source = Arc::new(FixtureSource::new(catalog));
    Ok(Collaborators {
        posts: source.clone(),
        search: source.clone(),
        transcripts: source,
        oracle: Arc::new(ChatOracle::from_config(&config.oracle)?),
    })
}

fn report_outcome(outcome: PipelineOutcome) -> Result<()> {
    match outcome {
        PipelineOutcome::Completed(ctx) => {
            let recs = recommendations(&ctx)?;
            println!("{}", serde_json::to_string_pretty(&recs)?);
            Ok(())
        }
        PipelineOutcome::Halted { stage, failure } => {
            bail!("stage '{}' failed: {}", stage, failure)
        }
    }
}

fn run_command(config_path: PathBuf, handle: Option<String>, fixtures: PathBuf) -> Result<()> {
    let mut config = Config::from_file(&config_path)?;

    // Apply overrides
    if let Some(handle) = handle {
        config.input.handle = handle;
    }

    config.validate()?;

    let store = open_store(&config)?;
    let collab = collaborators(&config, &fixtures)?;

    let runtime = build_runtime(config.processing.worker_threads)?;
    let report = runtime.block_on(async { run_pipeline(&config, &collab, &store).await })?;

    tracing::info!("Run stored as {}", report.run_id);
    report_outcome(report.outcome)
}

fn resume_command(
    config_path: PathBuf,
    run_id: String,
    stage: String,
    fixtures: PathBuf,
) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;

    let store = open_store(&config)?;
    let collab = collaborators(&config, &fixtures)?;
    let source_id = RunId::from(run_id.as_str());

    let runtime = build_runtime(config.processing.worker_threads)?;
    let report = runtime
        .block_on(async { resume_pipeline(&config, &collab, &store, &source_id, &stage).await })?;

    tracing::info!("Resumed run stored as {}", report.run_id);
    report_outcome(report.outcome)
}

fn print_command(
    config_path: PathBuf,
    run_id: String,
    stage: Option<String>,
    key: String,
) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    let store = open_store(&config)?;

    let id = RunId::from(run_id.as_str());
    let Some(run) = store.get(&id)? else {
        bail!("no run found with id {}", id);
    };

    let record = match stage {
        Some(name) => {
            let index = run.stage_index(&name).map_err(anyhow::Error::new)?;
            &run.stages[index]
        }
        None => run
            .stages
            .last()
            .with_context(|| format!("run {} has no recorded stages", id))?,
    };

    match record.outcome.context() {
        Some(ctx) => match ctx.value(&key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
            None => bail!("stage '{}' has no context field '{}'", record.stage, key),
        },
        None => bail!("stage '{}' recorded a failure, not a context", record.stage),
    }
    Ok(())
}

fn runs_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    let store = open_store(&config)?;
    for id in store.list()? {
        println!("{}", id);
    }
    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# cliprank configuration

# === INPUT: Who to build recommendations for ===
input:
  # Social handle whose recent posts seed the pipeline
  handle: "experilearning"

  # How relevant a search result must be to survive filtering (0..=1)
  relevancy_cutoff: 0.6

  # Recent posts fetched for the handle
  max_posts: 30

  # Search queries generated from the posts
  max_queries: 5

# === RANKING: The final rank-reduce stage ===
ranking:
  # Stop ranking once this many clips remain
  target_count: 30

  # Maximum recommended clips per source video
  per_group_cap: 3

  # Fraction of each mixed window discarded per round
  discard_ratio: 0.5

  # Window formation: independent-chunks or sliding-tournament
  window_mode: independent-chunks

  # Window size for the sliding tournament
  window_size: 4

  # Oracle context budget in tokens, and the slice reserved for output
  context_budget: 8192
  output_allowance: 500

  # Fixed shuffle seed for reproducible runs (omit for entropy)
  # shuffle_seed: 42

# === PROCESSING: Concurrency tuning ===
processing:
  # Concurrent post/search/transcript fetches
  fetch_concurrency: 3

  # Concurrent oracle calls for filtering, appraisal, and ranking
  oracle_concurrency: 10

  # Tokio worker threads (omit = num CPUs)
  # worker_threads: 8

# === ORACLE: Scoring endpoint ===
oracle:
  # OpenAI-compatible API base URL
  base_url: "https://api.openai.com/v1"

  # Model name
  model: "gpt-4"

  # Environment variable holding the API key
  api_key_env: "OPENAI_API_KEY"

  # Log requests upstream (disable for tests and sensitive input)
  log_requests: false

# === STORE: Run persistence ===
store:
  # Directory for persisted runs
  path: ".cliprank/runs"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from([
            "cliprank",
            "run",
            "--fixtures",
            "corpus.json",
            "--handle",
            "someone",
        ]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::try_parse_from(["cliprank", "-c", "other.yaml", "runs"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_resume_requires_stage() {
        let cli = Cli::try_parse_from([
            "cliprank",
            "resume",
            "--run-id",
            "2024-01-01T00:00:00.000000Z",
            "--fixtures",
            "corpus.json",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["cliprank", "validate", "-c", "test.json"]);
        assert!(cli.is_ok());
    }
}
