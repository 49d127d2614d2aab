//! cliprank
//!
//! Staged, resumable pipeline that turns a social handle into a ranked set
//! of video clip recommendations, using an external scoring oracle for
//! query generation, relevance filtering, and windowed ranking.
//!
//! # Architecture
//!
//! - **Pipeline**: sequential stage chain over an append-only context,
//!   short-circuiting on the first failure
//! - **Store**: per-stage run records, addressable, cloneable, resumable
//! - **Rank**: budgeted chunk partitioning and window rank-reduction
//! - **Oracle / Sources**: black-box collaborators behind traits
//!
//! # Usage
//!
//! ```no_run
//! use cliprank::{run_pipeline, Collaborators, Config};
//! use cliprank::oracle::ChatOracle;
//! use cliprank::sources::{FixtureCatalog, FixtureSource};
//! use cliprank::store::MemoryRunStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let source = Arc::new(FixtureSource::new(FixtureCatalog::default()));
//!     let collab = Collaborators {
//!         posts: source.clone(),
//!         search: source.clone(),
//!         transcripts: source,
//!         oracle: Arc::new(ChatOracle::from_config(&config.oracle)?),
//!     };
//!     let store = MemoryRunStore::new();
//!     let report = run_pipeline(&config, &collab, &store).await?;
//!     println!("run {} finished", report.run_id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod exec;
pub mod failure;
pub mod model;
pub mod oracle;
pub mod pipeline;
pub mod rank;
pub mod sources;
pub mod store;

pub use config::Config;
pub use context::Context;
pub use failure::Failure;
pub use model::Recommendation;
pub use pipeline::{Metrics, Pipeline, PipelineOutcome, Stage, StageOutcome};
pub use store::{Run, RunId, RunStore};

use crate::model::Clip;
use crate::oracle::RankingOracle;
use crate::pipeline::stages::{
    keys, AppraiseTranscripts, CreateQueries, DownloadTranscripts, ExtractClips, FetchPosts,
    FilterResults, RankClips, SearchVideos, ValidateInput,
};
use crate::rank::RankReducer;
use crate::sources::{PostSource, TranscriptSource, VideoSearch};
use crate::store::StageRecord;
use anyhow::{bail, Result};
use std::sync::Arc;

/// External collaborators injected into the pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub posts: Arc<dyn PostSource>,
    pub search: Arc<dyn VideoSearch>,
    pub transcripts: Arc<dyn TranscriptSource>,
    pub oracle: Arc<dyn RankingOracle>,
}

/// Report of one pipeline execution.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: PipelineOutcome,
}

/// Assemble the full stage chain.
pub fn build_pipeline(
    config: &Config,
    collab: &Collaborators,
    metrics: Arc<Metrics>,
) -> Pipeline {
    let log_requests = config.oracle.log_requests;
    Pipeline::new(metrics.clone())
        .add_stage(ValidateInput)
        .add_stage(FetchPosts {
            source: collab.posts.clone(),
            max_posts: config.input.max_posts,
        })
        .add_stage(CreateQueries {
            oracle: collab.oracle.clone(),
            max_queries: config.input.max_queries,
            log_requests,
        })
        .add_stage(SearchVideos {
            search: collab.search.clone(),
            concurrency: config.processing.fetch_concurrency,
        })
        .add_stage(FilterResults {
            oracle: collab.oracle.clone(),
            concurrency: config.processing.oracle_concurrency,
            log_requests,
        })
        .add_stage(DownloadTranscripts {
            transcripts: collab.transcripts.clone(),
            concurrency: config.processing.fetch_concurrency,
        })
        .add_stage(AppraiseTranscripts {
            oracle: collab.oracle.clone(),
            concurrency: config.processing.oracle_concurrency,
            log_requests,
        })
        .add_stage(ExtractClips {
            oracle: collab.oracle.clone(),
            concurrency: config.processing.oracle_concurrency,
            log_requests,
        })
        .add_stage(RankClips {
            reducer: RankReducer::new(
                collab.oracle.clone(),
                metrics,
                config
                    .ranking
                    .reduce_config(config.processing.oracle_concurrency),
            ),
            shuffle_seed: config.ranking.shuffle_seed,
            log_requests,
        })
}

/// Initial context for a run.
pub fn initial_context(config: &Config, run_id: &RunId) -> Result<Context> {
    Context::new()
        .with(keys::RUN_ID, run_id)?
        .with(keys::HANDLE, &config.input.handle)?
        .with(keys::RELEVANCY_CUTOFF, &config.input.relevancy_cutoff)
}

/// Run the full pipeline, recording every stage outcome under a new run id.
pub async fn run_pipeline(
    config: &Config,
    collab: &Collaborators,
    store: &dyn RunStore,
) -> Result<RunReport> {
    config.validate()?;
    let metrics = Metrics::new();
    let pipeline = build_pipeline(config, collab, metrics.clone());

    let run_id = RunId::new();
    store.create(Run::new(run_id.clone()))?;
    tracing::info!("Starting run {} for @{}", run_id, config.input.handle);

    let initial = initial_context(config, &run_id)?;
    let outcome = pipeline.execute(store, &run_id, initial).await?;

    tracing::info!("Run {} finished: {}", run_id, metrics.snapshot());
    Ok(RunReport { run_id, outcome })
}

/// Clone a stored run and resume it from the named stage.
///
/// The stored result of the stage immediately preceding the resume point
/// becomes the starting context (resuming from the first stage uses a
/// fresh initial context). An unknown run id or stage name is an explicit
/// not-found error.
pub async fn resume_pipeline(
    config: &Config,
    collab: &Collaborators,
    store: &dyn RunStore,
    source_id: &RunId,
    stage_name: &str,
) -> Result<RunReport> {
    config.validate()?;
    let metrics = Metrics::new();
    let pipeline = build_pipeline(config, collab, metrics.clone());

    let start = pipeline
        .stage_index(stage_name)
        .map_err(anyhow::Error::new)?;
    let source = store
        .get(source_id)?
        .ok_or_else(|| anyhow::Error::new(Failure::NotFound(format!("run {}", source_id))))?;

    let preceding = if start == 0 {
        None
    } else {
        let record: &StageRecord = source.stages.get(start - 1).ok_or_else(|| {
            anyhow::Error::new(Failure::NotFound(format!(
                "run {} has no result preceding stage '{}'",
                source_id, stage_name
            )))
        })?;
        match record.outcome.context() {
            Some(context) => Some(context.clone()),
            None => bail!(
                "cannot resume run {} from '{}': preceding stage '{}' did not succeed",
                source_id,
                stage_name,
                record.stage
            ),
        }
    };

    // Truncated clone keeps the new run 1:1 with the resumed execution.
    let clone = store.clone_run(source_id, Some(start))?;
    let initial = match preceding {
        Some(context) => context,
        None => initial_context(config, &clone.id)?,
    };

    tracing::info!(
        "Resuming run {} as {} from stage '{}'",
        source_id,
        clone.id,
        stage_name
    );
    let outcome = pipeline.execute_from(store, &clone.id, start, initial).await?;

    tracing::info!("Run {} finished: {}", clone.id, metrics.snapshot());
    Ok(RunReport {
        run_id: clone.id,
        outcome,
    })
}

/// Extract the final recommendations from a completed context.
pub fn recommendations(ctx: &Context) -> Result<Vec<Recommendation>> {
    let clips: Vec<Clip> = ctx.get(keys::RANKED_CLIPS)?;
    Ok(clips.iter().map(Recommendation::from).collect())
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
