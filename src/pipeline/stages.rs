//! The recommendation stage chain.
//!
//! Nine stages, run in order:
//!
//! ```text
//! validate-input -> fetch-posts -> create-queries -> search-videos
//!   -> filter-results -> download-transcripts -> appraise-transcripts
//!   -> extract-clips -> rank-clips
//! ```
//!
//! Each stage reads its inputs from the shared context and adds its
//! outputs under the field names in [`keys`]. Fan-out stages tolerate
//! per-item failures by returning `None` sentinels and filtering; only an
//! empty post-filter collection escalates to a stage failure.

use crate::context::Context;
use crate::exec;
use crate::failure::Failure;
use crate::model::{posts_to_string, Clip, Post, SearchHit, TranscriptCue};
use crate::oracle::{
    AppraiseRequest, ExtractRequest, OracleOptions, QueryRequest, RankingOracle, RequestTags,
    ScoreRequest,
};
use crate::pipeline::{Stage, StageOutcome};
use crate::rank::RankReducer;
use crate::sources::{PostSource, TranscriptSource, VideoSearch};
use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Context field names shared by the stages.
pub mod keys {
    pub const RUN_ID: &str = "run_id";
    pub const HANDLE: &str = "handle";
    pub const RELEVANCY_CUTOFF: &str = "relevancy_cutoff";
    pub const POSTS: &str = "posts";
    pub const QUERIES: &str = "queries";
    pub const SEARCH_RESULTS: &str = "search_results";
    pub const FILTERED_RESULTS: &str = "filtered_results";
    pub const TRANSCRIPTS: &str = "transcripts";
    pub const APPRAISED: &str = "appraised_transcripts";
    pub const CLIPS: &str = "clips";
    pub const RANKED_CLIPS: &str = "ranked_clips";
}

/// A generated query joined with the posts that motivated it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWithPosts {
    pub query: String,
    pub posts: Vec<Post>,
}

/// Raw search hits for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySearch {
    pub query: String,
    pub posts: Vec<Post>,
    pub hits: Vec<SearchHit>,
}

/// A relevance-scored hit that passed the cutoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantHit {
    pub query: String,
    pub hit: SearchHit,
    pub relevance: f64,
}

/// A relevant hit with its fetched transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMatch {
    pub query: String,
    pub relevance: f64,
    pub hit: SearchHit,
    pub cues: Vec<TranscriptCue>,
}

fn oracle_options(ctx: &Context, stage: &'static str, log_requests: bool) -> Result<OracleOptions> {
    Ok(OracleOptions {
        tags: RequestTags {
            run_id: ctx.get(keys::RUN_ID)?,
            handle: ctx.get(keys::HANDLE)?,
            stage,
        },
        log_requests,
    })
}

/// Rejects malformed top-level input before any work begins.
pub struct ValidateInput;

#[async_trait]
impl Stage for ValidateInput {
    fn name(&self) -> &'static str {
        "validate-input"
    }

    fn description(&self) -> &'static str {
        "Validate pipeline input"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &[keys::HANDLE, keys::RELEVANCY_CUTOFF]
    }

    async fn run(&self, ctx: Context) -> Result<StageOutcome> {
        let Ok(handle) = ctx.get::<String>(keys::HANDLE) else {
            return Ok(StageOutcome::failure(Failure::Validation(
                "handle must be a string".to_string(),
            )));
        };
        let handle = handle.trim_start_matches('@');
        if handle.is_empty() || handle.chars().any(char::is_whitespace) {
            return Ok(StageOutcome::failure(Failure::Validation(format!(
                "'{}' is not a valid handle",
                handle
            ))));
        }

        let Ok(cutoff) = ctx.get::<f64>(keys::RELEVANCY_CUTOFF) else {
            return Ok(StageOutcome::failure(Failure::Validation(
                "relevancy cutoff must be a number".to_string(),
            )));
        };
        if !cutoff.is_finite() || !(0.0..=1.0).contains(&cutoff) {
            return Ok(StageOutcome::failure(Failure::Validation(format!(
                "relevancy cutoff {} must be within [0, 1]",
                cutoff
            ))));
        }

        Ok(StageOutcome::success(ctx))
    }
}

/// Fetches recent posts for the seed handle.
///
/// Zero posts is non-fatal: the oracle can still attempt query generation
/// from the handle alone, and the next stage decides whether that worked.
pub struct FetchPosts {
    pub source: Arc<dyn PostSource>,
    pub max_posts: usize,
}

#[async_trait]
impl Stage for FetchPosts {
    fn name(&self) -> &'static str {
        "fetch-posts"
    }

    fn description(&self) -> &'static str {
        "Fetch recent posts for the handle"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &[keys::HANDLE]
    }

    fn added_fields(&self) -> &'static [&'static str] {
        &[keys::POSTS]
    }

    async fn run(&self, ctx: Context) -> Result<StageOutcome> {
        let handle: String = ctx.get(keys::HANDLE)?;
        tracing::info!("Fetching up to {} posts for @{}", self.max_posts, handle);

        let mut posts = self.source.recent_posts(&handle, self.max_posts).await?;
        posts.truncate(self.max_posts);

        if posts.is_empty() {
            tracing::warn!("No posts found for @{}", handle);
        } else {
            tracing::info!("{} posts fetched", posts.len());
        }
        Ok(StageOutcome::success(ctx.with(keys::POSTS, &posts)?))
    }
}

/// Asks the oracle for search queries grounded in the fetched posts.
pub struct CreateQueries {
    pub oracle: Arc<dyn RankingOracle>,
    pub max_queries: usize,
    pub log_requests: bool,
}

#[async_trait]
impl Stage for CreateQueries {
    fn name(&self) -> &'static str {
        "create-queries"
    }

    fn description(&self) -> &'static str {
        "Create video search queries"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &[keys::RUN_ID, keys::HANDLE, keys::POSTS]
    }

    fn added_fields(&self) -> &'static [&'static str] {
        &[keys::QUERIES]
    }

    async fn run(&self, ctx: Context) -> Result<StageOutcome> {
        let handle: String = ctx.get(keys::HANDLE)?;
        let posts: Vec<Post> = ctx.get(keys::POSTS)?;
        let opts = oracle_options(&ctx, self.name(), self.log_requests)?;

        let queries = self
            .oracle
            .generate_queries(
                QueryRequest {
                    handle,
                    posts: posts.clone(),
                    max_queries: self.max_queries,
                },
                &opts,
            )
            .await?;

        if queries.is_empty() {
            return Ok(StageOutcome::failure(Failure::EmptyResult(
                "no search queries generated".to_string(),
            )));
        }

        let with_posts: Vec<QueryWithPosts> = queries
            .into_iter()
            .map(|q| QueryWithPosts {
                query: q.query,
                posts: q
                    .post_ids
                    .iter()
                    .filter_map(|&i| posts.get(i).cloned())
                    .collect(),
            })
            .collect();

        tracing::info!("Created {} search queries", with_posts.len());
        for (i, q) in with_posts.iter().enumerate() {
            tracing::debug!("Query {}: {}", i + 1, q.query);
        }
        Ok(StageOutcome::success(ctx.with(keys::QUERIES, &with_posts)?))
    }
}

/// Fans out video search per query with bounded concurrency.
pub struct SearchVideos {
    pub search: Arc<dyn VideoSearch>,
    pub concurrency: usize,
}

#[async_trait]
impl Stage for SearchVideos {
    fn name(&self) -> &'static str {
        "search-videos"
    }

    fn description(&self) -> &'static str {
        "Search for videos matching each query"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &[keys::QUERIES]
    }

    fn added_fields(&self) -> &'static [&'static str] {
        &[keys::SEARCH_RESULTS]
    }

    async fn run(&self, ctx: Context) -> Result<StageOutcome> {
        let queries: Vec<QueryWithPosts> = ctx.get(keys::QUERIES)?;
        tracing::info!("Searching videos for {} queries", queries.len());

        let results: Vec<QuerySearch> = exec::try_bounded_all(
            queries.into_iter().map(|q| {
                let search = Arc::clone(&self.search);
                async move {
                    let hits = search.search(&q.query).await?;
                    tracing::debug!("Query '{}' returned {} hits", q.query, hits.len());
                    Ok(QuerySearch {
                        query: q.query,
                        posts: q.posts,
                        hits,
                    })
                }
            }),
            self.concurrency,
        )
        .await?;

        let total: usize = results.iter().map(|r| r.hits.len()).sum();
        tracing::info!("Found {} search hits", total);
        Ok(StageOutcome::success(
            ctx.with(keys::SEARCH_RESULTS, &results)?,
        ))
    }
}

/// Scores each query's hits and keeps those above the relevance cutoff.
pub struct FilterResults {
    pub oracle: Arc<dyn RankingOracle>,
    pub concurrency: usize,
    pub log_requests: bool,
}

#[async_trait]
impl Stage for FilterResults {
    fn name(&self) -> &'static str {
        "filter-results"
    }

    fn description(&self) -> &'static str {
        "Filter search hits by oracle relevance"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &[
            keys::RUN_ID,
            keys::HANDLE,
            keys::RELEVANCY_CUTOFF,
            keys::SEARCH_RESULTS,
        ]
    }

    fn added_fields(&self) -> &'static [&'static str] {
        &[keys::FILTERED_RESULTS]
    }

    async fn run(&self, ctx: Context) -> Result<StageOutcome> {
        let handle: String = ctx.get(keys::HANDLE)?;
        let cutoff: f64 = ctx.get(keys::RELEVANCY_CUTOFF)?;
        let results: Vec<QuerySearch> = ctx.get(keys::SEARCH_RESULTS)?;
        let opts = oracle_options(&ctx, self.name(), self.log_requests)?;

        let scored: Vec<Vec<RelevantHit>> = exec::try_bounded_all(
            results.into_iter().map(|qs| {
                let oracle = Arc::clone(&self.oracle);
                let opts = opts.clone();
                let handle = handle.clone();
                async move {
                    if qs.hits.is_empty() {
                        return Ok(Vec::new());
                    }
                    let QuerySearch {
                        query,
                        posts,
                        hits,
                    } = qs;
                    let scored = oracle
                        .score_hits(
                            ScoreRequest {
                                handle,
                                query: query.clone(),
                                posts,
                                hits,
                            },
                            &opts,
                        )
                        .await?;
                    Ok(scored
                        .into_iter()
                        .filter(|s| s.relevance > cutoff)
                        .map(|s| RelevantHit {
                            query: query.clone(),
                            hit: s.hit,
                            relevance: s.relevance,
                        })
                        .collect())
                }
            }),
            self.concurrency,
        )
        .await?;

        let kept: Vec<RelevantHit> = scored.concat();
        if kept.is_empty() {
            return Ok(StageOutcome::failure(Failure::EmptyResult(
                "no search results passed the relevance filter".to_string(),
            )));
        }

        tracing::info!("{} hits passed the relevance filter", kept.len());
        Ok(StageOutcome::success(
            ctx.with(keys::FILTERED_RESULTS, &kept)?,
        ))
    }
}

/// Fetches transcripts for surviving hits.
///
/// Videos without a usable transcript are skipped, not fatal.
pub struct DownloadTranscripts {
    pub transcripts: Arc<dyn TranscriptSource>,
    pub concurrency: usize,
}

#[async_trait]
impl Stage for DownloadTranscripts {
    fn name(&self) -> &'static str {
        "download-transcripts"
    }

    fn description(&self) -> &'static str {
        "Download transcripts for filtered videos"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &[keys::FILTERED_RESULTS]
    }

    fn added_fields(&self) -> &'static [&'static str] {
        &[keys::TRANSCRIPTS]
    }

    async fn run(&self, ctx: Context) -> Result<StageOutcome> {
        let hits: Vec<RelevantHit> = ctx.get(keys::FILTERED_RESULTS)?;
        tracing::info!("Fetching {} transcripts", hits.len());

        let fetched: Vec<Option<TranscriptMatch>> = exec::try_bounded_all(
            hits.into_iter().map(|rh| {
                let source = Arc::clone(&self.transcripts);
                async move {
                    let transcript = source.fetch(&rh.hit.video_id, &rh.hit.title).await?;
                    let Some(transcript) = transcript.filter(|t| !t.cues.is_empty()) else {
                        tracing::debug!("Skipping '{}': no transcript", rh.hit.title);
                        return Ok(None);
                    };
                    Ok(Some(TranscriptMatch {
                        query: rh.query,
                        relevance: rh.relevance,
                        hit: rh.hit,
                        cues: transcript.cues,
                    }))
                }
            }),
            self.concurrency,
        )
        .await?;

        let matches: Vec<TranscriptMatch> = fetched.into_iter().flatten().collect();
        if matches.is_empty() {
            return Ok(StageOutcome::failure(Failure::EmptyResult(
                "no transcripts fetched".to_string(),
            )));
        }

        tracing::info!("{} transcripts fetched", matches.len());
        Ok(StageOutcome::success(ctx.with(keys::TRANSCRIPTS, &matches)?))
    }
}

/// Oracle gate: keep only transcripts worth clipping at all.
pub struct AppraiseTranscripts {
    pub oracle: Arc<dyn RankingOracle>,
    pub concurrency: usize,
    pub log_requests: bool,
}

#[async_trait]
impl Stage for AppraiseTranscripts {
    fn name(&self) -> &'static str {
        "appraise-transcripts"
    }

    fn description(&self) -> &'static str {
        "Appraise transcripts for clip-worthiness"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &[keys::RUN_ID, keys::HANDLE, keys::TRANSCRIPTS]
    }

    fn added_fields(&self) -> &'static [&'static str] {
        &[keys::APPRAISED]
    }

    async fn run(&self, ctx: Context) -> Result<StageOutcome> {
        let matches: Vec<TranscriptMatch> = ctx.get(keys::TRANSCRIPTS)?;
        let opts = oracle_options(&ctx, self.name(), self.log_requests)?;
        tracing::info!("Appraising {} transcripts", matches.len());

        let appraised: Vec<Option<TranscriptMatch>> = exec::try_bounded_all(
            matches.into_iter().map(|tm| {
                let oracle = Arc::clone(&self.oracle);
                let opts = opts.clone();
                async move {
                    let appraisal = oracle
                        .appraise_transcript(
                            AppraiseRequest {
                                title: tm.hit.title.clone(),
                                cues: tm.cues.clone(),
                            },
                            &opts,
                        )
                        .await?;
                    if appraisal.recommend {
                        tracing::info!("Accepting '{}': {}", tm.hit.title, appraisal.reasoning);
                        Ok(Some(tm))
                    } else {
                        tracing::info!("Rejecting '{}': {}", tm.hit.title, appraisal.reasoning);
                        Ok(None)
                    }
                }
            }),
            self.concurrency,
        )
        .await?;

        let accepted: Vec<TranscriptMatch> = appraised.into_iter().flatten().collect();
        if accepted.is_empty() {
            return Ok(StageOutcome::failure(Failure::EmptyResult(
                "no transcripts passed the appraisal filter".to_string(),
            )));
        }

        tracing::info!("{} transcripts passed appraisal", accepted.len());
        Ok(StageOutcome::success(ctx.with(keys::APPRAISED, &accepted)?))
    }
}

/// Asks the oracle for clip-worthy cue ranges in each transcript.
pub struct ExtractClips {
    pub oracle: Arc<dyn RankingOracle>,
    pub concurrency: usize,
    pub log_requests: bool,
}

#[async_trait]
impl Stage for ExtractClips {
    fn name(&self) -> &'static str {
        "extract-clips"
    }

    fn description(&self) -> &'static str {
        "Extract candidate clips from transcripts"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &[keys::RUN_ID, keys::HANDLE, keys::POSTS, keys::APPRAISED]
    }

    fn added_fields(&self) -> &'static [&'static str] {
        &[keys::CLIPS]
    }

    async fn run(&self, ctx: Context) -> Result<StageOutcome> {
        let handle: String = ctx.get(keys::HANDLE)?;
        let posts: Vec<Post> = ctx.get(keys::POSTS)?;
        let matches: Vec<TranscriptMatch> = ctx.get(keys::APPRAISED)?;
        let opts = oracle_options(&ctx, self.name(), self.log_requests)?;

        let per_video: Vec<Option<Vec<Clip>>> = exec::try_bounded_all(
            matches.into_iter().map(|tm| {
                let oracle = Arc::clone(&self.oracle);
                let opts = opts.clone();
                let handle = handle.clone();
                let posts = posts.clone();
                async move {
                    let spans = oracle
                        .extract_clips(
                            ExtractRequest {
                                handle,
                                posts,
                                video_id: tm.hit.video_id.clone(),
                                title: tm.hit.title.clone(),
                                cues: tm.cues.clone(),
                            },
                            &opts,
                        )
                        .await?;

                    let clips: Vec<Clip> = spans
                        .into_iter()
                        .filter_map(|span| {
                            if span.start_cue > span.end_cue || span.start_cue >= tm.cues.len() {
                                tracing::debug!(
                                    "Dropping out-of-range clip span {}..={} for '{}'",
                                    span.start_cue,
                                    span.end_cue,
                                    tm.hit.title
                                );
                                return None;
                            }
                            let end = span.end_cue.min(tm.cues.len() - 1);
                            let range = &tm.cues[span.start_cue..=end];
                            Clip::from_cues(&tm.hit, span.title, span.summary, range)
                        })
                        .collect();

                    if clips.is_empty() {
                        tracing::warn!("No clips extracted for '{}'", tm.hit.title);
                        return Ok(None);
                    }
                    tracing::info!("{} clips extracted for '{}'", clips.len(), tm.hit.title);
                    Ok(Some(clips))
                }
            }),
            self.concurrency,
        )
        .await?;

        let clips: Vec<Clip> = per_video.into_iter().flatten().flatten().collect();
        if clips.is_empty() {
            return Ok(StageOutcome::failure(Failure::EmptyResult(
                "no clips extracted".to_string(),
            )));
        }

        tracing::info!("{} candidate clips total", clips.len());
        Ok(StageOutcome::success(ctx.with(keys::CLIPS, &clips)?))
    }
}

/// Shuffles the clip set and rank-reduces it to the target count.
pub struct RankClips {
    pub reducer: RankReducer,
    pub shuffle_seed: Option<u64>,
    pub log_requests: bool,
}

#[async_trait]
impl Stage for RankClips {
    fn name(&self) -> &'static str {
        "rank-clips"
    }

    fn description(&self) -> &'static str {
        "Order clips by relevance to the handle's interests"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &[keys::RUN_ID, keys::HANDLE, keys::POSTS, keys::CLIPS]
    }

    fn added_fields(&self) -> &'static [&'static str] {
        &[keys::RANKED_CLIPS]
    }

    async fn run(&self, ctx: Context) -> Result<StageOutcome> {
        let handle: String = ctx.get(keys::HANDLE)?;
        let posts: Vec<Post> = ctx.get(keys::POSTS)?;
        let mut clips: Vec<Clip> = ctx.get(keys::CLIPS)?;
        let opts = oracle_options(&ctx, self.name(), self.log_requests)?;

        let interest_summary = posts_to_string(&handle, &posts);
        let mut rng = match self.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        // Order globally over all videos and all clips.
        clips.shuffle(&mut rng);
        tracing::info!("Ranking {} clips", clips.len());

        let ranked = self
            .reducer
            .reduce(clips, &interest_summary, &opts, &mut rng)
            .await?;

        tracing::info!("{} clips survive ranking", ranked.len());
        Ok(StageOutcome::success(ctx.with(keys::RANKED_CLIPS, &ranked)?))
    }
}
