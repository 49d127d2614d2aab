//! Scoring-oracle interface.
//!
//! The oracle is a black-box ranking capability invoked for query
//! generation, relevance scoring, transcript appraisal, clip extraction,
//! and window ranking. Every call carries request tags and a logging
//! toggle threaded down from the top level so logged requests can be
//! filtered into fine-tuning datasets later.

mod client;

pub use client::ChatOracle;

use crate::model::{estimated_tokens, Post, SearchHit, TranscriptCue};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Token overhead of the invariant portion of a rank request, excluding
/// the interest summary (instructions, schema, separators).
const RANK_PROMPT_OVERHEAD_TOKENS: usize = 192;

/// Tags attached to every oracle request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestTags {
    pub run_id: String,
    pub handle: String,
    pub stage: &'static str,
}

/// Per-call options threaded from the top level.
#[derive(Debug, Clone)]
pub struct OracleOptions {
    pub tags: RequestTags,
    /// Log this request upstream (disabled for tests and sensitive input).
    pub log_requests: bool,
}

/// Ask for search queries grounded in the seed handle's posts.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub handle: String,
    pub posts: Vec<Post>,
    pub max_queries: usize,
}

/// A generated search query, referencing the posts that motivated it by
/// index into the request's post list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub query: String,
    #[serde(default)]
    pub post_ids: Vec<usize>,
}

/// Score one query's search hits for relevance to the handle's interests.
#[derive(Debug, Clone)]
pub struct ScoreRequest {
    pub handle: String,
    pub query: String,
    pub posts: Vec<Post>,
    pub hits: Vec<SearchHit>,
}

/// A hit with its oracle-assigned relevance in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredHit {
    pub hit: SearchHit,
    pub relevance: f64,
}

/// Judge whether a transcript is worth clipping at all.
#[derive(Debug, Clone)]
pub struct AppraiseRequest {
    pub title: String,
    pub cues: Vec<TranscriptCue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appraisal {
    pub recommend: bool,
    pub reasoning: String,
}

/// Ask for clip-worthy cue ranges in a transcript.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub handle: String,
    pub posts: Vec<Post>,
    pub video_id: String,
    pub title: String,
    pub cues: Vec<TranscriptCue>,
}

/// A contiguous cue sub-range proposed by the oracle, with inclusive
/// bounds into the request's cue list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipSpan {
    pub title: String,
    pub summary: String,
    pub start_cue: usize,
    pub end_cue: usize,
}

/// Rank one window of clips best-to-worst.
#[derive(Debug, Clone)]
pub struct RankWindowRequest {
    pub interest_summary: String,
    pub entries: Vec<WindowEntry>,
}

/// One window item, labeled with its position in the submitted window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowEntry {
    pub label: usize,
    pub title: String,
    pub summary: String,
    pub text: String,
}

/// Black-box scoring/ranking capability.
#[async_trait]
pub trait RankingOracle: Send + Sync {
    async fn generate_queries(
        &self,
        req: QueryRequest,
        opts: &OracleOptions,
    ) -> Result<Vec<GeneratedQuery>>;

    async fn score_hits(&self, req: ScoreRequest, opts: &OracleOptions) -> Result<Vec<ScoredHit>>;

    async fn appraise_transcript(
        &self,
        req: AppraiseRequest,
        opts: &OracleOptions,
    ) -> Result<Appraisal>;

    async fn extract_clips(
        &self,
        req: ExtractRequest,
        opts: &OracleOptions,
    ) -> Result<Vec<ClipSpan>>;

    /// Return the window's labels ordered best to worst. The ordering must
    /// cover the submitted labels; consumers tolerate omissions by keeping
    /// omitted items at the bottom.
    async fn rank_window(&self, req: RankWindowRequest, opts: &OracleOptions)
        -> Result<Vec<usize>>;

    /// Estimated token cost of the invariant portion of a rank request
    /// (everything except the clip entries themselves).
    fn rank_request_overhead(&self, interest_summary: &str) -> usize {
        estimated_tokens(interest_summary) + RANK_PROMPT_OVERHEAD_TOKENS
    }
}
