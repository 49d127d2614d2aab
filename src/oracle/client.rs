//! OpenAI-compatible chat client for the scoring oracle.
//!
//! Every operation is a forced function call: the request declares one
//! function with a JSON-schema parameter object, and the response's
//! function-call arguments are parsed into the typed result. Request tags
//! and the logging toggle ride in the body so logged calls can be filtered
//! into fine-tuning datasets downstream.

use super::{
    Appraisal, AppraiseRequest, ClipSpan, ExtractRequest, GeneratedQuery, OracleOptions,
    QueryRequest, RankWindowRequest, RankingOracle, ScoreRequest, ScoredHit,
};
use crate::config::OracleConfig;
use crate::model::{posts_to_string, SearchHit, TranscriptCue};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct ChatOracle {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl ChatOracle {
    pub fn new(base_url: String, model: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        }
    }

    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("oracle API key env var {} not set", config.api_key_env))?;
        Ok(Self::new(
            config.base_url.clone(),
            config.model.clone(),
            api_key,
        ))
    }

    async fn function_call<T: DeserializeOwned>(
        &self,
        name: &str,
        description: &str,
        parameters: Value,
        prompt: String,
        opts: &OracleOptions,
    ) -> Result<T> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "functions": [{
                "name": name,
                "description": description,
                "parameters": parameters,
            }],
            "function_call": { "name": name },
            "temperature": 0,
            "openpipe": {
                "tags": {
                    "prompt_id": name,
                    "run_id": opts.tags.run_id,
                    "handle": opts.tags.handle,
                    "stage": opts.tags.stage,
                },
                "log_request": opts.log_requests,
            },
        });

        let response: Value = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("oracle request '{}'", name))?
            .error_for_status()
            .with_context(|| format!("oracle request '{}'", name))?
            .json()
            .await
            .with_context(|| format!("oracle response '{}'", name))?;

        let arguments = response["choices"][0]["message"]["function_call"]["arguments"]
            .as_str()
            .with_context(|| format!("oracle response '{}' missing function call arguments", name))?;
        serde_json::from_str(arguments)
            .with_context(|| format!("parse oracle '{}' arguments", name))
    }
}

fn hits_to_string(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, h)| format!("ID: {}\n{}", i, h.title))
        .collect::<Vec<_>>()
        .join("\n---\n")
}

fn cues_to_string(cues: &[TranscriptCue]) -> String {
    cues.iter()
        .enumerate()
        .map(|(i, c)| format!("[{} @ {}s] {}", i, c.start_secs, c.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl RankingOracle for ChatOracle {
    async fn generate_queries(
        &self,
        req: QueryRequest,
        opts: &OracleOptions,
    ) -> Result<Vec<GeneratedQuery>> {
        #[derive(Deserialize)]
        struct Payload {
            queries: Vec<GeneratedQuery>,
        }

        let prompt = format!(
            "Generate up to {} video search queries matching the interests \
             shown in these posts. Reference the motivating posts by their \
             number (1-based) minus one.\n\n{}",
            req.max_queries,
            posts_to_string(&req.handle, &req.posts),
        );
        let parameters = json!({
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "query": { "type": "string" },
                            "post_ids": { "type": "array", "items": { "type": "integer" } },
                        },
                        "required": ["query"],
                    },
                },
            },
            "required": ["queries"],
        });

        let mut payload: Payload = self
            .function_call(
                "create_queries",
                "Create video search queries for a user's interests.",
                parameters,
                prompt,
                opts,
            )
            .await?;
        payload.queries.truncate(req.max_queries);
        Ok(payload.queries)
    }

    async fn score_hits(&self, req: ScoreRequest, opts: &OracleOptions) -> Result<Vec<ScoredHit>> {
        #[derive(Deserialize)]
        struct Score {
            id: usize,
            relevance: f64,
        }
        #[derive(Deserialize)]
        struct Payload {
            scores: Vec<Score>,
        }

        let prompt = format!(
            "Score each search result's relevance to the user's interests \
             from 0 to 1.\n\n{}\n\nQuery: {}\n\nResults:\n{}",
            posts_to_string(&req.handle, &req.posts),
            req.query,
            hits_to_string(&req.hits),
        );
        let parameters = json!({
            "type": "object",
            "properties": {
                "scores": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "integer" },
                            "relevance": { "type": "number" },
                        },
                        "required": ["id", "relevance"],
                    },
                },
            },
            "required": ["scores"],
        });

        let payload: Payload = self
            .function_call(
                "score_results",
                "Score search results for relevance.",
                parameters,
                prompt,
                opts,
            )
            .await?;

        Ok(payload
            .scores
            .into_iter()
            .filter_map(|s| {
                req.hits.get(s.id).map(|hit| ScoredHit {
                    hit: hit.clone(),
                    relevance: s.relevance.clamp(0.0, 1.0),
                })
            })
            .collect())
    }

    async fn appraise_transcript(
        &self,
        req: AppraiseRequest,
        opts: &OracleOptions,
    ) -> Result<Appraisal> {
        let prompt = format!(
            "Judge whether this transcript contains focused, substantive \
             discussion worth clipping. Reject ads, rambling, and content \
             mismatching the title.\n\nTitle: {}\n\n{}",
            req.title,
            cues_to_string(&req.cues),
        );
        let parameters = json!({
            "type": "object",
            "properties": {
                "recommend": { "type": "boolean" },
                "reasoning": { "type": "string" },
            },
            "required": ["recommend", "reasoning"],
        });

        self.function_call(
            "appraise_transcript",
            "Accept or reject a transcript, with a reason.",
            parameters,
            prompt,
            opts,
        )
        .await
    }

    async fn extract_clips(
        &self,
        req: ExtractRequest,
        opts: &OracleOptions,
    ) -> Result<Vec<ClipSpan>> {
        #[derive(Deserialize)]
        struct Payload {
            clips: Vec<ClipSpan>,
        }

        let prompt = format!(
            "Pick self-contained clips from this transcript that match the \
             user's interests. Each clip is a contiguous cue range given by \
             the numeric cue labels, with a short title and one-sentence \
             summary.\n\n{}\n\nVideo: {}\n\n{}",
            posts_to_string(&req.handle, &req.posts),
            req.title,
            cues_to_string(&req.cues),
        );
        let parameters = json!({
            "type": "object",
            "properties": {
                "clips": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "summary": { "type": "string" },
                            "start_cue": { "type": "integer" },
                            "end_cue": { "type": "integer" },
                        },
                        "required": ["title", "summary", "start_cue", "end_cue"],
                    },
                },
            },
            "required": ["clips"],
        });

        let payload: Payload = self
            .function_call(
                "extract_clips",
                "Extract clip-worthy cue ranges from a transcript.",
                parameters,
                prompt,
                opts,
            )
            .await?;
        Ok(payload.clips)
    }

    async fn rank_window(
        &self,
        req: RankWindowRequest,
        opts: &OracleOptions,
    ) -> Result<Vec<usize>> {
        #[derive(Deserialize)]
        struct Payload {
            ordered_ids: Vec<usize>,
        }

        let clips = req
            .entries
            .iter()
            .map(|e| format!("ID: {}\n{}\n{}\n{}", e.label, e.title, e.summary, e.text))
            .collect::<Vec<_>>()
            .join("\n---\n");
        let prompt = format!(
            "Order these clips from most to least relevant to the user's \
             interests. Return every ID exactly once.\n\n{}\n\nClips:\n{}",
            req.interest_summary, clips,
        );
        let parameters = json!({
            "type": "object",
            "properties": {
                "ordered_ids": { "type": "array", "items": { "type": "integer" } },
            },
            "required": ["ordered_ids"],
        });

        let payload: Payload = self
            .function_call(
                "rerank_clips",
                "Order clips by relevance to the user's interests.",
                parameters,
                prompt,
                opts,
            )
            .await?;
        Ok(payload.ordered_ids)
    }
}
