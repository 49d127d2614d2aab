//! Window rank-reduction of an oversized clip set.
//!
//! Based on the RankGPT-style sliding-window comparison: the oracle can
//! only order a bounded window of clips at a time, so the reducer
//! repeatedly partitions the remaining clips into budget-bounded windows,
//! asks for a full best-to-worst ordering of each, and discards the
//! bottom-ranked clips until the set fits the target count.

use crate::model::Clip;
use crate::oracle::{OracleOptions, RankWindowRequest, RankingOracle, WindowEntry};
use crate::pipeline::Metrics;
use crate::exec;
use crate::rank::chunker::partition_shuffled;
use crate::rank::discard::discard_count;
use anyhow::{bail, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Window-formation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowMode {
    /// Each round re-partitions the whole remaining set into parallel
    /// windows ranked concurrently.
    IndependentChunks,
    /// Keep the surviving top of one window and slide one new clip in at
    /// a time, re-ranking after each insertion.
    SlidingTournament,
}

#[derive(Debug, Clone)]
pub struct ReduceConfig {
    /// Stop once the candidate set is at most this large
    pub target_count: usize,
    /// Maximum surviving clips per source video
    pub per_group_cap: usize,
    /// Fraction of a mixed window to discard each round
    pub discard_ratio: f64,
    /// Total oracle context budget in tokens
    pub context_budget: usize,
    /// Tokens reserved for the oracle's response
    pub output_allowance: usize,
    /// Concurrent window rankings per round
    pub concurrency: usize,
    pub mode: WindowMode,
    /// Window size for the sliding tournament
    pub window_size: usize,
}

/// Shrinks a clip set to the target count via windowed oracle rankings.
pub struct RankReducer {
    oracle: Arc<dyn RankingOracle>,
    metrics: Arc<Metrics>,
    config: ReduceConfig,
}

impl RankReducer {
    pub fn new(oracle: Arc<dyn RankingOracle>, metrics: Arc<Metrics>, config: ReduceConfig) -> Self {
        Self {
            oracle,
            metrics,
            config,
        }
    }

    /// Reduce `clips` to at most `target_count`, preserving oracle-assigned
    /// relative order among survivors and capping clips per source video.
    pub async fn reduce<R: Rng>(
        &self,
        clips: Vec<Clip>,
        interest_summary: &str,
        opts: &OracleOptions,
        rng: &mut R,
    ) -> Result<Vec<Clip>> {
        let survivors = match self.config.mode {
            WindowMode::IndependentChunks => {
                self.reduce_chunked(clips, interest_summary, opts, rng).await?
            }
            WindowMode::SlidingTournament => {
                self.reduce_sliding(clips, interest_summary, opts).await?
            }
        };
        Ok(enforce_group_cap(survivors, self.config.per_group_cap))
    }

    /// Per-window token budget once the invariant request portion and the
    /// reserved output allowance are paid for.
    fn window_budget(&self, interest_summary: &str) -> Result<usize> {
        let overhead =
            self.config.output_allowance + self.oracle.rank_request_overhead(interest_summary);
        match self.config.context_budget.checked_sub(overhead) {
            Some(budget) if budget > 0 => Ok(budget),
            _ => bail!(
                "oracle context budget {} cannot fit request overhead {}",
                self.config.context_budget,
                overhead
            ),
        }
    }

    async fn reduce_chunked<R: Rng>(
        &self,
        clips: Vec<Clip>,
        interest_summary: &str,
        opts: &OracleOptions,
        rng: &mut R,
    ) -> Result<Vec<Clip>> {
        let budget = self.window_budget(interest_summary)?;
        let mut remaining = clips;

        while remaining.len() > self.config.target_count {
            let before = remaining.len();
            let windows = partition_shuffled(remaining, budget, |c| c.cost, rng);

            let ranked = exec::try_bounded_all(
                windows
                    .into_iter()
                    .map(|w| self.rank_and_discard(w, interest_summary, opts)),
                self.config.concurrency,
            )
            .await?;

            remaining = dedupe_by_id(ranked.concat());
            self.metrics.add_rank_round();
            tracing::info!("Rank round complete: {} -> {} clips", before, remaining.len());

            if remaining.len() >= before {
                bail!(
                    "ranking round made no progress at {} clips; \
                     window budget {} is too small to compare clips",
                    before,
                    budget
                );
            }
        }

        Ok(remaining)
    }

    /// Rank one window and drop its bottom-ranked clips. Windows of size
    /// 0 or 1 pass through untouched, never reaching the oracle.
    async fn rank_and_discard(
        &self,
        window: Vec<Clip>,
        interest_summary: &str,
        opts: &OracleOptions,
    ) -> Result<Vec<Clip>> {
        if window.len() < 2 {
            return Ok(window);
        }
        let discard = discard_count(&window, self.config.per_group_cap, self.config.discard_ratio);
        let mut ordered = self.rank_window(window, interest_summary, opts).await?;
        let keep = ordered.len() - discard;
        ordered.truncate(keep);
        self.metrics.add_clips_discarded(discard as u64);
        Ok(ordered)
    }

    /// Submit one window and return its clips in oracle order, best first.
    async fn rank_window(
        &self,
        window: Vec<Clip>,
        interest_summary: &str,
        opts: &OracleOptions,
    ) -> Result<Vec<Clip>> {
        if window.len() < 2 {
            return Ok(window);
        }
        let entries = window
            .iter()
            .enumerate()
            .map(|(label, clip)| WindowEntry {
                label,
                title: clip.title.clone(),
                summary: clip.summary.clone(),
                text: clip.text.clone(),
            })
            .collect();
        let order = self
            .oracle
            .rank_window(
                RankWindowRequest {
                    interest_summary: interest_summary.to_string(),
                    entries,
                },
                opts,
            )
            .await?;
        self.metrics.add_oracle_call();
        self.metrics.add_window_ranked();
        Ok(apply_order(window, &order))
    }

    async fn reduce_sliding(
        &self,
        clips: Vec<Clip>,
        interest_summary: &str,
        opts: &OracleOptions,
    ) -> Result<Vec<Clip>> {
        if clips.len() <= 1 {
            return Ok(clips);
        }
        let keep = self.config.window_size - 1;
        let mut iter = clips.into_iter();

        // Initial rank over the first full window.
        let mut top: Vec<Clip> = iter.by_ref().take(self.config.window_size).collect();
        top = self.rank_window(top, interest_summary, opts).await?;
        top.truncate(keep);

        // Slide: each new clip challenges the current survivors.
        for clip in iter {
            top.push(clip);
            top = self.rank_window(top, interest_summary, opts).await?;
            top.truncate(keep);
        }
        self.metrics.add_rank_round();
        Ok(dedupe_by_id(top))
    }
}

/// Reorder `window` by the oracle's label ordering, best first.
///
/// Unknown or repeated labels are ignored; labels the oracle omitted keep
/// their input order at the tail so no clip silently disappears.
fn apply_order(window: Vec<Clip>, order: &[usize]) -> Vec<Clip> {
    let total = window.len();
    let mut slots: Vec<Option<Clip>> = window.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(total);
    for &label in order {
        if let Some(slot) = slots.get_mut(label) {
            if let Some(clip) = slot.take() {
                ordered.push(clip);
            }
        }
    }
    let leftover: Vec<Clip> = slots.into_iter().flatten().collect();
    if !leftover.is_empty() {
        tracing::debug!(
            "Oracle ordering omitted {} of {} window labels",
            leftover.len(),
            total
        );
        ordered.extend(leftover);
    }
    ordered
}

/// Drop repeated clip ids, keeping the first (highest-ranked) occurrence.
fn dedupe_by_id(clips: Vec<Clip>) -> Vec<Clip> {
    let mut seen = HashSet::new();
    clips
        .into_iter()
        .filter(|c| seen.insert(c.id.clone()))
        .collect()
}

/// Keep at most `cap` clips per source video, preserving order.
fn enforce_group_cap(clips: Vec<Clip>, cap: usize) -> Vec<Clip> {
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    clips
        .into_iter()
        .filter(|c| {
            let count = counts.entry(c.video_id.clone()).or_insert(0);
            *count += 1;
            *count <= cap
        })
        .collect()
}
