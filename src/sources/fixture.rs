//! Offline corpus-backed sources.
//!
//! Backs all three source traits from one JSON file so the CLI can run
//! end-to-end without platform credentials. Search is a naive term-overlap
//! match over titles and keywords.

use super::{PostSource, TranscriptSource, VideoSearch};
use crate::model::{Post, SearchHit, Transcript, TranscriptCue};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::path::Path;

use serde::Deserialize;

/// One video in the corpus.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureVideo {
    pub video_id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub cues: Vec<TranscriptCue>,
}

/// The whole corpus: the handle's posts plus searchable videos.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureCatalog {
    #[serde(default)]
    pub posts: Vec<Post>,
    #[serde(default)]
    pub videos: Vec<FixtureVideo>,
}

impl FixtureCatalog {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read fixture catalog {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse fixture catalog {}", path.display()))
    }
}

/// Source collaborators backed by a [`FixtureCatalog`].
pub struct FixtureSource {
    catalog: FixtureCatalog,
    max_hits: usize,
}

impl FixtureSource {
    pub fn new(catalog: FixtureCatalog) -> Self {
        Self {
            catalog,
            max_hits: 10,
        }
    }

    fn terms(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl PostSource for FixtureSource {
    async fn recent_posts(&self, _handle: &str, limit: usize) -> Result<Vec<Post>> {
        Ok(self.catalog.posts.iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl VideoSearch for FixtureSource {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let query_terms = Self::terms(query);
        let mut scored: Vec<(usize, &FixtureVideo)> = self
            .catalog
            .videos
            .iter()
            .map(|v| {
                let haystack = Self::terms(&v.title)
                    .into_iter()
                    .chain(v.keywords.iter().map(|k| k.to_lowercase()))
                    .collect::<Vec<_>>();
                let score = query_terms
                    .iter()
                    .filter(|t| haystack.iter().any(|h| h.contains(*t)))
                    .count();
                (score, v)
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(self.max_hits)
            .map(|(_, v)| SearchHit {
                video_id: v.video_id.clone(),
                title: v.title.clone(),
                url: v.url.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl TranscriptSource for FixtureSource {
    async fn fetch(&self, video_id: &str, _title: &str) -> Result<Option<Transcript>> {
        Ok(self
            .catalog
            .videos
            .iter()
            .find(|v| v.video_id == video_id && !v.cues.is_empty())
            .map(|v| Transcript {
                video_id: v.video_id.clone(),
                cues: v.cues.clone(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::{FixtureCatalog, FixtureSource, FixtureVideo};
    use crate::model::{Post, TranscriptCue};
    use crate::sources::{PostSource, TranscriptSource, VideoSearch};

    fn catalog() -> FixtureCatalog {
        FixtureCatalog {
            posts: vec![
                Post {
                    id: "1".to_string(),
                    text: "spaced repetition changed how I learn".to_string(),
                },
                Post {
                    id: "2".to_string(),
                    text: "incremental reading in practice".to_string(),
                },
            ],
            videos: vec![
                FixtureVideo {
                    video_id: "v1".to_string(),
                    title: "Spaced repetition systems explained".to_string(),
                    url: "https://video.example/v1".to_string(),
                    keywords: vec!["memory".to_string()],
                    cues: vec![TranscriptCue {
                        text: "welcome".to_string(),
                        start_secs: 0,
                        end_secs: 4,
                    }],
                },
                FixtureVideo {
                    video_id: "v2".to_string(),
                    title: "Cooking pasta".to_string(),
                    url: "https://video.example/v2".to_string(),
                    keywords: vec![],
                    cues: vec![],
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_posts_respect_limit() {
        let source = FixtureSource::new(catalog());
        let posts = source.recent_posts("anyone", 1).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "1");
    }

    #[tokio::test]
    async fn test_search_matches_by_term_overlap() {
        let source = FixtureSource::new(catalog());
        let hits = source.search("spaced repetition").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].video_id, "v1");

        let none = source.search("quantum chromodynamics").await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_transcript_absent_for_cueless_video() {
        let source = FixtureSource::new(catalog());
        assert!(source.fetch("v1", "t").await.unwrap().is_some());
        assert!(source.fetch("v2", "t").await.unwrap().is_none());
        assert!(source.fetch("ghost", "t").await.unwrap().is_none());
    }
}
