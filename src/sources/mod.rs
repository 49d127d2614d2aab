//! External content collaborators.
//!
//! Platform fetchers are black boxes behind these traits: injectable for
//! production, mockable in tests, and replaceable by the bundled
//! [`FixtureSource`] for offline runs.

mod fixture;

pub use fixture::{FixtureCatalog, FixtureSource, FixtureVideo};

use crate::model::{Post, SearchHit, Transcript};
use anyhow::Result;
use async_trait::async_trait;

/// Short-form post fetch for a handle.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Fetch up to `limit` recent posts, newest first.
    async fn recent_posts(&self, handle: &str, limit: usize) -> Result<Vec<Post>>;
}

/// Ranked title/id video search.
#[async_trait]
pub trait VideoSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// Timed-cue transcript fetch.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Fetch the transcript for a video; `None` when unavailable.
    async fn fetch(&self, video_id: &str, title: &str) -> Result<Option<Transcript>>;
}
