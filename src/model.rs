//! Domain types shared across the pipeline.

use serde::{Deserialize, Serialize};

/// A short-form post from the seed handle's feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub text: String,
}

/// A video search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub video_id: String,
    pub title: String,
    pub url: String,
}

/// One timed cue of a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptCue {
    pub text: String,
    /// Cue start, in seconds from the beginning of the video.
    pub start_secs: u64,
    /// Cue end, in seconds.
    pub end_secs: u64,
}

/// A full transcript for one video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub video_id: String,
    pub cues: Vec<TranscriptCue>,
}

/// A candidate clip: a contiguous transcript sub-range with an
/// oracle-written title and summary.
///
/// `video_id` is the grouping key used by the per-video output cap.
/// `cost` is the estimated oracle token cost of presenting this clip in a
/// ranking window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    pub video_id: String,
    pub video_title: String,
    pub title: String,
    pub summary: String,
    pub text: String,
    pub start_secs: u64,
    pub end_secs: u64,
    pub url: String,
    pub cost: usize,
}

impl Clip {
    /// Build a clip from a contiguous cue range of a video transcript.
    ///
    /// Returns `None` for an empty cue range.
    pub fn from_cues(
        hit: &SearchHit,
        title: String,
        summary: String,
        cues: &[TranscriptCue],
    ) -> Option<Clip> {
        let first = cues.first()?;
        let last = cues.last()?;
        let text = cues
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let cost = estimated_tokens(&format!("{}\n{}\n{}", title, summary, text));
        Some(Clip {
            id: format!("{}:{}-{}", hit.video_id, first.start_secs, last.end_secs),
            video_id: hit.video_id.clone(),
            video_title: hit.title.clone(),
            url: format!("{}#t={}s", hit.url, first.start_secs),
            start_secs: first.start_secs,
            end_secs: last.end_secs,
            title,
            summary,
            text,
            cost,
        })
    }
}

/// Final artifact: one recommended clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub summary: String,
    pub url: String,
}

impl From<&Clip> for Recommendation {
    fn from(clip: &Clip) -> Self {
        Self {
            title: clip.title.clone(),
            summary: clip.summary.clone(),
            url: clip.url.clone(),
        }
    }
}

/// Estimated oracle token cost of a text.
///
/// Rough chars/4 heuristic standing in for a real tokenizer; budgets built
/// on it must leave headroom (the reserved output allowance covers this).
pub fn estimated_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4).max(1)
}

/// Render posts for inclusion in an oracle request.
pub fn posts_to_string(handle: &str, posts: &[Post]) -> String {
    let mut out = format!("Recent posts by @{}:\n", handle);
    for (i, post) in posts.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, post.text));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{estimated_tokens, posts_to_string, Clip, Post, SearchHit, TranscriptCue};

    fn hit() -> SearchHit {
        SearchHit {
            video_id: "abc123".to_string(),
            title: "Spaced repetition deep dive".to_string(),
            url: "https://video.example/watch?v=abc123".to_string(),
        }
    }

    #[test]
    fn test_estimated_tokens() {
        assert_eq!(estimated_tokens(""), 1);
        assert_eq!(estimated_tokens("abcd"), 1);
        assert_eq!(estimated_tokens("abcde"), 2);
        assert_eq!(estimated_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_clip_from_cues() {
        let cues = vec![
            TranscriptCue {
                text: "first cue".to_string(),
                start_secs: 30,
                end_secs: 35,
            },
            TranscriptCue {
                text: "second cue".to_string(),
                start_secs: 35,
                end_secs: 41,
            },
        ];
        let clip = Clip::from_cues(&hit(), "Title".to_string(), "Summary".to_string(), &cues)
            .expect("clip");
        assert_eq!(clip.id, "abc123:30-41");
        assert_eq!(clip.video_id, "abc123");
        assert_eq!(clip.text, "first cue second cue");
        assert_eq!(clip.start_secs, 30);
        assert_eq!(clip.end_secs, 41);
        assert!(clip.url.ends_with("#t=30s"));
        assert!(clip.cost >= 1);
    }

    #[test]
    fn test_clip_from_empty_cues() {
        assert!(Clip::from_cues(&hit(), "t".to_string(), "s".to_string(), &[]).is_none());
    }

    #[test]
    fn test_posts_to_string_numbers_posts() {
        let posts = vec![
            Post {
                id: "1".to_string(),
                text: "learning in public".to_string(),
            },
            Post {
                id: "2".to_string(),
                text: "incremental reading".to_string(),
            },
        ];
        let rendered = posts_to_string("experilearning", &posts);
        assert!(rendered.contains("@experilearning"));
        assert!(rendered.contains("1. learning in public"));
        assert!(rendered.contains("2. incremental reading"));
    }
}
