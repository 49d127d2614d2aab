//! Failure taxonomy for pipeline stages and run lookups.

use serde::{Deserialize, Serialize};

/// A structured failure produced by a stage or a store lookup.
///
/// `Failure` values are data, not errors in the `?` sense: they are
/// recorded in the run store and halt the pipeline. Unexpected errors from
/// collaborators surface as [`Failure::Internal`], converted at the engine
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Failure {
    /// Malformed top-level input, detected before any work begins.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A stage produced zero usable items and cannot hand off meaningfully.
    #[error("{0}")]
    EmptyResult(String),

    /// Unknown run id or stage name.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unexpected error caught at the engine boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::Failure;

    #[test]
    fn test_failure_display() {
        let failure = Failure::EmptyResult("no transcripts fetched".to_string());
        assert_eq!(failure.to_string(), "no transcripts fetched");

        let failure = Failure::NotFound("run 2024".to_string());
        assert_eq!(failure.to_string(), "not found: run 2024");
    }

    #[test]
    fn test_failure_serde_round_trip() {
        let failure = Failure::Validation("handle must not be empty".to_string());
        let json = serde_json::to_string(&failure).unwrap();
        assert!(json.contains("validation"));
        let back: Failure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, failure);
    }
}
