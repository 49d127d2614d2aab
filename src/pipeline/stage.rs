//! Stage contract: a named unit of work over the evolving context.

use crate::context::Context;
use crate::failure::Failure;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of one stage: the grown context, or a structured failure that
/// halts the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Success { context: Context },
    Failure { failure: Failure },
}

impl StageOutcome {
    pub fn success(context: Context) -> Self {
        Self::Success { context }
    }

    pub fn failure(failure: Failure) -> Self {
        Self::Failure { failure }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The success context, if any.
    pub fn context(&self) -> Option<&Context> {
        match self {
            Self::Success { context } => Some(context),
            Self::Failure { .. } => None,
        }
    }
}

/// A named unit of pipeline work.
///
/// Stage identity is the stable `name`, used for logging, run records, and
/// resume lookup. `run` returns `Err` only for unexpected collaborator
/// errors (the engine converts those into [`Failure::Internal`]);
/// anticipated conditions like bad input or "no items found" are explicit
/// [`StageOutcome::Failure`] values.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Context fields that must exist before this stage runs.
    fn required_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Context fields this stage adds on success.
    fn added_fields(&self) -> &'static [&'static str] {
        &[]
    }

    async fn run(&self, ctx: Context) -> Result<StageOutcome>;
}

#[cfg(test)]
mod tests {
    use super::StageOutcome;
    use crate::context::Context;
    use crate::failure::Failure;

    #[test]
    fn test_outcome_serde_round_trip() {
        let ctx = Context::new().with("handle", &"user".to_string()).unwrap();
        let outcome = StageOutcome::success(ctx);
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"status\":\"success\""));
        let back: StageOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);

        let outcome = StageOutcome::failure(Failure::EmptyResult("nothing".to_string()));
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"status\":\"failure\""));
        let back: StageOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = StageOutcome::success(Context::new());
        assert!(outcome.is_success());
        assert!(outcome.context().is_some());

        let outcome = StageOutcome::failure(Failure::NotFound("run x".to_string()));
        assert!(!outcome.is_success());
        assert!(outcome.context().is_none());
    }
}
