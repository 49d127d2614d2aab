//! Sequential stage execution with short-circuit on failure.
//!
//! Stages run strictly in order: each depends on the full output of its
//! predecessor, so there is no concurrency between stages (fan-out happens
//! inside a stage). The first `Failure` halts the chain; remaining stages
//! do not run and no partial context propagates.

use crate::context::Context;
use crate::failure::Failure;
use crate::pipeline::{Metrics, Stage, StageOutcome};
use crate::store::{RunId, RunStore, StageRecord};
use anyhow::{ensure, Context as _, Result};
use std::sync::Arc;

/// Final result of a pipeline execution.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// All stages ran; the last stage's success context.
    Completed(Context),
    /// A stage failed; later stages did not run.
    Halted { stage: String, failure: Failure },
}

impl PipelineOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn context(&self) -> Option<&Context> {
        match self {
            Self::Completed(context) => Some(context),
            Self::Halted { .. } => None,
        }
    }
}

/// Ordered stage chain.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            stages: Vec::new(),
            metrics,
        }
    }

    /// Append a stage; stages execute in call order.
    pub fn add_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Position of a stage in this pipeline. Unknown names are an explicit
    /// error, never a silent default to the first stage.
    pub fn stage_index(&self, name: &str) -> Result<usize, Failure> {
        self.stages
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| Failure::NotFound(format!("pipeline stage '{}'", name)))
    }

    /// Run all stages from the beginning.
    pub async fn execute(
        &self,
        store: &dyn RunStore,
        run_id: &RunId,
        initial: Context,
    ) -> Result<PipelineOutcome> {
        self.execute_from(store, run_id, 0, initial).await
    }

    /// Run stages from `start` onward, appending each outcome to the run.
    pub async fn execute_from(
        &self,
        store: &dyn RunStore,
        run_id: &RunId,
        start: usize,
        initial: Context,
    ) -> Result<PipelineOutcome> {
        ensure!(
            start <= self.stages.len(),
            "stage index {} out of range for {} stages",
            start,
            self.stages.len()
        );

        let mut ctx = initial;
        for stage in &self.stages[start..] {
            tracing::info!("Stage '{}': {}", stage.name(), stage.description());
            let outcome = self.run_stage(stage.as_ref(), ctx).await;

            store
                .append(
                    run_id,
                    StageRecord {
                        stage: stage.name().to_string(),
                        outcome: outcome.clone(),
                    },
                )
                .with_context(|| {
                    format!("record stage '{}' for run {}", stage.name(), run_id)
                })?;

            match outcome {
                StageOutcome::Success { context } => ctx = context,
                StageOutcome::Failure { failure } => {
                    self.metrics.add_stage_failure();
                    tracing::warn!("Stage '{}' failed: {}", stage.name(), failure);
                    return Ok(PipelineOutcome::Halted {
                        stage: stage.name().to_string(),
                        failure,
                    });
                }
            }
        }

        Ok(PipelineOutcome::Completed(ctx))
    }

    /// Run one stage under the engine safety net: declared-field checks
    /// around the call, and unexpected errors converted into failures
    /// instead of aborting the process.
    async fn run_stage(&self, stage: &dyn Stage, ctx: Context) -> StageOutcome {
        for field in stage.required_fields() {
            if !ctx.contains(field) {
                return StageOutcome::failure(Failure::Validation(format!(
                    "stage '{}' requires context field '{}'",
                    stage.name(),
                    field
                )));
            }
        }

        let input = ctx.clone();
        match stage.run(ctx).await {
            Ok(StageOutcome::Success { context }) => {
                if !context.extends(&input) {
                    return StageOutcome::failure(Failure::Internal(format!(
                        "stage '{}' removed context fields",
                        stage.name()
                    )));
                }
                if let Some(missing) = stage
                    .added_fields()
                    .iter()
                    .find(|f| !context.contains(f))
                {
                    return StageOutcome::failure(Failure::Internal(format!(
                        "stage '{}' did not add declared field '{}'",
                        stage.name(),
                        missing
                    )));
                }
                StageOutcome::Success { context }
            }
            Ok(failure @ StageOutcome::Failure { .. }) => failure,
            Err(err) => {
                tracing::error!("Stage '{}' errored: {:#}", stage.name(), err);
                StageOutcome::failure(Failure::Internal(format!("{:#}", err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Pipeline, PipelineOutcome};
    use crate::context::Context;
    use crate::failure::Failure;
    use crate::pipeline::{Metrics, Stage, StageOutcome};
    use crate::store::{MemoryRunStore, Run, RunId, RunStore};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts invocations; appends its name to the context, or fails.
    struct CountingStage {
        name: &'static str,
        fail_with: Option<Failure>,
        error: bool,
        calls: Arc<AtomicUsize>,
    }

    impl CountingStage {
        fn ok(name: &'static str, calls: Arc<AtomicUsize>) -> Self {
            Self {
                name,
                fail_with: None,
                error: false,
                calls,
            }
        }

        fn failing(name: &'static str, failure: Failure, calls: Arc<AtomicUsize>) -> Self {
            Self {
                name,
                fail_with: Some(failure),
                error: false,
                calls,
            }
        }

        fn erroring(name: &'static str, calls: Arc<AtomicUsize>) -> Self {
            Self {
                name,
                fail_with: None,
                error: true,
                calls,
            }
        }
    }

    #[async_trait]
    impl Stage for CountingStage {
        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> &'static str {
            "test stage"
        }

        async fn run(&self, ctx: Context) -> Result<StageOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.error {
                return Err(anyhow!("collaborator exploded"));
            }
            if let Some(failure) = &self.fail_with {
                return Ok(StageOutcome::failure(failure.clone()));
            }
            Ok(StageOutcome::success(ctx.with(self.name, &true)?))
        }
    }

    fn new_run(store: &MemoryRunStore) -> RunId {
        let id = RunId::new();
        store.create(Run::new(id.clone())).unwrap();
        id
    }

    #[tokio::test]
    async fn test_all_stages_run_in_order() {
        let calls: Vec<Arc<AtomicUsize>> =
            (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let pipeline = Pipeline::new(Metrics::new())
            .add_stage(CountingStage::ok("one", calls[0].clone()))
            .add_stage(CountingStage::ok("two", calls[1].clone()))
            .add_stage(CountingStage::ok("three", calls[2].clone()));

        let store = MemoryRunStore::new();
        let id = new_run(&store);
        let outcome = pipeline.execute(&store, &id, Context::new()).await.unwrap();

        let ctx = outcome.context().expect("completed");
        assert!(ctx.contains("one") && ctx.contains("two") && ctx.contains("three"));
        for c in &calls {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }

        let run = store.get(&id).unwrap().unwrap();
        let names: Vec<&str> = run.stages.iter().map(|r| r.stage.as_str()).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
        assert!(run.stages.iter().all(|r| r.outcome.is_success()));
    }

    #[tokio::test]
    async fn test_failure_short_circuits() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));
        let metrics = Metrics::new();

        let pipeline = Pipeline::new(metrics.clone())
            .add_stage(CountingStage::ok("one", first.clone()))
            .add_stage(CountingStage::failing(
                "two",
                Failure::EmptyResult("no items".to_string()),
                second.clone(),
            ))
            .add_stage(CountingStage::ok("three", third.clone()));

        let store = MemoryRunStore::new();
        let id = new_run(&store);
        let outcome = pipeline.execute(&store, &id, Context::new()).await.unwrap();

        match outcome {
            PipelineOutcome::Halted { stage, failure } => {
                assert_eq!(stage, "two");
                assert_eq!(failure, Failure::EmptyResult("no items".to_string()));
            }
            PipelineOutcome::Completed(_) => panic!("expected halt"),
        }
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.stage_failures.load(Ordering::Relaxed), 1);

        // The failed stage is the last record; nothing after it.
        let run = store.get(&id).unwrap().unwrap();
        assert_eq!(run.stages.len(), 2);
        assert!(!run.stages[1].outcome.is_success());
    }

    #[tokio::test]
    async fn test_unexpected_error_becomes_internal_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline =
            Pipeline::new(Metrics::new()).add_stage(CountingStage::erroring("boom", calls));

        let store = MemoryRunStore::new();
        let id = new_run(&store);
        let outcome = pipeline.execute(&store, &id, Context::new()).await.unwrap();

        match outcome {
            PipelineOutcome::Halted { failure, .. } => {
                assert!(matches!(failure, Failure::Internal(_)));
                assert!(failure.to_string().contains("collaborator exploded"));
            }
            PipelineOutcome::Completed(_) => panic!("expected halt"),
        }
    }

    #[tokio::test]
    async fn test_missing_required_field_is_validation_failure() {
        struct Needy;

        #[async_trait]
        impl Stage for Needy {
            fn name(&self) -> &'static str {
                "needy"
            }
            fn description(&self) -> &'static str {
                "requires a field"
            }
            fn required_fields(&self) -> &'static [&'static str] {
                &["posts"]
            }
            async fn run(&self, ctx: Context) -> Result<StageOutcome> {
                Ok(StageOutcome::success(ctx))
            }
        }

        let pipeline = Pipeline::new(Metrics::new()).add_stage(Needy);
        let store = MemoryRunStore::new();
        let id = new_run(&store);
        let outcome = pipeline.execute(&store, &id, Context::new()).await.unwrap();

        match outcome {
            PipelineOutcome::Halted { failure, .. } => {
                assert!(matches!(failure, Failure::Validation(_)));
            }
            PipelineOutcome::Completed(_) => panic!("expected halt"),
        }
    }

    #[tokio::test]
    async fn test_undeclared_added_field_is_internal_failure() {
        struct Liar;

        #[async_trait]
        impl Stage for Liar {
            fn name(&self) -> &'static str {
                "liar"
            }
            fn description(&self) -> &'static str {
                "declares a field it never adds"
            }
            fn added_fields(&self) -> &'static [&'static str] {
                &["clips"]
            }
            async fn run(&self, ctx: Context) -> Result<StageOutcome> {
                Ok(StageOutcome::success(ctx))
            }
        }

        let pipeline = Pipeline::new(Metrics::new()).add_stage(Liar);
        let store = MemoryRunStore::new();
        let id = new_run(&store);
        let outcome = pipeline.execute(&store, &id, Context::new()).await.unwrap();

        match outcome {
            PipelineOutcome::Halted { failure, .. } => {
                assert!(matches!(failure, Failure::Internal(_)));
                assert!(failure.to_string().contains("clips"));
            }
            PipelineOutcome::Completed(_) => panic!("expected halt"),
        }
    }

    #[tokio::test]
    async fn test_execute_from_skips_earlier_stages() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(Metrics::new())
            .add_stage(CountingStage::ok("one", first.clone()))
            .add_stage(CountingStage::ok("two", second.clone()));

        let store = MemoryRunStore::new();
        let id = new_run(&store);
        let start = pipeline.stage_index("two").unwrap();
        let initial = Context::new().with("one", &true).unwrap();
        let outcome = pipeline
            .execute_from(&store, &id, start, initial)
            .await
            .unwrap();

        assert!(outcome.is_completed());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stage_index_unknown_is_not_found() {
        let pipeline = Pipeline::new(Metrics::new());
        let err = pipeline.stage_index("ghost").unwrap_err();
        assert!(matches!(err, Failure::NotFound(_)));
    }
}
