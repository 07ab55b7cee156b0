//! Sequential Workflow Composition
//!
//! A [`ComposedWorkflow`] runs resolved steps one after another over a single
//! context. The first failure stops the run and triggers the attached
//! rollback, if any.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::ordering::{check_declared_order, dependency_order};
use super::rollback::{BuiltinRollback, Rollback, RollbackInput, RollbackOutcome, RollbackStrategy};
use crate::context::{ContextState, ExecutionRecord, LogLevel, WorkflowContext};
use crate::error::{EngineError, Result};
use crate::step::executor::panic_message;
use crate::step::StepConfig;
use crate::validation::{validate_all, ValidationResult, ValidationRule};

/// A step that can take part in a workflow.
#[async_trait]
pub trait WorkflowStep: Send + Sync {
    fn name(&self) -> &str;

    fn config(&self) -> &StepConfig;

    /// Preconditions checked against the context before the run starts.
    fn validate(&self, ctx: &WorkflowContext) -> ValidationResult;

    async fn execute(&self, ctx: &mut WorkflowContext, cancel: &CancellationToken) -> Result<Value>;

    /// Undoes this step's effects during a reverse-compensation rollback.
    async fn compensate(&self, _ctx: &mut WorkflowContext, _record: &ExecutionRecord) -> Result<()> {
        Ok(())
    }
}

/// Outcome of one workflow run.
#[derive(Serialize, Debug, Clone)]
pub struct WorkflowRunResult {
    pub success: bool,

    /// Records of the steps that ran, in order
    pub results: Vec<ExecutionRecord>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,

    /// Wall-clock time from entry to exit
    pub duration: Duration,

    /// The context's full history after the run
    pub execution_history: Vec<ExecutionRecord>,

    pub metadata: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackOutcome>,
}

impl WorkflowRunResult {
    /// Name of the step that failed, if any.
    pub fn failed_step(&self) -> Option<&str> {
        self.results
            .iter()
            .find(|record| !record.success)
            .map(|record| record.step.as_str())
    }
}

/// Steps run in declared order over one context.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stepwright::context::{ContextState, WorkflowContext};
/// use stepwright::registry::StepRegistry;
/// use stepwright::step::{NoopExecutor, StepCategory, StepConfig, StepOptions};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> stepwright::Result<()> {
/// let mut registry = StepRegistry::new();
/// for name in ["checkout", "lint"] {
///     let config = StepConfig::new(name, "example", "git");
///     registry.register(name, config, StepCategory::Git, Arc::new(NoopExecutor))?;
/// }
///
/// let workflow = registry.build_workflow(&["checkout", "lint"], &StepOptions::new())?;
/// let mut ctx = WorkflowContext::new("review");
/// let run = workflow.execute(&mut ctx).await;
///
/// assert!(run.success);
/// assert_eq!(ctx.state(), ContextState::Completed);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ComposedWorkflow {
    steps: Vec<Arc<dyn WorkflowStep>>,
    rules: Vec<ValidationRule>,
    rollback: Option<Rollback>,
}

impl fmt::Debug for ComposedWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedWorkflow")
            .field("steps", &self.step_names())
            .field("rules", &self.rules.len())
            .field("rollback", &self.rollback)
            .finish()
    }
}

impl ComposedWorkflow {
    /// Creates a workflow that runs `steps` exactly as given.
    ///
    /// Fails when names repeat or a step depends on one that is missing or
    /// declared after it.
    pub fn new(steps: Vec<Arc<dyn WorkflowStep>>) -> Result<Self> {
        {
            let configs: Vec<&StepConfig> = steps.iter().map(|s| s.config()).collect();
            check_declared_order(&configs)?;
        }

        Ok(Self {
            steps,
            rules: Vec::new(),
            rollback: None,
        })
    }

    /// Creates a workflow with `steps` sorted by their dependencies.
    pub fn ordered(steps: Vec<Arc<dyn WorkflowStep>>) -> Result<Self> {
        let order = {
            let configs: Vec<&StepConfig> = steps.iter().map(|s| s.config()).collect();
            dependency_order(&configs)?
        };

        let steps = order.into_iter().map(|i| Arc::clone(&steps[i])).collect();
        Ok(Self {
            steps,
            rules: Vec::new(),
            rollback: None,
        })
    }

    /// Adds a rule checked against the context data before running.
    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = ValidationRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn with_rollback(mut self, strategy: Arc<dyn RollbackStrategy>) -> Self {
        self.rollback = Some(Rollback::Strategy(strategy));
        self
    }

    pub fn with_builtin_rollback(mut self, kind: BuiltinRollback) -> Self {
        self.rollback = Some(Rollback::Builtin(kind));
        self
    }

    pub fn steps(&self) -> &[Arc<dyn WorkflowStep>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Merges every step's validation with the workflow rules.
    pub fn validate(&self, ctx: &WorkflowContext) -> ValidationResult {
        let mut result = ValidationResult::new();
        for step in &self.steps {
            result.merge(step.validate(ctx));
        }
        if !self.rules.is_empty() {
            result.merge(validate_all(&self.rules, &ctx.data_value()));
        }
        result
    }

    pub async fn execute(&self, ctx: &mut WorkflowContext) -> WorkflowRunResult {
        self.execute_with_cancel(ctx, &CancellationToken::new()).await
    }

    /// Runs the workflow, checking `cancel` before each step.
    pub async fn execute_with_cancel(
        &self,
        ctx: &mut WorkflowContext,
        cancel: &CancellationToken,
    ) -> WorkflowRunResult {
        let started = Instant::now();
        let total_steps = self.steps.len();
        let mut run = Run::new(total_steps);

        if ctx.state().is_terminal() {
            let e = EngineError::State {
                from: ctx.state(),
                to: ContextState::Executing,
            };
            error!("Workflow '{}' cannot start: {}", ctx.workflow_id(), e);
            return run.finish(ctx, started, Some(e), None);
        }

        let validation = self.validate(ctx);
        if !validation.is_valid() {
            warn!("Workflow '{}' failed validation: {}", ctx.workflow_id(), validation);
            let e = EngineError::Validation(validation);
            fail_context(ctx, ContextState::Failed, &e);
            return run.finish(ctx, started, Some(e), None);
        }

        info!("Starting workflow '{}' with {} steps", ctx.workflow_id(), total_steps);
        let snapshot = ctx.snapshot_data();

        if self.steps.is_empty() {
            let outcome = ctx
                .transition(ContextState::Executing, Some(json!({"currentStep": 0, "totalSteps": 0})))
                .and_then(|_| ctx.transition(ContextState::Completed, None));
            return run.finish(ctx, started, outcome.err(), None);
        }

        for (index, step) in self.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                let e = EngineError::Cancelled(format!(
                    "workflow cancelled before step '{}'",
                    step.name()
                ));
                let record = ExecutionRecord::failure(step.name(), &e, 0);
                ctx.record_execution(record.clone());
                run.results.push(record);
                fail_context(ctx, ContextState::Cancelled, &e);

                let rollback = self.run_rollback(ctx, index, &run.results, snapshot).await;
                return run.finish(ctx, started, Some(e), rollback);
            }

            let progress = json!({
                "currentStep": index + 1,
                "totalSteps": total_steps,
                "step": step.name(),
            });
            if let Err(e) = ctx.transition(ContextState::Executing, Some(progress)) {
                error!("Workflow '{}': {}", ctx.workflow_id(), e);
                return run.finish(ctx, started, Some(e), None);
            }

            let (record, failure) = run_step(step.as_ref(), ctx, cancel).await;
            ctx.record_execution(record.clone());
            run.results.push(record);

            if let Some(e) = failure {
                fail_context(ctx, ContextState::Failed, &e);

                let rollback = self.run_rollback(ctx, index, &run.results, snapshot).await;
                return run.finish(ctx, started, Some(e), rollback);
            }
        }

        let outputs: Map<String, Value> = run
            .results
            .iter()
            .map(|record| (record.step.clone(), record.result.clone().unwrap_or(Value::Null)))
            .collect();
        ctx.set_result(Value::Object(outputs));

        let outcome = ctx.transition(ContextState::Completed, None);
        info!(
            "Workflow '{}' completed in {:.2}s",
            ctx.workflow_id(),
            started.elapsed().as_secs_f64()
        );
        run.finish(ctx, started, outcome.err(), None)
    }

    async fn run_rollback(
        &self,
        ctx: &mut WorkflowContext,
        failed_step_index: usize,
        results: &[ExecutionRecord],
        snapshot: Map<String, Value>,
    ) -> Option<RollbackOutcome> {
        let rollback = self.rollback.as_ref()?;
        let outcome = rollback
            .run(
                ctx,
                RollbackInput {
                    steps: &self.steps,
                    failed_step_index,
                    results,
                    snapshot,
                },
            )
            .await;

        let level = if outcome.success { LogLevel::Info } else { LogLevel::Error };
        ctx.log(
            level,
            format!(
                "Rollback after step {} {}",
                failed_step_index,
                if outcome.success { "completed" } else { "failed" }
            ),
        );
        Some(outcome)
    }
}

/// Bookkeeping shared by every exit path of a run.
struct Run {
    total_steps: usize,
    results: Vec<ExecutionRecord>,
}

impl Run {
    fn new(total_steps: usize) -> Self {
        Self {
            total_steps,
            results: Vec::with_capacity(total_steps),
        }
    }

    fn finish(
        self,
        ctx: &WorkflowContext,
        started: Instant,
        error: Option<EngineError>,
        rollback: Option<RollbackOutcome>,
    ) -> WorkflowRunResult {
        let completed = self.results.iter().filter(|r| r.success).count();

        let mut metadata = Map::new();
        metadata.insert("workflowId".into(), json!(ctx.workflow_id()));
        metadata.insert("workflowType".into(), json!(ctx.workflow_type()));
        metadata.insert("totalSteps".into(), json!(self.total_steps));
        metadata.insert("completedSteps".into(), json!(completed));
        metadata.insert("state".into(), json!(ctx.state()));
        if let Some(failed) = self.results.iter().find(|r| !r.success) {
            metadata.insert("failedStep".into(), json!(failed.step));
        }

        WorkflowRunResult {
            success: error.is_none(),
            results: self.results,
            error,
            duration: started.elapsed(),
            execution_history: ctx.history().to_vec(),
            metadata,
            rollback,
        }
    }
}

/// Runs one step, turning errors and panics into a failure record.
async fn run_step(
    step: &dyn WorkflowStep,
    ctx: &mut WorkflowContext,
    cancel: &CancellationToken,
) -> (ExecutionRecord, Option<EngineError>) {
    let name = step.name().to_string();
    debug!("Running step '{}'", name);
    let started = Instant::now();

    let outcome = AssertUnwindSafe(step.execute(ctx, cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(EngineError::execution(
                &name,
                format!("step panicked: {}", panic_message(payload)),
            ))
        });
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(value) => {
            ctx.log_step(&name, LogLevel::Info, format!("Step '{}' completed in {}ms", name, duration_ms));
            (ExecutionRecord::success(name, value, duration_ms), None)
        }
        Err(e) => {
            ctx.log_step(&name, LogLevel::Error, e.to_string());
            (ExecutionRecord::failure(name, &e, duration_ms), Some(e))
        }
    }
}

fn fail_context(ctx: &mut WorkflowContext, to: ContextState, error: &EngineError) {
    ctx.set_error(error.to_string());
    if let Err(e) = ctx.transition(to, None) {
        warn!("Workflow '{}': {}", ctx.workflow_id(), e);
    }
}
