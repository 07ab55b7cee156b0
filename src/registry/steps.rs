//! Step Registry
//!
//! Catalog of executable steps with per-step execution statistics.
//!
//! Registration takes `&mut self`; execution only needs `&self`, so a fully
//! populated registry can be shared behind an `Arc` (the parallel engine
//! does exactly that). Executor errors and panics never escape
//! [`StepRegistry::execute`]: they come back as failed [`ExecutionRecord`]s.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::catalog::{EntryStatus, Registry};
use crate::context::{ExecutionRecord, LogLevel, WorkflowContext};
use crate::error::{EngineError, Result};
use crate::step::executor::panic_message;
use crate::step::{
    merge_settings, StepBuilder, StepCategory, StepConfig, StepDefinition, StepExecutor,
    StepInstance, StepOptions,
};
use crate::validation::ValidationRule;
use crate::workflow::{ComposedWorkflow, WorkflowStep};

/// Execution counters of one step.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StepStats {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    pub last_executed: Option<DateTime<Utc>>,
}

impl StepStats {
    pub fn average_duration_ms(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.executions as f64
        }
    }
}

/// Snapshot of the registry's catalog and execution counters.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StepRegistryStats {
    pub total_steps: usize,
    pub active_steps: usize,
    pub inactive_steps: usize,
    pub by_category: BTreeMap<String, usize>,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub average_duration_ms: f64,
}

/// Registry of steps.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stepwright::context::WorkflowContext;
/// use stepwright::registry::StepRegistry;
/// use stepwright::step::{NoopExecutor, StepCategory, StepConfig, StepOptions};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> stepwright::Result<()> {
/// let mut registry = StepRegistry::new();
/// registry.register(
///     "lint",
///     StepConfig::new("lint", "Run the linter", "analysis"),
///     StepCategory::Analysis,
///     Arc::new(NoopExecutor),
/// )?;
///
/// let mut ctx = WorkflowContext::new("review");
/// let record = registry.execute("lint", &mut ctx, &StepOptions::new()).await?;
/// assert!(record.success);
/// assert_eq!(registry.stats().total_executions, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: Registry<Arc<StepDefinition>, StepCategory>,
    builder: StepBuilder,
    stats: DashMap<String, StepStats>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- catalog ---------------------------------------------------------

    /// Registers a step, replacing any step of the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        config: StepConfig,
        category: StepCategory,
        executor: Arc<dyn StepExecutor>,
    ) -> Result<()> {
        let definition = StepDefinition::new(name, config, category, executor)?;
        self.register_definition(definition);
        Ok(())
    }

    /// Registers a step with validation rules checked before it runs in a
    /// workflow.
    pub fn register_with_rules(
        &mut self,
        name: impl Into<String>,
        config: StepConfig,
        category: StepCategory,
        executor: Arc<dyn StepExecutor>,
        rules: Vec<ValidationRule>,
    ) -> Result<()> {
        let definition = StepDefinition::new(name, config, category, executor)?.with_rules(rules);
        self.register_definition(definition);
        Ok(())
    }

    pub fn register_definition(&mut self, definition: StepDefinition) {
        let name = definition.name.clone();
        let category = definition.category.clone();

        if self.steps.insert(name.clone(), category.clone(), Arc::new(definition)).is_some() {
            warn!("Step '{}' already registered - overwriting", name);
            self.builder.invalidate(&name);
        } else {
            info!("Registered step '{}' ({})", name, category);
        }
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.steps.contains(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<StepDefinition>> {
        let removed = self.steps.remove(name);
        if removed.is_some() {
            self.builder.invalidate(name);
            debug!("Removed step '{}'", name);
        }
        removed
    }

    pub fn definition(&self, name: &str) -> Option<Arc<StepDefinition>> {
        self.steps.get(name).cloned()
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.names()
    }

    pub fn steps_in_category(&self, category: &StepCategory) -> Vec<String> {
        self.steps.by_category(category)
    }

    pub fn categories(&self) -> Vec<StepCategory> {
        self.steps.categories()
    }

    pub fn activate(&mut self, name: &str) -> Result<()> {
        self.set_status(name, EntryStatus::Active)
    }

    pub fn deactivate(&mut self, name: &str) -> Result<()> {
        self.set_status(name, EntryStatus::Inactive)
    }

    fn set_status(&mut self, name: &str, status: EntryStatus) -> Result<()> {
        if self.steps.set_status(name, status) {
            debug!("Step '{}' is now {:?}", name, status);
            Ok(())
        } else {
            Err(EngineError::NotFound(name.to_string()))
        }
    }

    pub fn status(&self, name: &str) -> Option<EntryStatus> {
        self.steps.status(name)
    }

    /// Looks up an executable step.
    fn resolve(&self, name: &str) -> Result<Arc<StepDefinition>> {
        let entry = self
            .steps
            .entry(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;

        if !entry.status.is_active() {
            return Err(EngineError::Inactive(name.to_string()));
        }
        Ok(Arc::clone(&entry.item))
    }

    // ---- execution -------------------------------------------------------

    /// Runs a step and appends the outcome to the context history.
    ///
    /// Fails only when the step is unknown or inactive.
    pub async fn execute(
        &self,
        name: &str,
        ctx: &mut WorkflowContext,
        options: &StepOptions,
    ) -> Result<ExecutionRecord> {
        let record = self
            .invoke(name, ctx, options, &CancellationToken::new())
            .await?;
        ctx.record_execution(record.clone());
        Ok(record)
    }

    /// Runs a step without touching the context history.
    pub async fn invoke(
        &self,
        name: &str,
        ctx: &mut WorkflowContext,
        options: &StepOptions,
        cancel: &CancellationToken,
    ) -> Result<ExecutionRecord> {
        let definition = self.resolve(name)?;
        let record = run_definition(&definition, ctx, options, cancel).await;
        self.record_stats(&record);
        Ok(record)
    }

    /// Runs steps one after another over the same context.
    ///
    /// Unknown or inactive steps become failure records. With
    /// `options.stop_on_error` the batch ends after the first failure.
    pub async fn execute_many(
        &self,
        names: &[&str],
        ctx: &mut WorkflowContext,
        options: &StepOptions,
    ) -> Vec<ExecutionRecord> {
        let mut records = Vec::with_capacity(names.len());

        for name in names {
            let record = match self.execute(name, ctx, options).await {
                Ok(record) => record,
                Err(e) => {
                    error!("Cannot execute step '{}': {}", name, e);
                    let record = ExecutionRecord::failure(*name, &e, 0);
                    ctx.record_execution(record.clone());
                    record
                }
            };

            let failed = !record.success;
            records.push(record);
            if failed && options.stop_on_error {
                warn!("Stopping batch after failed step '{}'", name);
                break;
            }
        }

        records
    }

    // ---- instances -------------------------------------------------------

    /// Builds (or reuses) an instance of `name` bound to `options`.
    pub fn build(&self, name: &str, options: &StepOptions) -> Result<Arc<StepInstance>> {
        let definition = self.resolve(name)?;
        Ok(self.builder.build(&definition, options))
    }

    /// Resolves `names` into a workflow run in the given order.
    pub fn build_workflow(&self, names: &[&str], options: &StepOptions) -> Result<ComposedWorkflow> {
        let steps = names
            .iter()
            .map(|name| self.build(name, options).map(|s| s as Arc<dyn WorkflowStep>))
            .collect::<Result<Vec<_>>>()?;
        ComposedWorkflow::new(steps)
    }

    /// Like [`build_workflow`](Self::build_workflow) but orders the steps by
    /// their declared dependencies.
    pub fn build_ordered_workflow(
        &self,
        names: &[&str],
        options: &StepOptions,
    ) -> Result<ComposedWorkflow> {
        let steps = names
            .iter()
            .map(|name| self.build(name, options).map(|s| s as Arc<dyn WorkflowStep>))
            .collect::<Result<Vec<_>>>()?;
        ComposedWorkflow::ordered(steps)
    }

    pub fn cached_instances(&self) -> usize {
        self.builder.cached_count()
    }

    // ---- statistics ------------------------------------------------------

    fn record_stats(&self, record: &ExecutionRecord) {
        let mut stats = self.stats.entry(record.step.clone()).or_default();
        stats.executions += 1;
        if record.success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        stats.total_duration_ms += record.duration_ms;
        stats.last_executed = Some(record.timestamp);
    }

    pub fn step_stats(&self, name: &str) -> Option<StepStats> {
        self.stats.get(name).map(|stats| stats.value().clone())
    }

    pub fn stats(&self) -> StepRegistryStats {
        let catalog = self.steps.stats();

        let mut snapshot = StepRegistryStats {
            total_steps: catalog.total,
            active_steps: catalog.active,
            inactive_steps: catalog.inactive,
            by_category: catalog.by_category,
            ..Default::default()
        };

        let mut total_duration_ms = 0u64;
        for stats in self.stats.iter() {
            snapshot.total_executions += stats.executions;
            snapshot.successful_executions += stats.successes;
            snapshot.failed_executions += stats.failures;
            total_duration_ms += stats.total_duration_ms;
        }
        if snapshot.total_executions > 0 {
            snapshot.average_duration_ms =
                total_duration_ms as f64 / snapshot.total_executions as f64;
        }

        snapshot
    }

    pub fn reset_stats(&self) {
        self.stats.clear();
    }
}

/// Runs one definition, converting errors and panics into a failure record.
async fn run_definition(
    definition: &StepDefinition,
    ctx: &mut WorkflowContext,
    options: &StepOptions,
    cancel: &CancellationToken,
) -> ExecutionRecord {
    let name = definition.name.as_str();

    let mut effective = options.clone();
    effective.settings = merge_settings(&definition.config.settings, &options.settings);

    ctx.log_step(name, LogLevel::Debug, format!("Starting step: {}", name));
    let started = Instant::now();

    let attempt = cancel.child_token();
    let run = AssertUnwindSafe(definition.executor.execute(ctx, &effective, &attempt)).catch_unwind();
    let outcome = match effective.timeout_ms {
        Some(timeout_ms) => match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                attempt.cancel();
                Ok(Err(EngineError::Timeout {
                    step: name.to_string(),
                    timeout_ms,
                }))
            }
        },
        None => run.await,
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    let outcome: Result<Value> = match outcome {
        Ok(result) => result,
        Err(payload) => Err(EngineError::execution(
            name,
            format!("executor panicked: {}", panic_message(payload)),
        )),
    };

    match outcome {
        Ok(value) => {
            ctx.log_step(
                name,
                LogLevel::Info,
                format!("Step '{}' completed in {}ms", name, duration_ms),
            );
            ExecutionRecord::success(name, value, duration_ms)
        }
        Err(e) => {
            ctx.log_step(name, LogLevel::Error, e.to_string());
            ExecutionRecord::failure(name, &e, duration_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{from_async_fn, from_fn, NoopExecutor};
    use serde_json::json;

    fn lint_registry() -> StepRegistry {
        let mut registry = StepRegistry::new();
        registry
            .register(
                "lint",
                StepConfig::new("lint", "Run linter", "analysis"),
                StepCategory::Analysis,
                Arc::new(NoopExecutor),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_has_step_after_register_and_remove() {
        let mut registry = lint_registry();
        assert!(registry.has_step("lint"));

        registry.remove("lint");
        assert!(!registry.has_step("lint"));
        assert!(registry.steps_in_category(&StepCategory::Analysis).is_empty());
    }

    #[test]
    fn test_register_rejects_incomplete_config() {
        let mut registry = StepRegistry::new();
        let err = registry
            .register(
                "lint",
                StepConfig::new("lint", "Run linter", ""),
                StepCategory::Analysis,
                Arc::new(NoopExecutor),
            )
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        assert!(!registry.has_step("lint"));
    }

    #[test]
    fn test_reregister_overwrites_and_reindexes() {
        let mut registry = lint_registry();
        registry
            .register(
                "lint",
                StepConfig::new("lint", "Run tests instead", "testing"),
                StepCategory::Testing,
                Arc::new(NoopExecutor),
            )
            .unwrap();

        assert_eq!(registry.step_names(), vec!["lint"]);
        assert!(registry.steps_in_category(&StepCategory::Analysis).is_empty());
        assert_eq!(registry.steps_in_category(&StepCategory::Testing), vec!["lint"]);
        assert_eq!(registry.definition("lint").unwrap().config.step_type, "testing");
    }

    #[tokio::test]
    async fn test_noop_lint_execution() {
        let registry = lint_registry();
        let mut ctx = WorkflowContext::new("review");

        let record = registry
            .execute("lint", &mut ctx, &StepOptions::new())
            .await
            .unwrap();

        assert!(record.success);
        assert_eq!(record.step, "lint");
        assert!(record.duration_ms < 1_000);
        assert_eq!(ctx.history().len(), 1);

        let stats = registry.stats();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.successful_executions, 1);
        assert_eq!(stats.total_steps, 1);
        assert_eq!(stats.by_category["analysis"], 1);
        assert_eq!(registry.step_stats("lint").unwrap().executions, 1);
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_steps() {
        let mut registry = lint_registry();
        let mut ctx = WorkflowContext::new("review");

        let err = registry
            .execute("deploy", &mut ctx, &StepOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        registry.deactivate("lint").unwrap();
        assert_eq!(registry.status("lint"), Some(EntryStatus::Inactive));
        let err = registry
            .execute("lint", &mut ctx, &StepOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INACTIVE");

        registry.activate("lint").unwrap();
        assert!(registry.execute("lint", &mut ctx, &StepOptions::new()).await.is_ok());
        assert!(registry.activate("deploy").is_err());
    }

    #[tokio::test]
    async fn test_executor_error_and_panic_become_records() {
        let mut registry = StepRegistry::new();
        registry
            .register(
                "broken",
                StepConfig::new("broken", "Always fails", "custom"),
                StepCategory::from("custom"),
                from_fn(|_ctx, _options| Err(EngineError::execution("broken", "bad input"))),
            )
            .unwrap();
        registry
            .register(
                "panicky",
                StepConfig::new("panicky", "Panics", "custom"),
                StepCategory::from("custom"),
                from_fn(|_ctx, _options| panic!("boom")),
            )
            .unwrap();

        let mut ctx = WorkflowContext::new("review");
        let broken = registry
            .execute("broken", &mut ctx, &StepOptions::new())
            .await
            .unwrap();
        let panicky = registry
            .execute("panicky", &mut ctx, &StepOptions::new())
            .await
            .unwrap();

        assert!(!broken.success);
        assert_eq!(broken.error_code.as_deref(), Some("EXECUTION_ERROR"));
        assert!(!panicky.success);
        assert!(panicky.error.as_deref().unwrap().contains("boom"));
        assert_eq!(registry.stats().failed_executions, 2);
        let errors = ctx.logs_by_level(LogLevel::Error);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "Step 'broken' failed: bad input");
    }

    #[test]
    fn test_register_requires_config_name() {
        let mut registry = StepRegistry::new();
        let err = registry
            .register(
                "lint",
                StepConfig::new("", "Run linter", "analysis"),
                StepCategory::Analysis,
                Arc::new(NoopExecutor),
            )
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        assert!(!registry.has_step("lint"));
    }

    #[test]
    fn test_register_rejects_mismatched_config_name() {
        let mut registry = StepRegistry::new();
        for name in ["checkout", "push"] {
            let err = registry
                .register(
                    name,
                    StepConfig::new("git", "Git operation", "git"),
                    StepCategory::Git,
                    Arc::new(NoopExecutor),
                )
                .unwrap_err();
            assert_eq!(err.code(), "CONFIGURATION_ERROR");
        }
        assert!(registry.step_names().is_empty());
    }

    #[tokio::test]
    async fn test_execute_merges_configured_settings() {
        let mut registry = StepRegistry::new();
        registry
            .register(
                "fmt",
                StepConfig::new("fmt", "Format", "analysis").with_setting("check", json!(true)),
                StepCategory::Analysis,
                from_fn(|_ctx, options| Ok(json!(options.settings.clone()))),
            )
            .unwrap();

        let mut ctx = WorkflowContext::new("review");
        let options = StepOptions::new().with_setting("edition", json!("2021"));
        let record = registry.execute("fmt", &mut ctx, &options).await.unwrap();
        assert_eq!(record.result, Some(json!({"check": true, "edition": "2021"})));
    }

    #[tokio::test]
    async fn test_options_timeout() {
        let mut registry = StepRegistry::new();
        registry
            .register(
                "hang",
                StepConfig::new("hang", "Hangs", "custom"),
                StepCategory::from("custom"),
                from_async_fn(|_options, _cancel| std::future::pending::<Result<Value>>()),
            )
            .unwrap();

        let mut ctx = WorkflowContext::new("review");
        let record = registry
            .execute("hang", &mut ctx, &StepOptions::new().with_timeout_ms(50))
            .await
            .unwrap();
        assert!(!record.success);
        assert!(record.is_timeout);
    }

    #[tokio::test]
    async fn test_execute_many_stop_on_error() {
        let mut registry = lint_registry();
        registry
            .register(
                "broken",
                StepConfig::new("broken", "Always fails", "custom"),
                StepCategory::from("custom"),
                from_fn(|_ctx, _options| Err(EngineError::execution("broken", "nope"))),
            )
            .unwrap();

        let mut ctx = WorkflowContext::new("review");
        let all = registry
            .execute_many(&["lint", "missing", "broken", "lint"], &mut ctx, &StepOptions::new())
            .await;
        assert_eq!(all.len(), 4);
        assert_eq!(all[1].error_code.as_deref(), Some("NOT_FOUND"));

        let partial = registry
            .execute_many(&["lint", "broken", "lint"], &mut ctx, &StepOptions::new().stop_on_error())
            .await;
        assert_eq!(partial.len(), 2);
        assert!(!partial[1].success);
        assert_eq!(ctx.history().len(), 6);
    }

    #[tokio::test]
    async fn test_invoke_skips_history() {
        let registry = lint_registry();
        let mut ctx = WorkflowContext::new("review");
        let record = registry
            .invoke("lint", &mut ctx, &StepOptions::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(record.success);
        assert!(ctx.history().is_empty());
        assert_eq!(registry.stats().total_executions, 1);
    }

    #[test]
    fn test_build_uses_cache_and_reset_stats() {
        let registry = lint_registry();
        let a = registry.build("lint", &StepOptions::new()).unwrap();
        let b = registry.build("lint", &StepOptions::new()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.cached_instances(), 1);
        assert!(registry.build("missing", &StepOptions::new()).is_err());

        registry.reset_stats();
        assert_eq!(registry.stats().total_executions, 0);
    }
}
