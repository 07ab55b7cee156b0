//! Stepwright - Step Orchestration Engine
//!
//! Registers named steps, composes them into sequential workflows with
//! rollback, and runs independent batches in parallel with timeouts and
//! retries. All runs share one mutable [`WorkflowContext`].
//!
//! # Architecture
//!
//! - [`step`]: Step configuration, executors and the instance builder
//! - [`registry`]: Generic catalog and the step registry with statistics
//! - [`context`]: Workflow context, state machine and execution records
//! - [`workflow`]: Sequential composition, ordering, rollback and phases
//! - [`execution`]: Parallel batch engine
//! - [`validation`]: Field rules, validation results and pre-flight checks
//! - [`config`]: YAML engine configuration
//! - [`logging`]: Logger setup
//! - [`error`]: Engine error model
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use stepwright::{from_fn, StepCategory, StepConfig, StepOptions, StepRegistry, WorkflowContext};
//!
//! #[tokio::main]
//! async fn main() -> stepwright::Result<()> {
//!     stepwright::init_logging(false);
//!
//!     let mut registry = StepRegistry::new();
//!     registry.register(
//!         "lint",
//!         StepConfig::new("lint", "Run the linter", "analysis"),
//!         StepCategory::Analysis,
//!         from_fn(|_ctx, _options| Ok(json!({"warnings": 0}))),
//!     )?;
//!
//!     let workflow = registry.build_workflow(&["lint"], &StepOptions::default())?;
//!     let mut ctx = WorkflowContext::new("ci");
//!     let run = workflow.execute(&mut ctx).await;
//!     println!("Workflow succeeded: {}", run.success);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod logging;
pub mod registry;
pub mod step;
pub mod validation;
pub mod workflow;

// Re-export commonly used types
pub use config::{load_config, EngineConfig};
pub use context::{ContextState, ExecutionRecord, WorkflowContext};
pub use error::{EngineError, Result};
pub use execution::{ParallelExecutionEngine, ParallelOptions};
pub use logging::init_logging;
pub use registry::{StepRegistry, StepRegistryStats};
pub use step::{
    from_async_fn, from_fn, CommandExecutor, StepCategory, StepConfig, StepExecutor, StepOptions,
};
pub use validation::{ValidationResult, ValidationRule, WorkflowValidator};
pub use workflow::{
    BuiltinRollback, ComposedWorkflow, GitWorkflowResult, RollbackStrategy, WorkflowRunResult,
    WorkflowStep,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Stepwright";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "Stepwright");
    }

    #[test]
    fn test_module_exports_context() {
        let ctx = WorkflowContext::new("ci");
        assert_eq!(ctx.state(), ContextState::Pending);
        assert_eq!(ctx.workflow_type(), "ci");
    }

    #[test]
    fn test_module_exports_registry() {
        let registry = StepRegistry::new();
        assert!(!registry.has_step("lint"));
        assert_eq!(registry.stats().total_steps, 0);
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
