//! Workflow Composition Module
//!
//! Sequential workflows over a shared context, with dependency checks,
//! rollback on failure and phased result tracking.
//!
//! # Structure
//!
//! - [`composed`]: The `WorkflowStep` contract and `ComposedWorkflow`
//! - [`ordering`]: Declared-order checks and dependency sorting
//! - [`rollback`]: Pluggable and built-in rollback strategies
//! - [`phased`]: Per-phase results of git workflows

pub mod composed;
pub mod ordering;
pub mod phased;
pub mod rollback;

pub use composed::{ComposedWorkflow, WorkflowRunResult, WorkflowStep};
pub use ordering::{check_declared_order, dependency_order, OrderingError};
pub use phased::{GitWorkflowResult, OverallStatus, Phase, PhaseResult, PhaseStatus};
pub use rollback::{BuiltinRollback, Rollback, RollbackOutcome, RollbackStrategy};
