//! Rollback Strategies
//!
//! A workflow that fails part-way runs at most one rollback. Either a
//! caller-supplied [`RollbackStrategy`] or one of the [`BuiltinRollback`]
//! behaviours:
//!
//! - `NoRollback`: records the failure and leaves everything as is
//! - `ReverseCompensation`: calls `compensate` on each completed step, last first
//! - `RestoreSnapshot`: restores the context data captured before the run
//!
//! None of these can undo side effects outside the context unless the
//! steps' own `compensate` does so.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::composed::WorkflowStep;
use crate::context::{ExecutionRecord, WorkflowContext};
use crate::error::{EngineError, Result};
use crate::step::executor::panic_message;

/// Compensates for a partially executed workflow.
///
/// `results` holds every record of the run, the failed one included at
/// `failed_step_index`.
#[async_trait]
pub trait RollbackStrategy: Send + Sync {
    async fn rollback(
        &self,
        ctx: &mut WorkflowContext,
        failed_step_index: usize,
        results: &[ExecutionRecord],
    ) -> Result<Value>;
}

/// Rollback behaviours provided by the engine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinRollback {
    NoRollback,
    ReverseCompensation,
    RestoreSnapshot,
}

impl BuiltinRollback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoRollback => "no_rollback",
            Self::ReverseCompensation => "reverse_compensation",
            Self::RestoreSnapshot => "restore_snapshot",
        }
    }
}

impl fmt::Display for BuiltinRollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rollback attached to a workflow.
#[derive(Clone)]
pub enum Rollback {
    Builtin(BuiltinRollback),
    Strategy(Arc<dyn RollbackStrategy>),
}

impl fmt::Debug for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(kind) => f.debug_tuple("Builtin").field(kind).finish(),
            Self::Strategy(_) => f.write_str("Strategy(..)"),
        }
    }
}

impl From<BuiltinRollback> for Rollback {
    fn from(kind: BuiltinRollback) -> Self {
        Self::Builtin(kind)
    }
}

/// What a rollback did, carried in the run result.
#[derive(Serialize, Debug, Clone)]
pub struct RollbackOutcome {
    pub failed_step_index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
}

/// Everything a rollback may need from the failed run.
pub(crate) struct RollbackInput<'a> {
    pub steps: &'a [Arc<dyn WorkflowStep>],
    pub failed_step_index: usize,
    pub results: &'a [ExecutionRecord],
    pub snapshot: Map<String, Value>,
}

impl Rollback {
    /// Runs the rollback once. Errors and panics end up in the outcome.
    pub(crate) async fn run(&self, ctx: &mut WorkflowContext, input: RollbackInput<'_>) -> RollbackOutcome {
        let failed_step_index = input.failed_step_index;
        info!("Rolling back after failure at step {}", failed_step_index);

        let outcome = match self {
            Self::Builtin(kind) => run_builtin(*kind, ctx, input).await,
            Self::Strategy(strategy) => {
                AssertUnwindSafe(strategy.rollback(ctx, failed_step_index, input.results))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Err(EngineError::Rollback(format!(
                            "strategy panicked: {}",
                            panic_message(payload)
                        )))
                    })
            }
        };

        match outcome {
            Ok(result) => RollbackOutcome {
                failed_step_index,
                success: true,
                result: Some(result),
                error: None,
            },
            Err(e) => {
                let e = match e {
                    EngineError::Rollback(_) => e,
                    other => EngineError::Rollback(other.to_string()),
                };
                warn!("{}", e);
                RollbackOutcome {
                    failed_step_index,
                    success: false,
                    result: None,
                    error: Some(e),
                }
            }
        }
    }
}

async fn run_builtin(
    kind: BuiltinRollback,
    ctx: &mut WorkflowContext,
    input: RollbackInput<'_>,
) -> Result<Value> {
    match kind {
        BuiltinRollback::NoRollback => Ok(json!({"strategy": kind.as_str()})),
        BuiltinRollback::RestoreSnapshot => {
            let restored = input.snapshot.len();
            ctx.restore_data(input.snapshot);
            Ok(json!({"strategy": kind.as_str(), "restoredKeys": restored}))
        }
        BuiltinRollback::ReverseCompensation => {
            let completed = input.failed_step_index.min(input.steps.len());
            let mut compensated = Vec::new();
            let mut failures = Vec::new();

            for index in (0..completed).rev() {
                let step = &input.steps[index];
                let Some(record) = input.results.get(index) else {
                    continue;
                };

                let outcome = AssertUnwindSafe(step.compensate(ctx, record))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => compensated.push(step.name().to_string()),
                    Ok(Err(e)) => failures.push(format!("{}: {}", step.name(), e)),
                    Err(payload) => {
                        failures.push(format!("{}: panicked: {}", step.name(), panic_message(payload)))
                    }
                }
            }

            if failures.is_empty() {
                Ok(json!({"strategy": kind.as_str(), "compensated": compensated}))
            } else {
                Err(EngineError::Rollback(format!(
                    "compensation failed for {}",
                    failures.join("; ")
                )))
            }
        }
    }
}
