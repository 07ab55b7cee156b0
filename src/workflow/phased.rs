//! Phased Git Workflow Results
//!
//! A git-centred workflow passes through fixed phases (branch, step
//! execution, pull request, review, merge). [`GitWorkflowResult`] collects
//! each phase's outcome as it happens and derives one overall status.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::composed::WorkflowRunResult;

/// Phases of a git workflow, in execution order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Branch,
    StepExecution,
    PullRequest,
    Review,
    Merge,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Branch,
        Phase::StepExecution,
        Phase::PullRequest,
        Phase::Review,
        Phase::Merge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Branch => "branch",
            Self::StepExecution => "step_execution",
            Self::PullRequest => "pull_request",
            Self::Review => "review",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl PhaseStatus {
    /// Finished phases never change again.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Outcome of one phase.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PhaseResult {
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub details: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for PhaseResult {
    fn default() -> Self {
        Self {
            status: PhaseStatus::Pending,
            started_at: None,
            finished_at: None,
            details: Value::Null,
            error: None,
        }
    }
}

/// Status across all phases.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Nothing has started
    Pending,
    InProgress,
    /// Every phase succeeded or was skipped
    Succeeded,
    /// At least one phase failed
    Failed,
}

/// Incrementally built result of a git workflow.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use stepwright::workflow::{GitWorkflowResult, OverallStatus, Phase};
///
/// let mut result = GitWorkflowResult::new("wf-1");
/// result.complete_phase(Phase::Branch, json!({"branch": "feature/login"}));
/// assert_eq!(result.status(), OverallStatus::InProgress);
///
/// result.fail_phase(Phase::PullRequest, "remote rejected push");
/// assert_eq!(result.status(), OverallStatus::Failed);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GitWorkflowResult {
    pub workflow_id: String,
    phases: BTreeMap<Phase, PhaseResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GitWorkflowResult {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            phases: Phase::ALL
                .iter()
                .map(|phase| (*phase, PhaseResult::default()))
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    fn slot(&mut self, phase: Phase) -> Option<&mut PhaseResult> {
        let slot = self.phases.entry(phase).or_default();
        if slot.status.is_finished() {
            warn!("Phase '{}' already finished - ignoring update", phase);
            return None;
        }
        Some(slot)
    }

    pub fn start_phase(&mut self, phase: Phase) {
        if let Some(slot) = self.slot(phase) {
            slot.status = PhaseStatus::Running;
            slot.started_at = Some(Utc::now());
            self.updated_at = Utc::now();
            info!("Phase '{}' started", phase);
        }
    }

    pub fn complete_phase(&mut self, phase: Phase, details: Value) {
        self.finish_phase(phase, PhaseStatus::Succeeded, details, None);
    }

    pub fn fail_phase(&mut self, phase: Phase, error: impl Into<String>) {
        self.finish_phase(phase, PhaseStatus::Failed, Value::Null, Some(error.into()));
    }

    pub fn skip_phase(&mut self, phase: Phase, reason: impl Into<String>) {
        self.finish_phase(phase, PhaseStatus::Skipped, json!({"reason": reason.into()}), None);
    }

    fn finish_phase(&mut self, phase: Phase, status: PhaseStatus, details: Value, error: Option<String>) {
        if let Some(slot) = self.slot(phase) {
            let now = Utc::now();
            slot.status = status;
            slot.started_at.get_or_insert(now);
            slot.finished_at = Some(now);
            slot.details = details;
            slot.error = error;
            self.updated_at = now;

            match status {
                PhaseStatus::Failed => warn!("Phase '{}' failed", phase),
                _ => info!("Phase '{}' {:?}", phase, status),
            }
        }
    }

    /// Records a workflow run as the step-execution phase.
    pub fn record_steps(&mut self, run: &WorkflowRunResult) {
        let details = json!({
            "steps": run.results.len(),
            "completed": run.results.iter().filter(|r| r.success).count(),
            "durationMs": run.duration.as_millis() as u64,
            "failedStep": run.failed_step(),
        });

        match &run.error {
            None => self.complete_phase(Phase::StepExecution, details),
            Some(e) => {
                self.finish_phase(Phase::StepExecution, PhaseStatus::Failed, details, Some(e.to_string()))
            }
        }
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseResult> {
        self.phases.get(&phase)
    }

    pub fn phases(&self) -> impl Iterator<Item = (&Phase, &PhaseResult)> {
        self.phases.iter()
    }

    /// First failed phase in execution order.
    pub fn failed_phase(&self) -> Option<Phase> {
        self.phases
            .iter()
            .find(|(_, result)| result.status == PhaseStatus::Failed)
            .map(|(phase, _)| *phase)
    }

    pub fn status(&self) -> OverallStatus {
        let statuses: Vec<PhaseStatus> = self.phases.values().map(|r| r.status).collect();

        if statuses.contains(&PhaseStatus::Failed) {
            OverallStatus::Failed
        } else if statuses.iter().all(|s| *s == PhaseStatus::Pending) {
            OverallStatus::Pending
        } else if statuses.iter().all(|s| s.is_finished()) {
            OverallStatus::Succeeded
        } else {
            OverallStatus::InProgress
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status(), OverallStatus::Succeeded | OverallStatus::Failed)
    }

    pub fn summary(&self) -> Value {
        json!({
            "workflowId": self.workflow_id,
            "status": self.status(),
            "failedPhase": self.failed_phase(),
            "phases": self.phases
                .iter()
                .map(|(phase, result)| (phase.as_str().to_string(), json!(result.status)))
                .collect::<serde_json::Map<String, Value>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionRecord;
    use crate::error::EngineError;
    use std::time::Duration;

    fn run_result(error: Option<EngineError>) -> WorkflowRunResult {
        let mut results = vec![ExecutionRecord::success("checkout", Value::Null, 3)];
        if let Some(e) = &error {
            results.push(ExecutionRecord::failure("lint", e, 5));
        }
        WorkflowRunResult {
            success: error.is_none(),
            execution_history: results.clone(),
            results,
            error,
            duration: Duration::from_millis(8),
            metadata: Default::default(),
            rollback: None,
        }
    }

    #[test]
    fn test_new_result_is_pending() {
        let result = GitWorkflowResult::new("wf");
        assert_eq!(result.status(), OverallStatus::Pending);
        assert_eq!(result.phases().count(), 5);
        assert!(!result.is_complete());
    }

    #[test]
    fn test_all_phases_succeed() {
        let mut result = GitWorkflowResult::new("wf");
        result.start_phase(Phase::Branch);
        assert_eq!(result.status(), OverallStatus::InProgress);

        result.complete_phase(Phase::Branch, json!({"branch": "feature/x"}));
        result.record_steps(&run_result(None));
        result.complete_phase(Phase::PullRequest, json!({"number": 42}));
        result.skip_phase(Phase::Review, "auto-approved");
        result.complete_phase(Phase::Merge, Value::Null);

        assert_eq!(result.status(), OverallStatus::Succeeded);
        assert!(result.is_complete());
        assert_eq!(result.phase(Phase::StepExecution).unwrap().details["completed"], json!(1));
    }

    #[test]
    fn test_failed_step_execution_fails_overall() {
        let mut result = GitWorkflowResult::new("wf");
        result.complete_phase(Phase::Branch, Value::Null);
        result.record_steps(&run_result(Some(EngineError::execution("lint", "bad"))));

        assert_eq!(result.status(), OverallStatus::Failed);
        assert_eq!(result.failed_phase(), Some(Phase::StepExecution));
        let phase = result.phase(Phase::StepExecution).unwrap();
        assert_eq!(phase.details["failedStep"], json!("lint"));
        assert!(phase.error.as_deref().unwrap().contains("bad"));
    }

    #[test]
    fn test_finished_phase_is_immutable() {
        let mut result = GitWorkflowResult::new("wf");
        result.fail_phase(Phase::Merge, "conflict");
        result.complete_phase(Phase::Merge, Value::Null);
        assert_eq!(result.phase(Phase::Merge).unwrap().status, PhaseStatus::Failed);
    }

    #[test]
    fn test_summary_serializes() {
        let mut result = GitWorkflowResult::new("wf");
        result.fail_phase(Phase::Review, "changes requested");
        let summary = result.summary();
        assert_eq!(summary["status"], json!("failed"));
        assert_eq!(summary["failedPhase"], json!("review"));
        assert_eq!(summary["phases"]["branch"], json!("pending"));

        let round: GitWorkflowResult =
            serde_json::from_value(serde_json::to_value(&result).unwrap()).unwrap();
        assert_eq!(round, result);
    }
}
