//! Workflow Context
//!
//! The per-run state container threaded through every step: lifecycle
//! state machine, data bag, logs, metrics and execution history.
//!
//! - [`state`]: Lifecycle states and transition rules
//! - [`record`]: Execution records and log entries

pub mod record;
pub mod state;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, log};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{EngineError, Result};

pub use record::{ExecutionRecord, LogEntry, LogLevel};
pub use state::{ContextState, StateTransition};

/// Version assigned to contexts that don't specify one.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Mutable state of one workflow run.
///
/// Every mutation refreshes [`updated_at`](Self::updated_at). The execution
/// history is append-only.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use stepwright::context::{ContextState, WorkflowContext};
///
/// let mut ctx = WorkflowContext::new("code-review");
/// ctx.set("branch", json!("feature/login"));
///
/// ctx.transition(ContextState::Executing, None).unwrap();
/// ctx.transition(ContextState::Completed, None).unwrap();
/// assert!(ctx.transition(ContextState::Executing, None).is_err());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkflowContext {
    workflow_id: String,
    workflow_type: String,
    version: String,
    state: ContextState,
    transitions: Vec<StateTransition>,
    data: Map<String, Value>,
    dependencies: Vec<String>,
    metrics: BTreeMap<String, f64>,
    logs: Vec<LogEntry>,
    history: Vec<ExecutionRecord>,
    result: Option<Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowContext {
    /// Creates a pending context with a fresh UUID.
    pub fn new(workflow_type: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), workflow_type)
    }

    /// Creates a pending context with a caller-chosen id.
    pub fn with_id(workflow_id: impl Into<String>, workflow_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            workflow_type: workflow_type.into(),
            version: DEFAULT_VERSION.to_string(),
            state: ContextState::Pending,
            transitions: Vec::new(),
            data: Map::new(),
            dependencies: Vec::new(),
            metrics: BTreeMap::new(),
            logs: Vec::new(),
            history: Vec::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Seeds the data bag.
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    // ---- lifecycle -------------------------------------------------------

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Moves the run to `to`, recording the transition.
    ///
    /// Returns [`EngineError::State`] for an illegal transition.
    pub fn transition(&mut self, to: ContextState, metadata: Option<Value>) -> Result<()> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(EngineError::State { from, to });
        }

        self.transitions.push(StateTransition {
            from,
            to,
            at: Utc::now(),
            metadata,
        });
        self.state = to;
        self.touch();

        debug!("Workflow '{}': {} -> {}", self.workflow_id, from, to);
        Ok(())
    }

    // ---- data bag --------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Reads a key and deserializes it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.data
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(EngineError::from)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
        self.touch();
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.data.remove(key);
        self.touch();
        removed
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Data bag as a JSON object, the document validation rules run against.
    pub fn data_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    pub fn snapshot_data(&self) -> Map<String, Value> {
        self.data.clone()
    }

    /// Replaces the data bag with an earlier snapshot.
    pub fn restore_data(&mut self, snapshot: Map<String, Value>) {
        self.data = snapshot;
        self.touch();
    }

    // ---- dependencies ----------------------------------------------------

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn add_dependency(&mut self, dependency: impl Into<String>) {
        let dependency = dependency.into();
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
            self.touch();
        }
    }

    // ---- logs ------------------------------------------------------------

    /// Appends a log entry and forwards it to the `log` facade.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.push_log(level, message.into(), None);
    }

    /// Appends a log entry attributed to a step.
    pub fn log_step(&mut self, step: &str, level: LogLevel, message: impl Into<String>) {
        self.push_log(level, message.into(), Some(step.to_string()));
    }

    fn push_log(&mut self, level: LogLevel, message: String, step: Option<String>) {
        log!(level.as_log_level(), "[{}] {}", self.workflow_id, message);
        self.logs.push(LogEntry {
            level,
            message,
            timestamp: Utc::now(),
            step,
        });
        self.touch();
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn logs_by_level(&self, level: LogLevel) -> Vec<&LogEntry> {
        self.logs.iter().filter(|e| e.level == level).collect()
    }

    /// Entries with `from <= timestamp <= to`.
    pub fn logs_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&LogEntry> {
        self.logs
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .collect()
    }

    // ---- metrics ---------------------------------------------------------

    /// Adds `by` to a metric (starting from zero) and returns the new value.
    pub fn increment_metric(&mut self, name: &str, by: f64) -> f64 {
        let value = self.metrics.entry(name.to_string()).or_insert(0.0);
        *value += by;
        let updated = *value;
        self.touch();
        updated
    }

    pub fn set_metric(&mut self, name: &str, value: f64) {
        self.metrics.insert(name.to_string(), value);
        self.touch();
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    // ---- history and outcome ---------------------------------------------

    pub fn record_execution(&mut self, record: ExecutionRecord) {
        self.history.push(record);
        self.touch();
    }

    pub fn history(&self) -> &[ExecutionRecord] {
        &self.history
    }

    pub fn set_result(&mut self, result: Value) {
        self.result = Some(result);
        self.touch();
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.touch();
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// True when nothing has touched the context for longer than `max_age`.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.updated_at);
        age.to_std().map(|age| age > max_age).unwrap_or(false)
    }

    // ---- parallel isolation ----------------------------------------------

    /// Creates an isolated child for one parallel step.
    ///
    /// The fork shares id, state and data but starts with empty history,
    /// logs and metrics so that [`absorb`](Self::absorb) can fold it back.
    pub fn fork(&self) -> Self {
        let mut child = self.clone();
        child.history.clear();
        child.logs.clear();
        child.metrics.clear();
        child
    }

    /// Folds forked children back in input order.
    ///
    /// History and logs are appended, metrics are summed, and data keys a
    /// child changed relative to this context are applied with the last
    /// child winning.
    pub fn absorb(&mut self, children: Vec<WorkflowContext>) {
        let base = self.data.clone();

        for child in children {
            self.history.extend(child.history);
            self.logs.extend(child.logs);
            for (name, value) in child.metrics {
                *self.metrics.entry(name).or_insert(0.0) += value;
            }

            for (key, value) in &child.data {
                if base.get(key) != Some(value) {
                    self.data.insert(key.clone(), value.clone());
                }
            }
            for key in base.keys() {
                if !child.data.contains_key(key) {
                    self.data.remove(key);
                }
            }
        }

        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    #[test]
    fn test_new_context_is_pending() {
        let ctx = WorkflowContext::new("review");
        assert_eq!(ctx.state(), ContextState::Pending);
        assert_eq!(ctx.version(), DEFAULT_VERSION);
        assert!(Uuid::parse_str(ctx.workflow_id()).is_ok());
        assert!(ctx.history().is_empty());
    }

    #[test]
    fn test_unique_ids() {
        let a = WorkflowContext::new("x");
        let b = WorkflowContext::new("x");
        assert_ne!(a.workflow_id(), b.workflow_id());
    }

    #[test]
    fn test_transitions_are_recorded() {
        let mut ctx = WorkflowContext::with_id("wf-1", "review");
        ctx.transition(ContextState::Executing, Some(json!({"currentStep": 1})))
            .unwrap();
        ctx.transition(ContextState::Executing, Some(json!({"currentStep": 2})))
            .unwrap();
        ctx.transition(ContextState::Completed, None).unwrap();

        let transitions = ctx.transitions();
        assert_eq!(transitions.len(), 3);
        assert_eq!(transitions[0].from, ContextState::Pending);
        assert_eq!(transitions[1].metadata, Some(json!({"currentStep": 2})));
        assert_eq!(transitions[2].to, ContextState::Completed);
    }

    #[test]
    fn test_illegal_transition() {
        let mut ctx = WorkflowContext::new("review");
        let err = ctx.transition(ContextState::Completed, None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::State { from: ContextState::Pending, to: ContextState::Completed }
        ));
        assert!(ctx.transitions().is_empty());
    }

    #[test]
    fn test_abort_before_start() {
        let mut ctx = WorkflowContext::new("review");
        ctx.transition(ContextState::Cancelled, None).unwrap();
        assert!(ctx.state().is_terminal());
    }

    #[test]
    fn test_data_bag() {
        let mut ctx = WorkflowContext::new("review");
        ctx.set("retries", json!(3));

        assert!(ctx.has("retries"));
        assert_eq!(ctx.get("retries"), Some(&json!(3)));
        assert_eq!(ctx.get_as::<u32>("retries").unwrap(), Some(3));
        assert!(ctx.get_as::<String>("retries").is_err());
        assert_eq!(ctx.get_as::<u32>("missing").unwrap(), None);

        assert_eq!(ctx.remove("retries"), Some(json!(3)));
        assert!(!ctx.has("retries"));
    }

    #[test]
    fn test_mutation_refreshes_updated_at() {
        let mut ctx = WorkflowContext::new("review");
        let before = ctx.updated_at();
        std::thread::sleep(Duration::from_millis(5));
        ctx.set("k", json!(1));
        assert!(ctx.updated_at() > before);
    }

    #[test]
    fn test_staleness() {
        let mut ctx = WorkflowContext::new("review");
        assert!(!ctx.is_stale(Duration::from_secs(60)));
        ctx.updated_at = Utc::now() - ChronoDuration::seconds(120);
        assert!(ctx.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_logs_filtering() {
        let mut ctx = WorkflowContext::new("review");
        let start = Utc::now();
        ctx.log(LogLevel::Info, "starting");
        ctx.log_step("lint", LogLevel::Warn, "3 warnings");
        ctx.log(LogLevel::Error, "failed");
        let end = Utc::now();

        assert_eq!(ctx.logs().len(), 3);
        assert_eq!(ctx.logs_by_level(LogLevel::Warn).len(), 1);
        assert_eq!(ctx.logs_by_level(LogLevel::Warn)[0].step.as_deref(), Some("lint"));
        assert_eq!(ctx.logs_between(start, end).len(), 3);
        assert!(ctx.logs_between(end + ChronoDuration::seconds(1), end + ChronoDuration::seconds(2)).is_empty());
    }

    #[test]
    fn test_metrics() {
        let mut ctx = WorkflowContext::new("review");
        assert_eq!(ctx.increment_metric("files", 2.0), 2.0);
        assert_eq!(ctx.increment_metric("files", 1.0), 3.0);
        ctx.set_metric("coverage", 0.8);
        assert_eq!(ctx.metric("coverage"), Some(0.8));
        assert_eq!(ctx.metric("missing"), None);
    }

    #[test]
    fn test_history_only_grows() {
        let mut ctx = WorkflowContext::new("review");
        ctx.record_execution(ExecutionRecord::success("a", json!(1), 1));
        ctx.record_execution(ExecutionRecord::success("b", json!(2), 1));
        assert_eq!(ctx.history().len(), 2);
        assert_eq!(ctx.history()[0].step, "a");
    }

    #[test]
    fn test_snapshot_and_restore() {
        let mut ctx = WorkflowContext::new("review");
        ctx.set("branch", json!("main"));
        let snapshot = ctx.snapshot_data();

        ctx.set("branch", json!("feature"));
        ctx.set("pr", json!(42));
        ctx.restore_data(snapshot);

        assert_eq!(ctx.get("branch"), Some(&json!("main")));
        assert!(!ctx.has("pr"));
    }

    #[test]
    fn test_fork_and_absorb() {
        let mut parent = WorkflowContext::with_id("wf", "batch");
        parent.set("shared", json!("base"));
        parent.set("doomed", json!(true));
        parent.record_execution(ExecutionRecord::success("earlier", json!(null), 1));

        let mut a = parent.fork();
        assert!(a.history().is_empty());
        assert_eq!(a.workflow_id(), "wf");
        a.set("shared", json!("from-a"));
        a.set("a_only", json!(1));
        a.increment_metric("calls", 1.0);
        a.record_execution(ExecutionRecord::success("a", json!(null), 1));

        let mut b = parent.fork();
        b.remove("doomed");
        b.increment_metric("calls", 1.0);
        b.record_execution(ExecutionRecord::success("b", json!(null), 1));

        parent.absorb(vec![a, b]);

        assert_eq!(parent.get("shared"), Some(&json!("from-a")));
        assert_eq!(parent.get("a_only"), Some(&json!(1)));
        assert!(!parent.has("doomed"));
        assert_eq!(parent.metric("calls"), Some(2.0));
        let steps: Vec<&str> = parent.history().iter().map(|r| r.step.as_str()).collect();
        assert_eq!(steps, vec!["earlier", "a", "b"]);
    }

    #[test]
    fn test_serialization() {
        let mut ctx = WorkflowContext::with_id("wf-9", "review");
        ctx.set("k", json!("v"));
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["workflow_id"], "wf-9");
        assert_eq!(json["state"], "pending");
        assert_eq!(json["data"]["k"], "v");
    }
}
