//! Workflow Pre-flight Validator
//!
//! A stateful collector over the validation vocabulary. Call the violation
//! helpers or the readiness checks, then [`WorkflowValidator::finish`] to get
//! one merged [`ValidationResult`] before running anything that mutates state.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::{json, Value};

use super::result::ValidationResult;
use super::rule::{validate_all, ValidationRule};
use crate::context::{ContextState, WorkflowContext};

/// Default time allowed for a readiness probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Health check for an external collaborator (analysis service, git host,
/// IDE bridge). The engine only cares whether it answers in time.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Name used in validation messages.
    fn name(&self) -> &str;

    /// Returns `Err(reason)` when the service is not ready.
    async fn check(&self) -> Result<(), String>;
}

/// Collects violations for a pre-flight check.
///
/// # Example
///
/// ```
/// use stepwright::validation::WorkflowValidator;
///
/// let mut validator = WorkflowValidator::new();
/// validator.required("task.id").range("retries", 0.0, 5.0, 9.0);
///
/// let result = validator.finish();
/// assert_eq!(result.errors().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct WorkflowValidator {
    result: ValidationResult,
    probe_timeout: Duration,
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowValidator {
    pub fn new() -> Self {
        Self {
            result: ValidationResult::new(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Sets how long a readiness probe may take.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn required(&mut self, field: &str) -> &mut Self {
        self.result
            .add_error_with_code(field, format!("'{}' is required", field), "REQUIRED");
        self
    }

    pub fn type_mismatch(&mut self, field: &str, expected: &str, actual: &Value) -> &mut Self {
        self.result.add_error_with_code(
            field,
            format!("'{}' must be {} (got {})", field, expected, json_type(actual)),
            "TYPE_MISMATCH",
        );
        self
    }

    pub fn length(&mut self, field: &str, min: Option<usize>, max: Option<usize>, actual: usize) -> &mut Self {
        let bounds = match (min, max) {
            (Some(lo), Some(hi)) => format!("between {} and {}", lo, hi),
            (Some(lo), None) => format!("at least {}", lo),
            (None, Some(hi)) => format!("at most {}", hi),
            (None, None) => "within bounds".to_string(),
        };
        self.result.add_error_with_code(
            field,
            format!("'{}' length must be {} (got {})", field, bounds, actual),
            "LENGTH",
        );
        self
    }

    pub fn pattern(&mut self, field: &str, pattern: &str) -> &mut Self {
        self.result.add_error_with_code(
            field,
            format!("'{}' must match pattern {}", field, pattern),
            "PATTERN",
        );
        self
    }

    pub fn range(&mut self, field: &str, min: f64, max: f64, actual: f64) -> &mut Self {
        self.result.add_error_with_code(
            field,
            format!("'{}' must be between {} and {} (got {})", field, min, max, actual),
            "RANGE",
        );
        self
    }

    pub fn invalid_enum(&mut self, field: &str, allowed: &[&str], actual: &str) -> &mut Self {
        self.result.add_error_with_code(
            field,
            format!("'{}' must be one of [{}] (got '{}')", field, allowed.join(", "), actual),
            "ENUM",
        );
        self
    }

    pub fn duplicate(&mut self, field: &str, value: &str) -> &mut Self {
        self.result.add_error_with_code(
            field,
            format!("'{}' value '{}' must be unique", field, value),
            "UNIQUENESS",
        );
        self
    }

    pub fn reference(&mut self, field: &str, target: &str) -> &mut Self {
        self.result.add_error_with_code(
            field,
            format!("'{}' references unknown '{}'", field, target),
            "REFERENCE",
        );
        self
    }

    pub fn dependency(&mut self, step: &str, missing: &str) -> &mut Self {
        self.result.add_error_with_code(
            step,
            format!("'{}' depends on '{}' which is not available", step, missing),
            "DEPENDENCY",
        );
        self
    }

    pub fn permission(&mut self, permission: &str) -> &mut Self {
        self.result.add_error_with_code(
            "permissions",
            format!("Missing permission '{}'", permission),
            "PERMISSION",
        );
        self
    }

    pub fn timeout(&mut self, operation: &str, limit: Duration) -> &mut Self {
        self.result.add_error_with_code(
            operation,
            format!("'{}' did not finish within {} ms", operation, limit.as_millis()),
            "TIMEOUT",
        );
        self
    }

    pub fn warn(&mut self, field: &str, message: impl Into<String>) -> &mut Self {
        self.result.add_warning(field, message);
        self
    }

    /// Applies declarative rules to a document.
    pub fn apply_rules(&mut self, rules: &[ValidationRule], data: &Value) -> &mut Self {
        self.result.merge(validate_all(rules, data));
        self
    }

    /// Folds in an externally produced result.
    pub fn merge(&mut self, other: ValidationResult) -> &mut Self {
        self.result.merge(other);
        self
    }

    /// Checks that a task description is complete enough to act on.
    ///
    /// A task needs an `id` and a string `title`; `type`, when present, must
    /// be a string; a missing `description` only warns.
    pub fn check_task(&mut self, task: &Value) -> &mut Self {
        let Some(obj) = task.as_object() else {
            return self.type_mismatch("task", "an object", task);
        };

        match obj.get("id") {
            None | Some(Value::Null) => {
                self.required("task.id");
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                self.required("task.id");
            }
            _ => {}
        }

        match obj.get("title") {
            None | Some(Value::Null) => {
                self.required("task.title");
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                self.required("task.title");
            }
            Some(Value::String(_)) => {}
            Some(other) => {
                self.type_mismatch("task.title", "a string", other);
            }
        }

        if let Some(kind) = obj.get("type") {
            if !kind.is_string() {
                self.type_mismatch("task.type", "a string", kind);
            }
        }

        if !obj.contains_key("description") {
            self.warn("task.description", "Task has no description");
        }

        self
    }

    /// Checks that a context can start a run.
    ///
    /// The context must still be pending, carry every key in `required_keys`,
    /// and have each declared dependency satisfied either by a data key or
    /// by a successful execution record.
    pub fn check_context(&mut self, ctx: &WorkflowContext, required_keys: &[&str]) -> &mut Self {
        if ctx.workflow_id().trim().is_empty() {
            self.required("workflow_id");
        }

        if ctx.state() != ContextState::Pending {
            self.result.add_error_with_code(
                "state",
                format!("Context must be pending to start (currently {})", ctx.state()),
                "STATE",
            );
        }

        for key in required_keys {
            if !ctx.has(key) {
                self.required(key);
            }
        }

        for dep in ctx.dependencies() {
            let satisfied = ctx.has(dep)
                || ctx.history().iter().any(|r| r.step == *dep && r.success);
            if !satisfied {
                self.dependency(ctx.workflow_id(), dep);
            }
        }

        debug!("Context '{}' checked: {}", ctx.workflow_id(), self.result);
        self
    }

    /// Probes an external service under the configured timeout.
    pub async fn check_service(&mut self, probe: &dyn ReadinessProbe) -> &mut Self {
        let name = probe.name().to_string();

        match tokio::time::timeout(self.probe_timeout, probe.check()).await {
            Ok(Ok(())) => {
                debug!("Service '{}' is ready", name);
            }
            Ok(Err(reason)) => {
                warn!("Service '{}' not ready: {}", name, reason);
                self.result.add_error_with_code(
                    format!("service.{}", name),
                    format!("Service '{}' is not ready: {}", name, reason),
                    "SERVICE_UNAVAILABLE",
                );
            }
            Err(_) => {
                warn!("Service '{}' readiness probe timed out", name);
                let timeout = self.probe_timeout;
                self.timeout(&format!("service.{}", name), timeout);
            }
        }

        self
    }

    /// Checks that `path` is a directory holding a git repository.
    pub fn check_repository(&mut self, path: impl AsRef<Path>) -> &mut Self {
        let path = path.as_ref();

        if !path.is_dir() {
            self.result.add_error_with_code(
                "repository",
                format!("Repository path '{}' does not exist", path.display()),
                "REPOSITORY_NOT_FOUND",
            );
        } else if !path.join(".git").exists() {
            self.result.add_error_with_code(
                "repository",
                format!("'{}' is not a git repository", path.display()),
                "NOT_A_REPOSITORY",
            );
        }

        self
    }

    /// Reports every required permission that is not granted.
    pub fn check_permissions(&mut self, granted: &[&str], required: &[&str]) -> &mut Self {
        for permission in required {
            if !granted.contains(permission) {
                self.permission(permission);
            }
        }
        self
    }

    pub fn is_valid(&self) -> bool {
        self.result.is_valid()
    }

    pub fn result(&self) -> &ValidationResult {
        &self.result
    }

    /// Discards everything collected so far.
    pub fn reset(&mut self) {
        self.result.clear();
    }

    /// Returns the collected result.
    pub fn finish(self) -> ValidationResult {
        info!(
            "Pre-flight validation finished: {} error(s), {} warning(s)",
            self.result.errors().len(),
            self.result.warnings().len()
        );
        self.result
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Summarizes a result as JSON, handy for run metadata.
pub fn summarize(result: &ValidationResult) -> Value {
    json!({
        "valid": result.is_valid(),
        "errors": result.errors().len(),
        "warnings": result.warnings().len(),
    })
}
