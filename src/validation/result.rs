//! Validation Results
//!
//! Structured outcome of one or more validation checks. Errors and warnings
//! accumulate; validity is always derived from the error list.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineError;

/// Severity of a validation issue.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    Error,
    Warning,
}

/// A single validation finding scoped to a field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// Field (or dotted path) the issue refers to
    pub field: String,

    /// Human readable description
    pub message: String,

    /// Machine readable code, e.g. `REQUIRED` or `TYPE_MISMATCH`
    pub code: String,

    pub level: IssueLevel,

    /// Offending value, when one is available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ValidationIssue {
    pub fn error(field: impl Into<String>, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.into(),
            level: IssueLevel::Error,
            value: None,
        }
    }

    pub fn warning(field: impl Into<String>, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            ..Self::error(field, message, code)
        }
    }

    /// Attaches the offending value.
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// Accumulated outcome of validation.
///
/// Starts valid. `is_valid()` is true exactly when no errors have been
/// recorded; warnings never affect validity.
///
/// # Example
///
/// ```
/// use stepwright::validation::ValidationResult;
///
/// let mut result = ValidationResult::new();
/// assert!(result.is_valid());
///
/// result.add_error("email", "Email is required");
/// assert!(!result.is_valid());
///
/// result.clear();
/// assert!(result.is_valid());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
}

impl ValidationResult {
    /// Creates an empty, valid result.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Records an error with the generic `INVALID` code.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.add_error_with_code(field, message, "INVALID")
    }

    pub fn add_error_with_code(
        &mut self,
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> &mut Self {
        self.errors.push(ValidationIssue::error(field, message, code));
        self
    }

    /// Records a warning with the generic `WARNING` code.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.add_warning_with_code(field, message, "WARNING")
    }

    pub fn add_warning_with_code(
        &mut self,
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> &mut Self {
        self.warnings.push(ValidationIssue::warning(field, message, code));
        self
    }

    /// Records an issue in the list matching its level.
    pub fn add_issue(&mut self, issue: ValidationIssue) -> &mut Self {
        match issue.level {
            IssueLevel::Error => self.errors.push(issue),
            IssueLevel::Warning => self.warnings.push(issue),
        }
        self
    }

    pub fn errors(&self) -> &[ValidationIssue] {
        &self.errors
    }

    pub fn warnings(&self) -> &[ValidationIssue] {
        &self.warnings
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Removes all errors, warnings and metadata.
    pub fn clear(&mut self) {
        self.errors.clear();
        self.warnings.clear();
        self.metadata.clear();
    }

    /// Folds another result into this one.
    ///
    /// Issues are appended in order; metadata keys from `other` win.
    pub fn merge(&mut self, other: ValidationResult) -> &mut Self {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.metadata.extend(other.metadata);
        self
    }

    /// Consuming variant of [`merge`](Self::merge).
    pub fn merged(mut self, other: ValidationResult) -> Self {
        self.merge(other);
        self
    }

    pub fn errors_for(&self, field: &str) -> Vec<&ValidationIssue> {
        self.errors.iter().filter(|i| i.field == field).collect()
    }

    pub fn warnings_for(&self, field: &str) -> Vec<&ValidationIssue> {
        self.warnings.iter().filter(|i| i.field == field).collect()
    }

    pub fn has_error_code(&self, code: &str) -> bool {
        self.errors.iter().any(|i| i.code == code)
    }

    pub fn issues_at(&self, level: IssueLevel) -> &[ValidationIssue] {
        match level {
            IssueLevel::Error => &self.errors,
            IssueLevel::Warning => &self.warnings,
        }
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|i| i.message.clone()).collect()
    }

    /// Converts an invalid result into [`EngineError::Validation`].
    pub fn into_result(self) -> Result<Self, EngineError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(EngineError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return write!(f, "valid ({} warning(s))", self.warnings.len());
        }

        let messages: Vec<String> = self
            .errors
            .iter()
            .map(|i| format!("{}: {}", i.field, i.message))
            .collect();
        write!(f, "{} error(s): {}", self.errors.len(), messages.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_starts_valid() {
        let result = ValidationResult::new();
        assert!(result.is_valid());
        assert!(result.errors().is_empty());
        assert!(result.warnings().is_empty());
    }

    #[test]
    fn test_add_error_then_clear() {
        let mut result = ValidationResult::new();
        result.add_error("name", "Name is required");

        assert!(!result.is_valid());
        assert_eq!(result.errors().len(), 1);

        result.clear();
        assert!(result.is_valid());
        assert_eq!(result.errors().len(), 0);
    }

    #[test]
    fn test_warnings_do_not_invalidate() {
        let mut result = ValidationResult::new();
        result.add_warning("timeout", "Timeout is unusually high");

        assert!(result.is_valid());
        assert_eq!(result.warnings().len(), 1);
    }

    #[test]
    fn test_merge_folds_nested_results() {
        let mut step_a = ValidationResult::new();
        step_a.add_warning("a", "slow");
        step_a.set_metadata("step", json!("a"));

        let mut step_b = ValidationResult::new();
        step_b.add_error_with_code("b.path", "missing path", "REQUIRED");
        step_b.set_metadata("step", json!("b"));

        let mut whole = ValidationResult::new();
        whole.merge(step_a).merge(step_b);

        assert!(!whole.is_valid());
        assert_eq!(whole.errors().len(), 1);
        assert_eq!(whole.warnings().len(), 1);
        assert_eq!(whole.metadata()["step"], json!("b"));
    }

    #[test]
    fn test_field_and_code_queries() {
        let mut result = ValidationResult::new();
        result
            .add_error_with_code("email", "Email is required", "REQUIRED")
            .add_error_with_code("email", "Email is malformed", "FORMAT")
            .add_error("age", "Age is invalid")
            .add_warning("nickname", "Nickname is long");

        assert_eq!(result.errors_for("email").len(), 2);
        assert_eq!(result.errors_for("age").len(), 1);
        assert_eq!(result.warnings_for("nickname").len(), 1);
        assert!(result.has_error_code("FORMAT"));
        assert!(!result.has_error_code("RANGE"));
        assert_eq!(result.issues_at(IssueLevel::Warning).len(), 1);
    }

    #[test]
    fn test_add_issue_routes_by_level() {
        let mut result = ValidationResult::new();
        result.add_issue(ValidationIssue::warning("f", "w", "W"));
        result.add_issue(ValidationIssue::error("f", "e", "E").with_value(json!(3)));

        assert_eq!(result.warnings().len(), 1);
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.errors()[0].value, Some(json!(3)));
    }

    #[test]
    fn test_into_result() {
        assert!(ValidationResult::new().into_result().is_ok());

        let mut result = ValidationResult::new();
        result.add_error("x", "bad");
        let err = result.into_result().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("x: bad"));
    }
}
