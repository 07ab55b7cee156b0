//! Validation Module
//!
//! Shared error/warning vocabulary used for step preconditions, workflow
//! pre-flight checks and readiness probes.
//!
//! - [`rule`]: Field-scoped rules and the built-in validator catalog
//! - [`result`]: Accumulated validation outcome
//! - [`validator`]: Stateful pre-flight collector

pub mod result;
pub mod rule;
pub mod validator;

pub use result::{IssueLevel, ValidationIssue, ValidationResult};
pub use rule::{lookup, validate_all, ValidationRule, Validator, ValidatorKind};
pub use validator::{ReadinessProbe, WorkflowValidator};
