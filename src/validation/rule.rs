//! Validation Rules
//!
//! A [`ValidationRule`] binds a named check to one field of a JSON document
//! (usually the workflow context data). The check is either one of the
//! built-in [`Validator`]s or a custom predicate.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::result::{IssueLevel, ValidationIssue, ValidationResult};
use crate::error::EngineError;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https?|ftp)://[^\s/$.?#][^\s]*$").expect("valid url regex")
});

/// Code recorded when a custom predicate errors or panics.
pub const VALIDATOR_ERROR: &str = "VALIDATOR_ERROR";

/// Custom predicate: receives the field value (if present) and returns
/// whether it is valid. `Err` is reported as a validator failure.
pub type CustomPredicate = Arc<dyn Fn(Option<&Value>) -> Result<bool, String> + Send + Sync>;

/// Catalog keys of the built-in validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidatorKind {
    Required,
    String,
    Number,
    Boolean,
    Array,
    Object,
    Email,
    Url,
    Uuid,
    Date,
    Min,
    Max,
    MinLength,
    MaxLength,
    Pattern,
    Enum,
    Custom,
}

impl ValidatorKind {
    pub const ALL: [ValidatorKind; 17] = [
        Self::Required,
        Self::String,
        Self::Number,
        Self::Boolean,
        Self::Array,
        Self::Object,
        Self::Email,
        Self::Url,
        Self::Uuid,
        Self::Date,
        Self::Min,
        Self::Max,
        Self::MinLength,
        Self::MaxLength,
        Self::Pattern,
        Self::Enum,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Email => "email",
            Self::Url => "url",
            Self::Uuid => "uuid",
            Self::Date => "date",
            Self::Min => "min",
            Self::Max => "max",
            Self::MinLength => "minLength",
            Self::MaxLength => "maxLength",
            Self::Pattern => "pattern",
            Self::Enum => "enum",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidatorKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EngineError::Configuration(format!("Unknown validator '{}'", s)))
    }
}

/// A field check.
#[derive(Clone)]
pub enum Validator {
    Required,
    String,
    Number,
    Boolean,
    Array,
    Object,
    Email,
    Url,
    Uuid,
    Date,
    Min(f64),
    Max(f64),
    MinLength(usize),
    MaxLength(usize),
    Pattern(Regex),
    Enum(Vec<Value>),
    Custom(CustomPredicate),
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Min(n) => write!(f, "Min({})", n),
            Self::Max(n) => write!(f, "Max({})", n),
            Self::MinLength(n) => write!(f, "MinLength({})", n),
            Self::MaxLength(n) => write!(f, "MaxLength({})", n),
            Self::Pattern(re) => write!(f, "Pattern({})", re.as_str()),
            Self::Enum(values) => write!(f, "Enum({:?})", values),
            other => write!(f, "{}", other.kind()),
        }
    }
}

impl Validator {
    /// Wraps a closure as a custom validator.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(Option<&Value>) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Builds a pattern validator, failing on an invalid regex.
    pub fn pattern(pattern: &str) -> Result<Self, EngineError> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| EngineError::Configuration(format!("Invalid pattern '{}': {}", pattern, e)))
    }

    /// Resolves a catalog key plus its parameter into a validator.
    ///
    /// `custom` cannot be described by data and is rejected.
    pub fn from_catalog(key: &str, param: Option<&Value>) -> Result<Self, EngineError> {
        let kind: ValidatorKind = key.parse()?;

        let number = || {
            param.and_then(Value::as_f64).ok_or_else(|| {
                EngineError::Configuration(format!("Validator '{}' needs a numeric parameter", key))
            })
        };
        let length = || {
            param.and_then(Value::as_u64).map(|n| n as usize).ok_or_else(|| {
                EngineError::Configuration(format!("Validator '{}' needs a length parameter", key))
            })
        };

        Ok(match kind {
            ValidatorKind::Required => Self::Required,
            ValidatorKind::String => Self::String,
            ValidatorKind::Number => Self::Number,
            ValidatorKind::Boolean => Self::Boolean,
            ValidatorKind::Array => Self::Array,
            ValidatorKind::Object => Self::Object,
            ValidatorKind::Email => Self::Email,
            ValidatorKind::Url => Self::Url,
            ValidatorKind::Uuid => Self::Uuid,
            ValidatorKind::Date => Self::Date,
            ValidatorKind::Min => Self::Min(number()?),
            ValidatorKind::Max => Self::Max(number()?),
            ValidatorKind::MinLength => Self::MinLength(length()?),
            ValidatorKind::MaxLength => Self::MaxLength(length()?),
            ValidatorKind::Pattern => {
                let pattern = param.and_then(Value::as_str).ok_or_else(|| {
                    EngineError::Configuration("Validator 'pattern' needs a string parameter".to_string())
                })?;
                Self::pattern(pattern)?
            }
            ValidatorKind::Enum => {
                let values = param.and_then(Value::as_array).ok_or_else(|| {
                    EngineError::Configuration("Validator 'enum' needs an array parameter".to_string())
                })?;
                Self::Enum(values.clone())
            }
            ValidatorKind::Custom => {
                return Err(EngineError::Configuration(
                    "Custom validators must be constructed in code".to_string(),
                ))
            }
        })
    }

    pub fn kind(&self) -> ValidatorKind {
        match self {
            Self::Required => ValidatorKind::Required,
            Self::String => ValidatorKind::String,
            Self::Number => ValidatorKind::Number,
            Self::Boolean => ValidatorKind::Boolean,
            Self::Array => ValidatorKind::Array,
            Self::Object => ValidatorKind::Object,
            Self::Email => ValidatorKind::Email,
            Self::Url => ValidatorKind::Url,
            Self::Uuid => ValidatorKind::Uuid,
            Self::Date => ValidatorKind::Date,
            Self::Min(_) => ValidatorKind::Min,
            Self::Max(_) => ValidatorKind::Max,
            Self::MinLength(_) => ValidatorKind::MinLength,
            Self::MaxLength(_) => ValidatorKind::MaxLength,
            Self::Pattern(_) => ValidatorKind::Pattern,
            Self::Enum(_) => ValidatorKind::Enum,
            Self::Custom(_) => ValidatorKind::Custom,
        }
    }

    /// Runs the check.
    ///
    /// `Err((code, message))` describes the violation. Built-in validators
    /// other than `Required` accept an absent or null value.
    fn check(&self, value: Option<&Value>) -> Result<(), (&'static str, String)> {
        if let Self::Custom(predicate) = self {
            return run_custom(predicate, value);
        }

        let value = match value {
            None | Some(Value::Null) => {
                return match self {
                    Self::Required => Err(("REQUIRED", "is required".to_string())),
                    _ => Ok(()),
                };
            }
            Some(v) => v,
        };

        match self {
            Self::Required => match value {
                Value::String(s) if s.trim().is_empty() => {
                    Err(("REQUIRED", "is required".to_string()))
                }
                _ => Ok(()),
            },
            Self::String => expect_type(value.is_string(), "a string"),
            Self::Number => expect_type(value.is_number(), "a number"),
            Self::Boolean => expect_type(value.is_boolean(), "a boolean"),
            Self::Array => expect_type(value.is_array(), "an array"),
            Self::Object => expect_type(value.is_object(), "an object"),
            Self::Email => expect_format(value, "an email address", |s| EMAIL_PATTERN.is_match(s)),
            Self::Url => expect_format(value, "a URL", |s| URL_PATTERN.is_match(s)),
            Self::Uuid => expect_format(value, "a UUID", |s| uuid::Uuid::parse_str(s).is_ok()),
            Self::Date => expect_format(value, "a date", |s| {
                DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }),
            Self::Min(min) => match value.as_f64() {
                Some(n) if n >= *min => Ok(()),
                Some(n) => Err(("RANGE", format!("must be at least {} (got {})", min, n))),
                None => Err(("TYPE_MISMATCH", "must be a number".to_string())),
            },
            Self::Max(max) => match value.as_f64() {
                Some(n) if n <= *max => Ok(()),
                Some(n) => Err(("RANGE", format!("must be at most {} (got {})", max, n))),
                None => Err(("TYPE_MISMATCH", "must be a number".to_string())),
            },
            Self::MinLength(min) => match length_of(value) {
                Some(len) if len >= *min => Ok(()),
                Some(len) => Err(("LENGTH", format!("must have length at least {} (got {})", min, len))),
                None => Err(("TYPE_MISMATCH", "must be a string or array".to_string())),
            },
            Self::MaxLength(max) => match length_of(value) {
                Some(len) if len <= *max => Ok(()),
                Some(len) => Err(("LENGTH", format!("must have length at most {} (got {})", max, len))),
                None => Err(("TYPE_MISMATCH", "must be a string or array".to_string())),
            },
            Self::Pattern(re) => match value.as_str() {
                Some(s) if re.is_match(s) => Ok(()),
                Some(_) => Err(("PATTERN", format!("must match pattern {}", re.as_str()))),
                None => Err(("TYPE_MISMATCH", "must be a string".to_string())),
            },
            Self::Enum(allowed) => {
                if allowed.contains(value) {
                    Ok(())
                } else {
                    Err(("ENUM", format!("must be one of {}", Value::Array(allowed.clone()))))
                }
            }
            Self::Custom(_) => Ok(()),
        }
    }
}

fn run_custom(predicate: &CustomPredicate, value: Option<&Value>) -> Result<(), (&'static str, String)> {
    match panic::catch_unwind(AssertUnwindSafe(|| predicate(value))) {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err(("CUSTOM", "failed custom validation".to_string())),
        Ok(Err(message)) => Err((VALIDATOR_ERROR, format!("validator error: {}", message))),
        Err(_) => Err((VALIDATOR_ERROR, "validator panicked".to_string())),
    }
}

fn expect_type(ok: bool, expected: &str) -> Result<(), (&'static str, String)> {
    if ok {
        Ok(())
    } else {
        Err(("TYPE_MISMATCH", format!("must be {}", expected)))
    }
}

fn expect_format(
    value: &Value,
    expected: &str,
    matches: impl Fn(&str) -> bool,
) -> Result<(), (&'static str, String)> {
    match value.as_str() {
        Some(s) if matches(s) => Ok(()),
        _ => Err(("FORMAT", format!("must be {}", expected))),
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

/// Looks up a dotted path (`"repo.branch"`) inside a JSON document.
/// An empty path refers to the whole document.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(data);
    }
    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// A named, field-scoped validation check.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use stepwright::validation::{ValidationRule, Validator};
///
/// let rule = ValidationRule::new("branch-name", "git.branch", Validator::Required);
/// assert!(rule.validate(&json!({"git": {"branch": "main"}})).is_valid());
/// assert!(!rule.validate(&json!({"git": {}})).is_valid());
/// ```
#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub name: String,
    pub field: String,
    pub validator: Validator,
    pub message: Option<String>,
    pub level: IssueLevel,
    pub enabled: bool,
}

impl ValidationRule {
    pub fn new(name: impl Into<String>, field: impl Into<String>, validator: Validator) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            validator,
            message: None,
            level: IssueLevel::Error,
            enabled: true,
        }
    }

    /// Builds a rule from a catalog key, e.g. `("minLength", Some(&json!(3)))`.
    pub fn from_catalog(
        name: impl Into<String>,
        field: impl Into<String>,
        key: &str,
        param: Option<&Value>,
    ) -> Result<Self, EngineError> {
        Ok(Self::new(name, field, Validator::from_catalog(key, param)?))
    }

    /// Overrides the failure message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Reports violations as warnings instead of errors.
    pub fn as_warning(mut self) -> Self {
        self.level = IssueLevel::Warning;
        self
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Validates the rule's field inside `data`.
    pub fn validate(&self, data: &Value) -> ValidationResult {
        let mut result = ValidationResult::new();

        if !self.enabled {
            debug!("Rule '{}' is disabled - skipping", self.name);
            return result;
        }

        let value = lookup(data, &self.field);
        if let Err((code, detail)) = self.validator.check(value) {
            // Validator malfunctions are always errors, regardless of rule level
            let level = if code == VALIDATOR_ERROR {
                warn!("Rule '{}' on '{}': {}", self.name, self.field, detail);
                IssueLevel::Error
            } else {
                self.level
            };

            let message = self
                .message
                .clone()
                .unwrap_or_else(|| format!("'{}' {}", self.field, detail));

            let mut issue = match level {
                IssueLevel::Error => ValidationIssue::error(&self.field, message, code),
                IssueLevel::Warning => ValidationIssue::warning(&self.field, message, code),
            };
            if let Some(v) = value {
                issue = issue.with_value(v.clone());
            }
            result.add_issue(issue);
        }

        result
    }

    /// Validates against a plain key/value map.
    pub fn validate_map(&self, data: &Map<String, Value>) -> ValidationResult {
        self.validate(&Value::Object(data.clone()))
    }
}

/// Runs every rule against `data` and merges the outcomes.
pub fn validate_all(rules: &[ValidationRule], data: &Value) -> ValidationResult {
    rules
        .iter()
        .fold(ValidationResult::new(), |acc, rule| acc.merged(rule.validate(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(validator: Validator, value: Value) -> ValidationResult {
        ValidationRule::new("rule", "field", validator).validate(&json!({ "field": value }))
    }

    #[test]
    fn test_required() {
        let rule = ValidationRule::new("r", "name", Validator::Required);
        assert!(rule.validate(&json!({"name": "x"})).is_valid());
        assert!(!rule.validate(&json!({})).is_valid());
        assert!(!rule.validate(&json!({"name": null})).is_valid());
        assert!(!rule.validate(&json!({"name": "  "})).is_valid());
        assert!(rule.validate(&json!({})).has_error_code("REQUIRED"));
    }

    #[test]
    fn test_absent_values_pass_non_required() {
        let rule = ValidationRule::new("r", "email", Validator::Email);
        assert!(rule.validate(&json!({})).is_valid());
    }

    #[test]
    fn test_type_checks() {
        assert!(check(Validator::String, json!("s")).is_valid());
        assert!(!check(Validator::String, json!(1)).is_valid());
        assert!(check(Validator::Number, json!(1.5)).is_valid());
        assert!(check(Validator::Boolean, json!(false)).is_valid());
        assert!(check(Validator::Array, json!([1])).is_valid());
        assert!(!check(Validator::Object, json!([1])).is_valid());
        assert!(check(Validator::Number, json!("1")).has_error_code("TYPE_MISMATCH"));
    }

    #[test]
    fn test_formats() {
        assert!(check(Validator::Email, json!("dev@example.com")).is_valid());
        assert!(!check(Validator::Email, json!("dev@")).is_valid());
        assert!(check(Validator::Url, json!("https://example.com/repo")).is_valid());
        assert!(!check(Validator::Url, json!("example.com")).is_valid());
        assert!(check(Validator::Uuid, json!("67e55044-10b1-426f-9247-bb680e5fe0c8")).is_valid());
        assert!(!check(Validator::Uuid, json!("not-a-uuid")).is_valid());
        assert!(check(Validator::Date, json!("2024-03-01")).is_valid());
        assert!(check(Validator::Date, json!("2024-03-01T10:00:00Z")).is_valid());
        assert!(!check(Validator::Date, json!("yesterday")).is_valid());
    }

    #[test]
    fn test_range_and_length() {
        assert!(check(Validator::Min(1.0), json!(1)).is_valid());
        assert!(check(Validator::Min(1.0), json!(0)).has_error_code("RANGE"));
        assert!(check(Validator::Max(10.0), json!(11)).has_error_code("RANGE"));
        assert!(check(Validator::MinLength(3), json!("abc")).is_valid());
        assert!(check(Validator::MinLength(3), json!("ab")).has_error_code("LENGTH"));
        assert!(check(Validator::MaxLength(2), json!([1, 2, 3])).has_error_code("LENGTH"));
    }

    #[test]
    fn test_pattern_and_enum() {
        let pattern = Validator::pattern(r"^feature/[a-z-]+$").unwrap();
        assert!(check(pattern.clone(), json!("feature/login-form")).is_valid());
        assert!(check(pattern, json!("main")).has_error_code("PATTERN"));
        assert!(Validator::pattern("(").is_err());

        let allowed = Validator::Enum(vec![json!("low"), json!("high")]);
        assert!(check(allowed.clone(), json!("low")).is_valid());
        assert!(check(allowed, json!("medium")).has_error_code("ENUM"));
    }

    #[test]
    fn test_custom_predicate() {
        let even = Validator::custom(|v| Ok(v.and_then(Value::as_i64).map_or(false, |n| n % 2 == 0)));
        assert!(check(even.clone(), json!(4)).is_valid());
        assert!(check(even, json!(3)).has_error_code("CUSTOM"));
    }

    #[test]
    fn test_custom_errors_become_entries() {
        let failing = Validator::custom(|_| Err("backend unreachable".to_string()));
        let result = check(failing, json!(1));
        assert!(result.has_error_code(VALIDATOR_ERROR));

        let panicking = Validator::custom(|_| panic!("boom"));
        let result = check(panicking, json!(1));
        assert!(!result.is_valid());
        assert!(result.has_error_code(VALIDATOR_ERROR));
    }

    #[test]
    fn test_disabled_rule_short_circuits() {
        let rule = ValidationRule::new("r", "name", Validator::Required).disabled();
        assert!(rule.validate(&json!({})).is_valid());
    }

    #[test]
    fn test_warning_level_and_message() {
        let rule = ValidationRule::new("r", "title", Validator::MaxLength(5))
            .as_warning()
            .with_message("Title is long");
        let result = rule.validate(&json!({"title": "a very long title"}));

        assert!(result.is_valid());
        assert_eq!(result.warnings()[0].message, "Title is long");
    }

    #[test]
    fn test_dotted_lookup() {
        let data = json!({"repo": {"branches": ["main", "dev"]}});
        assert_eq!(lookup(&data, "repo.branches.1"), Some(&json!("dev")));
        assert!(lookup(&data, "repo.missing").is_none());
        assert_eq!(lookup(&data, ""), Some(&data));
    }

    #[test]
    fn test_catalog_keys() {
        for kind in ValidatorKind::ALL {
            assert_eq!(kind.as_str().parse::<ValidatorKind>().unwrap(), kind);
        }
        assert!("nope".parse::<ValidatorKind>().is_err());

        let rule = ValidationRule::from_catalog("len", "name", "minLength", Some(&json!(2))).unwrap();
        assert!(!rule.validate(&json!({"name": "a"})).is_valid());
        assert!(Validator::from_catalog("min", None).is_err());
        assert!(Validator::from_catalog("custom", None).is_err());
    }

    #[test]
    fn test_validate_all_merges() {
        let rules = vec![
            ValidationRule::new("a", "a", Validator::Required),
            ValidationRule::new("b", "b", Validator::Number),
        ];
        let result = validate_all(&rules, &json!({"b": "x"}));
        assert_eq!(result.errors().len(), 2);
    }
}
