//! Execution Records and Run Logs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// Outcome of one step execution, appended to the run history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    /// Name of the step that ran
    pub step: String,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Stable code of the error, see [`EngineError::code`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    /// Wall-clock duration across all attempts
    pub duration_ms: u64,

    pub timestamp: DateTime<Utc>,

    /// Number of attempts made (1 unless retried)
    pub attempts: u32,

    /// True when the final attempt hit its timeout
    pub is_timeout: bool,

    /// True when more than one attempt was made
    pub retried: bool,
}

impl ExecutionRecord {
    pub fn success(step: impl Into<String>, result: Value, duration_ms: u64) -> Self {
        Self {
            step: step.into(),
            success: true,
            result: Some(result),
            error: None,
            error_code: None,
            duration_ms,
            timestamp: Utc::now(),
            attempts: 1,
            is_timeout: false,
            retried: false,
        }
    }

    pub fn failure(step: impl Into<String>, error: &EngineError, duration_ms: u64) -> Self {
        Self {
            step: step.into(),
            success: false,
            result: None,
            error: Some(error.to_string()),
            error_code: Some(error.code().to_string()),
            duration_ms,
            timestamp: Utc::now(),
            attempts: 1,
            is_timeout: error.is_timeout(),
            retried: false,
        }
    }

    /// Sets the attempt count; more than one attempt marks the record retried.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self.retried = attempts > 1;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Severity of a run log entry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Matching level of the `log` facade.
    pub fn as_log_level(&self) -> log::Level {
        match self {
            Self::Debug => log::Level::Debug,
            Self::Info => log::Level::Info,
            Self::Warn => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// A log line kept on the context for audit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_record() {
        let record = ExecutionRecord::success("lint", json!({"warnings": 0}), 12);
        assert!(record.success);
        assert_eq!(record.attempts, 1);
        assert!(!record.retried);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_failure_record_from_timeout() {
        let err = EngineError::Timeout { step: "build".into(), timeout_ms: 100 };
        let record = ExecutionRecord::failure("build", &err, 101).with_attempts(3);

        assert!(!record.success);
        assert!(record.is_timeout);
        assert!(record.retried);
        assert_eq!(record.error_code.as_deref(), Some("TIMEOUT"));
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert_eq!(LogLevel::Warn.as_log_level(), log::Level::Warn);
    }
}
