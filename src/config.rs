//! Engine Configuration
//!
//! YAML configuration for the engine's defaults and for command steps:
//!
//! ```yaml
//! parallel:
//!   max_concurrency: 4
//!   timeout_ms: 30000
//!   retry_attempts: 1
//!   retry_delay_ms: 500
//! workflow:
//!   default_version: "1.0.0"
//!   stop_on_error: true
//! logging:
//!   verbose: false
//! steps:
//!   - name: lint
//!     description: Run clippy
//!     type: analysis
//!     command: cargo clippy --all-targets
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::context::{WorkflowContext, DEFAULT_VERSION};
use crate::error::{EngineError, Result};
use crate::execution::{ParallelOptions, RetryPolicy};
use crate::registry::StepRegistry;
use crate::step::{CommandExecutor, StepCategory, StepConfig, StepOptions};

fn default_max_concurrency() -> usize {
    num_cpus::get()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

/// Defaults for parallel batches.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParallelSettings {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-attempt timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: 0,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl From<&ParallelSettings> for ParallelOptions {
    fn from(settings: &ParallelSettings) -> Self {
        ParallelOptions::new()
            .with_max_concurrency(settings.max_concurrency)
            .with_timeout(Duration::from_millis(settings.timeout_ms))
            .with_retry(
                settings.retry_attempts,
                Duration::from_millis(settings.retry_delay_ms),
            )
    }
}

impl From<&ParallelSettings> for RetryPolicy {
    fn from(settings: &ParallelSettings) -> Self {
        RetryPolicy::new(
            settings.retry_attempts,
            Duration::from_millis(settings.retry_delay_ms),
        )
    }
}

/// Defaults for sequential workflows.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    #[serde(default = "default_version")]
    pub default_version: String,

    #[serde(default = "default_true")]
    pub stop_on_error: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            default_version: default_version(),
            stop_on_error: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LoggingSettings {
    #[serde(default)]
    pub verbose: bool,
}

/// A step backed by a shell command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommandStepConfig {
    #[serde(flatten)]
    pub config: StepConfig,

    pub command: String,

    /// Category to index under; defaults to the step type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// Top-level engine configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub parallel: ParallelSettings,

    #[serde(default)]
    pub workflow: WorkflowSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub steps: Vec<CommandStepConfig>,
}

impl EngineConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml).map_err(|e| {
            EngineError::Parse(format!(
                "Failed to parse engine config YAML: {}. Check the file format.",
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallel.max_concurrency == 0 {
            return Err(EngineError::Configuration(
                "parallel.max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.parallel.timeout_ms == 0 {
            return Err(EngineError::Configuration(
                "parallel.timeout_ms must be greater than 0".to_string(),
            ));
        }
        for step in &self.steps {
            step.config.validate()?;
            if step.command.trim().is_empty() {
                return Err(EngineError::Configuration(format!(
                    "Step '{}' has no command specified",
                    step.config.name
                )));
            }
        }
        Ok(())
    }

    pub fn parallel_options(&self) -> ParallelOptions {
        ParallelOptions::from(&self.parallel)
    }

    /// Step options carrying the workflow defaults.
    pub fn step_options(&self) -> StepOptions {
        StepOptions {
            stop_on_error: self.workflow.stop_on_error,
            ..StepOptions::default()
        }
    }

    /// Creates a pending context stamped with the configured version.
    pub fn new_context(&self, workflow_type: impl Into<String>) -> WorkflowContext {
        WorkflowContext::new(workflow_type).with_version(self.workflow.default_version.clone())
    }

    /// Registers every configured command step, returning their names.
    pub fn register_steps(&self, registry: &mut StepRegistry) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let mut executor = CommandExecutor::new(&step.command);
            if let Some(dir) = &step.working_dir {
                executor = executor.working_dir(dir);
            }

            let category = StepCategory::from(
                step.category
                    .clone()
                    .unwrap_or_else(|| step.config.step_type.clone()),
            );
            registry.register(
                step.config.name.clone(),
                step.config.clone(),
                category,
                Arc::new(executor),
            )?;
            names.push(step.config.name.clone());
        }

        debug!("Registered {} command steps from config", names.len());
        Ok(names)
    }
}

/// Loads the engine configuration from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use stepwright::config::load_config;
///
/// fn main() -> stepwright::Result<()> {
///     let config = load_config("stepwright.yaml")?;
///     println!("Max concurrency: {}", config.parallel.max_concurrency);
///     Ok(())
/// }
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let path = path.as_ref();
    info!("Loading engine config from: {}", path.display());

    let yaml = fs::read_to_string(path).map_err(|e| {
        EngineError::Io(format!(
            "Failed to read config file '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;
    debug!("Config YAML loaded ({} bytes)", yaml.len());

    EngineConfig::from_yaml_str(&yaml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.parallel.max_concurrency, num_cpus::get());
        assert_eq!(config.parallel.timeout_ms, 30_000);
        assert_eq!(config.parallel.retry_attempts, 0);
        assert_eq!(config.parallel.retry_delay_ms, 1_000);
        assert_eq!(config.workflow.default_version, "1.0.0");
        assert!(config.workflow.stop_on_error);
        assert!(!config.logging.verbose);
        assert!(config.steps.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
parallel:
  max_concurrency: 2
  timeout_ms: 500
  retry_attempts: 1
  retry_delay_ms: 50
logging:
  verbose: true
steps:
  - name: lint
    description: Run clippy
    type: analysis
    command: cargo clippy
  - name: unit
    description: Unit tests
    type: testing
    category: qa
    command: cargo test
    settings:
      jobs: 2
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.parallel.max_concurrency, 2);
        assert!(config.logging.verbose);
        assert_eq!(config.steps.len(), 2);
        assert_eq!(config.steps[1].config.settings["jobs"], serde_json::json!(2));

        let options = config.parallel_options();
        assert_eq!(options.max_concurrency, 2);
        assert_eq!(options.timeout, Duration::from_millis(500));
        assert_eq!(options.retry.retry_attempts, 1);
        assert_eq!(options.retry.retry_delay, Duration::from_millis(50));

        let mut registry = StepRegistry::new();
        let names = config.register_steps(&mut registry).unwrap();
        assert_eq!(names, vec!["lint", "unit"]);
        assert_eq!(registry.steps_in_category(&StepCategory::Analysis), vec!["lint"]);
        assert_eq!(registry.steps_in_category(&StepCategory::from("qa")), vec!["unit"]);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/nonexistent/stepwright.yaml").unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_values() {
        let err = EngineConfig::from_yaml_str("parallel:\n  max_concurrency: 0\n").unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        let err = EngineConfig::from_yaml_str("parallel:\n  timeout_ms: 0\n").unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        let err = EngineConfig::from_yaml_str(
            "steps:\n  - name: x\n    description: y\n    type: z\n    command: ''\n",
        )
        .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        let err = EngineConfig::from_yaml_str("parallel: [").unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }

    #[test]
    fn test_step_options_carry_stop_on_error() {
        let config = EngineConfig::from_yaml_str("workflow:\n  stop_on_error: false\n").unwrap();
        assert!(!config.step_options().stop_on_error);
        assert_eq!(config.workflow.default_version, "1.0.0");
    }

    #[test]
    fn test_new_context_uses_default_version() {
        let config = EngineConfig::from_yaml_str("workflow:\n  default_version: \"2.1.0\"\n").unwrap();
        let ctx = config.new_context("release");
        assert_eq!(ctx.version(), "2.1.0");
        assert_eq!(ctx.workflow_type(), "release");
    }
}
