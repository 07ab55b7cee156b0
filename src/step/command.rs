//! Shell Command Executor
//!
//! Runs a shell command as a step:
//! - `{key}` placeholder substitution from settings, params and context data
//! - Optional working directory and extra environment
//! - Captured stdout/stderr in the step result
//! - Child process killed when the attempt is cancelled or times out

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, error};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::executor::StepExecutor;
use super::options::StepOptions;
use crate::context::WorkflowContext;
use crate::error::{EngineError, Result};

/// Shell used when none is configured.
pub const DEFAULT_SHELL: &str = "bash";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}\s]+)\}").expect("valid placeholder regex"));

/// Executes a command template through a shell.
///
/// # Example
///
/// ```rust,no_run
/// use stepwright::step::CommandExecutor;
///
/// let lint = CommandExecutor::new("cargo clippy --manifest-path {manifest}")
///     .working_dir("/work/project");
/// # let _ = lint;
/// ```
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: String,
    shell: String,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl CommandExecutor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into().trim().to_string(),
            shell: DEFAULT_SHELL.to_string(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Resolves placeholders; options take precedence over context data.
    fn render(&self, ctx: &WorkflowContext, options: &StepOptions) -> String {
        substitute(&self.command, &[&options.settings, &options.params, ctx.data()])
    }
}

/// Replaces each `{key}` in one pass with the first scalar found in `sources`.
///
/// Substituted text is never scanned again. Unknown keys stay as written.
fn substitute(template: &str, sources: &[&Map<String, Value>]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            sources
                .iter()
                .find_map(|values| values.get(&caps[1]).and_then(scalar_text))
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[async_trait]
impl StepExecutor for CommandExecutor {
    async fn execute(
        &self,
        ctx: &mut WorkflowContext,
        options: &StepOptions,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let command_text = self.render(ctx, options);
        if command_text.is_empty() {
            return Err(EngineError::Configuration("Command is empty".to_string()));
        }

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&command_text)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
            debug!("Executing in directory: {}", dir.display());
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        debug!("Running command: {}", command_text);
        let child = cmd.spawn()?;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => {
                return Err(EngineError::Cancelled(format!("command '{}' cancelled", command_text)));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            if !stdout.trim().is_empty() {
                debug!("Command output:\n{}", stdout);
            }
            Ok(json!({
                "command": command_text,
                "exit_code": output.status.code(),
                "stdout": stdout,
                "stderr": stderr,
            }))
        } else {
            error!(
                "Command '{}' failed with exit code: {:?}",
                command_text,
                output.status.code()
            );
            if !stderr.trim().is_empty() {
                error!("stderr:\n{}", stderr);
            }

            let detail = if stderr.trim().is_empty() {
                format!("exit code {:?}", output.status.code())
            } else {
                stderr.trim().to_string()
            };
            Err(EngineError::execution(command_text, detail))
        }
    }
}
