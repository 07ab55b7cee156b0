//! Step Configuration
//!
//! Declarative description of a step, loadable from YAML or JSON.
//!
//! ```yaml
//! name: lint
//! description: Run the project linter
//! type: analysis
//! order: 10
//! dependencies:
//!   - checkout
//! settings:
//!   fix: false
//! ```

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};

/// Version assigned to steps that don't declare one.
pub const DEFAULT_STEP_VERSION: &str = "1.0.0";

fn default_version() -> String {
    DEFAULT_STEP_VERSION.to_string()
}

fn default_required() -> bool {
    true
}

/// Configuration of a registered step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepConfig {
    /// Unique step name (required)
    #[serde(default)]
    pub name: String,

    /// Human readable purpose (required)
    #[serde(default)]
    pub description: String,

    /// Step type, e.g. "analysis" or "git" (required)
    #[serde(rename = "type", default)]
    pub step_type: String,

    #[serde(default = "default_version")]
    pub version: String,

    /// Sort key used when ordering steps by dependencies
    #[serde(default)]
    pub order: i64,

    /// Whether a workflow may treat this step as optional
    #[serde(default = "default_required")]
    pub required: bool,

    /// Names of steps that must run before this one
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Default settings, merged with per-run options
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl StepConfig {
    /// Creates a config with the three required fields and defaults elsewhere.
    ///
    /// # Example
    ///
    /// ```
    /// use serde_json::json;
    /// use stepwright::step::StepConfig;
    ///
    /// let config = StepConfig::new("lint", "Run the linter", "analysis")
    ///     .with_setting("fix", json!(false))
    ///     .depends_on("checkout");
    ///
    /// assert!(config.validate().is_ok());
    /// assert!(config.required);
    /// ```
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        step_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: description.into(),
            step_type: step_type.into().trim().to_string(),
            version: default_version(),
            order: 0,
            required: true,
            dependencies: Vec::new(),
            settings: Map::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    /// Marks the step as optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Adds a dependency on another step.
    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.dependencies.push(step.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Checks the required fields.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("name", &self.name),
            ("description", &self.description),
            ("type", &self.step_type),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| *field)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Configuration(format!(
                "Step config '{}' is missing required field(s): {}",
                self.name,
                missing.join(", ")
            )))
        }
    }
}

/// Category a step is indexed under.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(from = "String", into = "String")]
pub enum StepCategory {
    Analysis,
    Git,
    Ide,
    Testing,
    Refactoring,
    Documentation,
    Deployment,
    Custom(String),
}

impl StepCategory {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Analysis => "analysis",
            Self::Git => "git",
            Self::Ide => "ide",
            Self::Testing => "testing",
            Self::Refactoring => "refactoring",
            Self::Documentation => "documentation",
            Self::Deployment => "deployment",
            Self::Custom(name) => name,
        }
    }
}

impl FromStr for StepCategory {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "analysis" => Self::Analysis,
            "git" => Self::Git,
            "ide" => Self::Ide,
            "testing" => Self::Testing,
            "refactoring" => Self::Refactoring,
            "documentation" => Self::Documentation,
            "deployment" => Self::Deployment,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl From<String> for StepCategory {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(category) => category,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for StepCategory {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<StepCategory> for String {
    fn from(category: StepCategory) -> Self {
        category.as_str().to_string()
    }
}

impl fmt::Display for StepCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
