//! Step Definitions
//!
//! A definition binds a validated [`StepConfig`] to its executor and any
//! validation rules attached at registration time.

use std::fmt;
use std::sync::Arc;

use super::config::{StepCategory, StepConfig};
use super::executor::StepExecutor;
use crate::error::{EngineError, Result};
use crate::validation::ValidationRule;

/// A registered step.
#[derive(Clone)]
pub struct StepDefinition {
    pub name: String,
    pub category: StepCategory,
    pub config: StepConfig,
    pub executor: Arc<dyn StepExecutor>,
    pub rules: Vec<ValidationRule>,
}

impl StepDefinition {
    /// Creates a definition after checking the name and config.
    ///
    /// The config must carry the same name the step is registered under.
    pub fn new(
        name: impl Into<String>,
        config: StepConfig,
        category: StepCategory,
        executor: Arc<dyn StepExecutor>,
    ) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(EngineError::Configuration(
                "Step name cannot be empty".to_string(),
            ));
        }
        config.validate()?;
        if config.name.trim() != name {
            return Err(EngineError::Configuration(format!(
                "Step '{}' is registered with a config named '{}'",
                name, config.name
            )));
        }

        Ok(Self {
            name,
            category,
            config,
            executor,
            rules: Vec::new(),
        })
    }

    pub fn with_rules(mut self, rules: Vec<ValidationRule>) -> Self {
        self.rules = rules;
        self
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("config", &self.config)
            .field("rules", &self.rules.len())
            .finish()
    }
}
