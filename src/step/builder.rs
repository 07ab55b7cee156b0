//! Step Instances and Builder
//!
//! A [`StepInstance`] is a registered definition bound to one set of run
//! options, with the options' settings merged over the configured defaults.
//! [`StepBuilder`] produces instances and caches them by step name and
//! options digest, so building the same step twice with equal options
//! returns the same shared instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, warn};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::config::StepConfig;
use super::definition::StepDefinition;
use super::options::{merge_settings, StepOptions};
use crate::context::WorkflowContext;
use crate::error::{EngineError, Result};
use crate::validation::{validate_all, ValidationResult};
use crate::workflow::WorkflowStep;

/// A step ready to run with fixed options.
#[derive(Debug, Clone)]
pub struct StepInstance {
    definition: Arc<StepDefinition>,
    config: StepConfig,
    options: StepOptions,
}

impl StepInstance {
    /// Binds `options` to `definition`, merging settings.
    pub fn new(definition: Arc<StepDefinition>, options: &StepOptions) -> Self {
        let settings = merge_settings(&definition.config.settings, &options.settings);

        let mut config = definition.config.clone();
        config.settings = settings.clone();

        let mut options = options.clone();
        options.settings = settings;

        Self {
            definition,
            config,
            options,
        }
    }

    pub fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    /// Effective settings: configured defaults overridden by the options.
    pub fn settings(&self) -> &Map<String, Value> {
        &self.config.settings
    }

    pub fn options(&self) -> &StepOptions {
        &self.options
    }

    /// Runs the executor, bounded by the options' timeout when one is set.
    pub async fn run(&self, ctx: &mut WorkflowContext, cancel: &CancellationToken) -> Result<Value> {
        let executor = &self.definition.executor;
        let attempt = cancel.child_token();

        match self.options.timeout_ms {
            Some(timeout_ms) => {
                let run = executor.execute(ctx, &self.options, &attempt);
                match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        attempt.cancel();
                        warn!("Step '{}' timed out after {}ms", self.definition.name, timeout_ms);
                        Err(EngineError::Timeout {
                            step: self.definition.name.clone(),
                            timeout_ms,
                        })
                    }
                }
            }
            None => executor.execute(ctx, &self.options, &attempt).await,
        }
    }
}

#[async_trait]
impl WorkflowStep for StepInstance {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn config(&self) -> &StepConfig {
        &self.config
    }

    /// Checks the config, then the attached rules against the context data.
    fn validate(&self, ctx: &WorkflowContext) -> ValidationResult {
        let mut result = ValidationResult::new();
        if let Err(e) = self.config.validate() {
            result.add_error_with_code(&self.definition.name, e.to_string(), e.code());
        }
        if !self.definition.rules.is_empty() {
            result.merge(validate_all(&self.definition.rules, &ctx.data_value()));
        }
        result
    }

    async fn execute(&self, ctx: &mut WorkflowContext, cancel: &CancellationToken) -> Result<Value> {
        self.run(ctx, cancel).await
    }
}

/// Builds and caches step instances.
#[derive(Debug, Default)]
pub struct StepBuilder {
    cache: DashMap<(String, String), Arc<StepInstance>>,
}

impl StepBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached instance for `(name, options)` or builds one.
    pub fn build(&self, definition: &Arc<StepDefinition>, options: &StepOptions) -> Arc<StepInstance> {
        let key = (definition.name.clone(), options.cache_key());
        self.cache
            .entry(key)
            .or_insert_with(|| {
                debug!("Building step instance '{}'", definition.name);
                Arc::new(StepInstance::new(Arc::clone(definition), options))
            })
            .clone()
    }

    /// Drops every cached instance of `name`.
    pub fn invalidate(&self, name: &str) {
        self.cache.retain(|(step, _), _| step != name);
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}
