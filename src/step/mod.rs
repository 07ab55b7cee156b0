//! Steps
//!
//! Everything that describes and runs a single step:
//!
//! - [`config`]: Declarative step configuration and categories
//! - [`definition`]: Config bound to an executor and validation rules
//! - [`executor`]: The executor contract and closure adapters
//! - [`command`]: Shell command executor
//! - [`options`]: Per-run options and settings merging
//! - [`builder`]: Built, cached step instances

pub mod builder;
pub mod command;
pub mod config;
pub mod definition;
pub mod executor;
pub mod options;

pub use builder::{StepBuilder, StepInstance};
pub use command::CommandExecutor;
pub use config::{StepCategory, StepConfig, DEFAULT_STEP_VERSION};
pub use definition::StepDefinition;
pub use executor::{from_async_fn, from_fn, AsyncFnExecutor, FnExecutor, NoopExecutor, StepExecutor};
pub use options::{merge_settings, StepOptions};
