//! Registries
//!
//! - [`catalog`]: Generic name-indexed catalog with categories and status
//! - [`steps`]: The step registry built on top of it

pub mod catalog;
pub mod steps;

pub use catalog::{Entry, EntryStatus, Registry, RegistryStats};
pub use steps::{StepRegistry, StepRegistryStats, StepStats};
