//! Parallel Execution Module
//!
//! Runs independent batches of registered steps concurrently, with
//! bounded concurrency, per-attempt timeouts, retries and cancellation.
//!
//! # Architecture
//!
//! - [`parallel`]: The engine, its options and batch statistics

pub mod parallel;

pub use parallel::{
    ParallelBatchResult, ParallelExecutionEngine, ParallelOptions, ParallelStats, RetryPolicy,
};
