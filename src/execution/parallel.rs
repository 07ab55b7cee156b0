//! Parallel Step Execution
//!
//! Runs an independent batch of registered steps concurrently:
//! - One tokio task per step, bounded by a semaphore
//! - Per-attempt timeout that cancels and drops the attempt
//! - Retry with a fixed delay between attempts
//! - Results collected in input order, failures and panics isolated
//! - Each task works on a fork of the context, absorbed after the batch

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::context::{ExecutionRecord, WorkflowContext};
use crate::error::EngineError;
use crate::registry::StepRegistry;
use crate::step::StepOptions;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);

/// How failed attempts are retried.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retry_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            retry_attempts,
            retry_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0, DEFAULT_RETRY_DELAY)
    }
}

/// Options for one parallel batch.
#[derive(Debug, Clone)]
pub struct ParallelOptions {
    pub max_concurrency: usize,
    /// Timeout of each attempt
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Options passed to every step
    pub step_options: StepOptions,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus::get(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            step_options: StepOptions::default(),
        }
    }
}

impl ParallelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry_attempts: u32, retry_delay: Duration) -> Self {
        self.retry = RetryPolicy::new(retry_attempts, retry_delay);
        self
    }

    pub fn with_step_options(mut self, step_options: StepOptions) -> Self {
        self.step_options = step_options;
        self
    }
}

/// Outcome of one batch, index-aligned with the requested names.
#[derive(Serialize, Debug, Clone)]
pub struct ParallelBatchResult {
    pub results: Vec<ExecutionRecord>,
    pub duration: Duration,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl ParallelBatchResult {
    fn new(results: Vec<ExecutionRecord>, duration: Duration) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let timed_out = results.iter().filter(|r| r.is_timeout).count();
        Self {
            failed: results.len() - succeeded,
            results,
            duration,
            succeeded,
            timed_out,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Counters across every batch since the last reset.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ParallelStats {
    pub batches: u64,
    pub total_steps: u64,
    pub successful_steps: u64,
    pub failed_steps: u64,
    pub timeouts: u64,
    /// Mean step duration across all batches
    pub average_duration_ms: f64,
}

impl ParallelStats {
    fn record_batch(&mut self, batch: &ParallelBatchResult) {
        let previous_total = self.total_steps as f64;
        let batch_total: u64 = batch.results.iter().map(|r| r.duration_ms).sum();

        self.batches += 1;
        self.total_steps += batch.results.len() as u64;
        self.successful_steps += batch.succeeded as u64;
        self.failed_steps += batch.failed as u64;
        self.timeouts += batch.timed_out as u64;

        if self.total_steps > 0 {
            self.average_duration_ms = (self.average_duration_ms * previous_total
                + batch_total as f64)
                / self.total_steps as f64;
        }
    }
}

/// Concurrent executor for registered steps.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use stepwright::context::WorkflowContext;
/// use stepwright::execution::{ParallelExecutionEngine, ParallelOptions};
/// use stepwright::registry::StepRegistry;
/// use stepwright::step::{NoopExecutor, StepCategory, StepConfig};
///
/// # #[tokio::main]
/// # async fn main() -> stepwright::Result<()> {
/// let mut registry = StepRegistry::new();
/// for name in ["lint", "test", "audit"] {
///     let config = StepConfig::new(name, "check", "analysis");
///     registry.register(name, config, StepCategory::Analysis, Arc::new(NoopExecutor))?;
/// }
///
/// let engine = ParallelExecutionEngine::new(Arc::new(registry));
/// let options = ParallelOptions::new().with_timeout(Duration::from_secs(5));
///
/// let mut ctx = WorkflowContext::new("checks");
/// let batch = engine
///     .execute_steps_parallel(&["lint", "test", "audit"], &mut ctx, &options)
///     .await;
/// assert!(batch.all_succeeded());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ParallelExecutionEngine {
    registry: Arc<StepRegistry>,
    root: Mutex<CancellationToken>,
    stats: Mutex<ParallelStats>,
}

impl ParallelExecutionEngine {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self {
            registry,
            root: Mutex::new(CancellationToken::new()),
            stats: Mutex::new(ParallelStats::default()),
        }
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    /// Runs every named step concurrently over forks of `ctx`.
    ///
    /// Always returns one record per name, in input order. The forks'
    /// history, logs, metrics and data changes are absorbed into `ctx`.
    pub async fn execute_steps_parallel(
        &self,
        names: &[&str],
        ctx: &mut WorkflowContext,
        options: &ParallelOptions,
    ) -> ParallelBatchResult {
        let started = Instant::now();
        let batch_token = lock(&self.root).child_token();
        let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));

        info!(
            "Starting parallel batch of {} steps (max concurrency: {}, timeout: {:?}, retries: {})",
            names.len(),
            options.max_concurrency,
            options.timeout,
            options.retry.retry_attempts
        );

        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            let registry = Arc::clone(&self.registry);
            let semaphore = Arc::clone(&semaphore);
            let token = batch_token.clone();
            let options = options.clone();
            let name = name.to_string();
            let mut fork = ctx.fork();

            handles.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let record = match permit {
                    Some(_permit) => run_with_retry(&registry, &name, &mut fork, &options, &token).await,
                    None => ExecutionRecord::failure(
                        &name,
                        &EngineError::Cancelled(format!("step '{}' cancelled before start", name)),
                        0,
                    ),
                };
                fork.record_execution(record.clone());
                (record, fork)
            }));
        }

        let mut results = Vec::with_capacity(names.len());
        let mut forks = Vec::with_capacity(names.len());
        for (handle, name) in handles.into_iter().zip(names) {
            match handle.await {
                Ok((record, fork)) => {
                    results.push(record);
                    forks.push(fork);
                }
                Err(e) => {
                    warn!("Task for step '{}' did not finish: {}", name, e);
                    let record = ExecutionRecord::failure(
                        *name,
                        &EngineError::execution(*name, format!("task failed: {}", e)),
                        started.elapsed().as_millis() as u64,
                    );
                    let mut fork = ctx.fork();
                    fork.record_execution(record.clone());
                    results.push(record);
                    forks.push(fork);
                }
            }
        }
        ctx.absorb(forks);

        let batch = ParallelBatchResult::new(results, started.elapsed());
        lock(&self.stats).record_batch(&batch);

        info!(
            "Parallel batch finished in {:.2}s: {} succeeded, {} failed ({} timed out)",
            batch.duration.as_secs_f64(),
            batch.succeeded,
            batch.failed,
            batch.timed_out
        );
        batch
    }

    /// Cancels every running batch. Later batches start with a fresh token.
    pub fn cancel_all(&self) {
        let mut root = lock(&self.root);
        warn!("Cancelling all running steps");
        root.cancel();
        *root = CancellationToken::new();
    }

    pub fn stats(&self) -> ParallelStats {
        lock(&self.stats).clone()
    }

    pub fn reset_stats(&self) {
        *lock(&self.stats) = ParallelStats::default();
    }
}

/// Locks a mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs one step with timeout and retries.
async fn run_with_retry(
    registry: &StepRegistry,
    name: &str,
    ctx: &mut WorkflowContext,
    options: &ParallelOptions,
    cancel: &CancellationToken,
) -> ExecutionRecord {
    let started = Instant::now();
    let max_attempts = options.retry.max_attempts();
    let timeout_ms = options.timeout.as_millis() as u64;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let attempt_token = cancel.child_token();
        debug!("Step '{}' attempt {}/{}", name, attempt, max_attempts);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = tokio::time::timeout(
                options.timeout,
                registry.invoke(name, ctx, &options.step_options, &attempt_token),
            ) => Some(outcome),
        };

        let (record, retryable) = match outcome {
            Some(Ok(Ok(record))) => (record, true),
            // Unknown or inactive steps won't get better on retry
            Some(Ok(Err(e))) => (ExecutionRecord::failure(name, &e, 0), false),
            Some(Err(_)) => {
                attempt_token.cancel();
                warn!("Step '{}' timed out after {}ms (attempt {})", name, timeout_ms, attempt);
                let e = EngineError::Timeout {
                    step: name.to_string(),
                    timeout_ms,
                };
                (ExecutionRecord::failure(name, &e, timeout_ms), true)
            }
            None => {
                attempt_token.cancel();
                (cancelled_record(name), false)
            }
        };

        if record.success || !retryable || attempt >= max_attempts {
            let elapsed = started.elapsed().as_millis() as u64;
            return record.with_attempts(attempt).with_duration(elapsed);
        }

        info!(
            "Retrying step '{}' in {:?} (attempt {}/{} failed: {})",
            name,
            options.retry.retry_delay,
            attempt,
            max_attempts,
            record.error.as_deref().unwrap_or("unknown error")
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Step '{}' cancelled before attempt {}", name, attempt + 1);
                let elapsed = started.elapsed().as_millis() as u64;
                return cancelled_record(name).with_attempts(attempt).with_duration(elapsed);
            }
            _ = tokio::time::sleep(options.retry.retry_delay) => {}
        }
    }
}

fn cancelled_record(name: &str) -> ExecutionRecord {
    let e = EngineError::Cancelled(format!("step '{}' cancelled", name));
    ExecutionRecord::failure(name, &e, 0)
}
