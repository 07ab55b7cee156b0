//! Step Executor Contract
//!
//! Anything that can run a step implements [`StepExecutor`]. Closures are
//! adapted with [`from_fn`] (synchronous, may mutate the context) and
//! [`from_async_fn`] (asynchronous, works from owned inputs).

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::options::StepOptions;
use crate::context::WorkflowContext;
use crate::error::Result;

/// Executes one step.
///
/// Returning `Err` marks the execution as failed. Implementations should
/// watch `cancel` and stop early when it fires; a timed-out attempt is
/// cancelled and its future dropped.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &mut WorkflowContext,
        options: &StepOptions,
        cancel: &CancellationToken,
    ) -> Result<Value>;
}

/// Executor that does nothing and returns `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutor;

#[async_trait]
impl StepExecutor for NoopExecutor {
    async fn execute(
        &self,
        _ctx: &mut WorkflowContext,
        _options: &StepOptions,
        _cancel: &CancellationToken,
    ) -> Result<Value> {
        Ok(Value::Null)
    }
}

/// Adapter for a synchronous closure.
pub struct FnExecutor<F> {
    func: F,
}

#[async_trait]
impl<F> StepExecutor for FnExecutor<F>
where
    F: Fn(&mut WorkflowContext, &StepOptions) -> Result<Value> + Send + Sync,
{
    async fn execute(
        &self,
        ctx: &mut WorkflowContext,
        options: &StepOptions,
        _cancel: &CancellationToken,
    ) -> Result<Value> {
        (self.func)(ctx, options)
    }
}

/// Adapter for an asynchronous closure.
///
/// The closure receives owned copies of the options and the cancellation
/// token, so the returned future can be `'static`.
pub struct AsyncFnExecutor<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> StepExecutor for AsyncFnExecutor<F>
where
    F: Fn(StepOptions, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn execute(
        &self,
        _ctx: &mut WorkflowContext,
        options: &StepOptions,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        (self.func)(options.clone(), cancel.clone()).await
    }
}

/// Wraps a synchronous closure as a shared executor.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use stepwright::step::from_fn;
///
/// let executor = from_fn(|ctx, _options| {
///     ctx.set("linted", json!(true));
///     Ok(json!({"warnings": 0}))
/// });
/// # let _ = executor;
/// ```
pub fn from_fn<F>(func: F) -> Arc<dyn StepExecutor>
where
    F: Fn(&mut WorkflowContext, &StepOptions) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnExecutor { func })
}

/// Wraps an asynchronous closure as a shared executor.
pub fn from_async_fn<F, Fut>(func: F) -> Arc<dyn StepExecutor>
where
    F: Fn(StepOptions, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(AsyncFnExecutor { func })
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_executor() {
        let mut ctx = WorkflowContext::new("test");
        let out = NoopExecutor
            .execute(&mut ctx, &StepOptions::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, Value::Null);
    }

    #[tokio::test]
    async fn test_sync_closure_mutates_context() {
        let executor = from_fn(|ctx, options| {
            let fix = options.setting("fix").cloned().unwrap_or(json!(false));
            ctx.set("fix", fix.clone());
            Ok(json!({"fixed": fix}))
        });

        let mut ctx = WorkflowContext::new("test");
        let options = StepOptions::new().with_setting("fix", json!(true));
        let out = executor
            .execute(&mut ctx, &options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out, json!({"fixed": true}));
        assert_eq!(ctx.get("fix"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_async_closure_observes_cancel() {
        let executor = from_async_fn(|_options, cancel: CancellationToken| async move {
            cancel.cancelled().await;
            Err(EngineError::Cancelled("stopped".into()))
        });

        let token = CancellationToken::new();
        token.cancel();
        let mut ctx = WorkflowContext::new("test");
        let err = executor
            .execute(&mut ctx, &StepOptions::new(), &token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CANCELLED");
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(42)), "executor panicked");
    }
}
