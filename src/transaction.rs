//! Reentrant transactions with bounded retry.
//!
//! [`TransactionRunner::run`] wraps a unit of work over [`Storage`]:
//!
//! ```text
//! run(ctx, args, op)
//!   │
//!   ├── guard already held on ctx? ──▶ op(ctx, args.clone())   (inline, no begin/commit)
//!   │
//!   └── outermost: claim guard, then up to `retries` attempts of
//!         begin ─▶ op(ctx, args.clone()) ─▶ commit
//!                        │ error
//!                        └──▶ rollback ─▶ retryable? sleep(delay), next attempt
//!                                          otherwise return the error unchanged
//! ```
//!
//! Work queued on the context with [`RequestContext::defer`] runs after the
//! outermost commit and is discarded with every rolled-back attempt.
//!
//! The transaction boundary sits inside the retry loop, so every attempt
//! starts from a clean `begin`. Every attempt also gets its own clone of the
//! arguments, so an attempt that mutates its inputs before failing cannot
//! leak that mutation into the next one.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::metrics::{self, TransactionOutcome};
use crate::storage::Storage;

/// Retry and transaction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Maximum attempts per outermost call.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay between attempts in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// When false, a single attempt is made.
    #[serde(default = "default_true")]
    pub enable_retries: bool,

    /// When false, work runs without begin/commit/rollback or retry.
    #[serde(default = "default_true")]
    pub enable_transaction: bool,
}

fn default_retries() -> u32 {
    50
}

fn default_delay_ms() -> u64 {
    150
}

fn default_true() -> bool {
    true
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            delay_ms: default_delay_ms(),
            enable_retries: true,
            enable_transaction: true,
        }
    }
}

impl TransactionConfig {
    /// Delay between attempts.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Decides whether a failure is worth another attempt.
pub trait RetryClassifier: Send + Sync {
    /// True if `err` is transient.
    fn is_retryable(&self, err: &Error) -> bool;
}

impl<F> RetryClassifier for F
where
    F: Fn(&Error) -> bool + Send + Sync,
{
    fn is_retryable(&self, err: &Error) -> bool {
        self(err)
    }
}

/// Retries storage deadlocks only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadlockClassifier;

impl RetryClassifier for DeadlockClassifier {
    fn is_retryable(&self, err: &Error) -> bool {
        err.is_deadlock()
    }
}

/// Runs work inside reentrant, retried transactions.
#[derive(Clone)]
pub struct TransactionRunner {
    storage: Arc<dyn Storage>,
    config: TransactionConfig,
    classifier: Arc<dyn RetryClassifier>,
}

impl TransactionRunner {
    /// Runner retrying deadlocks.
    pub fn new(storage: Arc<dyn Storage>, config: TransactionConfig) -> Self {
        Self::with_classifier(storage, config, Arc::new(DeadlockClassifier))
    }

    /// Runner with a custom retry classifier.
    pub fn with_classifier(
        storage: Arc<dyn Storage>,
        config: TransactionConfig,
        classifier: Arc<dyn RetryClassifier>,
    ) -> Self {
        Self {
            storage,
            config,
            classifier,
        }
    }

    /// Storage the runner wraps.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Active configuration.
    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Run `op` transactionally.
    ///
    /// Nested calls on a context whose guard is already held run `op`
    /// inline; only the outermost call begins, commits, rolls back and
    /// retries. The error from the last attempt is returned as is.
    pub async fn run<A, T, F, Fut>(&self, ctx: &RequestContext, args: A, mut op: F) -> Result<T>
    where
        A: Clone,
        F: FnMut(RequestContext, A) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.config.enable_transaction {
            return op(ctx.clone(), args).await;
        }

        let Some(guard) = ctx.hold_transaction() else {
            return op(ctx.clone(), args).await;
        };

        let value = self.run_outermost(ctx, args, op).await?;

        drop(guard);
        for work in ctx.take_deferred() {
            work.await;
        }
        Ok(value)
    }

    async fn run_outermost<A, T, F, Fut>(&self, ctx: &RequestContext, args: A, mut op: F) -> Result<T>
    where
        A: Clone,
        F: FnMut(RequestContext, A) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = if self.config.enable_retries {
            self.config.retries.max(1)
        } else {
            1
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let err = match self.attempt(ctx, args.clone(), &mut op).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.classifier.is_retryable(&err) {
                debug!(
                    request_id = %ctx.request_id(),
                    attempt,
                    error = %err,
                    "non-retryable failure, giving up"
                );
                return Err(err);
            }

            warn!(
                request_id = %ctx.request_id(),
                attempt,
                max_attempts,
                error = %err,
                "retryable storage failure"
            );
            metrics::record_transaction_retry();

            if attempt >= max_attempts {
                error!(
                    request_id = %ctx.request_id(),
                    attempts = attempt,
                    "retry limit reached"
                );
                return Err(err);
            }

            tokio::time::sleep(self.config.delay()).await;
        }
    }

    async fn attempt<A, T, F, Fut>(&self, ctx: &RequestContext, args: A, op: &mut F) -> Result<T>
    where
        F: FnMut(RequestContext, A) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.storage.begin().await?;

        let err = match op(ctx.clone(), args).await {
            Ok(value) => match self.storage.commit().await {
                Ok(()) => {
                    metrics::record_transaction(TransactionOutcome::Commit);
                    return Ok(value);
                }
                Err(commit_err) => {
                    warn!(
                        request_id = %ctx.request_id(),
                        error = %commit_err,
                        "commit failed"
                    );
                    Error::from(commit_err)
                }
            },
            Err(err) => err,
        };

        self.rollback(ctx).await;
        Err(err)
    }

    async fn rollback(&self, ctx: &RequestContext) {
        ctx.discard_deferred();
        if let Err(rollback_err) = self.storage.rollback().await {
            error!(
                request_id = %ctx.request_id(),
                error = %rollback_err,
                "rollback failed"
            );
        }
        metrics::record_transaction(TransactionOutcome::Rollback);
    }
}
