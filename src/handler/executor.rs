//! Execution policies for handler jobs.
//!
//! The dispatcher awaits [`Executor::submit`] before reading the next frame.
//! [`ImmediateExecutor`] therefore runs handlers inline (strict ordering, but
//! a slow handler stalls the read loop). [`SpawnExecutor`] hands each job to
//! the tokio runtime and returns at once, so the read loop never waits on
//! handler code.

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::BoxFuture;

/// Default maximum concurrently running handler jobs for [`SpawnExecutor`].
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// One handler invocation. Errors and panics are already contained.
pub type Job = BoxFuture<'static, ()>;

/// Policy deciding where handler jobs run.
pub trait Executor: Send + Sync + 'static {
    /// Accept a job. The returned future completes when the dispatcher may
    /// move on, which is not necessarily when the job finishes.
    fn submit(&self, job: Job) -> BoxFuture<'static, ()>;
}

/// Runs every job to completion on the dispatcher's task.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateExecutor;

impl Executor for ImmediateExecutor {
    fn submit(&self, job: Job) -> BoxFuture<'static, ()> {
        job
    }
}

/// Spawns every job on the tokio runtime.
///
/// At most `max_concurrent` jobs run at a time; further jobs are spawned but
/// wait for a permit, so submission itself never blocks.
#[derive(Debug, Clone)]
pub struct SpawnExecutor {
    semaphore: Arc<Semaphore>,
}

impl SpawnExecutor {
    /// Create an executor running at most `max_concurrent` jobs at once.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Permits not currently held by running jobs.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for SpawnExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_HANDLERS)
    }
}

impl Executor for SpawnExecutor {
    fn submit(&self, job: Job) -> BoxFuture<'static, ()> {
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            // Permit is held until the job completes
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            job.await;
        });
        Box::pin(async {})
    }
}
