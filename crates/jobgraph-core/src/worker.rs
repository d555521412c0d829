//! Job invocation at the dispatch boundary.
//!
//! A [`Worker`] turns one [`DispatchRequest`] into a job run: it marks the job
//! started (fresh runs only), instantiates the job type, runs the logic with
//! panics contained, and reports the outcome back to the manager. A
//! [`WorkerPool`] consumes a dispatch queue with bounded concurrency.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use jobgraph_types::config::EngineConfig;
use jobgraph_types::job::JobFailure;

use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::job::{GraphExtender, JobContext};
use crate::manager::{Manager, ManagerError};
use crate::repository::WorkflowStore;

/// Default number of backtrace lines kept in a failure.
const DEFAULT_BACKTRACE_DEPTH: usize = 10;

/// Runs single jobs against a manager.
pub struct Worker<S, D> {
    manager: Arc<Manager<S, D>>,
    backtrace_depth: usize,
}

impl<S, D> Worker<S, D>
where
    S: WorkflowStore + 'static,
    D: Dispatcher + 'static,
{
    pub fn new(manager: Arc<Manager<S, D>>) -> Self {
        Self {
            manager,
            backtrace_depth: DEFAULT_BACKTRACE_DEPTH,
        }
    }

    pub fn with_backtrace_depth(mut self, depth: usize) -> Self {
        self.backtrace_depth = depth;
        self
    }

    pub fn manager(&self) -> &Arc<Manager<S, D>> {
        &self.manager
    }

    /// Run the job named by `request` and report its outcome.
    ///
    /// Errors from the job's own logic (including panics) fail the job and
    /// are not returned. Returned errors come from orchestration itself.
    pub async fn invoke(&self, request: DispatchRequest) -> Result<(), ManagerError> {
        let span = tracing::info_span!(
            "job",
            workflow_id = %request.workflow_id,
            job_id = %request.job_id,
            resume = request.is_resume(),
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: DispatchRequest) -> Result<(), ManagerError> {
        let DispatchRequest {
            workflow_id,
            job_id,
            resume_data,
        } = request;

        let loaded = match &resume_data {
            None => self.manager.start_job(workflow_id, &job_id).await,
            Some(_) => self.manager.job_snapshot(workflow_id, &job_id).await,
        };
        let (record, payloads) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                if err.is_orchestration() {
                    self.manager
                        .record_failure(workflow_id, None, err.to_string())
                        .await?;
                }
                return Err(err);
            }
        };

        let job = match self.manager.registry().instantiate(&record.job_type) {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(job_type = %record.job_type, error = %err, "cannot instantiate job");
                let failure = JobFailure::message(err.to_string()).with_kind("registry");
                return self.manager.fail_job(workflow_id, &job_id, failure).await;
            }
        };

        let extender: Arc<dyn GraphExtender> = self.manager.clone();
        let mut ctx = JobContext::new(record, payloads).with_extender(extender);

        tracing::debug!("running job");
        let outcome = match resume_data {
            None => AssertUnwindSafe(job.perform(&mut ctx)).catch_unwind().await,
            Some(data) => {
                run_hook("resume", job.on_resume(&ctx, &data)).await;
                AssertUnwindSafe(job.resume(&mut ctx, data)).catch_unwind().await
            }
        };

        let failure = match outcome {
            Ok(Ok(result)) => {
                let output = ctx.take_output();
                let suspends = result.suspends(output.as_ref());
                self.manager
                    .job_performed(workflow_id, &job_id, output, result)
                    .await?;
                if suspends {
                    run_hook("suspend", job.on_suspend(&ctx)).await;
                }
                return Ok(());
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "job failed");
                err.to_failure(self.backtrace_depth)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(panic = %message, "job panicked");
                JobFailure::message(message).with_kind("panic")
            }
        };
        self.manager
            .fail_job(workflow_id, &job_id, failure.clone())
            .await?;
        run_hook("failure", job.on_failure(&ctx, &failure)).await;
        Ok(())
    }
}

/// Await a lifecycle hook, logging instead of propagating a panic.
async fn run_hook(hook: &'static str, fut: impl Future<Output = ()>) {
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        tracing::warn!(hook, panic = %panic_message(panic.as_ref()), "job hook panicked");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Consumes a dispatch queue, running up to `concurrency` jobs at once.
pub struct WorkerPool<S, D> {
    worker: Arc<Worker<S, D>>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl<S, D> WorkerPool<S, D>
where
    S: WorkflowStore + 'static,
    D: Dispatcher + 'static,
{
    pub fn new(worker: Worker<S, D>, concurrency: usize) -> Self {
        Self {
            worker: Arc::new(worker),
            concurrency: concurrency.max(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(worker: Worker<S, D>, config: &EngineConfig) -> Self {
        Self::new(worker.with_backtrace_depth(config.backtrace_depth), config.concurrency)
    }

    pub fn worker(&self) -> &Arc<Worker<S, D>> {
        &self.worker
    }

    /// Token that stops [`Self::run`] when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Process requests until the queue closes or the pool is cancelled,
    /// then wait for in-flight jobs. Returns the number of jobs run.
    pub async fn run(&self, mut receiver: mpsc::Receiver<DispatchRequest>) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut processed = 0;

        tracing::info!(concurrency = self.concurrency, "worker pool started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("worker pool cancelled");
                    break;
                }
                request = receiver.recv() => {
                    let Some(request) = request else {
                        tracing::debug!("dispatch queue closed");
                        break;
                    };
                    let worker = self.worker.clone();
                    let semaphore = semaphore.clone();
                    // The permit is taken inside the task so the receive loop
                    // never blocks on a full pool.
                    tasks.spawn(async move {
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            return;
                        };
                        if let Err(err) = worker.invoke(request).await {
                            tracing::warn!(error = %err, "job invocation failed");
                        }
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    processed += 1;
                    if let Err(err) = joined {
                        tracing::error!(error = %err, "worker task aborted");
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            processed += 1;
            if let Err(err) = joined {
                tracing::error!(error = %err, "worker task aborted");
            }
        }
        tracing::info!(processed, "worker pool stopped");
        processed
    }

    /// Run queued requests one at a time until the queue is empty, including
    /// requests emitted by the jobs being run. Returns the number of jobs run.
    pub async fn drain(&self, receiver: &mut mpsc::Receiver<DispatchRequest>) -> usize {
        let mut processed = 0;
        while let Ok(request) = receiver.try_recv() {
            if let Err(err) = self.worker.invoke(request).await {
                tracing::warn!(error = %err, "job invocation failed");
            }
            processed += 1;
        }
        processed
    }
}
