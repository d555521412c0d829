//! BoxJob -- object-safe dynamic dispatch wrapper for Job.
//!
//! 1. Define an object-safe `JobDyn` trait with boxed futures
//! 2. Blanket-impl `JobDyn` for all `T: Job`
//! 3. `BoxJob` wraps `Box<dyn JobDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use jobgraph_types::job::JobFailure;
use serde_json::Value;

use super::{Job, JobContext, JobError, JobResult};

type JobFuture<'a> = Pin<Box<dyn Future<Output = Result<JobResult, JobError>> + Send + 'a>>;
type HookFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Object-safe version of [`Job`] with boxed futures.
pub trait JobDyn: Send + Sync {
    fn perform_boxed<'a>(&'a self, ctx: &'a mut JobContext) -> JobFuture<'a>;

    fn resume_boxed<'a>(&'a self, ctx: &'a mut JobContext, data: Value) -> JobFuture<'a>;

    fn on_suspend_boxed<'a>(&'a self, ctx: &'a JobContext) -> HookFuture<'a>;

    fn on_resume_boxed<'a>(&'a self, ctx: &'a JobContext, data: &'a Value) -> HookFuture<'a>;

    fn on_failure_boxed<'a>(&'a self, ctx: &'a JobContext, failure: &'a JobFailure)
    -> HookFuture<'a>;
}

impl<T: Job> JobDyn for T {
    fn perform_boxed<'a>(&'a self, ctx: &'a mut JobContext) -> JobFuture<'a> {
        Box::pin(self.perform(ctx))
    }

    fn resume_boxed<'a>(&'a self, ctx: &'a mut JobContext, data: Value) -> JobFuture<'a> {
        Box::pin(self.resume(ctx, data))
    }

    fn on_suspend_boxed<'a>(&'a self, ctx: &'a JobContext) -> HookFuture<'a> {
        Box::pin(self.on_suspend(ctx))
    }

    fn on_resume_boxed<'a>(&'a self, ctx: &'a JobContext, data: &'a Value) -> HookFuture<'a> {
        Box::pin(self.on_resume(ctx, data))
    }

    fn on_failure_boxed<'a>(
        &'a self,
        ctx: &'a JobContext,
        failure: &'a JobFailure,
    ) -> HookFuture<'a> {
        Box::pin(self.on_failure(ctx, failure))
    }
}

/// Type-erased job, as produced by the [`super::Registry`].
pub struct BoxJob {
    inner: Box<dyn JobDyn>,
}

impl BoxJob {
    pub fn new<T: Job>(job: T) -> Self {
        Self {
            inner: Box::new(job),
        }
    }

    pub async fn perform(&self, ctx: &mut JobContext) -> Result<JobResult, JobError> {
        self.inner.perform_boxed(ctx).await
    }

    pub async fn resume(&self, ctx: &mut JobContext, data: Value) -> Result<JobResult, JobError> {
        self.inner.resume_boxed(ctx, data).await
    }

    pub async fn on_suspend(&self, ctx: &JobContext) {
        self.inner.on_suspend_boxed(ctx).await
    }

    pub async fn on_resume(&self, ctx: &JobContext, data: &Value) {
        self.inner.on_resume_boxed(ctx, data).await
    }

    pub async fn on_failure(&self, ctx: &JobContext, failure: &JobFailure) {
        self.inner.on_failure_boxed(ctx, failure).await
    }
}

impl std::fmt::Debug for BoxJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxJob").finish_non_exhaustive()
    }
}
