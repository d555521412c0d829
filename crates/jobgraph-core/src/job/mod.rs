//! Job capability and execution context.
//!
//! A job type is any value implementing [`Job`]. Workers look job types up in
//! the [`Registry`] by their string name, build a [`JobContext`] from the
//! persisted record plus the parents' payloads, and run `perform` (or
//! `resume` when the job is woken up with external data).

pub mod box_job;
pub mod registry;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use jobgraph_types::job::{JobFailure, JobRecord, Payload, SUSPEND, is_suspend};

use crate::builder::{BuildError, WorkflowBuilder};
use crate::manager::ManagerError;

pub use box_job::{BoxJob, JobDyn};
pub use registry::{Registry, RegistryError, WorkflowDefinition};

/// How a job's logic ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    Finished,
    /// Park the job until it is resumed with external data.
    Suspend,
}

impl JobResult {
    /// Whether the run parks the job, either explicitly or through the
    /// suspend sentinel stored as output.
    pub fn suspends(self, output: Option<&Value>) -> bool {
        self == JobResult::Suspend || output.is_some_and(is_suspend)
    }
}

/// Error returned from job logic. Any variant fails the job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Message(String),

    #[error("invalid job params: {0}")]
    Params(#[from] serde_json::Error),

    #[error("graph extension failed: {0}")]
    Extend(#[from] ManagerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Short classification stored as the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Message(_) => "message",
            JobError::Params(_) => "params",
            JobError::Extend(_) => "extend",
            JobError::Other(_) => "other",
        }
    }

    /// Render into the persisted failure shape, keeping at most
    /// `backtrace_depth` backtrace lines.
    pub fn to_failure(&self, backtrace_depth: usize) -> JobFailure {
        let mut failure = JobFailure::message(self.to_string()).with_kind(self.kind());
        if let JobError::Other(err) = self {
            let backtrace = err.backtrace();
            if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
                failure = failure.with_backtrace(
                    backtrace.to_string().lines().map(str::trim),
                    backtrace_depth,
                );
            }
            if let Some(cause) = err.chain().nth(1) {
                failure = failure.with_cause(cause.to_string());
            }
        } else if let Some(cause) = std::error::Error::source(self) {
            failure = failure.with_cause(cause.to_string());
        }
        failure
    }
}

/// Logic of one job type.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
/// Implementations are stateless; everything a run needs comes through the
/// context.
///
/// The `on_*` hooks are per-type lifecycle callbacks, no-ops by default.
/// `on_resume` runs before `resume`; `on_suspend` and `on_failure` run after
/// the manager has recorded the transition. Hooks cannot fail the job.
pub trait Job: Send + Sync + 'static {
    fn perform(
        &self,
        ctx: &mut JobContext,
    ) -> impl Future<Output = Result<JobResult, JobError>> + Send;

    /// Continue after a suspension. By default the resume data becomes the
    /// job's output and the job finishes.
    fn resume(
        &self,
        ctx: &mut JobContext,
        data: Value,
    ) -> impl Future<Output = Result<JobResult, JobError>> + Send {
        async move {
            ctx.set_output(data);
            Ok(JobResult::Finished)
        }
    }

    fn on_suspend(&self, _ctx: &JobContext) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_resume(&self, _ctx: &JobContext, _data: &Value) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_failure(
        &self,
        _ctx: &JobContext,
        _failure: &JobFailure,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// User procedure that declares jobs on an anchored builder.
pub type ConfigureFn =
    Box<dyn FnOnce(&mut WorkflowBuilder) -> Result<(), BuildError> + Send + 'static>;

/// Object-safe hook for adding jobs after a running job.
///
/// Implemented by [`crate::manager::Manager`]. Returns the anchor job as
/// persisted after the extension, plus the ids of the new jobs.
pub trait GraphExtender: Send + Sync {
    fn extend<'a>(
        &'a self,
        workflow_id: Uuid,
        anchor_id: &'a str,
        configure: ConfigureFn,
    ) -> Pin<Box<dyn Future<Output = Result<(JobRecord, Vec<String>), ManagerError>> + Send + 'a>>;
}

/// Everything a job sees while it runs.
pub struct JobContext {
    record: JobRecord,
    payloads: Vec<Payload>,
    output: Option<Value>,
    extender: Option<Arc<dyn GraphExtender>>,
}

impl JobContext {
    /// Build a context. A stored suspend sentinel is not carried over, so a
    /// resumed run starts without output.
    pub fn new(record: JobRecord, payloads: Vec<Payload>) -> Self {
        let output = record.output.clone().filter(|v| !is_suspend(v));
        Self {
            record,
            payloads,
            output,
            extender: None,
        }
    }

    pub fn with_extender(mut self, extender: Arc<dyn GraphExtender>) -> Self {
        self.extender = Some(extender);
        self
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn workflow_id(&self) -> Uuid {
        self.record.workflow_id
    }

    pub fn job_type(&self) -> &str {
        &self.record.job_type
    }

    /// The job as last seen in the store.
    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub fn params(&self) -> &Value {
        &self.record.params
    }

    /// Decode the params into a typed struct.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        Ok(serde_json::from_value(self.record.params.clone())?)
    }

    /// Outputs of the parent jobs, one entry per incoming edge.
    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn set_output(&mut self, output: Value) {
        self.output = Some(output);
    }

    /// Mark the run as suspended by storing the sentinel output.
    pub fn suspend(&mut self) {
        self.output = Some(Value::String(SUSPEND.to_string()));
    }

    pub(crate) fn take_output(&mut self) -> Option<Value> {
        self.output.take()
    }

    /// Add jobs after this one. New jobs run after this job and before its
    /// current successors. Returns the ids of the new jobs.
    pub async fn configure<F>(&mut self, configure: F) -> Result<Vec<String>, JobError>
    where
        F: FnOnce(&mut WorkflowBuilder) -> Result<(), BuildError> + Send + 'static,
    {
        let extender = self
            .extender
            .clone()
            .ok_or_else(|| JobError::msg("job context has no graph extender attached"))?;
        let (record, added) = extender
            .extend(self.record.workflow_id, &self.record.id, Box::new(configure))
            .await?;
        self.record = record;
        Ok(added)
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.record.id)
            .field("job_type", &self.record.job_type)
            .field("payloads", &self.payloads.len())
            .field("has_extender", &self.extender.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Echo;

    impl Job for Echo {
        async fn perform(&self, ctx: &mut JobContext) -> Result<JobResult, JobError> {
            let params = ctx.params().clone();
            ctx.set_output(params);
            Ok(JobResult::Finished)
        }
    }

    fn context(params: Value) -> JobContext {
        JobContext::new(
            JobRecord::new(Uuid::now_v7(), "Echo", Some("echo".into()), params),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_perform_sets_output() {
        let mut ctx = context(json!({"x": 1}));
        let result = Echo.perform(&mut ctx).await.unwrap();
        assert_eq!(result, JobResult::Finished);
        assert_eq!(ctx.output(), Some(&json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_default_resume_stores_data() {
        let mut ctx = context(Value::Null);
        let result = Echo.resume(&mut ctx, json!("approved")).await.unwrap();
        assert_eq!(result, JobResult::Finished);
        assert_eq!(ctx.take_output(), Some(json!("approved")));
        assert!(ctx.output().is_none());
    }

    #[test]
    fn test_params_as() {
        #[derive(Deserialize)]
        struct Params {
            count: u32,
        }
        let ctx = context(json!({"count": 3}));
        assert_eq!(ctx.params_as::<Params>().unwrap().count, 3);

        let bad = context(json!({"count": "three"}));
        assert!(matches!(bad.params_as::<Params>(), Err(JobError::Params(_))));
    }

    #[test]
    fn test_suspend_sets_sentinel() {
        let mut ctx = context(Value::Null);
        ctx.suspend();
        assert!(ctx.output().is_some_and(is_suspend));
    }

    #[test]
    fn test_stored_sentinel_not_carried_into_context() {
        let mut record = JobRecord::new(Uuid::now_v7(), "Echo", None, Value::Null);
        record.set_output(Value::String(SUSPEND.to_string()));
        assert!(JobContext::new(record, Vec::new()).output().is_none());
    }

    #[tokio::test]
    async fn test_configure_without_extender_fails() {
        let mut ctx = context(Value::Null);
        let err = ctx.configure(|_| Ok(())).await.unwrap_err();
        assert!(matches!(err, JobError::Message(_)));
    }

    #[test]
    fn test_failure_from_message() {
        let failure = JobError::msg("boom").to_failure(10);
        assert_eq!(failure.message, "boom");
        assert_eq!(failure.kind.as_deref(), Some("message"));
        assert!(failure.cause.is_none());
    }

    #[test]
    fn test_failure_keeps_cause_and_truncates_backtrace() {
        let inner = std::io::Error::other("disk full");
        let err = JobError::from(anyhow::Error::new(inner).context("writing report"));
        let failure = err.to_failure(2);
        assert_eq!(failure.message, "writing report");
        assert_eq!(failure.kind.as_deref(), Some("other"));
        assert_eq!(failure.cause.as_deref(), Some("disk full"));
        assert!(failure.backtrace.len() <= 2);
    }
}
