//! Workflow manager: lock-guarded lifecycle transitions.
//!
//! Every mutation runs inside [`Manager::transaction`]:
//!
//! 1. take the workflow's lock
//! 2. reload the record from the store
//! 3. apply the mutation to a [`WorkflowTxn`]
//! 4. save the record
//! 5. release the lock
//! 6. send the dispatches and publish the events the mutation produced
//!
//! Internal steps (enqueueing a job, resuming a job, completion analysis) are
//! methods on `WorkflowTxn`, so they can only be reached by code that already
//! holds the lock.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use jobgraph_types::error::{JobStateError, RepositoryError, WorkflowStateError};
use jobgraph_types::event::WorkflowEvent;
use jobgraph_types::job::{JobFailure, JobRecord, Payload, SUSPEND};
use jobgraph_types::workflow::{FailureRecord, WorkflowRecord, WorkflowStatus};

use crate::builder::{BuildError, WorkflowBuilder};
use crate::dispatch::{DispatchError, DispatchRequest, Dispatcher};
use crate::event::EventBus;
use crate::job::{ConfigureFn, GraphExtender, JobResult, Registry, RegistryError};
use crate::repository::{WorkflowLock, WorkflowStore};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("job '{job_id}' not found in workflow {workflow_id}")]
    JobNotFound { workflow_id: Uuid, job_id: String },

    #[error(transparent)]
    JobState(#[from] JobStateError),

    #[error(transparent)]
    WorkflowState(#[from] WorkflowStateError),

    #[error("workflow {0} conflicts with an active singleton instance")]
    SingletonConflict(Uuid),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl ManagerError {
    /// Errors caused by the workflow's own state rather than infrastructure.
    /// These are worth recording in the workflow's failure log.
    pub fn is_orchestration(&self) -> bool {
        matches!(
            self,
            ManagerError::JobNotFound { .. }
                | ManagerError::JobState(_)
                | ManagerError::WorkflowState(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A workflow record loaded under its lock, plus the side effects to release
/// once it has been saved.
#[derive(Debug)]
pub struct WorkflowTxn {
    record: WorkflowRecord,
    dispatches: Vec<DispatchRequest>,
    events: Vec<WorkflowEvent>,
    lock: WorkflowLock,
}

impl WorkflowTxn {
    fn new(record: WorkflowRecord, lock: WorkflowLock) -> Self {
        Self {
            record,
            dispatches: Vec::new(),
            events: Vec::new(),
            lock,
        }
    }

    pub fn record(&self) -> &WorkflowRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut WorkflowRecord {
        &mut self.record
    }

    pub fn workflow_id(&self) -> Uuid {
        self.record.id
    }

    pub fn job(&self, job_id: &str) -> Result<&JobRecord, ManagerError> {
        self.record
            .job(job_id)
            .ok_or_else(|| ManagerError::JobNotFound {
                workflow_id: self.record.id,
                job_id: job_id.to_string(),
            })
    }

    pub fn job_mut(&mut self, job_id: &str) -> Result<&mut JobRecord, ManagerError> {
        let workflow_id = self.record.id;
        self.record
            .job_mut(job_id)
            .ok_or_else(|| ManagerError::JobNotFound {
                workflow_id,
                job_id: job_id.to_string(),
            })
    }

    /// Queue an event for publication after commit.
    pub fn emit(&mut self, event: WorkflowEvent) {
        self.events.push(event);
    }

    /// Dispatches collected so far, in emission order.
    pub fn pending_dispatches(&self) -> &[DispatchRequest] {
        &self.dispatches
    }

    /// Mark a job enqueued and schedule its dispatch.
    ///
    /// Jobs of a cancelled workflow are never enqueued.
    pub fn enqueue_job(&mut self, job_id: &str) -> Result<(), ManagerError> {
        let workflow_id = self.record.id;
        if self.record.status == WorkflowStatus::Cancelled {
            tracing::debug!(workflow_id = %workflow_id, job_id, "workflow cancelled, not enqueueing");
            return Ok(());
        }
        self.job_mut(job_id)?.enqueue()?;
        tracing::debug!(workflow_id = %workflow_id, job_id, "job enqueued");
        self.dispatches.push(DispatchRequest::run(workflow_id, job_id));
        self.emit(WorkflowEvent::JobEnqueued {
            workflow_id,
            job_id: job_id.to_string(),
        });
        Ok(())
    }

    /// Mark a suspended job resumed and schedule its dispatch with `data`.
    pub fn resume_job(&mut self, job_id: &str, data: Value) -> Result<(), ManagerError> {
        let workflow_id = self.record.id;
        self.job_mut(job_id)?.resume()?;
        tracing::debug!(workflow_id = %workflow_id, job_id, "job resumed");
        self.dispatches
            .push(DispatchRequest::resume(workflow_id, job_id, data));
        self.emit(WorkflowEvent::JobResumed {
            workflow_id,
            job_id: job_id.to_string(),
        });
        Ok(())
    }

    /// Completion analysis after `job_id` reached a terminal or parked state.
    ///
    /// A succeeded job releases its ready successors unless the workflow has
    /// failures. If nothing is left in flight afterwards, the workflow is
    /// finalized as failed, suspended, or succeeded.
    pub fn analyze(&mut self, job_id: &str) -> Result<(), ManagerError> {
        if self.record.status.is_finished() {
            tracing::debug!(workflow_id = %self.record.id, job_id, status = %self.record.status, "workflow already finished, skipping analysis");
            return Ok(());
        }

        let job = self.job(job_id)?;
        if job.is_succeeded() && !job.outgoing.is_empty() && !self.record.has_failures() {
            let successors = job.outgoing.clone();
            for next in &successors {
                if self.record.is_job_ready_to_start(next) {
                    self.enqueue_job(next)?;
                }
            }
        }

        if self.record.has_scheduled_jobs() {
            return Ok(());
        }
        self.complete()
    }

    fn complete(&mut self) -> Result<(), ManagerError> {
        let workflow_id = self.record.id;
        let target = self.record.completion_status();
        if self.record.status == target {
            return Ok(());
        }

        let event = match target {
            WorkflowStatus::Failed => {
                self.record.mark_failed()?;
                WorkflowEvent::WorkflowFailed {
                    workflow_id,
                    failures: self.record.failures.len(),
                }
            }
            WorkflowStatus::Suspended => {
                self.record.mark_suspended()?;
                WorkflowEvent::WorkflowSuspended { workflow_id }
            }
            _ => {
                self.record.mark_succeeded()?;
                WorkflowEvent::WorkflowSucceeded { workflow_id }
            }
        };
        tracing::info!(workflow_id = %workflow_id, status = %self.record.status, "workflow completed");
        self.emit(event);
        Ok(())
    }

    fn into_parts(self) -> (WorkflowRecord, Vec<DispatchRequest>, Vec<WorkflowEvent>, WorkflowLock) {
        (self.record, self.dispatches, self.events, self.lock)
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Coordinates every workflow and job state change.
pub struct Manager<S, D> {
    store: Arc<S>,
    dispatcher: D,
    registry: Arc<Registry>,
    events: EventBus,
}

impl<S, D> Manager<S, D>
where
    S: WorkflowStore,
    D: Dispatcher,
{
    pub fn new(store: Arc<S>, dispatcher: D, registry: Arc<Registry>) -> Self {
        Self {
            store,
            dispatcher,
            registry,
            events: EventBus::default(),
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Load a workflow snapshot without taking its lock.
    pub async fn load(&self, workflow_id: Uuid) -> Result<WorkflowRecord, ManagerError> {
        self.store
            .load(&workflow_id)
            .await?
            .ok_or(ManagerError::WorkflowNotFound(workflow_id))
    }

    /// Run `mutate` on the freshly reloaded record while holding its lock,
    /// then persist it and release the collected side effects.
    pub async fn transaction<T, F>(&self, workflow_id: Uuid, mutate: F) -> Result<T, ManagerError>
    where
        F: FnOnce(&mut WorkflowTxn) -> Result<T, ManagerError> + Send,
        T: Send,
    {
        let lock = self.store.lock(&workflow_id).await?;
        let record = self
            .store
            .load(&workflow_id)
            .await?
            .ok_or(ManagerError::WorkflowNotFound(workflow_id))?;

        let mut txn = WorkflowTxn::new(record, lock);
        let value = mutate(&mut txn)?;

        let (mut record, dispatches, events, lock) = txn.into_parts();
        record.updated_at = chrono::Utc::now();
        self.store.save(&record).await.map_err(|err| match err {
            RepositoryError::Conflict(_) => ManagerError::SingletonConflict(workflow_id),
            other => ManagerError::Repository(other),
        })?;
        drop(lock);

        // The record is committed; deliver what we can and report the rest.
        let mut undelivered = None;
        for request in dispatches {
            let job_id = request.job_id.clone();
            if let Err(err) = self.dispatcher.enqueue(request).await {
                tracing::error!(workflow_id = %workflow_id, job_id = %job_id, error = %err, "dispatch failed, job left enqueued");
                if undelivered.is_none() {
                    undelivered = Some(err);
                }
            }
        }
        for event in events {
            self.events.publish(event);
        }
        match undelivered {
            Some(err) => Err(err.into()),
            None => Ok(value),
        }
    }

    // -----------------------------------------------------------------------
    // Workflow operations
    // -----------------------------------------------------------------------

    /// Build a workflow of a registered type and persist it in status `initial`.
    pub async fn create_workflow(
        &self,
        workflow_type: &str,
        identifier: Option<String>,
        args: &[Value],
    ) -> Result<WorkflowRecord, ManagerError> {
        let record = self.registry.build(workflow_type, identifier, args)?;
        self.insert_workflow(&record).await?;
        Ok(record)
    }

    /// Persist a workflow built elsewhere.
    pub async fn insert_workflow(&self, record: &WorkflowRecord) -> Result<(), ManagerError> {
        self.registry.validate_jobs(record.jobs.values())?;
        self.store.insert(record).await.map_err(|err| match err {
            RepositoryError::Conflict(_) => ManagerError::SingletonConflict(record.id),
            other => ManagerError::Repository(other),
        })?;
        tracing::debug!(workflow_id = %record.id, workflow_type = %record.workflow_type, jobs = record.jobs.len(), "workflow created");
        Ok(())
    }

    /// initial -> running, enqueueing every job without incoming edges.
    pub async fn start_workflow(&self, workflow_id: Uuid) -> Result<WorkflowRecord, ManagerError> {
        self.transaction(workflow_id, |txn| {
            if txn.record.status != WorkflowStatus::Initial {
                return Err(WorkflowStateError {
                    from: txn.record.status.to_string(),
                    to: WorkflowStatus::Running.to_string(),
                }
                .into());
            }
            txn.record.mark_running()?;
            txn.emit(WorkflowEvent::WorkflowStarted { workflow_id });

            let roots: Vec<String> = txn.record.initial_jobs().map(|j| j.id.clone()).collect();
            for job_id in &roots {
                txn.enqueue_job(job_id)?;
            }
            tracing::info!(workflow_id = %workflow_id, roots = roots.len(), "workflow started");
            if roots.is_empty() {
                txn.complete()?;
            }
            Ok(txn.record.clone())
        })
        .await
    }

    /// suspended -> running, resuming `job_id` with `data`.
    pub async fn resume_workflow(
        &self,
        workflow_id: Uuid,
        job_id: &str,
        data: Value,
    ) -> Result<(), ManagerError> {
        self.transaction(workflow_id, |txn| {
            txn.record.mark_resumed()?;
            txn.emit(WorkflowEvent::WorkflowResumed { workflow_id });
            txn.resume_job(job_id, data)?;
            tracing::info!(workflow_id = %workflow_id, job_id, "workflow resumed");
            Ok(())
        })
        .await
    }

    /// Move a non-finished workflow to `cancelled`. Jobs already in flight
    /// still report back, but nothing new is enqueued.
    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> Result<(), ManagerError> {
        self.transaction(workflow_id, |txn| {
            txn.record.mark_cancelled()?;
            txn.emit(WorkflowEvent::WorkflowCancelled { workflow_id });
            tracing::info!(workflow_id = %workflow_id, "workflow cancelled");
            Ok(())
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Job operations
    // -----------------------------------------------------------------------

    /// Mark a job started and return it with its parents' payloads.
    pub async fn start_job(
        &self,
        workflow_id: Uuid,
        job_id: &str,
    ) -> Result<(JobRecord, Vec<Payload>), ManagerError> {
        self.transaction(workflow_id, |txn| {
            txn.job_mut(job_id)?.start()?;
            tracing::debug!(workflow_id = %workflow_id, job_id, "job started");
            let job = txn.job(job_id)?.clone();
            Ok((job, txn.record.incoming_payloads(job_id)))
        })
        .await
    }

    /// Read a job and its parents' payloads without changing anything.
    pub async fn job_snapshot(
        &self,
        workflow_id: Uuid,
        job_id: &str,
    ) -> Result<(JobRecord, Vec<Payload>), ManagerError> {
        let record = self.load(workflow_id).await?;
        let job = record
            .job(job_id)
            .cloned()
            .ok_or_else(|| ManagerError::JobNotFound {
                workflow_id,
                job_id: job_id.to_string(),
            })?;
        let payloads = record.incoming_payloads(job_id);
        Ok((job, payloads))
    }

    /// Store the run's output, mark the job finished, and analyze.
    pub async fn finish_job(
        &self,
        workflow_id: Uuid,
        job_id: &str,
        output: Option<Value>,
    ) -> Result<(), ManagerError> {
        self.transaction(workflow_id, |txn| {
            let job = txn.job_mut(job_id)?;
            job.output = output;
            job.finish()?;
            tracing::debug!(workflow_id = %workflow_id, job_id, "job finished");
            txn.emit(WorkflowEvent::JobFinished {
                workflow_id,
                job_id: job_id.to_string(),
            });
            txn.analyze(job_id)
        })
        .await
    }

    /// Mark the job failed, record the failure, and analyze.
    pub async fn fail_job(
        &self,
        workflow_id: Uuid,
        job_id: &str,
        failure: JobFailure,
    ) -> Result<(), ManagerError> {
        self.transaction(workflow_id, |txn| {
            let job = txn.job_mut(job_id)?;
            job.fail(failure)?;
            let record = FailureRecord::for_job(job);
            tracing::warn!(workflow_id = %workflow_id, job_id, error = %record.message, "job failed");
            txn.emit(WorkflowEvent::JobFailed {
                workflow_id,
                job_id: job_id.to_string(),
                message: record.message.clone(),
            });
            txn.record.add_failure(record);
            txn.analyze(job_id)
        })
        .await
    }

    /// Park the job, store its output, and analyze.
    pub async fn suspend_job(
        &self,
        workflow_id: Uuid,
        job_id: &str,
        output: Option<Value>,
    ) -> Result<(), ManagerError> {
        self.transaction(workflow_id, |txn| {
            let job = txn.job_mut(job_id)?;
            job.set_output(output.unwrap_or_else(|| Value::String(SUSPEND.to_string())));
            job.suspend()?;
            tracing::debug!(workflow_id = %workflow_id, job_id, "job suspended");
            txn.emit(WorkflowEvent::JobSuspended {
                workflow_id,
                job_id: job_id.to_string(),
            });
            txn.analyze(job_id)
        })
        .await
    }

    /// Route a completed run to `suspend_job` or `finish_job`.
    ///
    /// Orchestration errors are appended to the workflow's failure log,
    /// without a job id, before being returned.
    pub async fn job_performed(
        &self,
        workflow_id: Uuid,
        job_id: &str,
        output: Option<Value>,
        result: JobResult,
    ) -> Result<(), ManagerError> {
        let suspend = result.suspends(output.as_ref());
        let outcome = if suspend {
            self.suspend_job(workflow_id, job_id, output).await
        } else {
            self.finish_job(workflow_id, job_id, output).await
        };

        if let Err(err) = &outcome {
            if err.is_orchestration() {
                self.record_failure(workflow_id, None, err.to_string())
                    .await?;
            }
        }
        outcome
    }

    /// Append an orchestration error to the failure log.
    pub async fn record_failure(
        &self,
        workflow_id: Uuid,
        job_id: Option<&str>,
        message: String,
    ) -> Result<(), ManagerError> {
        self.transaction(workflow_id, |txn| {
            tracing::error!(workflow_id = %workflow_id, job_id, error = %message, "orchestration error");
            txn.record
                .add_failure(FailureRecord::orchestration(job_id, message));
            Ok(())
        })
        .await
    }

    /// Add jobs after `anchor_id` using an anchored builder.
    pub async fn configure(
        &self,
        workflow_id: Uuid,
        anchor_id: &str,
        configure: ConfigureFn,
    ) -> Result<(JobRecord, Vec<String>), ManagerError> {
        let registry = self.registry.clone();
        self.transaction(workflow_id, move |txn| {
            let mut builder =
                WorkflowBuilder::from_jobs(workflow_id, txn.record.jobs.clone()).anchored(anchor_id)?;
            configure(&mut builder)?;
            let added = builder.added().to_vec();
            let jobs = builder.finish()?;
            registry.validate_jobs(added.iter().filter_map(|id| jobs.get(id)))?;

            txn.record.set_jobs(jobs);
            tracing::debug!(workflow_id = %workflow_id, anchor_id, added = added.len(), "graph extended");
            txn.emit(WorkflowEvent::GraphExtended {
                workflow_id,
                anchor_id: anchor_id.to_string(),
                added: added.clone(),
            });
            let anchor = txn.job(anchor_id)?.clone();
            Ok((anchor, added))
        })
        .await
    }
}

impl<S, D> GraphExtender for Manager<S, D>
where
    S: WorkflowStore,
    D: Dispatcher,
{
    fn extend<'a>(
        &'a self,
        workflow_id: Uuid,
        anchor_id: &'a str,
        configure: ConfigureFn,
    ) -> Pin<Box<dyn Future<Output = Result<(JobRecord, Vec<String>), ManagerError>> + Send + 'a>>
    {
        Box::pin(self.configure(workflow_id, anchor_id, configure))
    }
}

impl<S, D> std::fmt::Debug for Manager<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("registry", &self.registry)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
