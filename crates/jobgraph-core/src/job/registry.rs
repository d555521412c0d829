//! Registry of job types and workflow definitions.
//!
//! Persisted jobs name their behavior by a type string. The registry maps
//! those strings back to job factories, and workflow type names to the
//! procedures that declare their initial graph.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use jobgraph_types::job::JobRecord;
use jobgraph_types::workflow::WorkflowRecord;

use super::{BoxJob, Job};
use crate::builder::{BuildError, WorkflowBuilder};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown job type '{0}'")]
    UnknownJobType(String),
}

type JobFactory = Arc<dyn Fn() -> BoxJob + Send + Sync>;

/// Procedure declaring a workflow's jobs from its creation arguments.
pub type ConfigureWorkflowFn =
    Arc<dyn Fn(&mut WorkflowBuilder, &[Value]) -> Result<(), BuildError> + Send + Sync>;

/// A named workflow type.
#[derive(Clone)]
pub struct WorkflowDefinition {
    name: String,
    singleton: bool,
    configure: ConfigureWorkflowFn,
}

impl WorkflowDefinition {
    pub fn new<F>(name: impl Into<String>, configure: F) -> Self
    where
        F: Fn(&mut WorkflowBuilder, &[Value]) -> Result<(), BuildError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            singleton: false,
            configure: Arc::new(configure),
        }
    }

    /// Allow at most one running or suspended instance per identifier.
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("singleton", &self.singleton)
            .finish_non_exhaustive()
    }
}

/// Lookup table populated once at process start.
#[derive(Clone, Default)]
pub struct Registry {
    jobs: HashMap<String, JobFactory>,
    workflows: HashMap<String, WorkflowDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job type. `factory` is called once per invocation.
    pub fn register_job<J, F>(&mut self, job_type: impl Into<String>, factory: F) -> &mut Self
    where
        J: Job,
        F: Fn() -> J + Send + Sync + 'static,
    {
        let job_type = job_type.into();
        tracing::debug!(job_type = %job_type, "registered job type");
        self.jobs
            .insert(job_type, Arc::new(move || BoxJob::new(factory())));
        self
    }

    pub fn register_workflow(&mut self, definition: WorkflowDefinition) -> &mut Self {
        tracing::debug!(workflow_type = %definition.name, singleton = definition.singleton, "registered workflow type");
        self.workflows.insert(definition.name.clone(), definition);
        self
    }

    pub fn has_job_type(&self, job_type: &str) -> bool {
        self.jobs.contains_key(job_type)
    }

    pub fn workflow(&self, workflow_type: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(workflow_type)
    }

    /// Create a fresh instance of a job type.
    pub fn instantiate(&self, job_type: &str) -> Result<BoxJob, RegistryError> {
        self.jobs
            .get(job_type)
            .map(|factory| factory())
            .ok_or_else(|| RegistryError::UnknownJobType(job_type.to_string()))
    }

    /// Check that every job names a registered type.
    pub fn validate_jobs<'a>(
        &self,
        jobs: impl IntoIterator<Item = &'a JobRecord>,
    ) -> Result<(), BuildError> {
        for job in jobs {
            if !self.has_job_type(&job.job_type) {
                return Err(BuildError::UnknownJobType(job.job_type.clone()));
            }
        }
        Ok(())
    }

    /// Build a new, unsaved workflow of a registered type.
    pub fn build(
        &self,
        workflow_type: &str,
        identifier: Option<String>,
        args: &[Value],
    ) -> Result<WorkflowRecord, BuildError> {
        let definition = self
            .workflow(workflow_type)
            .ok_or_else(|| BuildError::UnknownWorkflowType(workflow_type.to_string()))?;

        let record = WorkflowRecord::new(workflow_type);
        let mut builder = WorkflowBuilder::new(record.id);
        (definition.configure)(&mut builder, args)?;
        let jobs = builder.finish()?;
        self.validate_jobs(jobs.values())?;

        Ok(record
            .with_singleton(definition.singleton, identifier)
            .with_jobs(jobs))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut job_types: Vec<_> = self.jobs.keys().collect();
        job_types.sort();
        let mut workflow_types: Vec<_> = self.workflows.keys().collect();
        workflow_types.sort();
        f.debug_struct("Registry")
            .field("job_types", &job_types)
            .field("workflow_types", &workflow_types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::JobSpec;
    use crate::job::{JobContext, JobError, JobResult};
    use jobgraph_types::workflow::WorkflowStatus;
    use serde_json::json;

    struct Noop;

    impl Job for Noop {
        async fn perform(&self, _ctx: &mut JobContext) -> Result<JobResult, JobError> {
            Ok(JobResult::Finished)
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register_job("Fetch", || Noop)
            .register_job("Store", || Noop)
            .register_workflow(WorkflowDefinition::new("Pipeline", |b, args| {
                let source = args.first().cloned().unwrap_or(Value::Null);
                b.run("Fetch", JobSpec::new().params(json!({ "source": source })))?;
                b.run("Store", JobSpec::new().after("Fetch"))?;
                Ok(())
            }))
            .register_workflow(
                WorkflowDefinition::new("Broken", |b, _| {
                    b.run("Missing", JobSpec::new())?;
                    Ok(())
                })
                .singleton(),
            );
        registry
    }

    #[test]
    fn test_build_registered_workflow() {
        let record = registry()
            .build("Pipeline", Some("tenant-1".into()), &[json!("s3://bucket")])
            .unwrap();

        assert_eq!(record.workflow_type, "Pipeline");
        assert_eq!(record.status, WorkflowStatus::Initial);
        assert_eq!(record.identifier.as_deref(), Some("tenant-1"));
        assert!(!record.singleton);
        assert_eq!(record.jobs.len(), 2);
        assert!(record.jobs.values().all(|j| j.workflow_id == record.id));

        let fetch = record.jobs.values().find(|j| j.job_type == "Fetch").unwrap();
        assert_eq!(fetch.params, json!({ "source": "s3://bucket" }));
        assert_eq!(fetch.outgoing.len(), 1);
    }

    #[test]
    fn test_unknown_workflow_type() {
        let err = registry().build("Nope", None, &[]).unwrap_err();
        assert!(matches!(err, BuildError::UnknownWorkflowType(_)));
    }

    #[test]
    fn test_unregistered_job_type_rejected() {
        let err = registry().build("Broken", None, &[]).unwrap_err();
        assert!(matches!(err, BuildError::UnknownJobType(t) if t == "Missing"));
    }

    #[test]
    fn test_instantiate() {
        let registry = registry();
        assert!(registry.instantiate("Fetch").is_ok());
        assert!(matches!(
            registry.instantiate("Nope").unwrap_err(),
            RegistryError::UnknownJobType(_)
        ));
        assert!(registry.workflow("Broken").unwrap().is_singleton());
    }
}
