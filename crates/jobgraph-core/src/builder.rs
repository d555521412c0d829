//! Workflow graph builder.
//!
//! Jobs are declared with `run`, optionally naming the jobs they must run
//! `after` and `before`. A reference is either a job id or a job type; edges
//! are resolved only in [`WorkflowBuilder::finish`], so a job may reference
//! one declared later in the same pass.
//!
//! An anchored builder is used for dynamic graph extension: every job it
//! declares runs after the anchor job and before the anchor's current
//! successors.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde_json::Value;
use uuid::Uuid;

use jobgraph_types::job::JobRecord;

/// Errors raised while compiling declarations into a DAG.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("duplicate job id '{0}'")]
    DuplicateJobId(String),

    #[error("no job with id or type '{0}'")]
    NotFound(String),

    #[error("reference '{reference}' is ambiguous: {count} jobs have that type")]
    AmbiguousReference { reference: String, count: usize },

    #[error("cycle detected involving job '{0}'")]
    CycleDetected(String),

    #[error("unknown job type '{0}'")]
    UnknownJobType(String),

    #[error("unknown workflow type '{0}'")]
    UnknownWorkflowType(String),

    #[error("invalid workflow configuration: {0}")]
    Invalid(String),
}

/// Per-job options for [`WorkflowBuilder::run`].
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    /// Explicit id; a UUIDv7 is generated when absent.
    pub id: Option<String>,
    pub params: Value,
    /// References of jobs that must wait for this one.
    pub before: Vec<String>,
    /// References of jobs this one waits for.
    pub after: Vec<String>,
}

impl JobSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn before(mut self, reference: impl Into<String>) -> Self {
        self.before.push(reference.into());
        self
    }

    pub fn after(mut self, reference: impl Into<String>) -> Self {
        self.after.push(reference.into());
        self
    }
}

/// Unresolved edge between two references.
#[derive(Debug, Clone)]
struct PendingEdge {
    from: String,
    to: String,
}

/// Compiles job declarations into a job map with symmetric edges.
#[derive(Debug)]
pub struct WorkflowBuilder {
    workflow_id: Uuid,
    jobs: BTreeMap<String, JobRecord>,
    /// Job type -> ids, in declaration order.
    by_type: HashMap<String, Vec<String>>,
    edges: Vec<PendingEdge>,
    anchor: Option<String>,
    added: Vec<String>,
}

impl WorkflowBuilder {
    /// Start an empty graph for `workflow_id`.
    pub fn new(workflow_id: Uuid) -> Self {
        Self::from_jobs(workflow_id, BTreeMap::new())
    }

    /// Start from an existing job map. Its edges are kept as they are.
    pub fn from_jobs(workflow_id: Uuid, jobs: BTreeMap<String, JobRecord>) -> Self {
        let mut by_type: HashMap<String, Vec<String>> = HashMap::new();
        for job in jobs.values() {
            by_type
                .entry(job.job_type.clone())
                .or_default()
                .push(job.id.clone());
        }
        Self {
            workflow_id,
            jobs,
            by_type,
            edges: Vec::new(),
            anchor: None,
            added: Vec::new(),
        }
    }

    /// Place every job declared from now on after `anchor_id` and before the
    /// anchor's current successors.
    pub fn anchored(mut self, anchor_id: &str) -> Result<Self, BuildError> {
        if !self.jobs.contains_key(anchor_id) {
            return Err(BuildError::NotFound(anchor_id.to_string()));
        }
        self.anchor = Some(anchor_id.to_string());
        Ok(self)
    }

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    /// Ids of the jobs declared through this builder.
    pub fn added(&self) -> &[String] {
        &self.added
    }

    pub fn job(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.get(id)
    }

    /// Declare a job and return its id.
    pub fn run(&mut self, job_type: &str, spec: JobSpec) -> Result<String, BuildError> {
        let JobSpec {
            id,
            params,
            mut before,
            mut after,
        } = spec;

        if let Some(anchor_id) = &self.anchor {
            after.push(anchor_id.clone());
            if let Some(anchor) = self.jobs.get(anchor_id) {
                before.extend(anchor.outgoing.iter().cloned());
            }
        }

        let job = JobRecord::new(self.workflow_id, job_type, id, params);
        if self.jobs.contains_key(&job.id) {
            return Err(BuildError::DuplicateJobId(job.id));
        }
        let id = job.id.clone();

        for reference in after {
            self.edges.push(PendingEdge {
                from: reference,
                to: id.clone(),
            });
        }
        for reference in before {
            self.edges.push(PendingEdge {
                from: id.clone(),
                to: reference,
            });
        }

        self.by_type
            .entry(job_type.to_string())
            .or_default()
            .push(id.clone());
        self.jobs.insert(id.clone(), job);
        self.added.push(id.clone());

        tracing::trace!(workflow_id = %self.workflow_id, job_id = %id, job_type, "job declared");
        Ok(id)
    }

    /// Resolve a reference: an exact id wins, otherwise it must name exactly
    /// one job type instance.
    pub fn find(&self, reference: &str) -> Result<&JobRecord, BuildError> {
        if let Some(job) = self.jobs.get(reference) {
            return Ok(job);
        }
        match self.by_type.get(reference).map(Vec::as_slice) {
            Some([id]) => self
                .jobs
                .get(id)
                .ok_or_else(|| BuildError::NotFound(reference.to_string())),
            Some(ids) if ids.len() > 1 => Err(BuildError::AmbiguousReference {
                reference: reference.to_string(),
                count: ids.len(),
            }),
            _ => Err(BuildError::NotFound(reference.to_string())),
        }
    }

    /// Resolve pending edges, check acyclicity, and hand back the job map.
    pub fn finish(mut self) -> Result<BTreeMap<String, JobRecord>, BuildError> {
        let edges = std::mem::take(&mut self.edges);
        let mut resolved = Vec::with_capacity(edges.len());
        for edge in &edges {
            let from = self.find(&edge.from)?.id.clone();
            let to = self.find(&edge.to)?.id.clone();
            resolved.push((from, to));
        }

        for (from, to) in &resolved {
            if let Some(job) = self.jobs.get_mut(to) {
                job.add_incoming(from);
            }
            if let Some(job) = self.jobs.get_mut(from) {
                job.add_outgoing(to);
            }
        }

        ensure_acyclic(&self.jobs)?;
        Ok(self.jobs)
    }
}

/// Reject job maps whose edges form a cycle.
pub fn ensure_acyclic(jobs: &BTreeMap<String, JobRecord>) -> Result<(), BuildError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, _> = jobs
        .keys()
        .map(|id| (id.as_str(), graph.add_node(id.as_str())))
        .collect();

    for (key, job) in jobs {
        if *key != job.id {
            return Err(BuildError::Invalid(format!(
                "job stored under '{key}' has id '{}'",
                job.id
            )));
        }
        let from = *indices
            .get(key.as_str())
            .ok_or_else(|| BuildError::NotFound(key.clone()))?;
        for next in &job.outgoing {
            let to = indices
                .get(next.as_str())
                .ok_or_else(|| BuildError::NotFound(next.clone()))?;
            graph.add_edge(from, *to, ());
        }
    }

    toposort(&graph, None).map_err(|cycle| BuildError::CycleDetected(graph[cycle.node_id()].to_string()))?;
    Ok(())
}
