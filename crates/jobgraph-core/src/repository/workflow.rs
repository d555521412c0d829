//! Workflow store trait definition.

use jobgraph_types::error::RepositoryError;
use jobgraph_types::workflow::WorkflowRecord;
use uuid::Uuid;

use super::lock::WorkflowLock;

/// Persistence for workflow records and their job maps.
///
/// Implementations live in jobgraph-infra (e.g., SqliteWorkflowStore) and in
/// [`super::MemoryWorkflowStore`].
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
///
/// A record is always written whole. Saving a singleton workflow in an
/// active status while another active instance with the same type and
/// identifier exists must fail with [`RepositoryError::Conflict`].
pub trait WorkflowStore: Send + Sync {
    /// Persist a new workflow.
    fn insert(
        &self,
        record: &WorkflowRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite an existing workflow. Fails with `NotFound` if it was never inserted.
    fn save(
        &self,
        record: &WorkflowRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn load(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRecord>, RepositoryError>> + Send;

    /// Acquire the exclusive per-workflow lock. Released when the guard drops.
    fn lock(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<WorkflowLock, RepositoryError>> + Send;

    /// Ids of running or suspended workflows with this type and identifier.
    fn find_active(
        &self,
        workflow_type: &str,
        identifier: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send;
}
