//! In-memory workflow store.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use jobgraph_types::error::RepositoryError;
use jobgraph_types::workflow::WorkflowRecord;

use super::lock::{WorkflowLock, WorkflowLocks};
use super::workflow::WorkflowStore;

/// [`WorkflowStore`] backed by a map. Records are cloned in and out, so a
/// loaded record is a snapshot exactly like one read from a database.
#[derive(Debug, Default)]
pub struct MemoryWorkflowStore {
    records: RwLock<HashMap<Uuid, WorkflowRecord>>,
    locks: WorkflowLocks,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn singleton_clash<'a>(
    records: &'a HashMap<Uuid, WorkflowRecord>,
    record: &WorkflowRecord,
) -> Option<&'a WorkflowRecord> {
    if !record.singleton || !record.status.is_active() {
        return None;
    }
    records.values().find(|other| {
        other.id != record.id
            && other.singleton
            && other.status.is_active()
            && other.workflow_type == record.workflow_type
            && other.identifier == record.identifier
    })
}

impl WorkflowStore for MemoryWorkflowStore {
    async fn insert(&self, record: &WorkflowRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(RepositoryError::Conflict(format!(
                "workflow {} already exists",
                record.id
            )));
        }
        if let Some(other) = singleton_clash(&records, record) {
            return Err(RepositoryError::Conflict(format!(
                "singleton workflow '{}' already active as {}",
                record.workflow_type, other.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn save(&self, record: &WorkflowRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.id) {
            return Err(RepositoryError::NotFound);
        }
        if let Some(other) = singleton_clash(&records, record) {
            return Err(RepositoryError::Conflict(format!(
                "singleton workflow '{}' already active as {}",
                record.workflow_type, other.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<WorkflowRecord>, RepositoryError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn lock(&self, id: &Uuid) -> Result<WorkflowLock, RepositoryError> {
        Ok(self.locks.acquire(*id).await)
    }

    async fn find_active(
        &self,
        workflow_type: &str,
        identifier: Option<&str>,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let records = self.records.read().await;
        let mut ids: Vec<Uuid> = records
            .values()
            .filter(|r| {
                r.status.is_active()
                    && r.workflow_type == workflow_type
                    && r.identifier.as_deref() == identifier
            })
            .map(|r| r.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgraph_types::workflow::WorkflowStatus;

    fn singleton(identifier: &str) -> WorkflowRecord {
        WorkflowRecord::new("Nightly").with_singleton(true, Some(identifier.to_string()))
    }

    #[tokio::test]
    async fn test_insert_load_save() {
        let store = MemoryWorkflowStore::new();
        let mut record = WorkflowRecord::new("Simple");
        store.insert(&record).await.unwrap();

        record.status = WorkflowStatus::Running;
        store.save(&record).await.unwrap();

        let loaded = store.load(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Running);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let store = MemoryWorkflowStore::new();
        assert!(store.load(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_unknown_is_not_found() {
        let store = MemoryWorkflowStore::new();
        let err = store.save(&WorkflowRecord::new("Simple")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_double_insert_conflicts() {
        let store = MemoryWorkflowStore::new();
        let record = WorkflowRecord::new("Simple");
        store.insert(&record).await.unwrap();
        assert!(matches!(
            store.insert(&record).await.unwrap_err(),
            RepositoryError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_singleton_conflict_only_when_both_active() {
        let store = MemoryWorkflowStore::new();
        let mut first = singleton("tenant-1");
        let mut second = singleton("tenant-1");
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        first.status = WorkflowStatus::Running;
        store.save(&first).await.unwrap();

        second.status = WorkflowStatus::Running;
        assert!(matches!(
            store.save(&second).await.unwrap_err(),
            RepositoryError::Conflict(_)
        ));

        first.status = WorkflowStatus::Succeeded;
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_singleton_scoped_by_identifier() {
        let store = MemoryWorkflowStore::new();
        let mut a = singleton("tenant-1");
        let mut b = singleton("tenant-2");
        a.status = WorkflowStatus::Running;
        b.status = WorkflowStatus::Running;
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        let active = store.find_active("Nightly", Some("tenant-1")).await.unwrap();
        assert_eq!(active, vec![a.id]);
    }
}
