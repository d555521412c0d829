//! SQLite workflow store implementation.
//!
//! Implements `WorkflowStore` from `jobgraph-core` using sqlx with split
//! read/write pools. Each workflow is one row: the full record as a JSON
//! document, plus the columns needed for lookups and for the partial unique
//! index that enforces the singleton policy.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use jobgraph_core::repository::{WorkflowLock, WorkflowLocks, WorkflowStore};
use jobgraph_types::error::RepositoryError;
use jobgraph_types::workflow::WorkflowRecord;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowStore`.
///
/// Workflow locks are held in process memory, so every manager writing to
/// one database must share a single store instance.
pub struct SqliteWorkflowStore {
    pool: DatabasePool,
    locks: WorkflowLocks,
}

impl SqliteWorkflowStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            locks: WorkflowLocks::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    document: String,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            document: row.try_get("document")?,
        })
    }

    fn into_record(self) -> Result<WorkflowRecord, RepositoryError> {
        let record: WorkflowRecord = serde_json::from_str(&self.document)
            .map_err(|e| RepositoryError::Query(format!("invalid workflow document: {e}")))?;
        let id = parse_uuid(&self.id)?;
        if record.id != id {
            return Err(RepositoryError::Query(format!(
                "workflow document id {} does not match row id {id}",
                record.id
            )));
        }
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn to_document(record: &WorkflowRecord) -> Result<String, RepositoryError> {
    serde_json::to_string(record)
        .map_err(|e| RepositoryError::Query(format!("serialize workflow: {e}")))
}

/// Unique violations mean a duplicate id or a second active singleton.
fn map_write_error(err: sqlx::Error, record: &WorkflowRecord) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(format!(
                "workflow {} ({}) violates a uniqueness constraint",
                record.id, record.workflow_type
            ))
        }
        _ => RepositoryError::Query(err.to_string()),
    }
}

// ---------------------------------------------------------------------------
// WorkflowStore impl
// ---------------------------------------------------------------------------

impl WorkflowStore for SqliteWorkflowStore {
    async fn insert(&self, record: &WorkflowRecord) -> Result<(), RepositoryError> {
        let document = to_document(record)?;

        sqlx::query(
            r#"INSERT INTO workflows
               (id, workflow_type, status, singleton, identifier, document, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.workflow_type)
        .bind(record.status.as_str())
        .bind(record.singleton)
        .bind(&record.identifier)
        .bind(&document)
        .bind(format_datetime(&record.created_at))
        .bind(format_datetime(&record.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| map_write_error(e, record))?;

        Ok(())
    }

    async fn save(&self, record: &WorkflowRecord) -> Result<(), RepositoryError> {
        let document = to_document(record)?;

        let result = sqlx::query(
            r#"UPDATE workflows
               SET status = ?, singleton = ?, identifier = ?, document = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(record.status.as_str())
        .bind(record.singleton)
        .bind(&record.identifier)
        .bind(&document)
        .bind(format_datetime(&record.updated_at))
        .bind(record.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| map_write_error(e, record))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<WorkflowRecord>, RepositoryError> {
        let row = sqlx::query("SELECT id, document FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = WorkflowRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn lock(&self, id: &Uuid) -> Result<WorkflowLock, RepositoryError> {
        Ok(self.locks.acquire(*id).await)
    }

    async fn find_active(
        &self,
        workflow_type: &str,
        identifier: Option<&str>,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT id FROM workflows
               WHERE workflow_type = ?
                 AND COALESCE(identifier, '') = ?
                 AND status IN ('running', 'suspended')
               ORDER BY id ASC"#,
        )
        .bind(workflow_type)
        .bind(identifier.unwrap_or(""))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row
                .try_get("id")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            ids.push(parse_uuid(&id)?);
        }
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
