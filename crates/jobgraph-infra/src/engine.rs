//! Engine assembly: SQLite store + in-process queue + manager + worker pool.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use jobgraph_core::dispatch::{DispatchRequest, QueueDispatcher};
use jobgraph_core::job::Registry;
use jobgraph_core::manager::Manager;
use jobgraph_core::worker::{Worker, WorkerPool};
use jobgraph_types::config::EngineConfig;

use crate::config::{load_engine_config, resolve_database_url};
use crate::sqlite::{DatabasePool, SqliteWorkflowStore};

pub type SqliteManager = Manager<SqliteWorkflowStore, QueueDispatcher>;
pub type SqliteWorkerPool = WorkerPool<SqliteWorkflowStore, QueueDispatcher>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cannot create data directory {path}: {source}")]
    DataDir {
        path: String,
        source: std::io::Error,
    },
}

/// A ready-to-run engine backed by SQLite.
pub struct Engine {
    config: EngineConfig,
    manager: Arc<SqliteManager>,
    pool: SqliteWorkerPool,
    receiver: mpsc::Receiver<DispatchRequest>,
}

impl Engine {
    /// Open the engine for `data_dir`, reading `jobgraph.toml` from it.
    pub async fn open(data_dir: &Path, registry: Registry) -> Result<Self, EngineError> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|source| EngineError::DataDir {
                path: data_dir.display().to_string(),
                source,
            })?;
        let config = load_engine_config(data_dir).await;
        let database_url = resolve_database_url(&config, data_dir);
        Self::open_with(config, &database_url, registry).await
    }

    pub async fn open_with(
        config: EngineConfig,
        database_url: &str,
        registry: Registry,
    ) -> Result<Self, EngineError> {
        let db = DatabasePool::new(database_url).await?;
        let store = Arc::new(SqliteWorkflowStore::new(db));
        let (dispatcher, receiver) = QueueDispatcher::channel(config.queue_capacity);
        let manager = Arc::new(Manager::new(store, dispatcher, Arc::new(registry)));
        let pool = WorkerPool::from_config(Worker::new(manager.clone()), &config);

        tracing::info!(
            concurrency = config.concurrency,
            queue_capacity = config.queue_capacity,
            "engine opened"
        );
        Ok(Self {
            config,
            manager,
            pool,
            receiver,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<SqliteManager> {
        &self.manager
    }

    /// Token that stops [`Self::run`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.pool.cancellation_token()
    }

    /// Run queued jobs one at a time until nothing is left to do.
    pub async fn run_until_idle(&mut self) -> usize {
        self.pool.drain(&mut self.receiver).await
    }

    /// Run the worker pool until cancelled. Consumes the engine.
    pub async fn run(self) -> usize {
        let Engine { pool, receiver, .. } = self;
        pool.run(receiver).await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
