use crate::task::TaskRecord;
use async_trait::async_trait;
use maestro_core::MaestroResult;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Injected key-value store for task records.
///
/// The orchestrator follows a single-writer-per-key discipline: only the
/// future executing a task writes that task's record. Implementations
/// therefore need no per-key coordination beyond plain interior
/// mutability. Persistence, encryption, and tenancy are the embedding
/// backend's responsibility.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch a snapshot of a record.
    async fn get(&self, id: Uuid) -> MaestroResult<Option<TaskRecord>>;
    /// Upsert a record under its `task_id`.
    async fn put(&self, record: &TaskRecord) -> MaestroResult<()>;
    /// All known task ids.
    async fn list(&self) -> MaestroResult<Vec<Uuid>>;
}

/// In-memory store. The default for embedding and tests.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
}

impl MemoryTaskStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get(&self, id: Uuid) -> MaestroResult<Option<TaskRecord>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn put(&self, record: &TaskRecord) -> MaestroResult<()> {
        self.tasks
            .write()
            .await
            .insert(record.task_id, record.clone());
        Ok(())
    }

    async fn list(&self) -> MaestroResult<Vec<Uuid>> {
        Ok(self.tasks.read().await.keys().copied().collect())
    }
}
