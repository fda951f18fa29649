use anyhow::Result;
use async_trait::async_trait;

use crate::db::models::WorkflowRecord;
use crate::db::Database;

/// Persistence seam for workflow snapshots. The production implementation is
/// the SQLite-backed `Database`; tests substitute slow or failing stores to
/// drive the restoration race and retry paths.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    async fn load_snapshot(
        &self,
        project_id: &str,
        target_language: &str,
    ) -> Result<Option<WorkflowRecord>>;

    async fn save_snapshot(&self, workflow: &WorkflowRecord) -> Result<()>;
}

#[async_trait]
impl SnapshotStore for Database {
    async fn load_snapshot(
        &self,
        project_id: &str,
        target_language: &str,
    ) -> Result<Option<WorkflowRecord>> {
        self.get_workflow(project_id, target_language).await
    }

    async fn save_snapshot(&self, workflow: &WorkflowRecord) -> Result<()> {
        self.upsert_workflow(workflow).await
    }
}
