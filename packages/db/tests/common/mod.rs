use bulk_core::{ColumnMapping, MappingEntry};
use db::{DbConfig, DbError, JobQueue};

/// Fresh in-memory database per test; no shared state between tests.
pub async fn setup_queue() -> Result<JobQueue, DbError> {
    let db = db::connect_and_migrate(&DbConfig::memory()).await?;
    Ok(JobQueue::new(db))
}

pub fn sample_mapping() -> ColumnMapping {
    let mut mapping = ColumnMapping::new();
    mapping
        .push(MappingEntry::identifier("task_id"))
        .expect("identifier column");
    mapping
        .push(MappingEntry::new("Priority", "f1"))
        .expect("priority column");
    mapping
}
