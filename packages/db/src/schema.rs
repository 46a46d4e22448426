//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// Creates the job table, its indexes and the id sequence. Safe to run on
/// every startup.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.conn().query(JOB_SCHEMA).await?.check()?;
    db.conn().query(SEQUENCE_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// Timestamps are stored as epoch milliseconds so ordering and retention
/// comparisons are plain integer comparisons.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS job_id ON job TYPE int;
DEFINE FIELD IF NOT EXISTS user_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS status ON job TYPE string ASSERT $value IN ["pending", "processing", "completed", "failed"];
DEFINE FIELD IF NOT EXISTS error_details ON job TYPE array<string> DEFAULT [];
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE int;
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE int;

-- FIFO polling: oldest pending job first
DEFINE INDEX IF NOT EXISTS job_status_created ON job FIELDS status, created_at;
DEFINE INDEX IF NOT EXISTS job_user ON job FIELDS user_id;
DEFINE INDEX IF NOT EXISTS job_number ON job FIELDS job_id UNIQUE;
"#;

/// Monotonic id sequence for jobs.
const SEQUENCE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS sequence SCHEMALESS;
"#;
