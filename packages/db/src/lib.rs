//! SurrealDB persistence for the bulk update job queue.
//!
//! Callers connect once and pass the resulting [`Database`] handle to
//! whatever needs it; there is no process-wide connection.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError};
pub use repositories::{DEFAULT_FAILED_RETENTION, JobQueue};
pub use schema::init_schema;

/// Connect with the given configuration and apply the schema.
pub async fn connect_and_migrate(config: &DbConfig) -> Result<Database, DbError> {
    let db = Database::connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
