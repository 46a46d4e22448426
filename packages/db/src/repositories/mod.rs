//! Repository implementations for database operations.

mod job_queue;

pub use job_queue::{DEFAULT_FAILED_RETENTION, JobQueue};
