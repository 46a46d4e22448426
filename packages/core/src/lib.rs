//! Core domain types for the bulk task updater.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and the column mapping for batch-update work
//! - Progress events for real-time updates
//! - Field types and cell coercion for the tracker API
//! - The metrics sink interface
//! - Parsed sheet contents

mod events;
mod field;
mod job;
pub mod metrics;
mod sheet;

pub use events::ProgressEvent;
pub use field::{
    CustomField, FieldType, FieldValue, TRUTHY_TOKENS, ValueError, coerce, parse_bool, parse_date,
    parse_number,
};
pub use job::{
    ColumnMapping, DEFAULT_MAX_ERROR_DETAILS, Job, JobId, JobStatus, MappingEntry, MappingError,
    UserId, push_error_detail, push_final_detail,
};
pub use metrics::{CounterMetrics, MetricsSink, NoopMetrics};
pub use sheet::SheetData;
