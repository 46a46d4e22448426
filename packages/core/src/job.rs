//! Job domain types for batch-update work items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::field::FieldType;

/// Default cap on the number of error details kept per job.
pub const DEFAULT_MAX_ERROR_DETAILS: usize = 100;

/// Unique identifier for a job, assigned sequentially by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, std::num::ParseIntError> {
        Ok(Self(s.trim().parse()?))
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the user that owns a job or a live connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current status of a job in its lifecycle.
///
/// Transitions are monotonic: `Pending -> Processing -> Completed | Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for the dispatcher.
    #[default]
    Pending,
    /// Owned by the dispatcher; counters are being written.
    Processing,
    /// All rows were visited. Row-level errors do not fail a job.
    Completed,
    /// Validation failure, cancellation or deadline.
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse the string form produced by [`JobStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of the uploaded file mapped onto a custom field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Column header as it appears in the file.
    pub column: String,
    /// Target custom-field identifier. Ignored for the identifier column.
    #[serde(default)]
    pub field_id: String,
    /// Declared field type; falls back to the custom-field catalogue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
    /// Marks the column holding the task identifier.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_identifier: bool,
}

impl MappingEntry {
    pub fn new(column: impl Into<String>, field_id: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            field_id: field_id.into(),
            field_type: None,
            is_identifier: false,
        }
    }

    /// A mapping entry that only flags the identifier column.
    pub fn identifier(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            field_id: String::new(),
            field_type: None,
            is_identifier: true,
        }
    }

    pub fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }
}

/// Ordered column -> field mapping. Column names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping(Vec<MappingEntry>);

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mapping, rejecting duplicate column names.
    pub fn from_entries(entries: Vec<MappingEntry>) -> Result<Self, MappingError> {
        let mut mapping = Self::new();
        for entry in entries {
            mapping.push(entry)?;
        }
        Ok(mapping)
    }

    /// Append an entry, rejecting duplicate column names.
    pub fn push(&mut self, entry: MappingEntry) -> Result<(), MappingError> {
        if entry.column.trim().is_empty() {
            return Err(MappingError::EmptyColumn);
        }
        if self.get(&entry.column).is_some() {
            return Err(MappingError::DuplicateColumn(entry.column));
        }
        if !entry.is_identifier && entry.field_id.trim().is_empty() {
            return Err(MappingError::MissingFieldId(entry.column));
        }
        self.0.push(entry);
        Ok(())
    }

    pub fn get(&self, column: &str) -> Option<&MappingEntry> {
        self.0.iter().find(|e| e.column == column)
    }

    /// The entry explicitly flagged as the identifier column, if any.
    pub fn identifier(&self) -> Option<&MappingEntry> {
        self.0.iter().find(|e| e.is_identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Invalid column mapping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("mapping contains an empty column name")]
    EmptyColumn,
    #[error("column '{0}' is mapped more than once")]
    DuplicateColumn(String),
    #[error("column '{0}' has no target field")]
    MissingFieldId(String),
}

/// A job represents one uploaded file to apply against the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Owner of the job; selects credential and progress recipients.
    pub user_id: UserId,
    /// Human-readable title.
    pub title: String,
    /// Current status.
    pub status: JobStatus,
    /// Opaque handle to the parsed file, owned by the upload collaborator.
    pub data_handle: String,
    /// Column -> field mapping.
    pub mapping: ColumnMapping,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Bounded list of per-row or job-level error messages.
    #[serde(default)]
    pub error_details: Vec<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
    /// Set exactly when the job reaches a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job with zeroed counters.
    pub fn new(
        id: JobId,
        user_id: UserId,
        title: impl Into<String>,
        data_handle: impl Into<String>,
        mapping: ColumnMapping,
        total_rows: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            title: title.into(),
            status: JobStatus::Pending,
            data_handle: data_handle.into(),
            mapping,
            total_rows,
            processed_rows: 0,
            success_count: 0,
            error_count: 0,
            error_details: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Snapshot of the counters as a progress event.
    pub fn progress(&self, message: impl Into<String>) -> crate::ProgressEvent {
        crate::ProgressEvent {
            job_id: self.id,
            status: self.status,
            processed_rows: self.processed_rows,
            total_rows: self.total_rows,
            success_count: self.success_count,
            error_count: self.error_count,
            message: message.into(),
        }
    }
}

/// Append `detail` to `details`, keeping at most `max` entries.
///
/// Once the cap is reached the last slot holds an overflow marker and further
/// details are dropped.
pub fn push_error_detail(details: &mut Vec<String>, detail: String, max: usize) {
    if details.len() < max {
        details.push(detail);
    } else if !is_overflow_marker(details.last())
        && let Some(last) = details.last_mut()
    {
        *last = OVERFLOW_MARKER.to_string();
    }
}

/// Append a job-level failure reason, which always survives the cap.
///
/// When `details` is full the reason takes the last slot and the overflow
/// marker moves just before it.
pub fn push_final_detail(details: &mut Vec<String>, detail: String, max: usize) {
    let max = max.max(1);
    if details.len() < max {
        details.push(detail);
        return;
    }

    details.truncate(max - 1);
    if !is_overflow_marker(details.last())
        && let Some(last) = details.last_mut()
    {
        *last = OVERFLOW_MARKER.to_string();
    }
    details.push(detail);
}

const OVERFLOW_MARKER: &str = "... further errors omitted";

fn is_overflow_marker(detail: Option<&String>) -> bool {
    detail.is_some_and(|d| d == OVERFLOW_MARKER)
}
