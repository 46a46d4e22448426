//! Progress events streamed to connected clients.

use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus};

/// Snapshot of a job's counters, pushed to every connection of the job owner.
///
/// Serializes to the wire shape
/// `{job_id, status, processed_rows, total_rows, success_count, error_count, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub processed_rows: u64,
    pub total_rows: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub message: String,
}

impl ProgressEvent {
    /// Whether the counters satisfy `processed = success + errors <= total`.
    pub fn is_consistent(&self) -> bool {
        self.processed_rows == self.success_count + self.error_count
            && self.processed_rows <= self.total_rows
    }

    /// Completion percentage, `None` for empty files.
    pub fn percent(&self) -> Option<f64> {
        if self.total_rows == 0 {
            None
        } else {
            Some(self.processed_rows as f64 / self.total_rows as f64 * 100.0)
        }
    }

    /// Short description for logging.
    pub fn description(&self) -> String {
        format!(
            "Job {} {}: {}/{} rows ({} ok, {} errors)",
            self.job_id,
            self.status,
            self.processed_rows,
            self.total_rows,
            self.success_count,
            self.error_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(processed: u64, ok: u64, err: u64, total: u64) -> ProgressEvent {
        ProgressEvent {
            job_id: JobId(7),
            status: JobStatus::Processing,
            processed_rows: processed,
            total_rows: total,
            success_count: ok,
            error_count: err,
            message: String::new(),
        }
    }

    #[test]
    fn wire_shape() {
        let json = serde_json::to_value(event(3, 1, 2, 3)).unwrap_or_default();
        assert_eq!(json["job_id"], 7);
        assert_eq!(json["status"], "processing");
        assert_eq!(json["processed_rows"], 3);
        assert_eq!(json["success_count"], 1);
        assert_eq!(json["error_count"], 2);
        assert_eq!(json["message"], "");
    }

    #[test]
    fn consistency() {
        assert!(event(3, 1, 2, 3).is_consistent());
        assert!(!event(3, 1, 1, 3).is_consistent());
        assert!(!event(4, 2, 2, 3).is_consistent());
        assert_eq!(event(0, 0, 0, 0).percent(), None);
    }
}
