//! Persistent FIFO job queue.

use std::time::Duration;

use bulk_core::{
    ColumnMapping, DEFAULT_MAX_ERROR_DETAILS, Job, JobId, JobStatus, UserId, push_error_detail,
    push_final_detail,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{Database, DbError};

/// Retention for failed jobs before cleanup evicts them.
pub const DEFAULT_FAILED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Internal record type for SurrealDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecord {
    job_id: i64,
    user_id: String,
    title: String,
    status: String,
    data_handle: String,
    mapping: ColumnMapping,
    total_rows: u64,
    processed_rows: u64,
    success_count: u64,
    error_count: u64,
    #[serde(default)]
    error_details: Vec<String>,
    created_at: i64,
    updated_at: i64,
    #[serde(default)]
    completed_at: Option<i64>,
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.0,
            user_id: job.user_id.0.clone(),
            title: job.title.clone(),
            status: job.status.as_str().to_string(),
            data_handle: job.data_handle.clone(),
            mapping: job.mapping.clone(),
            total_rows: job.total_rows,
            processed_rows: job.processed_rows,
            success_count: job.success_count,
            error_count: job.error_count,
            error_details: job.error_details.clone(),
            created_at: job.created_at.timestamp_millis(),
            updated_at: job.updated_at.timestamp_millis(),
            completed_at: job.completed_at.map(|t| t.timestamp_millis()),
        }
    }
}

impl TryFrom<JobRecord> for Job {
    type Error = DbError;

    fn try_from(r: JobRecord) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&r.status)
            .ok_or_else(|| DbError::Query(format!("job {} has status '{}'", r.job_id, r.status)))?;
        Ok(Job {
            id: JobId(r.job_id),
            user_id: UserId(r.user_id),
            title: r.title,
            status,
            data_handle: r.data_handle,
            mapping: r.mapping,
            total_rows: r.total_rows,
            processed_rows: r.processed_rows,
            success_count: r.success_count,
            error_count: r.error_count,
            error_details: r.error_details,
            created_at: from_millis(r.created_at),
            updated_at: from_millis(r.updated_at),
            completed_at: r.completed_at.map(from_millis),
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct SequenceRecord {
    value: i64,
}

/// Repository for job persistence and queue operations.
///
/// Counters of a job are written only by whoever holds it in `processing`;
/// the status machine is the only guard.
#[derive(Debug, Clone)]
pub struct JobQueue {
    db: Database,
    max_error_details: usize,
}

impl JobQueue {
    /// Create a queue over an initialized database.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            max_error_details: DEFAULT_MAX_ERROR_DETAILS,
        }
    }

    /// Set the cap on stored error details.
    pub fn with_max_error_details(mut self, max: usize) -> Self {
        self.max_error_details = max.max(1);
        self
    }

    pub fn max_error_details(&self) -> usize {
        self.max_error_details
    }

    /// Insert a new pending job with zeroed counters.
    pub async fn enqueue(
        &self,
        user_id: UserId,
        title: impl Into<String>,
        data_handle: impl Into<String>,
        mapping: ColumnMapping,
        total_rows: u64,
    ) -> Result<Job, DbError> {
        let id = self.next_id().await?;
        let job = Job::new(id, user_id, title, data_handle, mapping, total_rows);

        let record: Option<JobRecord> = self
            .db
            .conn()
            .create(("job", id.0))
            .content(JobRecord::from(&job))
            .await?;

        let job: Job = record
            .ok_or_else(|| DbError::Query("Failed to create job".into()))?
            .try_into()?;

        tracing::info!(job_id = %job.id, user_id = %job.user_id, total_rows, "Job enqueued");
        Ok(job)
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: JobId) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self.db.conn().select(("job", id.0)).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))?
            .try_into()
    }

    /// All jobs owned by a user, newest first.
    pub async fn get_jobs_by_user(&self, user_id: &UserId) -> Result<Vec<Job>, DbError> {
        let mut result = self
            .db
            .conn()
            .query(
                r#"
                SELECT * FROM job
                WHERE user_id = $user_id
                ORDER BY created_at DESC, job_id DESC
                "#,
            )
            .bind(("user_id", user_id.0.clone()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        records.into_iter().map(Job::try_from).collect()
    }

    /// All jobs currently in `status`, oldest first.
    pub async fn get_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, DbError> {
        let mut result = self
            .db
            .conn()
            .query(
                r#"
                SELECT * FROM job
                WHERE status = $status
                ORDER BY created_at ASC, job_id ASC
                "#,
            )
            .bind(("status", status.as_str()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        records.into_iter().map(Job::try_from).collect()
    }

    /// The oldest pending job, ties broken by id.
    pub async fn next_pending(&self) -> Result<Option<Job>, DbError> {
        let mut result = self
            .db
            .conn()
            .query(
                r#"
                SELECT * FROM job
                WHERE status = "pending"
                ORDER BY created_at ASC, job_id ASC
                LIMIT 1
                "#,
            )
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        records.into_iter().next().map(Job::try_from).transpose()
    }

    /// Move a pending job to `processing`.
    pub async fn mark_processing(&self, id: JobId) -> Result<Job, DbError> {
        let job = self.get_job(id).await?;
        if job.status == JobStatus::Processing {
            return Ok(job);
        }
        Self::check_transition(&job, JobStatus::Processing)?;

        self.merge(
            id,
            json!({
                "status": JobStatus::Processing.as_str(),
                "updated_at": Utc::now().timestamp_millis(),
            }),
        )
        .await
    }

    /// Overwrite the counters of a processing job.
    pub async fn record_progress(
        &self,
        id: JobId,
        processed: u64,
        success: u64,
        errors: u64,
        error_details: &[String],
    ) -> Result<Job, DbError> {
        let job = self.get_job(id).await?;
        if job.status != JobStatus::Processing {
            return Err(DbError::InvalidProgress {
                job_id: id,
                reason: format!("job is {}", job.status),
            });
        }
        if processed != success + errors {
            return Err(DbError::InvalidProgress {
                job_id: id,
                reason: format!("{processed} processed != {success} ok + {errors} errors"),
            });
        }
        if processed > job.total_rows {
            return Err(DbError::InvalidProgress {
                job_id: id,
                reason: format!("{processed} processed > {} total", job.total_rows),
            });
        }

        let mut details = Vec::new();
        for detail in error_details {
            push_error_detail(&mut details, detail.clone(), self.max_error_details);
        }

        self.merge(
            id,
            json!({
                "processed_rows": processed,
                "success_count": success,
                "error_count": errors,
                "error_details": details,
                "updated_at": Utc::now().timestamp_millis(),
            }),
        )
        .await
    }

    /// Move a processing job to `completed`.
    pub async fn mark_completed(&self, id: JobId) -> Result<Job, DbError> {
        let job = self.get_job(id).await?;
        if job.status == JobStatus::Completed {
            return Ok(job);
        }
        Self::check_transition(&job, JobStatus::Completed)?;

        let now = Utc::now().timestamp_millis();
        self.merge(
            id,
            json!({
                "status": JobStatus::Completed.as_str(),
                "updated_at": now,
                "completed_at": now,
            }),
        )
        .await
    }

    /// Move a processing job to `failed`, appending `detail` to its errors.
    pub async fn mark_failed(&self, id: JobId, detail: impl Into<String>) -> Result<Job, DbError> {
        let job = self.get_job(id).await?;
        if job.status == JobStatus::Failed {
            return Ok(job);
        }
        Self::check_transition(&job, JobStatus::Failed)?;

        let mut details = job.error_details;
        push_final_detail(&mut details, detail.into(), self.max_error_details);

        let now = Utc::now().timestamp_millis();
        self.merge(
            id,
            json!({
                "status": JobStatus::Failed.as_str(),
                "error_details": details,
                "updated_at": now,
                "completed_at": now,
            }),
        )
        .await
    }

    /// Remove every completed job. Returns the number removed.
    pub async fn evict_completed(&self) -> Result<usize, DbError> {
        let mut result = self
            .db
            .conn()
            .query(r#"DELETE job WHERE status = "completed" RETURN BEFORE"#)
            .await?;

        let removed: Vec<JobRecord> = result.take(0)?;
        Ok(removed.len())
    }

    /// Remove failed jobs that finished more than `retention` ago.
    pub async fn evict_stale_failed(&self, retention: Duration) -> Result<usize, DbError> {
        self.evict_stale_failed_as_of(retention, Utc::now()).await
    }

    /// [`JobQueue::evict_stale_failed`] evaluated against an explicit `now`.
    pub async fn evict_stale_failed_as_of(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, DbError> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| DbError::Query(format!("Invalid retention: {}", e)))?;
        let cutoff = (now - retention).timestamp_millis();

        let mut result = self
            .db
            .conn()
            .query(
                r#"
                DELETE job
                WHERE status = "failed" AND completed_at != NONE AND completed_at < $cutoff
                RETURN BEFORE
                "#,
            )
            .bind(("cutoff", cutoff))
            .await?;

        let removed: Vec<JobRecord> = result.take(0)?;
        Ok(removed.len())
    }

    fn check_transition(job: &Job, to: JobStatus) -> Result<(), DbError> {
        if job.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(DbError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                to,
            })
        }
    }

    async fn merge(&self, id: JobId, patch: serde_json::Value) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self
            .db
            .conn()
            .update(("job", id.0))
            .merge(patch)
            .await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))?
            .try_into()
    }

    async fn next_id(&self) -> Result<JobId, DbError> {
        let mut result = self
            .db
            .conn()
            .query("UPSERT sequence:job SET value = (value ?? 0) + 1 RETURN AFTER")
            .await?;

        let rows: Vec<SequenceRecord> = result.take(0)?;
        rows.first()
            .map(|r| JobId(r.value))
            .ok_or_else(|| DbError::Query("Failed to allocate job id".into()))
    }
}
