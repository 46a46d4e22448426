//! Row-by-row application of an uploaded sheet to the tracker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actors::{JobProcessor, ProcessFuture};
use bulk_core::metrics::names;
use bulk_core::{
    FieldType, Job, MappingEntry, MetricsSink, NoopMetrics, SheetData, push_error_detail,
};
use db::JobQueue;
use realtime::ProgressHub;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracker::{ApiError, ClientConfig, RateLimiterConfig, RetryPolicy, TrackerClient};

use crate::{CustomFieldSource, EngineError, FileSource, UserConfigSource};

/// Header names accepted as the task identifier when no column is flagged.
pub const IDENTIFIER_ALIASES: &[&str] = &["id task", "id_task", "task_id", "taskid", "id"];

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Persist and broadcast progress every N rows.
    pub progress_every: u64,
    pub api_base_url: String,
    pub retry: RetryPolicy,
    /// Burst size of the per-user limiter.
    pub burst: u32,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            progress_every: 10,
            api_base_url: "https://api.tracker.example/v2".to_string(),
            retry: RetryPolicy::default(),
            burst: RateLimiterConfig::default().burst,
            timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_progress_every(mut self, every: u64) -> Self {
        self.progress_every = every.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Counters of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: u64,
    pub success: u64,
    pub errors: u64,
}

/// A mapped data column resolved against the sheet header.
#[derive(Debug, Clone)]
struct ColumnPlan {
    index: usize,
    column: String,
    field_id: String,
    field_type: FieldType,
}

/// Running counters for one job.
struct Tally {
    summary: RunSummary,
    details: Vec<String>,
    max_details: usize,
    persisted: u64,
}

impl Tally {
    fn new(max_details: usize) -> Self {
        Self {
            summary: RunSummary::default(),
            details: Vec::new(),
            max_details,
            persisted: 0,
        }
    }

    fn success(&mut self) {
        self.summary.processed += 1;
        self.summary.success += 1;
    }

    fn error(&mut self, detail: String) {
        self.summary.processed += 1;
        self.summary.errors += 1;
        push_error_detail(&mut self.details, detail, self.max_details);
    }
}

struct Inner {
    queue: JobQueue,
    hub: Arc<ProgressHub>,
    files: Arc<dyn FileSource>,
    users: Arc<dyn UserConfigSource>,
    fields: Arc<dyn CustomFieldSource>,
    config: EngineConfig,
}

/// Applies each row of a job's sheet through a per-user tracker client.
///
/// Cheap to clone; the dispatcher runs a clone per job.
#[derive(Clone)]
pub struct BatchUpdateEngine {
    inner: Arc<Inner>,
    metrics: Arc<dyn MetricsSink>,
}

impl BatchUpdateEngine {
    pub fn new(
        queue: JobQueue,
        hub: Arc<ProgressHub>,
        files: Arc<dyn FileSource>,
        users: Arc<dyn UserConfigSource>,
        fields: Arc<dyn CustomFieldSource>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                hub,
                files,
                users,
                fields,
                config,
            }),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Process every row of `job`. The job must already be `processing`.
    ///
    /// Returns an error only for job-level failures; the dispatcher records
    /// the terminal state.
    pub async fn run(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, EngineError> {
        let inner = &self.inner;
        let sheet = inner.files.get_file_data(&job.data_handle).await?;

        let id_index = resolve_identifier(job, &sheet)?;
        if sheet.len() as u64 > job.total_rows {
            return Err(EngineError::Validation(format!(
                "File has {} rows but the job expects {}",
                sheet.len(),
                job.total_rows
            )));
        }
        let id_column = sheet.columns.get(id_index).cloned().unwrap_or_default();
        let mapped: Vec<&MappingEntry> = job
            .mapping
            .iter()
            .filter(|e| !e.is_identifier && e.column != id_column)
            .collect();
        let missing: Vec<&str> = mapped
            .iter()
            .filter(|e| find_column(&sheet, &e.column).is_none())
            .map(|e| e.column.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::Validation(format!(
                "Mapped columns not found in file: {}",
                missing.join(", ")
            )));
        }

        if sheet.is_empty() {
            info!(job_id = %job.id, "File has no data rows");
            return Ok(RunSummary::default());
        }

        let user_config = inner.users.get_user_config(&job.user_id).await?;
        let custom_fields: HashMap<String, FieldType> = inner
            .fields
            .get_custom_fields(&job.user_id)
            .await?
            .into_iter()
            .map(|f| {
                let field_type = f.field_type();
                (f.id, field_type)
            })
            .collect();

        let plan: Vec<ColumnPlan> = mapped
            .into_iter()
            .filter_map(|entry| {
                let index = find_column(&sheet, &entry.column)?;
                let field_type = entry
                    .field_type
                    .or_else(|| custom_fields.get(&entry.field_id).copied())
                    .unwrap_or_default();
                Some(ColumnPlan {
                    index,
                    column: entry.column.clone(),
                    field_id: entry.field_id.clone(),
                    field_type,
                })
            })
            .collect();

        let client = TrackerClient::new(
            ClientConfig::new(&inner.config.api_base_url, user_config.api_token)
                .with_rate_limit(
                    RateLimiterConfig::per_minute(user_config.rate_limit_per_minute)
                        .with_burst(inner.config.burst),
                )
                .with_retry(inner.config.retry.clone())
                .with_timeout(inner.config.timeout),
        )?
        .with_metrics(self.metrics.clone());

        info!(
            job_id = %job.id,
            user_id = %job.user_id,
            rows = sheet.len(),
            columns = plan.len(),
            identifier = %id_column,
            "Starting batch update"
        );

        let mut tally = Tally::new(inner.queue.max_error_details());
        let last = sheet.len() - 1;
        let every = inner.config.progress_every.max(1);

        for (i, row) in sheet.rows.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(self.abort(job, &mut tally).await);
            }

            // Header is line 1 of the spreadsheet.
            let line = i + 2;
            match self
                .apply_row(cancel, line, row, id_index, &plan, &client)
                .await
            {
                Ok(()) => {
                    tally.success();
                    self.metrics.increment(names::ROWS_SUCCEEDED, 1);
                }
                Err(RowError::Cancelled) => return Err(self.abort(job, &mut tally).await),
                Err(RowError::Failed(detail)) => {
                    debug!(job_id = %job.id, line, detail = %detail, "Row failed");
                    tally.error(detail);
                    self.metrics.increment(names::ROWS_FAILED, 1);
                }
            }

            if tally.summary.processed % every == 0 || i == last {
                self.flush(job, &mut tally).await?;
            }
        }

        info!(
            job_id = %job.id,
            success = tally.summary.success,
            errors = tally.summary.errors,
            "Batch update finished"
        );
        Ok(tally.summary)
    }

    async fn apply_row(
        &self,
        cancel: &CancellationToken,
        line: usize,
        row: &[String],
        id_index: usize,
        plan: &[ColumnPlan],
        client: &TrackerClient,
    ) -> Result<(), RowError> {
        let task_id = row.get(id_index).map(|s| s.trim()).unwrap_or_default();
        if task_id.is_empty() {
            return Err(RowError::Failed(format!("Row {line}: missing task identifier")));
        }

        for column in plan {
            let cell = row.get(column.index).map(|s| s.trim()).unwrap_or_default();
            if cell.is_empty() {
                continue;
            }

            match client
                .set_field_value_with_retry(
                    cancel,
                    task_id,
                    &column.field_id,
                    cell,
                    column.field_type,
                )
                .await
            {
                Ok(()) => {}
                Err(ApiError::Cancelled) => return Err(RowError::Cancelled),
                Err(e) => {
                    return Err(RowError::Failed(format!(
                        "Row {line} (task {task_id}): column '{}': {e}",
                        column.column
                    )));
                }
            }
        }
        Ok(())
    }

    /// Persist the counters and tell the owner.
    async fn flush(&self, job: &Job, tally: &mut Tally) -> Result<(), EngineError> {
        let s = tally.summary;
        let updated = self
            .inner
            .queue
            .record_progress(job.id, s.processed, s.success, s.errors, &tally.details)
            .await?;
        tally.persisted = s.processed;

        let message = format!("Processed {} of {} rows", s.processed, job.total_rows);
        self.inner
            .hub
            .send_to_user(&job.user_id, &updated.progress(message));
        Ok(())
    }

    /// Persist whatever was counted since the last checkpoint, then report
    /// the cancellation.
    async fn abort(&self, job: &Job, tally: &mut Tally) -> EngineError {
        let processed = tally.summary.processed;
        warn!(job_id = %job.id, processed, "Batch update cancelled");
        if processed > tally.persisted
            && let Err(e) = self.flush(job, tally).await
        {
            warn!(job_id = %job.id, error = %e, "Failed to persist progress on cancel");
        }
        EngineError::Cancelled { processed }
    }
}

enum RowError {
    Failed(String),
    Cancelled,
}

impl JobProcessor for BatchUpdateEngine {
    fn process(&self, job: Job, cancel: CancellationToken) -> ProcessFuture {
        let engine = self.clone();
        Box::pin(async move {
            engine
                .run(&job, &cancel)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
    }
}

/// Locate the identifier column: the flagged mapping entry, else the first
/// known alias present in the header.
pub fn resolve_identifier(job: &Job, sheet: &SheetData) -> Result<usize, EngineError> {
    if let Some(entry) = job.mapping.identifier() {
        return find_column(sheet, &entry.column).ok_or_else(|| {
            EngineError::Validation(format!(
                "Identifier column '{}' not found in file",
                entry.column
            ))
        });
    }

    IDENTIFIER_ALIASES
        .iter()
        .find_map(|alias| sheet.column_index_ignore_case(alias))
        .ok_or_else(|| EngineError::Validation("Missing identifier column".to_string()))
}

fn find_column(sheet: &SheetData, name: &str) -> Option<usize> {
    sheet
        .column_index(name)
        .or_else(|| sheet.column_index_ignore_case(name))
}
