use std::sync::Arc;
use std::time::Duration;

use bulk_core::metrics::names;
use bulk_core::{FieldType, FieldValue, MetricsSink, NoopMetrics, coerce};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sink::{ListExportSummary, TaskSink};
use crate::{
    ApiError, ListFlags, PartialList, RateLimiter, RateLimiterConfig, RetryPolicy, Task, TaskPage,
    retry_with_policy,
};

/// Items per page served by the list endpoint.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Tracker client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `https://api.tracker.example/v2`.
    pub base_url: String,
    /// Credential sent verbatim in the `Authorization` header.
    pub token: String,
    pub page_size: usize,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub rate_limit: RateLimiterConfig,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            page_size: DEFAULT_PAGE_SIZE,
            timeout: Duration::from_secs(30),
            rate_limit: RateLimiterConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimiterConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Rate-limited, retrying HTTP client for one credential.
///
/// The limiter is owned by this instance; build one client per credential.
pub struct TrackerClient {
    http: Client,
    config: ClientConfig,
    limiter: RateLimiter,
    metrics: Arc<dyn MetricsSink>,
}

impl TrackerClient {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            limiter: RateLimiter::new(config.rate_limit),
            config,
            metrics: Arc::new(NoopMetrics),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Fetch one page of tasks.
    pub async fn list_tasks_page(
        &self,
        cancel: &CancellationToken,
        list_id: &str,
        page: u32,
        flags: ListFlags,
    ) -> Result<TaskPage, ApiError> {
        self.limiter.wait(cancel).await?;
        self.metrics.increment(names::API_REQUESTS, 1);

        let url = format!("{}/list/{}/task", self.config.base_url, list_id);
        let request = self
            .http
            .get(&url)
            .header(AUTHORIZATION, &self.config.token)
            .query(&flags.query(page));
        let resp = send(cancel, request).await?;

        let resp = check_status(resp).await?;
        resp.json::<TaskPage>()
            .await
            .map_err(|e| ApiError::Transient(format!("decode error: {e}")))
    }

    /// Fetch every page of a list into memory.
    ///
    /// On a definitive failure the tasks gathered so far are returned inside
    /// the error.
    pub async fn list_all_tasks(
        &self,
        cancel: &CancellationToken,
        list_id: &str,
        flags: ListFlags,
    ) -> Result<Vec<Task>, PartialList> {
        let mut items = Vec::new();
        let mut page = 0;

        loop {
            match self.list_page_with_retry(cancel, list_id, page, flags).await {
                Ok(batch) => {
                    let done = self.is_last(&batch);
                    items.extend(batch.items);
                    if done {
                        return Ok(items);
                    }
                    page += 1;
                }
                Err(source) => {
                    warn!(list_id, page, collected = items.len(), error = %source, "List fetch failed");
                    return Err(PartialList { items, source });
                }
            }
        }
    }

    /// Stream every page of each list into `sink`.
    ///
    /// A failing list is recorded in its summary and the next list is tried.
    /// Cancellation stops the whole export.
    pub async fn list_all_tasks_to_sink(
        &self,
        cancel: &CancellationToken,
        list_ids: &[String],
        flags: ListFlags,
        sink: &mut dyn TaskSink,
    ) -> Vec<ListExportSummary> {
        let mut summaries = Vec::with_capacity(list_ids.len());

        for list_id in list_ids {
            let summary = self.export_list(cancel, list_id, flags, sink).await;
            if let Some(error) = &summary.error {
                warn!(list_id = %list_id, written = summary.items_written, %error, "List export incomplete");
            } else {
                info!(list_id = %list_id, written = summary.items_written, "List exported");
            }
            summaries.push(summary);

            if cancel.is_cancelled() {
                break;
            }
        }

        if let Err(e) = sink.flush() {
            warn!(error = %e, "Failed to flush export sink");
        }
        summaries
    }

    /// Write one custom-field value on a task.
    pub async fn set_field_value(
        &self,
        cancel: &CancellationToken,
        task_id: &str,
        field_id: &str,
        raw: &str,
        field_type: FieldType,
    ) -> Result<(), ApiError> {
        let value = coerce(raw, field_type)?;
        self.post_field(cancel, task_id, field_id, &value).await
    }

    /// [`TrackerClient::set_field_value`] under the retry policy.
    pub async fn set_field_value_with_retry(
        &self,
        cancel: &CancellationToken,
        task_id: &str,
        field_id: &str,
        raw: &str,
        field_type: FieldType,
    ) -> Result<(), ApiError> {
        let value = &coerce(raw, field_type)?;
        let result = retry_with_policy(
            &self.config.retry,
            cancel,
            || self.metrics.increment(names::API_RETRIES, 1),
            move |_| self.post_field(cancel, task_id, field_id, value),
        )
        .await;

        if result.is_err() {
            self.metrics.increment(names::API_FAILURES, 1);
        }
        result
    }

    async fn post_field(
        &self,
        cancel: &CancellationToken,
        task_id: &str,
        field_id: &str,
        value: &FieldValue,
    ) -> Result<(), ApiError> {
        self.limiter.wait(cancel).await?;
        self.metrics.increment(names::API_REQUESTS, 1);

        let url = format!(
            "{}/task/{}/field/{}",
            self.config.base_url, task_id, field_id
        );
        debug!(task_id, field_id, "Setting field value");

        let request = self
            .http
            .post(&url)
            .header(AUTHORIZATION, &self.config.token)
            .json(&json!({ "value": value.to_wire() }));
        let resp = send(cancel, request).await?;

        check_status(resp).await?;
        Ok(())
    }

    async fn list_page_with_retry(
        &self,
        cancel: &CancellationToken,
        list_id: &str,
        page: u32,
        flags: ListFlags,
    ) -> Result<TaskPage, ApiError> {
        let result = retry_with_policy(
            &self.config.retry,
            cancel,
            || self.metrics.increment(names::API_RETRIES, 1),
            move |_| self.list_tasks_page(cancel, list_id, page, flags),
        )
        .await;

        if result.is_err() {
            self.metrics.increment(names::API_FAILURES, 1);
        }
        result
    }

    async fn export_list(
        &self,
        cancel: &CancellationToken,
        list_id: &str,
        flags: ListFlags,
        sink: &mut dyn TaskSink,
    ) -> ListExportSummary {
        let mut summary = ListExportSummary {
            list_id: list_id.to_string(),
            items_written: 0,
            error: None,
        };
        let mut page = 0;

        loop {
            let batch = match self.list_page_with_retry(cancel, list_id, page, flags).await {
                Ok(batch) => batch,
                Err(e) => {
                    summary.error = Some(e.to_string());
                    return summary;
                }
            };

            if let Err(e) = sink.append(list_id, &batch.items) {
                summary.error = Some(format!("sink write failed: {e}"));
                return summary;
            }
            summary.items_written += batch.items.len();

            if self.is_last(&batch) {
                return summary;
            }
            page += 1;
        }
    }

    fn is_last(&self, page: &TaskPage) -> bool {
        page.is_last_page || page.items.len() < self.config.page_size
    }
}

/// Send `request`, abandoning it if `cancel` fires first.
async fn send(cancel: &CancellationToken, request: RequestBuilder) -> Result<Response, ApiError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ApiError::Cancelled),
        resp = request.send() => Ok(resp?),
    }
}

async fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::from_status(status.as_u16(), &body))
}
