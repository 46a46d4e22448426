//! Client for the external task-tracking API.
//!
//! Every outbound call waits on a per-credential token bucket, is classified
//! into an [`ApiError`] and, on the `*_with_retry` paths, runs under a shared
//! [`RetryPolicy`]. Long list exports stream into a [`TaskSink`].

mod client;
mod error;
mod rate_limit;
mod retry;
pub mod sink;
mod types;

pub use client::{ClientConfig, DEFAULT_PAGE_SIZE, TrackerClient};
pub use error::{ApiError, PartialList};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use retry::{RetryAction, RetryPolicy, retry_with_policy};
pub use sink::{ExportRecord, JsonLinesReader, JsonLinesSink, ListExportSummary, TaskSink};
pub use types::{ListFlags, Task, TaskPage};
