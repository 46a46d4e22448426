//! Job processor trait.

use bulk_core::Job;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Result type for job processors. The error string becomes the job's
/// failure detail.
pub type ProcessResult = Result<(), String>;

/// Future type for async job processors.
pub type ProcessFuture = Pin<Box<dyn Future<Output = ProcessResult> + Send>>;

/// Callback the dispatcher runs for each job it picks up.
///
/// `cancel` fires when the job's deadline elapses; implementations should
/// check it between units of work and return promptly.
pub trait JobProcessor: Send + Sync + 'static {
    fn process(&self, job: Job, cancel: CancellationToken) -> ProcessFuture;
}

/// A simple function-based processor.
pub struct FnProcessor<F>
where
    F: Fn(Job, CancellationToken) -> ProcessFuture + Send + Sync + 'static,
{
    processor: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(Job, CancellationToken) -> ProcessFuture + Send + Sync + 'static,
{
    pub fn new(processor: F) -> Self {
        Self { processor }
    }
}

impl<F> JobProcessor for FnProcessor<F>
where
    F: Fn(Job, CancellationToken) -> ProcessFuture + Send + Sync + 'static,
{
    fn process(&self, job: Job, cancel: CancellationToken) -> ProcessFuture {
        (self.processor)(job, cancel)
    }
}

/// Build a [`FnProcessor`] from an async block.
#[macro_export]
macro_rules! job_processor {
    (|$job:ident, $cancel:ident| $body:expr) => {
        $crate::FnProcessor::new(|$job, $cancel| {
            Box::pin(async move {
                let result: $crate::ProcessResult = $body;
                result
            })
        })
    };
}
