//! Narrow counter interface shared by the client, engine and dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Counter names emitted by the pipeline.
pub mod names {
    pub const API_REQUESTS: &str = "api_requests_total";
    pub const API_RETRIES: &str = "api_retries_total";
    pub const API_FAILURES: &str = "api_failures_total";
    pub const ROWS_SUCCEEDED: &str = "rows_succeeded_total";
    pub const ROWS_FAILED: &str = "rows_failed_total";
    pub const JOBS_COMPLETED: &str = "jobs_completed_total";
    pub const JOBS_FAILED: &str = "jobs_failed_total";
    pub const JOBS_EVICTED: &str = "jobs_evicted_total";
}

/// Sink for monotonically increasing counters.
pub trait MetricsSink: Send + Sync + 'static {
    fn increment(&self, counter: &'static str, by: u64);
}

/// Discards every counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _counter: &'static str, _by: u64) {}
}

/// In-process counters, readable for diagnostics and tests.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    counters: DashMap<&'static str, AtomicU64>,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter; zero if never incremented.
    pub fn get(&self, counter: &str) -> u64 {
        self.counters
            .get(counter)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Copy of every counter.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }
}

impl MetricsSink for CounterMetrics {
    fn increment(&self, counter: &'static str, by: u64) {
        self.counters
            .entry(counter)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(by, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = CounterMetrics::new();
        metrics.increment(names::API_REQUESTS, 1);
        metrics.increment(names::API_REQUESTS, 2);
        metrics.increment(names::ROWS_FAILED, 1);

        assert_eq!(metrics.get(names::API_REQUESTS), 3);
        assert_eq!(metrics.get(names::ROWS_FAILED), 1);
        assert_eq!(metrics.get(names::JOBS_FAILED), 0);
        assert_eq!(metrics.snapshot().len(), 2);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let metrics = std::sync::Arc::new(CounterMetrics::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.increment(names::API_REQUESTS, 1);
                        metrics.increment(names::ROWS_SUCCEEDED, 2);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(metrics.get(names::API_REQUESTS), 8000);
        assert_eq!(metrics.get(names::ROWS_SUCCEEDED), 16_000);
    }
}
