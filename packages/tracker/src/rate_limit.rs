//! Token bucket limiting outbound calls for one credential.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::ApiError;

/// Configuration for a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    /// Steady-state ceiling.
    pub requests_per_minute: u32,
    /// Tokens available up front (burst capacity).
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
            burst: 10,
        }
    }
}

impl RateLimiterConfig {
    /// Per-minute ceiling with the default burst. Zero is clamped to one.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute: requests_per_minute.max(1),
            ..Self::default()
        }
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst.max(1);
        self
    }

    fn refill_per_sec(&self) -> f64 {
        f64::from(self.requests_per_minute.max(1)) / 60.0
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
///
/// The bucket lock is only held for the synchronous refill/take step, never
/// across a sleep.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let config = RateLimiterConfig {
            requests_per_minute: config.requests_per_minute.max(1),
            burst: config.burst.max(1),
        };
        Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(config.burst),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.try_take().is_ok()
    }

    /// Tokens currently in the bucket.
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Block until a token is available or `cancel` fires.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), ApiError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            let wait = match self.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            trace!(wait_ms = wait.as_millis() as u64, "Rate limited, waiting");
            tokio::select! {
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Take a token, or report how long until the next one.
    fn try_take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let needed = 1.0 - bucket.tokens;
            let wait = Duration::from_secs_f64(needed / self.config.refill_per_sec());
            Err(wait.max(Duration::from_millis(1)))
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill);
        let added = elapsed.as_secs_f64() * self.config.refill_per_sec();

        bucket.tokens = (bucket.tokens + added).min(f64::from(self.config.burst));
        bucket.last_refill = now;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
