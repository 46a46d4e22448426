//! Cleanup actor: evicts finished jobs and prunes idle connections.

use std::sync::Arc;
use std::time::Duration;

use bulk_core::metrics::names;
use bulk_core::{MetricsSink, NoopMetrics};
use db::{DEFAULT_FAILED_RETENTION, JobQueue};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use realtime::ProgressHub;

use crate::messages::{CleanupMessage, CleanupReport};

/// Cleanup configuration.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub interval: Duration,
    /// How long failed jobs are kept for inspection.
    pub failed_retention: Duration,
    /// Connections without a heartbeat for this long are dropped.
    pub connection_max_idle: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            failed_retention: DEFAULT_FAILED_RETENTION,
            connection_max_idle: Duration::from_secs(5 * 60),
        }
    }
}

impl CleanupConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_failed_retention(mut self, retention: Duration) -> Self {
        self.failed_retention = retention;
        self
    }

    pub fn with_connection_max_idle(mut self, max_idle: Duration) -> Self {
        self.connection_max_idle = max_idle;
        self
    }
}

/// Cleanup actor arguments.
pub struct CleanupArgs {
    pub queue: JobQueue,
    pub hub: Arc<ProgressHub>,
    pub metrics: Arc<dyn MetricsSink>,
    pub config: CleanupConfig,
}

impl CleanupArgs {
    pub fn new(queue: JobQueue, hub: Arc<ProgressHub>) -> Self {
        Self {
            queue,
            hub,
            metrics: Arc::new(NoopMetrics),
            config: CleanupConfig::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_config(mut self, config: CleanupConfig) -> Self {
        self.config = config;
        self
    }
}

async fn run_cleanup(args: &CleanupArgs) -> CleanupReport {
    let mut report = CleanupReport::default();

    match args.queue.evict_completed().await {
        Ok(n) => report.completed_evicted = n,
        Err(e) => tracing::warn!(error = %e, "Failed to evict completed jobs"),
    }
    match args.queue.evict_stale_failed(args.config.failed_retention).await {
        Ok(n) => report.failed_evicted = n,
        Err(e) => tracing::warn!(error = %e, "Failed to evict stale failed jobs"),
    }
    report.connections_pruned = args.hub.prune_stale(args.config.connection_max_idle);

    args.metrics
        .increment(names::JOBS_EVICTED, report.jobs_evicted() as u64);
    if report != CleanupReport::default() {
        tracing::info!(
            completed = report.completed_evicted,
            failed = report.failed_evicted,
            connections = report.connections_pruned,
            "Cleanup pass finished"
        );
    }
    report
}

/// Periodic cleanup actor.
pub struct CleanupActor;

impl Actor for CleanupActor {
    type Msg = CleanupMessage;
    type State = CleanupArgs;
    type Arguments = CleanupArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            interval_secs = args.config.interval.as_secs(),
            retention_secs = args.config.failed_retention.as_secs(),
            "Starting cleanup"
        );

        let interval = args.config.interval.max(Duration::from_millis(1));
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if myself_clone.send_message(CleanupMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CleanupMessage::Tick => {
                run_cleanup(state).await;
            }

            CleanupMessage::RunNow { reply } => {
                let report = run_cleanup(state).await;
                let _ = reply.send(report);
            }

            CleanupMessage::Shutdown => {
                tracing::info!("Shutting down cleanup");
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Start the cleanup actor.
pub async fn start_cleanup(
    args: CleanupArgs,
) -> Result<(ActorRef<CleanupMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(None, CleanupActor, args).await
}
