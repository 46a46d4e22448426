//! Dispatcher actor: pulls pending jobs FIFO and runs them one at a time.

use std::sync::Arc;
use std::time::Duration;

use bulk_core::metrics::names;
use bulk_core::{Job, JobStatus, MetricsSink, NoopMetrics};
use db::JobQueue;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use realtime::ProgressHub;
use tokio_util::sync::CancellationToken;

use crate::handler::JobProcessor;
use crate::messages::DispatcherMessage;

/// Detail recorded on jobs found in `processing` at startup.
pub const INTERRUPTED_DETAIL: &str = "Job interrupted by a restart before it finished";

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Delay between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Deadline for a single job.
    pub job_timeout: Duration,
    /// Fail jobs left in `processing` by a previous process.
    pub recover_interrupted: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(30 * 60),
            recover_interrupted: true,
        }
    }
}

impl DispatcherConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_recover_interrupted(mut self, recover: bool) -> Self {
        self.recover_interrupted = recover;
        self
    }
}

/// Dispatcher actor arguments.
pub struct DispatcherArgs {
    pub queue: JobQueue,
    pub hub: Arc<ProgressHub>,
    pub processor: Arc<dyn JobProcessor>,
    pub metrics: Arc<dyn MetricsSink>,
    pub config: DispatcherConfig,
}

impl DispatcherArgs {
    pub fn new(queue: JobQueue, hub: Arc<ProgressHub>, processor: Arc<dyn JobProcessor>) -> Self {
        Self {
            queue,
            hub,
            processor,
            metrics: Arc::new(NoopMetrics),
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }
}

/// What a single poll of the queue amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    /// A job was claimed and run to a terminal state.
    Ran,
    /// Nothing pending.
    Idle,
    /// The poll or the claim hit an error.
    Failed,
}

impl TickOutcome {
    /// Delay before the next poll. Only a job that actually ran drains the
    /// backlog immediately.
    fn next_delay(self, poll_interval: Duration) -> Duration {
        match self {
            TickOutcome::Ran => Duration::ZERO,
            TickOutcome::Idle | TickOutcome::Failed => poll_interval,
        }
    }
}

/// State for the dispatcher actor.
pub struct DispatcherState {
    args: DispatcherArgs,
    /// Jobs that reached a terminal state through this dispatcher.
    pub jobs_finished: u64,
}

impl DispatcherState {
    fn broadcast(&self, job: &Job, message: impl Into<String>) {
        self.args
            .hub
            .send_to_user(&job.user_id, &job.progress(message));
    }

    /// Poll once and run the oldest pending job, if any.
    async fn tick(&mut self) -> TickOutcome {
        match self.args.queue.next_pending().await {
            Ok(Some(job)) => self.run_job(job).await,
            Ok(None) => TickOutcome::Idle,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to poll job queue");
                TickOutcome::Failed
            }
        }
    }

    /// Run one job through the processor and record its terminal state.
    async fn run_job(&mut self, job: Job) -> TickOutcome {
        let queue = &self.args.queue;
        let job = match queue.mark_processing(job.id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to claim job");
                return TickOutcome::Failed;
            }
        };

        tracing::info!(job_id = %job.id, user_id = %job.user_id, title = %job.title, "Processing job");
        self.broadcast(&job, "Processing started");

        let cancel = CancellationToken::new();
        let deadline = {
            let cancel = cancel.clone();
            let timeout = self.args.config.job_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            })
        };

        let result = self.args.processor.process(job.clone(), cancel.clone()).await;
        deadline.abort();

        let terminal = match result {
            Ok(()) => queue.mark_completed(job.id).await,
            Err(error) => {
                let detail = if cancel.is_cancelled() {
                    format!(
                        "Job exceeded its {}s deadline: {}",
                        self.args.config.job_timeout.as_secs(),
                        error
                    )
                } else {
                    error
                };
                queue.mark_failed(job.id, detail).await
            }
        };

        match terminal {
            Ok(done) => {
                self.jobs_finished += 1;
                let message = if done.status == JobStatus::Completed {
                    self.args.metrics.increment(names::JOBS_COMPLETED, 1);
                    tracing::info!(
                        job_id = %done.id,
                        success = done.success_count,
                        errors = done.error_count,
                        "Job completed"
                    );
                    "Job completed".to_string()
                } else {
                    self.args.metrics.increment(names::JOBS_FAILED, 1);
                    let reason = done.error_details.last().cloned().unwrap_or_default();
                    tracing::warn!(job_id = %done.id, reason = %reason, "Job failed");
                    format!("Job failed: {reason}")
                };
                self.broadcast(&done, message);
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record terminal state");
            }
        }
        TickOutcome::Ran
    }

    /// Fail every job a previous process left in `processing`.
    async fn recover_interrupted(&self) -> usize {
        let stuck = match self
            .args
            .queue
            .get_jobs_by_status(JobStatus::Processing)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to look up interrupted jobs");
                return 0;
            }
        };

        let mut recovered = 0;
        for job in stuck {
            match self.args.queue.mark_failed(job.id, INTERRUPTED_DETAIL).await {
                Ok(_) => {
                    self.args.metrics.increment(names::JOBS_FAILED, 1);
                    recovered += 1;
                }
                Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Failed to recover job"),
            }
        }
        recovered
    }
}

/// Single-job-at-a-time dispatcher.
///
/// A job is processed inside `handle`, so a `Shutdown` sent mid-job is only
/// seen once that job has finished.
pub struct DispatcherActor;

impl Actor for DispatcherActor {
    type Msg = DispatcherMessage;
    type State = DispatcherState;
    type Arguments = DispatcherArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            poll_ms = args.config.poll_interval.as_millis() as u64,
            timeout_secs = args.config.job_timeout.as_secs(),
            "Starting dispatcher"
        );

        let state = DispatcherState {
            args,
            jobs_finished: 0,
        };

        if state.args.config.recover_interrupted {
            let recovered = state.recover_interrupted().await;
            if recovered > 0 {
                tracing::warn!(recovered, "Marked interrupted jobs as failed");
            }
        }

        myself.send_message(DispatcherMessage::Tick)?;
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            DispatcherMessage::Tick => {
                let delay = state.tick().await.next_delay(state.args.config.poll_interval);
                if delay.is_zero() {
                    myself.send_message(DispatcherMessage::Tick)?;
                } else {
                    schedule_tick(&myself, delay);
                }
            }

            DispatcherMessage::Shutdown => {
                tracing::info!(jobs_finished = state.jobs_finished, "Shutting down dispatcher");
                myself.stop(None);
            }
        }

        Ok(())
    }
}

fn schedule_tick(myself: &ActorRef<DispatcherMessage>, after: Duration) {
    let myself = myself.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let _ = myself.send_message(DispatcherMessage::Tick);
    });
}

/// Start the dispatcher.
pub async fn start_dispatcher(
    args: DispatcherArgs,
) -> Result<(ActorRef<DispatcherMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(None, DispatcherActor, args).await
}
