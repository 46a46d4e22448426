//! Bulk task updater service.
//!
//! Wires the job queue, progress hub, batch engine and the dispatcher and
//! cleanup actors, then runs until Ctrl-C.

mod config;
mod telemetry;

use std::sync::Arc;

use actors::{
    CleanupArgs, CleanupConfig, CleanupMessage, DispatcherArgs, DispatcherConfig,
    DispatcherMessage, start_cleanup, start_dispatcher,
};
use bulk_core::CounterMetrics;
use db::{DbConfig, JobQueue};
use engine::{
    BatchUpdateEngine, CustomFieldCatalogue, EngineConfig, StaticUserConfig, UserConfig,
};
use realtime::ProgressHub;
use storage::{SheetStore, StorageConfig};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env()?;
    telemetry::init(config.log_format);

    run(config).await
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    tracing::info!(database = %config.database_url, "Starting bulk updater");

    let db = db::connect_and_migrate(&DbConfig::endpoint(&config.database_url)).await?;
    let queue = JobQueue::new(db);
    let hub = Arc::new(ProgressHub::default());
    let metrics = Arc::new(CounterMetrics::new());
    let sheets = SheetStore::new(StorageConfig::filesystem(&config.storage_root))?;

    let fields = match &config.custom_fields_path {
        Some(path) => CustomFieldCatalogue::from_json_file(path)?,
        None => {
            tracing::warn!("CUSTOM_FIELDS_PATH not set; unmapped field types default to text");
            CustomFieldCatalogue::default()
        }
    };
    let users = StaticUserConfig::shared(UserConfig::new(
        config.api_token.clone(),
        config.rate_limit_per_minute,
    ));

    let engine = BatchUpdateEngine::new(
        queue.clone(),
        hub.clone(),
        Arc::new(sheets),
        Arc::new(users),
        Arc::new(fields),
        EngineConfig::default().with_api_base_url(&config.api_base_url),
    )
    .with_metrics(metrics.clone());

    let (dispatcher, dispatcher_handle) = start_dispatcher(
        DispatcherArgs::new(queue.clone(), hub.clone(), Arc::new(engine))
            .with_metrics(metrics.clone())
            .with_config(
                DispatcherConfig::default()
                    .with_poll_interval(config.poll_interval)
                    .with_job_timeout(config.job_timeout),
            ),
    )
    .await?;

    let (cleanup, cleanup_handle) = start_cleanup(
        CleanupArgs::new(queue, hub)
            .with_metrics(metrics.clone())
            .with_config(
                CleanupConfig::default()
                    .with_interval(config.cleanup_interval)
                    .with_failed_retention(config.failed_retention),
            ),
    )
    .await?;

    tracing::info!("Bulk updater running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    // The dispatcher finishes its in-flight job before it sees this.
    dispatcher.send_message(DispatcherMessage::Shutdown)?;
    cleanup.send_message(CleanupMessage::Shutdown)?;
    dispatcher_handle.await?;
    cleanup_handle.await?;

    let mut counters: Vec<_> = metrics.snapshot().into_iter().collect();
    counters.sort();
    for (name, value) in counters {
        tracing::info!(counter = %name, value, "Final counter");
    }
    Ok(())
}
