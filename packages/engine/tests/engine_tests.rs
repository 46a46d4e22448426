#![allow(clippy::disallowed_methods)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{DispatcherArgs, DispatcherConfig, DispatcherMessage, start_dispatcher};
use bulk_core::metrics::names;
use bulk_core::{
    ColumnMapping, CounterMetrics, CustomField, FieldType, Job, JobStatus, MappingEntry,
    SheetData, UserId,
};
use db::{DbConfig, JobQueue};
use engine::{
    BatchUpdateEngine, CustomFieldCatalogue, EngineConfig, EngineError, RunSummary,
    StaticUserConfig, UserConfig,
};
use realtime::ProgressHub;
use serde_json::json;
use storage::{SheetStore, StorageConfig};
use tokio_util::sync::CancellationToken;
use tracker::RetryPolicy;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    queue: JobQueue,
    hub: Arc<ProgressHub>,
    sheets: SheetStore,
    metrics: Arc<CounterMetrics>,
    engine: BatchUpdateEngine,
}

async fn fixture(base_url: &str, fields: Vec<CustomField>) -> Result<Fixture, Box<dyn Error>> {
    let db = db::connect_and_migrate(&DbConfig::memory()).await?;
    let queue = JobQueue::new(db);
    let hub = Arc::new(ProgressHub::default());
    let sheets = SheetStore::new(StorageConfig::memory())?;
    let metrics = Arc::new(CounterMetrics::new());

    let config = EngineConfig::default()
        .with_api_base_url(base_url)
        .with_retry(RetryPolicy::default().with_delay(Duration::from_millis(10)));
    let engine = BatchUpdateEngine::new(
        queue.clone(),
        hub.clone(),
        Arc::new(sheets.clone()),
        Arc::new(StaticUserConfig::shared(UserConfig::new("pk_test", 6000))),
        Arc::new(CustomFieldCatalogue::new(fields)),
        config,
    )
    .with_metrics(metrics.clone());

    Ok(Fixture {
        queue,
        hub,
        sheets,
        metrics,
        engine,
    })
}

fn rows(cells: &[&[&str]]) -> Vec<Vec<String>> {
    cells
        .iter()
        .map(|row| row.iter().map(|c| c.to_string()).collect())
        .collect()
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|c| c.to_string()).collect()
}

/// Enqueue a job for `sheet` and move it to `processing`.
async fn claimed_job(
    fx: &Fixture,
    sheet: &SheetData,
    mapping: ColumnMapping,
    total_rows: u64,
) -> Result<Job, Box<dyn Error>> {
    fx.sheets.put_sheet("upload", sheet).await?;
    let job = fx
        .queue
        .enqueue(UserId::new("u1"), "bulk", "upload", mapping, total_rows)
        .await?;
    Ok(fx.queue.mark_processing(job.id).await?)
}

#[tokio::test]
async fn test_end_to_end_mixed_rows() -> Result<(), Box<dyn Error>> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/task/bad/field/f1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/task/good/field/f1"))
        .and(header("Authorization", "pk_test"))
        .and(body_json(json!({ "value": 3.0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let fx = fixture(&server.uri(), vec![]).await?;
    let sheet = SheetData::new(
        columns(&["task_id", "Priority"]),
        rows(&[&["", "1"], &["bad", "2"], &["good", "3"]]),
    );
    fx.sheets.put_sheet("upload", &sheet).await?;
    let mapping = ColumnMapping::from_entries(vec![
        MappingEntry::identifier("task_id"),
        MappingEntry::new("Priority", "f1").with_type(FieldType::Number),
    ])?;
    let user = UserId::new("u1");
    let job = fx
        .queue
        .enqueue(user.clone(), "bulk", "upload", mapping, 3)
        .await?;
    let mut sub = fx.hub.register_connection(user);

    let (dispatcher, handle) = start_dispatcher(
        DispatcherArgs::new(fx.queue.clone(), fx.hub.clone(), Arc::new(fx.engine.clone()))
            .with_config(DispatcherConfig::default().with_poll_interval(Duration::from_millis(20))),
    )
    .await?;

    let mut done = fx.queue.get_job(job.id).await?;
    for _ in 0..250 {
        if done.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        done = fx.queue.get_job(job.id).await?;
    }

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.processed_rows, 3);
    assert_eq!(done.success_count, 1);
    assert_eq!(done.error_count, 2);
    assert_eq!(done.error_details.len(), 2);
    assert!(done.error_details[0].starts_with("Row 2"));
    assert!(done.error_details[1].contains("task bad"));

    assert_eq!(fx.metrics.get(names::ROWS_SUCCEEDED), 1);
    assert_eq!(fx.metrics.get(names::ROWS_FAILED), 2);
    assert_eq!(fx.metrics.get(names::API_RETRIES), 2);

    let started = sub.recv().await.unwrap();
    assert_eq!(started.status, JobStatus::Processing);
    let progress = sub.recv().await.unwrap();
    assert_eq!(progress.processed_rows, 3);
    assert!(progress.is_consistent());
    let finished = sub.recv().await.unwrap();
    assert_eq!(finished.status, JobStatus::Completed);

    dispatcher.send_message(DispatcherMessage::Shutdown)?;
    handle.await?;
    Ok(())
}

#[tokio::test]
async fn test_field_types_from_catalogue_and_alias_identifier() -> Result<(), Box<dyn Error>> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/task/abc/field/cf-done"))
        .and(body_json(json!({ "value": true })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let catalogue = vec![CustomField {
        id: "cf-done".into(),
        name: "Done".into(),
        type_name: "checkbox".into(),
    }];
    let fx = fixture(&server.uri(), catalogue).await?;
    let engine = fx.engine.clone();

    let sheet = SheetData::new(
        columns(&["ID Task", "Done"]),
        rows(&[&["abc", "Sí"], &["def", "   "]]),
    );
    let mapping = ColumnMapping::from_entries(vec![MappingEntry::new("Done", "cf-done")])?;
    let job = claimed_job(&fx, &sheet, mapping, 2).await?;

    let summary = engine.run(&job, &CancellationToken::new()).await?;
    assert_eq!(
        summary,
        RunSummary {
            processed: 2,
            success: 2,
            errors: 0
        }
    );

    let stored = fx.queue.get_job(job.id).await?;
    assert_eq!(stored.processed_rows, 2);
    assert_eq!(stored.success_count, 2);
    Ok(())
}

#[tokio::test]
async fn test_progress_flushed_every_n_rows() -> Result<(), Box<dyn Error>> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let fx = fixture(&server.uri(), vec![]).await?;
    let engine = BatchUpdateEngine::new(
        fx.queue.clone(),
        fx.hub.clone(),
        Arc::new(fx.sheets.clone()),
        Arc::new(StaticUserConfig::shared(UserConfig::new("pk_test", 6000))),
        Arc::new(CustomFieldCatalogue::default()),
        fx.engine.config().clone().with_progress_every(2),
    );

    let sheet = SheetData::new(
        columns(&["id", "Notes"]),
        rows(&[&["a", "x"], &["b", "y"], &["c", "z"], &["d", "w"], &["e", "v"]]),
    );
    let mapping = ColumnMapping::from_entries(vec![MappingEntry::new("Notes", "f-notes")])?;
    let job = claimed_job(&fx, &sheet, mapping, 5).await?;
    let mut sub = fx.hub.register_connection(job.user_id.clone());

    engine.run(&job, &CancellationToken::new()).await?;

    let mut seen = Vec::new();
    while let Some(event) = sub.try_recv() {
        assert!(event.is_consistent());
        seen.push(event.processed_rows);
    }
    assert_eq!(seen, vec![2, 4, 5]);
    Ok(())
}

#[tokio::test]
async fn test_missing_mapped_column_fails_validation() -> Result<(), Box<dyn Error>> {
    let fx = fixture("http://127.0.0.1:9", vec![]).await?;
    let sheet = SheetData::new(columns(&["task_id"]), rows(&[&["abc"]]));
    let mapping = ColumnMapping::from_entries(vec![
        MappingEntry::identifier("task_id"),
        MappingEntry::new("Priority", "f1"),
    ])?;
    let job = claimed_job(&fx, &sheet, mapping, 1).await?;

    let err = fx
        .engine
        .run(&job, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(err.to_string().contains("Priority"));
    assert_eq!(fx.queue.get_job(job.id).await?.processed_rows, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_identifier_fails_validation() -> Result<(), Box<dyn Error>> {
    let fx = fixture("http://127.0.0.1:9", vec![]).await?;
    let sheet = SheetData::new(columns(&["Name", "Priority"]), rows(&[&["a", "1"]]));
    let mapping = ColumnMapping::from_entries(vec![MappingEntry::new("Priority", "f1")])?;
    let job = claimed_job(&fx, &sheet, mapping, 1).await?;

    let err = fx
        .engine
        .run(&job, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Missing identifier column");
    Ok(())
}

#[tokio::test]
async fn test_more_rows_than_expected_fails_validation() -> Result<(), Box<dyn Error>> {
    let fx = fixture("http://127.0.0.1:9", vec![]).await?;
    let sheet = SheetData::new(columns(&["id"]), rows(&[&["a"], &["b"]]));
    let job = claimed_job(&fx, &sheet, ColumnMapping::new(), 1).await?;

    let err = fx
        .engine
        .run(&job, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn test_empty_file_completes_with_zero_counts() -> Result<(), Box<dyn Error>> {
    let fx = fixture("http://127.0.0.1:9", vec![]).await?;
    let sheet = SheetData::new(columns(&["task_id", "Priority"]), vec![]);
    let mapping = ColumnMapping::from_entries(vec![
        MappingEntry::identifier("task_id"),
        MappingEntry::new("Priority", "f1"),
    ])?;
    let job = claimed_job(&fx, &sheet, mapping, 0).await?;

    let summary = fx.engine.run(&job, &CancellationToken::new()).await?;
    assert_eq!(summary, RunSummary::default());
    Ok(())
}

#[tokio::test]
async fn test_cancelled_before_first_row() -> Result<(), Box<dyn Error>> {
    let fx = fixture("http://127.0.0.1:9", vec![]).await?;
    let sheet = SheetData::new(columns(&["id", "Notes"]), rows(&[&["a", "x"]]));
    let mapping = ColumnMapping::from_entries(vec![MappingEntry::new("Notes", "f-notes")])?;
    let job = claimed_job(&fx, &sheet, mapping, 1).await?;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = fx.engine.run(&job, &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(fx.queue.get_job(job.id).await?.processed_rows, 0);
    Ok(())
}

#[tokio::test]
async fn test_deadline_mid_job_keeps_counts_consistent() -> Result<(), Box<dyn Error>> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/task/a/field/f-notes"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/task/b/field/f-notes"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let fx = fixture(&server.uri(), vec![]).await?;
    let sheet = SheetData::new(columns(&["id", "Notes"]), rows(&[&["a", "x"], &["b", "y"]]));
    fx.sheets.put_sheet("upload", &sheet).await?;
    let mapping = ColumnMapping::from_entries(vec![MappingEntry::new("Notes", "f-notes")])?;
    let job = fx
        .queue
        .enqueue(UserId::new("u1"), "bulk", "upload", mapping, 2)
        .await?;

    let (dispatcher, handle) = start_dispatcher(
        DispatcherArgs::new(fx.queue.clone(), fx.hub.clone(), Arc::new(fx.engine.clone()))
            .with_config(
                DispatcherConfig::default()
                    .with_poll_interval(Duration::from_millis(20))
                    .with_job_timeout(Duration::from_millis(300)),
            ),
    )
    .await?;

    let mut done = fx.queue.get_job(job.id).await?;
    for _ in 0..250 {
        if done.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        done = fx.queue.get_job(job.id).await?;
    }

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.processed_rows, 1);
    assert_eq!(done.success_count, 1);
    assert_eq!(done.error_count, 0);
    assert_eq!(done.processed_rows, done.success_count + done.error_count);
    let reason = done.error_details.last().unwrap();
    assert!(reason.contains("deadline"), "{reason}");
    assert!(reason.contains("after 1 rows"), "{reason}");

    dispatcher.send_message(DispatcherMessage::Shutdown)?;
    handle.await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_handle_is_collaborator_error() -> Result<(), Box<dyn Error>> {
    let fx = fixture("http://127.0.0.1:9", vec![]).await?;
    let job = fx
        .queue
        .enqueue(UserId::new("u1"), "bulk", "missing", ColumnMapping::new(), 1)
        .await?;
    let job = fx.queue.mark_processing(job.id).await?;

    let err = fx
        .engine
        .run(&job, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Collaborator(_)));
    assert!(err.to_string().contains("missing"));
    Ok(())
}
