//! Lifecycle tests: start/stop, foreground/background, close and recovery.

use super::harness::{
    insert_ids, test_config, track, wait_until, Response, ScriptedTransport, TestPipeline,
    START_MILLIS,
};
use crate::clock::ManualClock;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::processor::{AppState, EventProcessor};
use event_model::{EventCategory, NewEventRecord, RecordStatus};
use event_store::{MemoryRecordStore, RecordStore, SqliteRecordStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;

#[tokio::test]
async fn foreground_starts_and_background_stops_with_flush() {
    let pipeline = TestPipeline::new(test_config());
    for n in 0..3 {
        pipeline.processor.process(track(n));
    }

    pipeline.processor.on_lifecycle(AppState::Foreground);
    assert!(pipeline.processor.is_started());

    pipeline.processor.on_lifecycle(AppState::Background);
    assert!(!pipeline.processor.is_started());

    assert!(wait_until(|| async { pipeline.transport.sent_count() == 1 }).await);
    assert!(wait_until(|| async { pipeline.count(None).await == 0 }).await);
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let pipeline = TestPipeline::new(test_config());

    pipeline.processor.start();
    pipeline.processor.start();
    assert!(pipeline.processor.is_started());

    pipeline.processor.stop();
    pipeline.processor.stop();
    assert!(!pipeline.processor.is_started());

    pipeline.processor.start();
    assert!(pipeline.processor.is_started());
    pipeline.processor.close().await;
    assert!(!pipeline.processor.is_started());
}

#[tokio::test]
async fn close_flushes_remaining_records() {
    let pipeline = TestPipeline::new(test_config());
    for n in 0..3 {
        pipeline.processor.process(track(n));
    }

    pipeline.processor.close().await;

    let sent = pipeline.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(insert_ids(&sent[0]), vec!["track-0", "track-1", "track-2"]);
    assert!(matches!(
        pipeline.processor.record_count(None).await,
        Err(PipelineError::ExecutorClosed)
    ));
}

#[tokio::test]
async fn close_ignores_backoff() {
    let pipeline = TestPipeline::new(test_config());
    pipeline.processor.backoff().check_response(false);
    for n in 0..3 {
        pipeline.processor.process(track(n));
    }

    pipeline.processor.close().await;

    assert_eq!(pipeline.transport.sent_count(), 1);
}

#[tokio::test]
async fn close_is_bounded_by_timeout() {
    let config = PipelineConfig {
        close_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let pipeline = TestPipeline::new(config);
    pipeline.transport.set_default_response(Response::Hang);
    pipeline.processor.process(track(0));

    let started = Instant::now();
    pipeline.processor.close().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(pipeline.transport.sent_count(), 1);
}

#[tokio::test]
async fn close_twice_and_use_after_close_are_harmless() {
    let pipeline = TestPipeline::new(test_config());
    pipeline.processor.close().await;
    pipeline.processor.close().await;

    pipeline.processor.process(track(0));
    pipeline.processor.start();
    pipeline.processor.flush();
    pipeline.processor.stop();

    assert!(!pipeline.processor.is_started());
    assert_eq!(pipeline.store.saves(), 0);
}

#[tokio::test]
async fn construction_reverts_flushing_records() {
    let mut store = MemoryRecordStore::new();
    for _ in 0..3 {
        store
            .save(&NewEventRecord {
                category: EventCategory::Track,
                body: r#"{"insertId":"left-over"}"#.to_string(),
            })
            .unwrap();
    }
    store.update(&[1, 2], RecordStatus::Flushing).unwrap();

    let pipeline = TestPipeline::with_store(test_config(), store);

    assert!(pipeline.ids(RecordStatus::Flushing).await.is_empty());
    assert_eq!(pipeline.ids(RecordStatus::Pending).await, vec![1, 2, 3]);
}

fn sqlite_processor(
    path: &std::path::Path,
    transport: Arc<ScriptedTransport>,
    config: PipelineConfig,
) -> EventProcessor {
    let store = SqliteRecordStore::open(path).unwrap();
    EventProcessor::new(
        config,
        Box::new(store),
        transport,
        Arc::new(ManualClock::new(START_MILLIS)),
    )
    .unwrap()
}

#[tokio::test]
async fn unacknowledged_batch_is_redelivered_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.db");
    let config = PipelineConfig {
        close_timeout: Duration::from_millis(100),
        ..test_config()
    };

    let hanging = Arc::new(ScriptedTransport::new());
    hanging.set_default_response(Response::Hang);
    let first = sqlite_processor(&path, hanging.clone(), config.clone());
    for n in 0..3 {
        first.process(track(n));
    }
    first.close().await;
    assert_eq!(hanging.sent_count(), 1);

    let store = SqliteRecordStore::open(&path).unwrap();
    assert_eq!(store.count(Some(RecordStatus::Flushing)).unwrap(), 3);
    drop(store);

    let accepting = Arc::new(ScriptedTransport::new());
    let second = sqlite_processor(&path, accepting.clone(), config);
    assert_eq!(second.record_count(Some(RecordStatus::Pending)).await.unwrap(), 3);

    second.flush();
    assert!(wait_until(|| async { second.record_count(None).await.unwrap() == 0 }).await);

    let sent = accepting.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(insert_ids(&sent[0]), vec!["track-0", "track-1", "track-2"]);
    second.close().await;
}
