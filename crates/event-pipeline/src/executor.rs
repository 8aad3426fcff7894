//! Serialized record store access on a dedicated background thread.
//!
//! Every store operation the pipeline performs runs here, in submission
//! order:
//! - ingestion (save, eviction, threshold check)
//! - batch selection and marking
//! - applying delivery outcomes
//! - crash recovery
//!
//! Callers never block. Fire-and-forget work goes through
//! [`StoreExecutor::execute`]; work whose result is needed goes through
//! [`StoreExecutor::call`] and is awaited.
//!
//! Closures must only touch the store. Network I/O inside a closure would
//! stall every queued ingestion behind it.

use crate::error::{PipelineError, PipelineResult};
use event_store::RecordStore;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

type Job = Box<dyn FnOnce(&mut dyn RecordStore) + Send + 'static>;

/// Owns the record store and runs closures against it one at a time.
pub struct StoreExecutor {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl StoreExecutor {
    /// Move `store` onto a new thread and start accepting work.
    pub fn spawn(store: Box<dyn RecordStore>) -> PipelineResult<Self> {
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();

        let thread = std::thread::Builder::new()
            .name("event-store".to_string())
            .spawn(move || run(store, receiver))?;

        debug!("Store executor started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queue `f` without waiting for it.
    ///
    /// Fails only once the executor has been shut down.
    pub fn execute<F>(&self, f: F) -> PipelineResult<()>
    where
        F: FnOnce(&mut dyn RecordStore) + Send + 'static,
    {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(PipelineError::ExecutorClosed)?;
        sender
            .send(Box::new(f))
            .map_err(|_| PipelineError::ExecutorClosed)
    }

    /// Queue `f` and await its result.
    ///
    /// A closure that panics resolves to `ExecutorClosed`.
    pub async fn call<F, T>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce(&mut dyn RecordStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(move |store| {
            let _ = tx.send(f(store));
        })?;
        rx.await.map_err(|_| PipelineError::ExecutorClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting work, let queued closures finish, then release the store.
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                error!("Store executor thread did not exit cleanly");
            }
        }
        info!("Store executor stopped");
    }
}

fn run(mut store: Box<dyn RecordStore>, mut receiver: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = receiver.blocking_recv() {
        if catch_unwind(AssertUnwindSafe(|| job(&mut *store))).is_err() {
            error!("Store task panicked");
        }
    }
    debug!("Store executor queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_model::{EventCategory, NewEventRecord, RecordStatus};
    use event_store::MemoryRecordStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn record() -> NewEventRecord {
        NewEventRecord {
            category: EventCategory::Track,
            body: "{}".to_string(),
        }
    }

    fn executor() -> StoreExecutor {
        StoreExecutor::spawn(Box::new(MemoryRecordStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_call_returns_result() {
        let executor = executor();
        let id = executor.call(|store| store.save(&record())).await.unwrap();
        assert_eq!(id.unwrap(), 1);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let executor = executor();
        for _ in 0..50 {
            executor
                .execute(|store| {
                    store.save(&record()).unwrap();
                })
                .unwrap();
        }
        executor
            .execute(|store| {
                let ids: Vec<i64> = store
                    .get_events_to_flush(10)
                    .unwrap()
                    .iter()
                    .map(|r| r.id)
                    .collect();
                store.update(&ids, RecordStatus::Flushing).unwrap();
            })
            .unwrap();

        let flushing = executor
            .call(|store| store.find_by_status(RecordStatus::Flushing))
            .await
            .unwrap()
            .unwrap();
        let ids: Vec<i64> = flushing.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<i64>>());
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_thread() {
        let executor = executor();
        let result: PipelineResult<()> = executor.call(|_| panic!("boom")).await;
        assert!(matches!(result, Err(PipelineError::ExecutorClosed)));

        let count = executor.call(|store| store.count(None)).await.unwrap();
        assert_eq!(count.unwrap(), 0);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_then_rejects() {
        let executor = executor();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let ran = ran.clone();
            executor
                .execute(move |_| {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        executor.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert!(executor.is_closed());
        assert!(matches!(
            executor.execute(|_| {}),
            Err(PipelineError::ExecutorClosed)
        ));

        // Second shutdown is a no-op.
        executor.shutdown().await;
    }
}
