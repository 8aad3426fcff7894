//! Batch transmission and outcome handling.

use crate::backoff::BackoffController;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::StoreExecutor;
use crate::transport::{EventPayload, EventTransport};
use event_model::{EventRecord, RecordStatus};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a single delivery attempt means for the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx. Batch delivered.
    Success,
    /// 4xx. The collector will never accept the batch.
    Rejected,
    /// Anything else, including no response. Worth retrying.
    Failed,
}

impl DeliveryOutcome {
    pub fn classify(result: &PipelineResult<u16>) -> Self {
        match result {
            Ok(status) if (200..300).contains(status) => Self::Success,
            Ok(status) if (400..500).contains(status) => Self::Rejected,
            _ => Self::Failed,
        }
    }

    /// Whether the batch leaves the store.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// Sends batches on the Tokio runtime and routes outcomes back to the store.
///
/// At most `max_in_flight` batches are on the network at once. A batch that
/// finds no free slot goes straight back to `Pending`.
#[derive(Clone)]
pub struct EventDispatcher {
    executor: Arc<StoreExecutor>,
    transport: Arc<dyn EventTransport>,
    backoff: Arc<BackoffController>,
    slots: Arc<Semaphore>,
    max_in_flight: usize,
    runtime: Handle,
}

impl EventDispatcher {
    pub fn new(
        executor: Arc<StoreExecutor>,
        transport: Arc<dyn EventTransport>,
        backoff: Arc<BackoffController>,
        max_in_flight: usize,
        runtime: Handle,
    ) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            executor,
            transport,
            backoff,
            slots: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            runtime,
        }
    }

    /// Hand a batch of `Flushing` records to the network.
    ///
    /// Safe to call from the store thread. Returns the transmission task, or
    /// `None` when the batch was empty or could not be submitted.
    pub fn dispatch(&self, batch: Vec<EventRecord>) -> Option<JoinHandle<()>> {
        if batch.is_empty() {
            return None;
        }

        match self.submit(batch) {
            Ok(handle) => Some(handle),
            Err((batch, e)) => {
                let ids = record_ids(&batch);
                warn!(count = ids.len(), error = %e, "Batch not submitted, reverting to pending");
                self.apply_outcome(ids, DeliveryOutcome::Failed);
                None
            }
        }
    }

    fn submit(
        &self,
        batch: Vec<EventRecord>,
    ) -> Result<JoinHandle<()>, (Vec<EventRecord>, PipelineError)> {
        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(e) => {
                return Err((batch, PipelineError::SubmissionRejected(e.to_string())));
            }
        };

        let dispatcher = self.clone();
        Ok(self
            .runtime
            .spawn(async move { dispatcher.transmit(batch, permit).await }))
    }

    async fn transmit(self, batch: Vec<EventRecord>, _permit: OwnedSemaphorePermit) {
        let ids = record_ids(&batch);
        let payload = EventPayload::from_records(&batch);

        if payload.is_empty() {
            warn!(count = ids.len(), "Batch has no deliverable bodies, dropping");
            self.apply_outcome(ids, DeliveryOutcome::Rejected);
            return;
        }

        let result = self.transport.send(&payload).await;
        let outcome = DeliveryOutcome::classify(&result);

        match (&outcome, &result) {
            (DeliveryOutcome::Success, _) => {
                info!(count = ids.len(), "Batch delivered");
            }
            (DeliveryOutcome::Rejected, Ok(status)) => {
                warn!(count = ids.len(), status, "Batch rejected by collector, dropping");
            }
            (_, Ok(status)) => {
                warn!(count = ids.len(), status, "Batch delivery failed, will retry");
            }
            (_, Err(e)) => {
                warn!(count = ids.len(), error = %e, "Batch delivery failed, will retry");
            }
        }

        self.apply_outcome(ids, outcome);
        self.backoff.check_response(outcome.is_final());
    }

    /// Delete or revert `ids` through the store executor.
    fn apply_outcome(&self, ids: Vec<i64>, outcome: DeliveryOutcome) {
        let submitted = self.executor.execute(move |store| {
            let result = if outcome.is_final() {
                store.delete(&ids)
            } else {
                store.update(&ids, RecordStatus::Pending)
            };
            match result {
                Ok(()) => debug!(count = ids.len(), ?outcome, "Batch outcome applied"),
                Err(e) => error!(count = ids.len(), ?outcome, error = %e, "Failed to apply batch outcome"),
            }
        });

        if let Err(e) = submitted {
            warn!(?outcome, error = %e, "Batch outcome dropped, records recover on restart");
        }
    }

    /// Resolve once no batch is on the network.
    ///
    /// Returns immediately after `close()`.
    pub async fn wait_idle(&self) {
        let all = u32::try_from(self.max_in_flight).unwrap_or(u32::MAX);
        let _ = self.slots.acquire_many(all).await;
    }

    /// Refuse further batches. In-flight ones run to completion.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

fn record_ids(batch: &[EventRecord]) -> Vec<i64> {
    batch.iter().map(|r| r.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::PipelineError;
    use async_trait::async_trait;
    use event_model::{EventCategory, NewEventRecord};
    use event_store::MemoryRecordStore;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct FixedTransport {
        status: Option<u16>,
        release: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl EventTransport for FixedTransport {
        async fn send(&self, _payload: &EventPayload<'_>) -> PipelineResult<u16> {
            if let Some(release) = &self.release {
                release.notified().await;
            }
            self.status
                .ok_or_else(|| PipelineError::Config("unreachable collector".to_string()))
        }
    }

    struct Fixture {
        executor: Arc<StoreExecutor>,
        backoff: Arc<BackoffController>,
        dispatcher: EventDispatcher,
    }

    fn fixture(transport: FixedTransport, max_in_flight: usize) -> Fixture {
        let executor =
            Arc::new(StoreExecutor::spawn(Box::new(MemoryRecordStore::new())).unwrap());
        let clock = Arc::new(ManualClock::new(0));
        let backoff = Arc::new(BackoffController::new(
            Duration::from_secs(10),
            None,
            clock,
        ));
        let dispatcher = EventDispatcher::new(
            executor.clone(),
            Arc::new(transport),
            backoff.clone(),
            max_in_flight,
            Handle::current(),
        );
        Fixture {
            executor,
            backoff,
            dispatcher,
        }
    }

    /// Save `n` records and mark them flushing, returning the batch.
    async fn flushing_batch(executor: &StoreExecutor, n: usize) -> Vec<EventRecord> {
        executor
            .call(move |store| {
                for i in 0..n {
                    store
                        .save(&NewEventRecord {
                            category: EventCategory::Track,
                            body: format!("{{\"n\":{}}}", i),
                        })
                        .unwrap();
                }
                let batch = store.get_events_to_flush(n).unwrap();
                let ids = record_ids(&batch);
                store.update(&ids, RecordStatus::Flushing).unwrap();
                store.find_by_status(RecordStatus::Flushing).unwrap()
            })
            .await
            .unwrap()
    }

    async fn count(executor: &StoreExecutor, status: Option<RecordStatus>) -> u64 {
        executor
            .call(move |store| store.count(status))
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(DeliveryOutcome::classify(&Ok(200)), DeliveryOutcome::Success);
        assert_eq!(DeliveryOutcome::classify(&Ok(202)), DeliveryOutcome::Success);
        assert_eq!(DeliveryOutcome::classify(&Ok(400)), DeliveryOutcome::Rejected);
        assert_eq!(DeliveryOutcome::classify(&Ok(499)), DeliveryOutcome::Rejected);
        assert_eq!(DeliveryOutcome::classify(&Ok(500)), DeliveryOutcome::Failed);
        assert_eq!(DeliveryOutcome::classify(&Ok(302)), DeliveryOutcome::Failed);
        assert_eq!(
            DeliveryOutcome::classify(&Err(PipelineError::ExecutorClosed)),
            DeliveryOutcome::Failed
        );
    }

    #[tokio::test]
    async fn test_success_deletes_batch() {
        let f = fixture(FixedTransport { status: Some(200), release: None }, 3);
        let batch = flushing_batch(&f.executor, 3).await;

        f.dispatcher.dispatch(batch).unwrap().await.unwrap();

        assert_eq!(count(&f.executor, None).await, 0);
        assert_eq!(f.backoff.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_server_error_reverts_and_backs_off() {
        let f = fixture(FixedTransport { status: Some(503), release: None }, 3);
        let batch = flushing_batch(&f.executor, 2).await;

        f.dispatcher.dispatch(batch).unwrap().await.unwrap();

        assert_eq!(count(&f.executor, Some(RecordStatus::Pending)).await, 2);
        assert_eq!(f.backoff.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_reverts() {
        let f = fixture(FixedTransport { status: None, release: None }, 3);
        let batch = flushing_batch(&f.executor, 1).await;

        f.dispatcher.dispatch(batch).unwrap().await.unwrap();

        assert_eq!(count(&f.executor, Some(RecordStatus::Pending)).await, 1);
        assert_eq!(f.backoff.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let f = fixture(FixedTransport { status: Some(200), release: None }, 3);
        assert!(f.dispatcher.dispatch(Vec::new()).is_none());
        assert_eq!(f.dispatcher.available_slots(), 3);
    }

    #[tokio::test]
    async fn test_saturated_dispatcher_reverts_batch() {
        let release = Arc::new(Notify::new());
        let f = fixture(
            FixedTransport {
                status: Some(200),
                release: Some(release.clone()),
            },
            1,
        );
        let first = flushing_batch(&f.executor, 1).await;
        let second = flushing_batch(&f.executor, 1).await;
        let second_id = second[1].id;

        let in_flight = f.dispatcher.dispatch(first).unwrap();
        let rejected: Vec<EventRecord> = second.into_iter().filter(|r| r.id == second_id).collect();
        assert!(f.dispatcher.dispatch(rejected).is_none());

        let pending = f
            .executor
            .call(|store| store.find_by_status(RecordStatus::Pending))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second_id);

        release.notify_one();
        in_flight.await.unwrap();
        assert_eq!(count(&f.executor, None).await, 1);
    }

    #[tokio::test]
    async fn test_wait_idle_waits_for_in_flight_batch() {
        let release = Arc::new(Notify::new());
        let f = fixture(
            FixedTransport {
                status: Some(200),
                release: Some(release.clone()),
            },
            2,
        );
        let batch = flushing_batch(&f.executor, 1).await;
        let _handle = f.dispatcher.dispatch(batch).unwrap();

        let idle = tokio::time::timeout(Duration::from_millis(50), f.dispatcher.wait_idle()).await;
        assert!(idle.is_err());

        release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), f.dispatcher.wait_idle())
            .await
            .unwrap();
        assert_eq!(f.dispatcher.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_closed_dispatcher_reverts_batch() {
        let f = fixture(FixedTransport { status: Some(200), release: None }, 3);
        let batch = flushing_batch(&f.executor, 2).await;

        f.dispatcher.close();
        assert!(f.dispatcher.dispatch(batch).is_none());
        assert_eq!(count(&f.executor, Some(RecordStatus::Pending)).await, 2);
    }
}
