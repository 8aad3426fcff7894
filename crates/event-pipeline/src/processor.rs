//! Event intake, buffering and flush scheduling.
//!
//! `process()` is the producer entry point. It never blocks on I/O: the
//! duplicate check runs inline, everything touching the store is queued on
//! the [`StoreExecutor`], and transmission runs on Tokio tasks owned by the
//! [`EventDispatcher`].
//!
//! A flush is started by:
//! - the pending count reaching a multiple of `flush_threshold`
//! - the periodic tick while started
//! - `stop()` / `flush()`
//! - `close()` (the only trigger that ignores backoff)

use crate::backoff::BackoffController;
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::dedup::DedupDeterminer;
use crate::dispatcher::EventDispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::StoreExecutor;
use crate::transport::{EventTransport, HttpEventTransport};
use event_model::{EventRecord, NewEventRecord, RecordStatus, UserEvent};
use event_store::{RecordStore, StorageResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Host application visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Threshold,
    Tick,
    Manual,
    Stop,
    Close,
}

impl FlushTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Threshold => "threshold",
            Self::Tick => "tick",
            Self::Manual => "manual",
            Self::Stop => "stop",
            Self::Close => "close",
        }
    }

    fn respects_backoff(&self) -> bool {
        !matches!(self, Self::Close)
    }
}

struct ProcessorInner {
    config: PipelineConfig,
    executor: Arc<StoreExecutor>,
    dispatcher: EventDispatcher,
    backoff: Arc<BackoffController>,
    dedup: Mutex<DedupDeterminer>,
    closed: AtomicBool,
}

impl ProcessorInner {
    /// Store-thread half of `process()`.
    fn ingest(&self, store: &mut dyn RecordStore, record: NewEventRecord) {
        if let Err(e) = self.try_ingest(store, &record) {
            warn!(category = record.category.as_str(), error = %e, "Event ingestion failed");
        }
    }

    fn try_ingest(&self, store: &mut dyn RecordStore, record: &NewEventRecord) -> PipelineResult<()> {
        let id = store.save(record)?;

        let total = store.count(None)?;
        if total > self.config.storage_max_size {
            let excess = total - self.config.storage_max_size;
            store.delete_oldest(excess)?;
            warn!(evicted = excess, max = self.config.storage_max_size, "Event storage full, evicted oldest records");
        }

        let pending = store.count(Some(RecordStatus::Pending))?;
        debug!(id, pending, "Event stored");

        if pending > 0 && pending % self.config.flush_threshold == 0 {
            self.flush_on_store(store, FlushTrigger::Threshold)?;
        }
        Ok(())
    }

    /// Select the oldest pending batch, mark it flushing and hand it off.
    ///
    /// Must run on the store thread so selection and marking are one step.
    fn flush_on_store(
        &self,
        store: &mut dyn RecordStore,
        trigger: FlushTrigger,
    ) -> PipelineResult<Option<JoinHandle<()>>> {
        if trigger.respects_backoff() && !self.backoff.is_allow_next_flush() {
            debug!(trigger = trigger.as_str(), "Flush skipped, backing off");
            return Ok(None);
        }

        let mut batch = store.get_events_to_flush(self.config.flush_max_batch_size)?;
        if batch.is_empty() {
            return Ok(None);
        }

        let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
        store.update(&ids, RecordStatus::Flushing)?;
        for record in &mut batch {
            record.status = RecordStatus::Flushing;
        }

        debug!(trigger = trigger.as_str(), count = ids.len(), "Flushing batch");
        Ok(self.dispatcher.dispatch(batch))
    }

    fn trigger_flush(self: &Arc<Self>, trigger: FlushTrigger) {
        let inner = self.clone();
        let submitted = self.executor.execute(move |store| {
            if let Err(e) = inner.flush_on_store(store, trigger) {
                warn!(trigger = trigger.as_str(), error = %e, "Flush failed");
            }
        });
        if let Err(e) = submitted {
            debug!(trigger = trigger.as_str(), error = %e, "Flush not scheduled");
        }
    }
}

/// Revert records stranded in `Flushing` by a previous run.
fn recover_flushing(store: &mut dyn RecordStore) -> StorageResult<usize> {
    let stranded = store.find_by_status(RecordStatus::Flushing)?;
    let ids: Vec<i64> = stranded.iter().map(|r| r.id).collect();
    store.update(&ids, RecordStatus::Pending)?;
    Ok(ids.len())
}

/// Buffered, deduplicated event intake with scheduled delivery.
pub struct EventProcessor {
    inner: Arc<ProcessorInner>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl EventProcessor {
    /// Build a processor on the current Tokio runtime.
    ///
    /// Takes ownership of `store`; from here on it is only touched from the
    /// store executor thread. Records left `Flushing` by an earlier run are
    /// reverted to `Pending` before anything else runs.
    pub fn new(
        config: PipelineConfig,
        store: Box<dyn RecordStore>,
        transport: Arc<dyn EventTransport>,
        clock: Arc<dyn Clock>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| PipelineError::Config(format!("no Tokio runtime available: {}", e)))?;

        let executor = Arc::new(StoreExecutor::spawn(store)?);
        let backoff = Arc::new(BackoffController::new(
            config.backoff_base,
            config.backoff_max,
            clock.clone(),
        ));
        let dispatcher = EventDispatcher::new(
            executor.clone(),
            transport,
            backoff.clone(),
            config.max_in_flight_batches,
            runtime.clone(),
        );
        let dedup = DedupDeterminer::from_config(&config, clock);

        executor.execute(|store| match recover_flushing(store) {
            Ok(0) => {}
            Ok(count) => info!(count, "Recovered records left flushing by a previous run"),
            Err(e) => warn!(error = %e, "Flushing record recovery failed"),
        })?;

        info!(
            storage_max_size = config.storage_max_size,
            flush_threshold = config.flush_threshold,
            flush_max_batch_size = config.flush_max_batch_size,
            "Event processor created"
        );

        Ok(Self {
            inner: Arc::new(ProcessorInner {
                config,
                executor,
                dispatcher,
                backoff,
                dedup: Mutex::new(dedup),
                closed: AtomicBool::new(false),
            }),
            scheduler: Mutex::new(None),
            runtime,
        })
    }

    /// Build a processor delivering over HTTP with the system clock.
    pub fn with_http(config: PipelineConfig, store: Box<dyn RecordStore>) -> PipelineResult<Self> {
        let transport = Arc::new(HttpEventTransport::new(&config)?);
        Self::new(config, store, transport, Arc::new(SystemClock))
    }

    /// Accept an event. Never fails and never blocks on I/O.
    ///
    /// Duplicates are dropped here; everything else is stored
    /// asynchronously and may trigger a threshold flush.
    pub fn process(&self, event: UserEvent) {
        if self.inner.closed.load(Ordering::SeqCst) {
            debug!(insert_id = event.insert_id(), "Processor closed, event dropped");
            return;
        }

        if self.inner.dedup.lock().is_duplicate(&event) {
            debug!(
                insert_id = event.insert_id(),
                category = event.category().as_str(),
                "Duplicate event dropped"
            );
            return;
        }

        let record = match NewEventRecord::from_event(&event) {
            Ok(record) => record,
            Err(e) => {
                warn!(insert_id = event.insert_id(), error = %e, "Event not serializable, dropped");
                return;
            }
        };

        let inner = self.inner.clone();
        if let Err(e) = self
            .inner
            .executor
            .execute(move |store| inner.ingest(store, record))
        {
            warn!(insert_id = event.insert_id(), error = %e, "Event dropped");
        }
    }

    /// Start the periodic flush. Idempotent.
    pub fn start(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return;
        }

        let inner = self.inner.clone();
        let period = self.inner.config.flush_interval;
        *scheduler = Some(self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.trigger_flush(FlushTrigger::Tick);
            }
        }));

        info!(interval_ms = period.as_millis() as u64, "Flush scheduler started");
    }

    /// Cancel the periodic flush and flush once more.
    pub fn stop(&self) {
        if let Some(handle) = self.scheduler.lock().take() {
            handle.abort();
            info!("Flush scheduler stopped");
        }
        self.inner.trigger_flush(FlushTrigger::Stop);
    }

    /// Flush now, subject to backoff.
    pub fn flush(&self) {
        self.inner.trigger_flush(FlushTrigger::Manual);
    }

    pub fn on_lifecycle(&self, state: AppState) {
        debug!(?state, "Lifecycle change");
        match state {
            AppState::Foreground => self.start(),
            AppState::Background => self.stop(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    /// Flush what remains and release the store. Idempotent.
    ///
    /// Waits at most `close_timeout` for in-flight batches; records whose
    /// outcome is not applied by then are redelivered after restart.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let scheduler = self.scheduler.lock().take();
        if let Some(handle) = scheduler {
            handle.abort();
        }

        let inner = self.inner.clone();
        let final_flush = self
            .inner
            .executor
            .call(move |store| inner.flush_on_store(store, FlushTrigger::Close))
            .await;
        let handle = match final_flush {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                warn!(error = %e, "Final flush failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "Final flush not scheduled");
                None
            }
        };

        let dispatcher = self.inner.dispatcher.clone();
        let drained = tokio::time::timeout(self.inner.config.close_timeout, async move {
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            dispatcher.wait_idle().await;
        })
        .await;
        if drained.is_err() {
            warn!(
                timeout_ms = self.inner.config.close_timeout.as_millis() as u64,
                "In-flight batches still pending at close"
            );
        }

        self.inner.dispatcher.close();
        self.inner.executor.shutdown().await;
        info!("Event processor closed");
    }

    /// Number of stored records, optionally only those with `status`.
    pub async fn record_count(&self, status: Option<RecordStatus>) -> PipelineResult<u64> {
        Ok(self
            .inner
            .executor
            .call(move |store| store.count(status))
            .await??)
    }

    /// Stored records with `status`, oldest first.
    pub async fn records(&self, status: RecordStatus) -> PipelineResult<Vec<EventRecord>> {
        Ok(self
            .inner
            .executor
            .call(move |store| store.find_by_status(status))
            .await??)
    }

    #[cfg(test)]
    pub(crate) fn backoff(&self) -> &Arc<BackoffController> {
        &self.inner.backoff
    }
}

impl Drop for EventProcessor {
    fn drop(&mut self) {
        if let Some(handle) = self.scheduler.get_mut().take() {
            handle.abort();
        }
    }
}
