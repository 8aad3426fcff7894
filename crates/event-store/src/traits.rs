//! Storage contract consumed by the pipeline.

use crate::StorageResult;
use event_model::{EventRecord, NewEventRecord, RecordStatus};

/// Persistent record store.
///
/// Implementations are driven from a single thread, so mutating calls take
/// `&mut self` and no internal locking is required.
pub trait RecordStore: Send {
    /// Persist a new `Pending` record and return its id.
    ///
    /// Ids must increase monotonically and must never be reused.
    fn save(&mut self, record: &NewEventRecord) -> StorageResult<i64>;

    /// Count records, all of them or only those with `status`.
    fn count(&self, status: Option<RecordStatus>) -> StorageResult<u64>;

    /// The oldest `limit` `Pending` records, ordered by ascending id.
    fn get_events_to_flush(&self, limit: usize) -> StorageResult<Vec<EventRecord>>;

    /// All records with `status`, ordered by ascending id.
    fn find_by_status(&self, status: RecordStatus) -> StorageResult<Vec<EventRecord>>;

    /// Set `status` on every record in `ids`. Unknown ids are ignored.
    fn update(&mut self, ids: &[i64], status: RecordStatus) -> StorageResult<()>;

    /// Delete every record in `ids`. Unknown ids are ignored.
    fn delete(&mut self, ids: &[i64]) -> StorageResult<()>;

    /// Delete the `count` oldest records regardless of status.
    fn delete_oldest(&mut self, count: u64) -> StorageResult<()>;
}
