//! In-memory record store.

use crate::{RecordStore, StorageResult};
use event_model::{EventRecord, NewEventRecord, RecordStatus};
use std::collections::BTreeMap;

/// Record store kept entirely in process memory.
///
/// Records are lost when the store is dropped.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: BTreeMap<i64, EventRecord>,
    last_id: i64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn save(&mut self, record: &NewEventRecord) -> StorageResult<i64> {
        self.last_id += 1;
        let id = self.last_id;
        self.records.insert(
            id,
            EventRecord {
                id,
                status: RecordStatus::Pending,
                category: record.category,
                body: record.body.clone(),
            },
        );
        Ok(id)
    }

    fn count(&self, status: Option<RecordStatus>) -> StorageResult<u64> {
        let count = match status {
            Some(status) => self.records.values().filter(|r| r.status == status).count(),
            None => self.records.len(),
        };
        Ok(count as u64)
    }

    fn get_events_to_flush(&self, limit: usize) -> StorageResult<Vec<EventRecord>> {
        Ok(self
            .records
            .values()
            .filter(|r| r.status == RecordStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    fn find_by_status(&self, status: RecordStatus) -> StorageResult<Vec<EventRecord>> {
        Ok(self
            .records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    fn update(&mut self, ids: &[i64], status: RecordStatus) -> StorageResult<()> {
        for id in ids {
            if let Some(record) = self.records.get_mut(id) {
                record.status = status;
            }
        }
        Ok(())
    }

    fn delete(&mut self, ids: &[i64]) -> StorageResult<()> {
        for id in ids {
            self.records.remove(id);
        }
        Ok(())
    }

    fn delete_oldest(&mut self, count: u64) -> StorageResult<()> {
        for _ in 0..count {
            if self.records.pop_first().is_none() {
                break;
            }
        }
        Ok(())
    }
}
