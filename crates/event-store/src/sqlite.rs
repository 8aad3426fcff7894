//! SQLite-backed record store.

use crate::{migrations, RecordStore, StorageError, StorageResult};
use event_model::{EventCategory, EventRecord, NewEventRecord, RecordStatus};
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, info};

/// Raw row as read from `event_records`, decoded by `into_record`.
type RawRow = (i64, String, String, String);

/// Durable record store.
pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    /// Open a store at the given path, running migrations if needed.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        migrations::run_migrations(&conn)?;

        info!(path = %path.display(), "Event store opened");
        Ok(Self { conn })
    }

    /// Open an in-memory store for testing.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        // Note: WAL mode doesn't apply to in-memory databases
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn select_records(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StorageResult<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<Vec<RawRow>, _>>()?;

        rows.into_iter().map(into_record).collect()
    }

    /// Run `sql` with an `IN (...)` list of ids appended as parameters after
    /// `leading`.
    fn execute_for_ids(
        &self,
        sql_template: &str,
        leading: &[&dyn rusqlite::ToSql],
        ids: &[i64],
    ) -> StorageResult<usize> {
        let placeholders = std::iter::repeat("?")
            .take(ids.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = sql_template.replace("{ids}", &placeholders);

        let mut params_vec: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(leading.len() + ids.len());
        params_vec.extend_from_slice(leading);
        for id in ids {
            params_vec.push(id);
        }

        Ok(self.conn.execute(&sql, params_vec.as_slice())?)
    }
}

fn into_record((id, status, category, body): RawRow) -> StorageResult<EventRecord> {
    let status = RecordStatus::parse(&status)
        .ok_or_else(|| StorageError::InvalidData(format!("record {id}: unknown status {status}")))?;
    let category = EventCategory::parse(&category).ok_or_else(|| {
        StorageError::InvalidData(format!("record {id}: unknown category {category}"))
    })?;
    Ok(EventRecord {
        id,
        status,
        category,
        body,
    })
}

impl RecordStore for SqliteRecordStore {
    fn save(&mut self, record: &NewEventRecord) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO event_records (status, category, body) VALUES (?1, ?2, ?3)",
            params![
                RecordStatus::Pending.as_str(),
                record.category.as_str(),
                record.body
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn count(&self, status: Option<RecordStatus>) -> StorageResult<u64> {
        let count: i64 = match status {
            Some(status) => self.conn.query_row(
                "SELECT COUNT(*) FROM event_records WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM event_records", [], |row| row.get(0))?,
        };
        Ok(count.max(0) as u64)
    }

    fn get_events_to_flush(&self, limit: usize) -> StorageResult<Vec<EventRecord>> {
        self.select_records(
            "SELECT id, status, category, body
             FROM event_records
             WHERE status = ?1
             ORDER BY id ASC
             LIMIT ?2",
            params![RecordStatus::Pending.as_str(), limit as i64],
        )
    }

    fn find_by_status(&self, status: RecordStatus) -> StorageResult<Vec<EventRecord>> {
        self.select_records(
            "SELECT id, status, category, body
             FROM event_records
             WHERE status = ?1
             ORDER BY id ASC",
            params![status.as_str()],
        )
    }

    fn update(&mut self, ids: &[i64], status: RecordStatus) -> StorageResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let status = status.as_str();
        let updated = self.execute_for_ids(
            "UPDATE event_records SET status = ? WHERE id IN ({ids})",
            &[&status],
            ids,
        )?;
        debug!(count = updated, status, "Updated record status");
        Ok(())
    }

    fn delete(&mut self, ids: &[i64]) -> StorageResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let deleted = self.execute_for_ids("DELETE FROM event_records WHERE id IN ({ids})", &[], ids)?;
        debug!(count = deleted, "Deleted records");
        Ok(())
    }

    fn delete_oldest(&mut self, count: u64) -> StorageResult<()> {
        if count == 0 {
            return Ok(());
        }
        self.conn.execute(
            "DELETE FROM event_records
             WHERE id IN (SELECT id FROM event_records ORDER BY id ASC LIMIT ?1)",
            params![count as i64],
        )?;
        Ok(())
    }
}
