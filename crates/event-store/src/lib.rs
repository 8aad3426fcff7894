//! Local record store for the event delivery pipeline.
//!
//! This crate provides:
//! - `RecordStore`: the storage contract the pipeline consumes
//! - `SqliteRecordStore`: durable store backed by SQLite (WAL mode, migrations)
//! - `MemoryRecordStore`: in-process store for tests and ephemeral hosts
//!
//! # Threading
//!
//! Stores are `Send` but not shared: the pipeline moves a store onto its
//! single ingestion thread and every operation runs there in FIFO order.

mod error;
mod memory;
mod migrations;
mod sqlite;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryRecordStore;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use sqlite::SqliteRecordStore;
pub use traits::RecordStore;
