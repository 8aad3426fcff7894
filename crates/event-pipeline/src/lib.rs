//! Event pipeline: buffered, at-least-once delivery of SDK events.
//!
//! Events handed to [`EventProcessor::process`] are deduplicated, persisted
//! as `Pending` records and delivered in batches to a remote collector.
//!
//! # Core Invariants
//!
//! 1. **Never throws**: producer and lifecycle calls log failures and return
//! 2. **Serialized store**: every store access runs on one executor thread, in order
//! 3. **Oldest first**: batches are the lowest-id `Pending` records
//! 4. **At-least-once**: records leave the store only on 2xx or 4xx
//!
//! # Architecture
//!
//! ```text
//! process() -> dedup -> StoreExecutor (save, evict, threshold)
//!                             |
//!                   select + mark FLUSHING
//!                             v
//!                     EventDispatcher -> EventTransport -> collector
//!                             |
//!             delete / revert PENDING + backoff feedback
//! ```

pub mod backoff;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod logging;
pub mod processor;
pub mod transport;

#[cfg(test)]
mod tests;

pub use backoff::BackoffController;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PipelineConfig;
pub use dedup::{DedupDeterminer, DEDUP_CACHE_CAPACITY};
pub use dispatcher::{DeliveryOutcome, EventDispatcher};
pub use error::{PipelineError, PipelineResult};
pub use executor::StoreExecutor;
pub use processor::{AppState, EventProcessor};
pub use transport::{EventPayload, EventTransport, HttpEventTransport};
