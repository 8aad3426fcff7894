//! Integration tests for the event pipeline.
//!
//! - `harness.rs`    - scripted transport, spy store and processor wiring
//! - `ingestion.rs`  - dedup, storage and eviction
//! - `flushing.rs`   - threshold, tick and manual flush triggers, batch selection
//! - `delivery.rs`   - outcome handling, backoff and in-flight limits
//! - `lifecycle.rs`  - start/stop, foreground/background, close and recovery
//! - `robustness.rs` - failing stores and transports never reach the caller

mod lifecycle;
