//! Data types shared by the event delivery pipeline.
//!
//! This crate provides:
//! - `UserEvent`: exposure, track and remote-config events produced by the SDK
//! - `User`: the resolved user attached to every event
//! - `EventRecord`: the persisted unit the store hands back to the pipeline
//! - `EventCategory` / `RecordStatus`: the enums those records are keyed on

mod event;
mod record;
mod user;

pub use event::{ExposureEvent, RemoteConfigEvent, TrackEvent, UserEvent};
pub use record::{EventCategory, EventRecord, NewEventRecord, RecordStatus};
pub use user::{User, IDENTIFIER_DEVICE_ID, IDENTIFIER_ID, IDENTIFIER_USER_ID};
