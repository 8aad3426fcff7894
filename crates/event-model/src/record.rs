//! Persisted event records.

use crate::UserEvent;
use serde::{Deserialize, Serialize};

/// Wire category of a record. Decides which payload array the body lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    Exposure,
    Track,
    RemoteConfig,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exposure => "EXPOSURE",
            Self::Track => "TRACK",
            Self::RemoteConfig => "REMOTE_CONFIG",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EXPOSURE" => Some(Self::Exposure),
            "TRACK" => Some(Self::Track),
            "REMOTE_CONFIG" => Some(Self::RemoteConfig),
            _ => None,
        }
    }
}

/// Delivery status of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    /// Stored, not part of any in-flight batch.
    Pending,
    /// Part of an in-flight batch.
    Flushing,
}

impl Default for RecordStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Flushing => "FLUSHING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "FLUSHING" => Some(Self::Flushing),
            _ => None,
        }
    }
}

/// A stored event record.
///
/// `id` is assigned by the store and increases monotonically; it defines
/// flush order. `category` and `body` never change after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: i64,
    pub status: RecordStatus,
    pub category: EventCategory,
    /// Pre-serialized JSON payload.
    pub body: String,
}

/// A record about to be saved. Always stored as `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEventRecord {
    pub category: EventCategory,
    pub body: String,
}

impl NewEventRecord {
    /// Build the record for an event, serializing its payload once.
    pub fn from_event(event: &UserEvent) -> serde_json::Result<Self> {
        Ok(Self {
            category: event.category(),
            body: event.to_body()?,
        })
    }
}
