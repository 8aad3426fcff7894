//! Events produced by the evaluation and tracking API.
//!
//! Events are immutable inputs to the pipeline. The pipeline only reads the
//! category, the user and the dedup subject, and serializes the variant
//! payload into the record body.

use crate::{EventCategory, User};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An experiment exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureEvent {
    pub insert_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub user: User,
    pub experiment_id: i64,
    pub experiment_key: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<i64>,
    pub variation_key: String,
    pub decision_reason: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// A custom tracking event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEvent {
    pub insert_id: String,
    pub timestamp: i64,
    pub user: User,
    pub event_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// A remote-config parameter evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigEvent {
    pub insert_id: String,
    pub timestamp: i64,
    pub user: User,
    pub parameter_id: i64,
    pub parameter_key: String,
    pub parameter_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_id: Option<i64>,
    pub decision_reason: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Event handed to the pipeline by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserEvent {
    Exposure(ExposureEvent),
    Track(TrackEvent),
    RemoteConfig(RemoteConfigEvent),
}

impl UserEvent {
    /// Generate a fresh idempotency key.
    pub fn new_insert_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Current time in epoch milliseconds, for producers stamping events.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    pub fn category(&self) -> EventCategory {
        match self {
            Self::Exposure(_) => EventCategory::Exposure,
            Self::Track(_) => EventCategory::Track,
            Self::RemoteConfig(_) => EventCategory::RemoteConfig,
        }
    }

    pub fn insert_id(&self) -> &str {
        match self {
            Self::Exposure(e) => &e.insert_id,
            Self::Track(e) => &e.insert_id,
            Self::RemoteConfig(e) => &e.insert_id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Exposure(e) => e.timestamp,
            Self::Track(e) => e.timestamp,
            Self::RemoteConfig(e) => e.timestamp,
        }
    }

    pub fn user(&self) -> &User {
        match self {
            Self::Exposure(e) => &e.user,
            Self::Track(e) => &e.user,
            Self::RemoteConfig(e) => &e.user,
        }
    }

    /// Serialize the variant payload into the opaque record body.
    ///
    /// The body does not carry the variant tag; the record category does.
    pub fn to_body(&self) -> serde_json::Result<String> {
        match self {
            Self::Exposure(e) => serde_json::to_string(e),
            Self::Track(e) => serde_json::to_string(e),
            Self::RemoteConfig(e) => serde_json::to_string(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposure() -> UserEvent {
        UserEvent::Exposure(ExposureEvent {
            insert_id: "insert-1".to_string(),
            timestamp: 1_700_000_000_000,
            user: User::with_device_id("device-1"),
            experiment_id: 42,
            experiment_key: 7,
            variation_id: Some(100),
            variation_key: "B".to_string(),
            decision_reason: "TRAFFIC_ALLOCATED".to_string(),
            properties: Map::new(),
        })
    }

    #[test]
    fn test_accessors() {
        let event = exposure();
        assert_eq!(event.category(), EventCategory::Exposure);
        assert_eq!(event.insert_id(), "insert-1");
        assert_eq!(event.timestamp(), 1_700_000_000_000);
        assert_eq!(event.user().device_id.as_deref(), Some("device-1"));
    }

    #[test]
    fn test_body_is_camel_case_without_tag() {
        let body: Value = serde_json::from_str(&exposure().to_body().unwrap()).unwrap();
        assert_eq!(body["insertId"], "insert-1");
        assert_eq!(body["experimentId"], 42);
        assert_eq!(body["variationKey"], "B");
        assert_eq!(body["user"]["deviceId"], "device-1");
        assert!(body.get("type").is_none());
    }

    #[test]
    fn test_tagged_input_parses() {
        let json = r#"{
            "type": "TRACK",
            "insertId": "insert-2",
            "timestamp": 1,
            "user": {"userId": "user-1"},
            "eventKey": "purchase",
            "value": 12.5
        }"#;
        let event: UserEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.category(), EventCategory::Track);
        match event {
            UserEvent::Track(track) => {
                assert_eq!(track.event_key, "purchase");
                assert_eq!(track.value, Some(12.5));
                assert!(track.properties.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_new_insert_id_is_unique() {
        assert_ne!(UserEvent::new_insert_id(), UserEvent::new_insert_id());
    }
}
