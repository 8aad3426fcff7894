//! Resolved user attached to every event.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Identifier type for the SDK-assigned user id.
pub const IDENTIFIER_ID: &str = "$id";
/// Identifier type for the host application's user id.
pub const IDENTIFIER_USER_ID: &str = "$userId";
/// Identifier type for the device id.
pub const IDENTIFIER_DEVICE_ID: &str = "$deviceId";

/// User the event was evaluated for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Custom identifiers keyed by identifier type.
    #[serde(default)]
    pub identifiers: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl User {
    /// Create a user with only a device id.
    pub fn with_device_id(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Default::default()
        }
    }

    /// All identifiers of this user, the well-known ones included.
    ///
    /// Empty values are dropped. Well-known identifiers win over a custom
    /// identifier registered under the same type.
    pub fn resolved_identifiers(&self) -> BTreeMap<String, String> {
        let mut resolved: BTreeMap<String, String> = self
            .identifiers
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(kind, value)| (kind.clone(), value.clone()))
            .collect();

        let well_known = [
            (IDENTIFIER_ID, &self.id),
            (IDENTIFIER_USER_ID, &self.user_id),
            (IDENTIFIER_DEVICE_ID, &self.device_id),
        ];
        for (kind, value) in well_known {
            if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
                resolved.insert(kind.to_string(), value.clone());
            }
        }

        resolved
    }
}
