//! Wire payload and HTTP delivery of event batches.

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use async_trait::async_trait;
use event_model::{EventCategory, EventRecord};
use reqwest::Client;
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::{debug, warn};

/// Batch body posted to the collector.
///
/// Stored bodies are embedded verbatim, split by category.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload<'a> {
    pub exposure_events: Vec<&'a RawValue>,
    pub track_events: Vec<&'a RawValue>,
    pub remote_config_events: Vec<&'a RawValue>,
}

impl<'a> EventPayload<'a> {
    /// Build the payload for `records`, preserving their order per category.
    ///
    /// Records whose body is not valid JSON are left out and logged.
    pub fn from_records(records: &'a [EventRecord]) -> Self {
        let mut payload = Self::default();
        for record in records {
            let body: &RawValue = match serde_json::from_str(&record.body) {
                Ok(body) => body,
                Err(e) => {
                    warn!(id = record.id, error = %e, "Skipping record with malformed body");
                    continue;
                }
            };
            match record.category {
                EventCategory::Exposure => payload.exposure_events.push(body),
                EventCategory::Track => payload.track_events.push(body),
                EventCategory::RemoteConfig => payload.remote_config_events.push(body),
            }
        }
        payload
    }

    pub fn len(&self) -> usize {
        self.exposure_events.len() + self.track_events.len() + self.remote_config_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Network side of delivery.
///
/// One call is one attempt; retries are the pipeline's business.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Send the payload and return the HTTP status code.
    ///
    /// An `Err` means no status was received (connect error, timeout).
    async fn send(&self, payload: &EventPayload<'_>) -> PipelineResult<u16>;
}

/// Posts batches to the collector's events endpoint.
pub struct HttpEventTransport {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpEventTransport {
    pub fn new(config: &PipelineConfig) -> PipelineResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            url: config.events_endpoint(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventTransport for HttpEventTransport {
    async fn send(&self, payload: &EventPayload<'_>) -> PipelineResult<u16> {
        debug!(url = %self.url, events = payload.len(), "Sending batch");

        let mut request = self.client.post(&self.url).json(payload);
        if let Some(api_key) = &self.api_key {
            request = request.header("X-Api-Key", api_key);
        }

        let response = request.send().await?;
        Ok(response.status().as_u16())
    }
}
