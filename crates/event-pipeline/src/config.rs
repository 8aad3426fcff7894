//! Configuration for the event pipeline.

use crate::error::{PipelineError, PipelineResult};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default collector base URL.
pub const DEFAULT_EVENT_URL: &str = "http://127.0.0.1:8080";

/// Path appended to the collector base URL for batch delivery.
pub const EVENTS_PATH: &str = "/api/v2/events";

/// Pipeline configuration.
///
/// Immutable once a processor is built from it.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of stored records; oldest are evicted beyond it.
    pub storage_max_size: u64,
    /// Period of the background flush tick.
    pub flush_interval: Duration,
    /// A flush is triggered whenever the pending count hits a multiple of this.
    pub flush_threshold: u64,
    /// Maximum records per dispatched batch.
    pub flush_max_batch_size: usize,
    /// Exposure dedup window. `None` disables exposure dedup.
    pub exposure_dedup_window: Option<Duration>,
    /// Remote-config dedup window. `None` disables remote-config dedup.
    pub remote_config_dedup_window: Option<Duration>,
    /// Delay after the first consecutive delivery failure.
    pub backoff_base: Duration,
    /// Optional cap on the backoff delay.
    pub backoff_max: Option<Duration>,
    /// Batches allowed on the network at once.
    pub max_in_flight_batches: usize,
    /// Collector base URL.
    pub event_url: String,
    /// Sent as `X-Api-Key` when present.
    pub api_key: Option<String>,
    /// HTTP request timeout.
    pub request_timeout: Duration,
    /// Upper bound on how long `close()` waits for the final batch.
    pub close_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_max_size: 10_000,
            flush_interval: Duration::from_secs(10),
            flush_threshold: 10,
            flush_max_batch_size: 100,
            exposure_dedup_window: Some(Duration::from_secs(60)),
            remote_config_dedup_window: Some(Duration::from_secs(60)),
            backoff_base: Duration::from_secs(10),
            backoff_max: None,
            max_in_flight_batches: 3,
            event_url: DEFAULT_EVENT_URL.to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `EVENT_PIPELINE_*` environment variables.
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `EVENT_PIPELINE_*` key. Unparseable values fall back to the default.
    ///
    /// Dedup windows set to `0` disable dedup for that category.
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            Duration::from_millis(parse_or(&lookup, key, default.as_millis() as u64))
        };
        let window = |key: &str, default: Option<Duration>| {
            let fallback = default.map(|d| d.as_millis() as u64).unwrap_or(0);
            match parse_or(&lookup, key, fallback) {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            }
        };

        let config = Self {
            storage_max_size: parse_or(
                &lookup,
                "EVENT_PIPELINE_STORAGE_MAX_SIZE",
                defaults.storage_max_size,
            ),
            flush_interval: millis("EVENT_PIPELINE_FLUSH_INTERVAL_MS", defaults.flush_interval),
            flush_threshold: parse_or(
                &lookup,
                "EVENT_PIPELINE_FLUSH_THRESHOLD",
                defaults.flush_threshold,
            ),
            flush_max_batch_size: parse_or(
                &lookup,
                "EVENT_PIPELINE_FLUSH_MAX_BATCH_SIZE",
                defaults.flush_max_batch_size,
            ),
            exposure_dedup_window: window(
                "EVENT_PIPELINE_EXPOSURE_DEDUP_MS",
                defaults.exposure_dedup_window,
            ),
            remote_config_dedup_window: window(
                "EVENT_PIPELINE_REMOTE_CONFIG_DEDUP_MS",
                defaults.remote_config_dedup_window,
            ),
            backoff_base: millis("EVENT_PIPELINE_BACKOFF_BASE_MS", defaults.backoff_base),
            backoff_max: lookup("EVENT_PIPELINE_BACKOFF_MAX_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis),
            max_in_flight_batches: parse_or(
                &lookup,
                "EVENT_PIPELINE_MAX_IN_FLIGHT",
                defaults.max_in_flight_batches,
            ),
            event_url: lookup("EVENT_PIPELINE_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.event_url),
            api_key: lookup("EVENT_PIPELINE_API_KEY").filter(|v| !v.trim().is_empty()),
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "EVENT_PIPELINE_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            close_timeout: millis("EVENT_PIPELINE_CLOSE_TIMEOUT_MS", defaults.close_timeout),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.storage_max_size == 0 {
            return Err(PipelineError::Config(
                "storage_max_size must be positive".to_string(),
            ));
        }
        if self.flush_threshold == 0 {
            return Err(PipelineError::Config(
                "flush_threshold must be positive".to_string(),
            ));
        }
        if self.flush_max_batch_size == 0 {
            return Err(PipelineError::Config(
                "flush_max_batch_size must be positive".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(PipelineError::Config(
                "flush_interval must be positive".to_string(),
            ));
        }
        if self.max_in_flight_batches == 0 {
            return Err(PipelineError::Config(
                "max_in_flight_batches must be positive".to_string(),
            ));
        }

        let url = url::Url::parse(&self.event_url)
            .map_err(|e| PipelineError::Config(format!("invalid event_url: {}", e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(PipelineError::Config(format!(
                "event_url must be http(s), got {}",
                url.scheme()
            )));
        }

        Ok(())
    }

    /// Full URL batches are posted to.
    pub fn events_endpoint(&self) -> String {
        format!("{}{}", self.event_url.trim_end_matches('/'), EVENTS_PATH)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Ignoring unparseable configuration value");
                default
            }
        },
        None => default,
    }
}
