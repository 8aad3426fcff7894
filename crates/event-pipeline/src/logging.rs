//! Logging setup for hosts embedding the pipeline.
//!
//! The pipeline itself only emits `tracing` events. Hosts call [`init`] or
//! [`init_with_config`] once at startup; `RUST_LOG` overrides the default
//! level.

use tracing_subscriber::EnvFilter;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, logged once at startup.
    pub service_name: String,

    /// Default filter when `RUST_LOG` is unset (e.g. "info", "event_pipeline=debug").
    pub default_level: String,

    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "event-pipeline".into(),
            default_level: "info".into(),
            json: false,
        }
    }
}

/// Initialize logging with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Logs go to stderr so stdout stays free for host output. Calling this
/// twice is harmless; the second subscriber is discarded.
pub fn init_with_config(config: LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let result = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .try_init()
    };

    if result.is_ok() {
        tracing::debug!(service = %config.service_name, "Logging initialized");
    }
}
