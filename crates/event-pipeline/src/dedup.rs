//! Short-window suppression of repeated exposure and remote-config events.
//!
//! A repeat is the same subject (experiment variation or parameter value,
//! plus decision reason) reported for the same resolved user within the
//! category's window. Track events are never suppressed.

use crate::clock::Clock;
use crate::config::PipelineConfig;
use event_model::{EventCategory, UserEvent};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Maximum cached keys per category before expired entries are pruned.
pub const DEDUP_CACHE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    subject: String,
    identifiers: BTreeMap<String, String>,
}

/// Per-category determiner.
#[derive(Debug)]
struct CategoryDeduplicator {
    category: EventCategory,
    /// `None` disables dedup for the category.
    window_millis: Option<i64>,
    capacity: usize,
    last_accepted: HashMap<DedupKey, i64>,
}

impl CategoryDeduplicator {
    fn new(category: EventCategory, window: Option<Duration>, capacity: usize) -> Self {
        Self {
            category,
            window_millis: window.map(|w| i64::try_from(w.as_millis()).unwrap_or(i64::MAX)),
            capacity,
            last_accepted: HashMap::new(),
        }
    }

    fn supports(&self, event: &UserEvent) -> bool {
        event.category() == self.category
    }

    fn is_duplicate(&mut self, event: &UserEvent, now: i64) -> bool {
        let Some(window) = self.window_millis else {
            return false;
        };
        let Some(subject) = subject_of(event) else {
            return false;
        };
        let key = DedupKey {
            subject,
            identifiers: event.user().resolved_identifiers(),
        };

        if let Some(&last) = self.last_accepted.get(&key) {
            if now.saturating_sub(last) <= window {
                return true;
            }
        } else if self.last_accepted.len() >= self.capacity {
            self.make_room(now, window);
        }

        self.last_accepted.insert(key, now);
        false
    }

    fn make_room(&mut self, now: i64, window: i64) {
        self.last_accepted
            .retain(|_, last| now.saturating_sub(*last) <= window);
        if self.last_accepted.len() >= self.capacity {
            debug!(
                category = self.category.as_str(),
                entries = self.last_accepted.len(),
                "Dedup cache full of live entries, clearing"
            );
            self.last_accepted.clear();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.last_accepted.len()
    }
}

fn subject_of(event: &UserEvent) -> Option<String> {
    match event {
        UserEvent::Exposure(e) => Some(format!(
            "{}:{}:{}",
            e.experiment_id,
            optional_id(e.variation_id),
            e.decision_reason
        )),
        UserEvent::RemoteConfig(e) => Some(format!(
            "{}:{}:{}",
            e.parameter_id,
            optional_id(e.value_id),
            e.decision_reason
        )),
        UserEvent::Track(_) => None,
    }
}

fn optional_id(id: Option<i64>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Decides whether an incoming event repeats one accepted recently.
///
/// Not thread-safe on its own; the processor keeps it behind a mutex.
pub struct DedupDeterminer {
    determiners: Vec<CategoryDeduplicator>,
    clock: Arc<dyn Clock>,
}

impl DedupDeterminer {
    pub fn new(
        exposure_window: Option<Duration>,
        remote_config_window: Option<Duration>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_capacity(
            exposure_window,
            remote_config_window,
            DEDUP_CACHE_CAPACITY,
            clock,
        )
    }

    pub fn from_config(config: &PipelineConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config.exposure_dedup_window,
            config.remote_config_dedup_window,
            clock,
        )
    }

    pub fn with_capacity(
        exposure_window: Option<Duration>,
        remote_config_window: Option<Duration>,
        capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            determiners: vec![
                CategoryDeduplicator::new(EventCategory::Exposure, exposure_window, capacity),
                CategoryDeduplicator::new(
                    EventCategory::RemoteConfig,
                    remote_config_window,
                    capacity,
                ),
            ],
            clock,
        }
    }

    /// `true` if the event should be dropped.
    ///
    /// A non-duplicate decision records the current time for the event's key;
    /// a duplicate decision leaves the recorded time untouched.
    pub fn is_duplicate(&mut self, event: &UserEvent) -> bool {
        let now = self.clock.now_millis();
        match self.determiners.iter_mut().find(|d| d.supports(event)) {
            Some(determiner) => determiner.is_duplicate(event, now),
            None => false,
        }
    }
}
