//! Delivery backoff after consecutive transient failures.

use crate::clock::Clock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
struct BackoffState {
    consecutive_failures: u32,
    /// Epoch millis before which no gated flush may start.
    next_allowed_at: i64,
}

/// Tracks consecutive delivery failures and gates flushes.
///
/// Updated from transmission tasks and read from store tasks, so the state
/// sits behind a mutex.
pub struct BackoffController {
    base: Duration,
    max: Option<Duration>,
    clock: Arc<dyn Clock>,
    state: Mutex<BackoffState>,
}

impl BackoffController {
    pub fn new(base: Duration, max: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            base,
            max,
            clock,
            state: Mutex::new(BackoffState {
                consecutive_failures: 0,
                next_allowed_at: now,
            }),
        }
    }

    /// Feed a delivery outcome back.
    ///
    /// Success (including permanent rejection) resets the state. Failure
    /// pushes the next allowed flush out by `base * 2^(failures - 1)`.
    pub fn check_response(&self, is_success: bool) {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();

        if is_success {
            if state.consecutive_failures > 0 {
                info!(
                    failures = state.consecutive_failures,
                    "Delivery recovered, backoff reset"
                );
            }
            state.consecutive_failures = 0;
            state.next_allowed_at = now;
            return;
        }

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let delay = compute_backoff(state.consecutive_failures, self.base, self.max);
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        state.next_allowed_at = now.saturating_add(delay_ms);

        debug!(
            failures = state.consecutive_failures,
            delay_ms, "Delivery failed, backing off"
        );
    }

    /// Whether a gated flush may start now.
    pub fn is_allow_next_flush(&self) -> bool {
        self.clock.now_millis() >= self.state.lock().next_allowed_at
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    pub fn next_allowed_at(&self) -> i64 {
        self.state.lock().next_allowed_at
    }
}

/// `base * 2^(failures - 1)`, capped at `max` when set.
fn compute_backoff(failures: u32, base: Duration, max: Option<Duration>) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let multiplier = 1u64.checked_shl(failures - 1).unwrap_or(u64::MAX);
    let mut delay_ms = base_ms.saturating_mul(multiplier);
    if let Some(max) = max {
        delay_ms = delay_ms.min(max.as_millis() as u64);
    }

    Duration::from_millis(delay_ms)
}
