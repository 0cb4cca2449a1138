//! ---
//! mtc_section: "01-core-functionality"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Shared primitives and utilities for the adapter runtime."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of the instants stamped onto outbound lines.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by [`Utc::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(instant),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.lock() = instant;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.instant.lock();
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock()
    }
}

/// Render an instant as `YYYY-MM-DDTHH:MM:SS.fffffffZ`.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    // chrono has no 7-digit specifier; truncate nanoseconds to 100ns ticks.
    let ticks = (instant.timestamp_subsec_nanos() / 100).min(9_999_999);
    format!("{}.{:07}Z", instant.format("%Y-%m-%dT%H:%M:%S"), ticks)
}
