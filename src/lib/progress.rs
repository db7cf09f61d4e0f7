//! Thread-safe progress logging at count intervals.

use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

use crate::logging::format_count;

/// Logs a progress line every time the count crosses an interval boundary.
///
/// Workers add their shard's record counts as they finish; the logging
/// decision is a single atomic add, so the tracker can be shared freely.
pub struct ProgressTracker {
    interval: u64,
    message: String,
    count: AtomicU64,
}

impl ProgressTracker {
    /// A tracker with the default interval of 1,000,000 records.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { interval: 1_000_000, message: message.into(), count: AtomicU64::new(0) }
    }

    /// Override the logging interval.
    #[must_use]
    pub fn with_interval(self, interval: u64) -> Self {
        Self { interval: interval.max(1), ..self }
    }

    /// Add to the count, logging each interval boundary crossed.
    pub fn add(&self, additional: u64) {
        if additional == 0 {
            return;
        }
        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        let new_count = prev + additional;
        for i in (prev / self.interval + 1)..=(new_count / self.interval) {
            info!("{} {}", self.message, format_count(i * self.interval));
        }
    }

    /// The current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
