//! Formatting helpers for log output.

use std::time::{Duration, Instant};

/// Formats a count with thousands separators.
#[must_use]
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i).is_multiple_of(3) {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Formats a duration as seconds, minutes, or hours.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let mins = secs / 60;
        let rest = secs % 60;
        if rest == 0 { format!("{mins}m") } else { format!("{mins}m {rest}s") }
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 { format!("{hours}h") } else { format!("{hours}h {mins}m") }
    }
}

/// Logs an operation's start and, on completion, its record throughput.
pub struct OperationTimer {
    operation: String,
    start_time: Instant,
}

impl OperationTimer {
    /// Creates the timer and logs the start.
    #[must_use]
    pub fn new(operation: &str) -> Self {
        log::info!("{operation} ...");
        Self { operation: operation.to_string(), start_time: Instant::now() }
    }

    /// Logs completion with the processed record count.
    pub fn log_completion(&self, count: u64) {
        let duration = self.start_time.elapsed();
        let rate = if duration.as_secs_f64() > 0.001 {
            format!(" ({} records/s)", format_count((count as f64 / duration.as_secs_f64()) as u64))
        } else {
            String::new()
        };
        log::info!(
            "{} completed: {} records in {}{rate}",
            self.operation,
            format_count(count),
            format_duration(duration),
        );
    }
}
