//! Shared atomic counters for the event-processing pipeline.
//!
//! Counters are incremented silently at the call site. Call
//! [`RunnerMetrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. every 60s from the runner's main loop).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// The four monotonic counters from the data model, plus a liveness flag
/// shared with the health HTTP surface.
#[derive(Default)]
pub struct RunnerMetrics {
    events_consumed: AtomicU64,
    events_processed: AtomicU64,
    notifications_produced: AtomicU64,
    duplicates_skipped: AtomicU64,
    live: AtomicBool,
}

impl RunnerMetrics {
    pub fn new() -> Self {
        Self {
            events_consumed: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            notifications_produced: AtomicU64::new(0),
            duplicates_skipped: AtomicU64::new(0),
            live: AtomicBool::new(true),
        }
    }

    pub fn add_events_consumed(&self, n: u64) {
        self.events_consumed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_events_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notifications_produced(&self) {
        self.notifications_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates_skipped(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Relaxed);
    }

    pub fn events_consumed(&self) -> u64 {
        self.events_consumed.load(Ordering::Relaxed)
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    pub fn notifications_produced(&self) -> u64 {
        self.notifications_produced.load(Ordering::Relaxed)
    }

    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates_skipped.load(Ordering::Relaxed)
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            events_consumed = self.events_consumed(),
            events_processed = self.events_processed(),
            notifications_produced = self.notifications_produced(),
            duplicates_skipped = self.duplicates_skipped(),
            "cumulative counters",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = RunnerMetrics::new();
        m.add_events_consumed(5);
        m.inc_events_processed();
        m.inc_events_processed();
        m.inc_notifications_produced();
        m.inc_duplicates_skipped();

        assert_eq!(m.events_consumed(), 5);
        assert_eq!(m.events_processed(), 2);
        assert_eq!(m.notifications_produced(), 1);
        assert_eq!(m.duplicates_skipped(), 1);
    }

    #[test]
    fn liveness_defaults_true() {
        let m = RunnerMetrics::new();
        assert!(m.is_live());
        m.set_live(false);
        assert!(!m.is_live());
    }
}
