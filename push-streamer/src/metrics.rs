//! Counters the registries and the push path report into.

use std::sync::atomic::{AtomicU64, Ordering};

/// Registry and push-path counters, safe to share across threads.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    registered_consumers: AtomicU64,
    push_succeeded: AtomicU64,
    push_failed: AtomicU64,
}

/// Point-in-time view of [`StreamMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub registered_consumers: u64,
    pub push_succeeded: u64,
    pub push_failed: u64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn consumer_added(&self) {
        self.registered_consumers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn consumers_removed(&self, count: u64) {
        self.registered_consumers.fetch_sub(count, Ordering::Relaxed);
    }

    pub(crate) fn push_succeeded(&self) {
        self.push_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn push_failed(&self) {
        self.push_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            registered_consumers: self.registered_consumers.load(Ordering::Relaxed),
            push_succeeded: self.push_succeeded.load(Ordering::Relaxed),
            push_failed: self.push_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StreamMetrics;

    #[test]
    fn snapshot_reflects_counter_movement() {
        let metrics = StreamMetrics::new();

        metrics.consumer_added();
        metrics.consumer_added();
        metrics.consumers_removed(1);
        metrics.push_succeeded();
        metrics.push_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.registered_consumers, 1);
        assert_eq!(snapshot.push_succeeded, 1);
        assert_eq!(snapshot.push_failed, 1);
    }
}
