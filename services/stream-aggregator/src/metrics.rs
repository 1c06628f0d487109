//! Pipeline observability
//!
//! Counters for every stage of the pipeline: lines read off the feed,
//! records accepted or discarded (by reason), triggers fired or skipped,
//! and publish outcomes. Trigger latency is tracked for percentiles.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Rejection reason for feed lines over the length cap.
pub const LINE_TOO_LONG: &str = "line_too_long";

/// Core metrics for the stream aggregator.
pub struct PipelineMetrics {
    // Feed
    pub lines_received: AtomicU64,

    // Ingestion
    pub records_accepted: AtomicU64,
    pub records_rejected: AtomicU64,
    pub rejected_by_reason: Mutex<BTreeMap<&'static str, u64>>,

    // Triggers
    pub triggers_fired: AtomicU64,
    pub triggers_skipped: AtomicU64,
    pub trigger_duration_us: Mutex<LatencyTracker>,

    // Publishing
    pub snapshots_published: AtomicU64,
    pub publish_failures: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            lines_received: AtomicU64::new(0),
            records_accepted: AtomicU64::new(0),
            records_rejected: AtomicU64::new(0),
            rejected_by_reason: Mutex::new(BTreeMap::new()),
            triggers_fired: AtomicU64::new(0),
            triggers_skipped: AtomicU64::new(0),
            trigger_duration_us: Mutex::new(LatencyTracker::new(1000)),
            snapshots_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }
    }

    /// Record a raw line read off the feed.
    pub fn record_line_received(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a feed line dropped before parsing for exceeding the length cap.
    pub fn record_oversized_line(&self) {
        self.record_batch(0, &BTreeMap::from([(LINE_TOO_LONG, 1)]));
    }

    /// Record the ingestion outcome of one batch.
    pub fn record_batch(&self, accepted: u64, rejected: &BTreeMap<&'static str, u64>) {
        self.records_accepted.fetch_add(accepted, Ordering::Relaxed);
        let rejected_total: u64 = rejected.values().sum();
        self.records_rejected.fetch_add(rejected_total, Ordering::Relaxed);
        if rejected_total == 0 {
            return;
        }
        if let Ok(mut by_reason) = self.rejected_by_reason.lock() {
            for (reason, count) in rejected {
                *by_reason.entry(*reason).or_insert(0) += count;
            }
        }
    }

    /// Record a trigger and how long it took.
    pub fn record_trigger(&self, duration_us: u64, skipped: bool) {
        self.triggers_fired.fetch_add(1, Ordering::Relaxed);
        if skipped {
            self.triggers_skipped.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut tracker) = self.trigger_duration_us.lock() {
            tracker.record(duration_us);
        }
    }

    pub fn record_publish(&self) {
        self.snapshots_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Share of parsed lines that were discarded, 0.0 before any input.
    pub fn rejection_ratio(&self) -> f64 {
        let accepted = self.records_accepted.load(Ordering::Relaxed);
        let rejected = self.records_rejected.load(Ordering::Relaxed);
        let total = accepted + rejected;
        if total == 0 {
            return 0.0;
        }
        rejected as f64 / total as f64
    }

    /// Export metrics as a sorted map.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("lines_received".to_string(), self.lines_received.load(Ordering::Relaxed));
        m.insert("records_accepted".to_string(), self.records_accepted.load(Ordering::Relaxed));
        m.insert("records_rejected".to_string(), self.records_rejected.load(Ordering::Relaxed));
        m.insert("triggers_fired".to_string(), self.triggers_fired.load(Ordering::Relaxed));
        m.insert("triggers_skipped".to_string(), self.triggers_skipped.load(Ordering::Relaxed));
        m.insert(
            "snapshots_published".to_string(),
            self.snapshots_published.load(Ordering::Relaxed),
        );
        m.insert("publish_failures".to_string(), self.publish_failures.load(Ordering::Relaxed));
        if let Ok(by_reason) = self.rejected_by_reason.lock() {
            for (reason, count) in by_reason.iter() {
                m.insert(format!("records_rejected.{reason}"), *count);
            }
        }
        if let Ok(tracker) = self.trigger_duration_us.lock() {
            if let Some(p99) = tracker.percentile(99) {
                m.insert("trigger_duration_us.p99".to_string(), p99);
            }
            if let Some(avg) = tracker.average() {
                m.insert("trigger_duration_us.avg".to_string(), avg);
            }
        }
        m
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded window of latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample, evicting the oldest when full.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u128 = self.samples.iter().map(|&v| u128::from(v)).sum();
        Some((sum / self.samples.len() as u128) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_recording() {
        let metrics = PipelineMetrics::new();
        let mut rejected = BTreeMap::new();
        rejected.insert("invalid_value", 2);
        rejected.insert("invalid_date", 1);

        metrics.record_batch(7, &rejected);
        metrics.record_batch(3, &BTreeMap::new());

        let exported = metrics.export();
        assert_eq!(exported["records_accepted"], 10);
        assert_eq!(exported["records_rejected"], 3);
        assert_eq!(exported["records_rejected.invalid_value"], 2);
        assert_eq!(exported["records_rejected.invalid_date"], 1);
    }

    #[test]
    fn test_trigger_recording() {
        let metrics = PipelineMetrics::new();
        metrics.record_trigger(120, false);
        metrics.record_trigger(5, true);
        metrics.record_publish();

        let exported = metrics.export();
        assert_eq!(exported["triggers_fired"], 2);
        assert_eq!(exported["triggers_skipped"], 1);
        assert_eq!(exported["snapshots_published"], 1);
        assert!(exported.contains_key("trigger_duration_us.p99"));
        assert_eq!(exported["trigger_duration_us.avg"], 62);
    }

    #[test]
    fn test_oversized_line_counts_as_rejected() {
        let metrics = PipelineMetrics::new();
        metrics.record_oversized_line();

        let exported = metrics.export();
        assert_eq!(exported["records_rejected"], 1);
        assert_eq!(exported["records_rejected.line_too_long"], 1);
        assert_eq!(exported["records_accepted"], 0);
    }

    #[test]
    fn test_rejection_ratio() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.rejection_ratio(), 0.0);

        let mut rejected = BTreeMap::new();
        rejected.insert("field_count", 1);
        metrics.record_batch(3, &rejected);
        assert!((metrics.rejection_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latency_tracker_percentile() {
        let mut tracker = LatencyTracker::new(100);

        for i in 1..=100 {
            tracker.record(i);
        }

        let p50 = tracker.percentile(50).unwrap();
        assert!((49..=51).contains(&p50));

        let p99 = tracker.percentile(99).unwrap();
        assert!((98..=100).contains(&p99));
    }

    #[test]
    fn test_latency_tracker_window_eviction() {
        let mut tracker = LatencyTracker::new(3);

        tracker.record(10);
        tracker.record(20);
        tracker.record(30);
        tracker.record(40); // evicts 10

        assert_eq!(tracker.average().unwrap(), 30);
        assert_eq!(tracker.percentile(0).unwrap(), 20);
    }
}
