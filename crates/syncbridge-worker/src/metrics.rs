//! Message volume and monitor-trip accounting.
//!
//! Counters are accumulated here and handed to the external telemetry
//! collaborator as a snapshot; the emission format is a structured tracing
//! event and intentionally unspecified beyond that.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use syncbridge_protocol::{MessageCounters, MessageCountsSnapshot};

#[derive(Debug, Default)]
pub struct MessageMetricsTracker {
    records_delivered: AtomicU64,
    states_delivered: AtomicU64,
    liveness_trips: AtomicU64,
    destination_timeout_trips: AtomicU64,
}

impl MessageMetricsTracker {
    pub fn observe_record_delivered(&self) {
        self.records_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_state_delivered(&self) {
        self.states_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_liveness_trip(&self) {
        self.liveness_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_destination_timeout_trip(&self) {
        self.destination_timeout_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        source_counts: Option<&Arc<MessageCounters>>,
        destination_counts: Option<&Arc<MessageCounters>>,
    ) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            source: source_counts
                .map(|counters| counters.snapshot())
                .unwrap_or_default(),
            destination: destination_counts
                .map(|counters| counters.snapshot())
                .unwrap_or_default(),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            states_delivered: self.states_delivered.load(Ordering::Relaxed),
            liveness_trips: self.liveness_trips.load(Ordering::Relaxed),
            destination_timeout_trips: self.destination_timeout_trips.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncMetricsSnapshot {
    pub source: MessageCountsSnapshot,
    pub destination: MessageCountsSnapshot,
    pub records_delivered: u64,
    pub states_delivered: u64,
    pub liveness_trips: u64,
    pub destination_timeout_trips: u64,
}

impl SyncMetricsSnapshot {
    /// Emit the snapshot to the telemetry boundary.
    pub fn emit(&self) {
        tracing::info!(
            source_records = self.source.records,
            source_states = self.source.states,
            source_malformed_lines = self.source.malformed_lines,
            source_dropped_records = self.source.dropped_records,
            destination_states = self.destination.states,
            records_delivered = self.records_delivered,
            states_delivered = self.states_delivered,
            liveness_trips = self.liveness_trips,
            destination_timeout_trips = self.destination_timeout_trips,
            "Sync message metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts() {
        let tracker = MessageMetricsTracker::default();
        tracker.observe_record_delivered();
        tracker.observe_record_delivered();
        tracker.observe_state_delivered();
        tracker.observe_liveness_trip();

        let snapshot = tracker.snapshot(None, None);
        assert_eq!(snapshot.records_delivered, 2);
        assert_eq!(snapshot.states_delivered, 1);
        assert_eq!(snapshot.liveness_trips, 1);
        assert_eq!(snapshot.destination_timeout_trips, 0);
    }

    #[test]
    fn test_snapshot_includes_parser_counts() {
        let counters = Arc::new(MessageCounters::default());
        counters.observe_malformed();
        let tracker = MessageMetricsTracker::default();
        let snapshot = tracker.snapshot(Some(&counters), None);
        assert_eq!(snapshot.source.malformed_lines, 1);
        assert_eq!(snapshot.destination, MessageCountsSnapshot::default());
    }
}
