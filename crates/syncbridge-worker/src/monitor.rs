//! Advisory liveness and stuck-write monitors.
//!
//! Both monitors only observe; the replication supervisor owns the decision
//! to abort. Timestamps are millisecond offsets from the monitor's creation
//! instant stored in a single word, so the single-writer/single-reader
//! pattern needs no lock.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Detects a silent source: no successful read within the threshold.
pub struct HeartbeatMonitor {
    epoch: Instant,
    threshold: Duration,
    /// Milliseconds since `epoch` of the last beat; 0 until the first beat,
    /// which makes monitor creation count as the initial activity.
    last_beat_millis: AtomicU64,
}

impl HeartbeatMonitor {
    pub fn new(threshold: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            threshold,
            last_beat_millis: AtomicU64::new(0),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Creation instant; silence is measured from here until the first beat.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Record activity. Called by the read pump on every successful read;
    /// never called by the supervisor.
    pub fn beat(&self) {
        let offset = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_beat_millis.store(offset, Ordering::Relaxed);
    }

    /// Whether activity was observed within the threshold before `now`.
    pub fn is_beating(&self, now: Instant) -> bool {
        let last_beat = Duration::from_millis(self.last_beat_millis.load(Ordering::Relaxed));
        let since_epoch = now.saturating_duration_since(self.epoch);
        since_epoch.saturating_sub(last_beat) < self.threshold
    }
}

/// Which destination call is being timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedCall {
    Accept,
    NotifyEndOfInput,
}

impl TimedCall {
    fn code(self) -> u8 {
        match self {
            Self::Accept => 1,
            Self::NotifyEndOfInput => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Accept),
            2 => Some(Self::NotifyEndOfInput),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::NotifyEndOfInput => "notify_end_of_input",
        }
    }
}

/// Detects a stuck destination write.
///
/// The destination handle marks call start and end; an independent watcher
/// checks elapsed time so a stuck call cannot block the accounting. The
/// tripped flag latches and the in-flight call is never interrupted.
pub struct DestinationTimeoutMonitor {
    epoch: Instant,
    timeout: Duration,
    /// Milliseconds since `epoch` of the in-flight call start, offset by one
    /// so 0 can mean idle.
    call_started_millis: AtomicU64,
    call_kind: AtomicU8,
    tripped: AtomicBool,
    tripped_call: AtomicU8,
}

impl DestinationTimeoutMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            timeout,
            call_started_millis: AtomicU64::new(0),
            call_kind: AtomicU8::new(0),
            tripped: AtomicBool::new(false),
            tripped_call: AtomicU8::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn start_call(&self, call: TimedCall) {
        let offset = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX - 1);
        self.call_kind.store(call.code(), Ordering::Relaxed);
        self.call_started_millis
            .store(offset.saturating_add(1), Ordering::Relaxed);
    }

    pub fn end_call(&self) {
        self.call_started_millis.store(0, Ordering::Relaxed);
        self.call_kind.store(0, Ordering::Relaxed);
    }

    /// Check the in-flight call against the deadline, latching the tripped
    /// flag on expiry. Returns the current tripped state.
    pub fn check(&self, now: Instant) -> bool {
        if self.tripped.load(Ordering::Relaxed) {
            return true;
        }
        let started = self.call_started_millis.load(Ordering::Relaxed);
        if started == 0 {
            return false;
        }
        let started_at = Duration::from_millis(started - 1);
        let since_epoch = now.saturating_duration_since(self.epoch);
        if since_epoch.saturating_sub(started_at) > self.timeout {
            self.tripped.store(true, Ordering::Relaxed);
            self.tripped_call
                .store(self.call_kind.load(Ordering::Relaxed), Ordering::Relaxed);
            return true;
        }
        false
    }

    pub fn has_tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }

    /// The call that exceeded the deadline, once tripped.
    pub fn tripped_call(&self) -> Option<TimedCall> {
        TimedCall::from_code(self.tripped_call.load(Ordering::Relaxed))
    }
}
