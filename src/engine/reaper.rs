use crate::core::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// The engine's time source. Injectable so that TTL behavior can be
/// driven deterministically in tests.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now(&self) -> Timestamp;
}

/// Wall-clock time
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Timestamp)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        ManualClock {
            millis: AtomicU64::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.millis.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Decides, after each admission or ingestion, whether the background
/// reaper should make an eviction pass.
pub trait CleanupPolicy: Send {
    fn should_run(
        &self,
        seconds_since_last: u64,
        queries_added_since_last: u64,
        statements_added_since_last: u64,
    ) -> bool;
}

/// Runs an eviction pass whenever at least `min_interval_secs` have
/// elapsed since the previous one (30 seconds by default).
#[derive(Debug, Clone)]
pub struct IntervalCleanupPolicy {
    min_interval_secs: u64,
}

impl IntervalCleanupPolicy {
    pub fn new(min_interval_secs: u64) -> Self {
        IntervalCleanupPolicy { min_interval_secs }
    }
}

impl Default for IntervalCleanupPolicy {
    fn default() -> Self {
        IntervalCleanupPolicy::new(30)
    }
}

impl CleanupPolicy for IntervalCleanupPolicy {
    fn should_run(&self, seconds_since_last: u64, _queries: u64, _statements: u64) -> bool {
        seconds_since_last >= self.min_interval_secs
    }
}

/// Protocol between the engine and its reaper thread
pub(crate) enum ReaperMessage {
    /// Evict everything expired as of the given time
    Cleanup(Timestamp),
    Shutdown,
}
