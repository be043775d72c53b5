//! Millisecond clocks for token timestamps and freshness checks

/// Source of "now" in milliseconds since the Unix epoch
pub trait TimestampProvider {
    fn now_ms(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimestampProvider for SystemClock {
    fn now_ms(&self) -> u64 {
        // Pre-epoch clocks clamp to zero
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// A clock stopped at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub u64);

impl TimestampProvider for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0
    }
}

impl<F> TimestampProvider for F
where
    F: Fn() -> u64,
{
    fn now_ms(&self) -> u64 {
        self()
    }
}
