//! Core utility types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Frame timestamp as seconds and nanoseconds since an arbitrary epoch.
///
/// Guiding code only ever compares timestamps and adds intervals to them, so the
/// epoch is left to the caller (V4L2 monotonic clock, simulation time, ...).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Seconds component
    pub seconds: u64,
    /// Nanoseconds component (0-999,999,999)
    pub nanos: u64,
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(seconds: u64, nanos: u64) -> Self {
        Self { seconds, nanos }
    }

    /// Create a timestamp from milliseconds since the epoch
    pub fn from_millis(millis: u64) -> Self {
        Self::from_duration(Duration::from_millis(millis))
    }

    /// Create a timestamp from a Duration since epoch
    pub fn from_duration(duration: Duration) -> Self {
        let total_nanos = duration.as_nanos();
        let seconds = (total_nanos / 1_000_000_000) as u64;
        let nanos = (total_nanos % 1_000_000_000) as u64;
        Self { seconds, nanos }
    }

    /// Convert to Duration
    pub fn to_duration(&self) -> Duration {
        Duration::new(self.seconds, self.nanos as u32)
    }

    /// Whole milliseconds since the epoch
    pub fn as_millis(&self) -> u64 {
        self.seconds * 1_000 + self.nanos / 1_000_000
    }

    /// Timestamp `interval` later than this one
    pub fn saturating_add(&self, interval: Duration) -> Self {
        Self::from_duration(self.to_duration().saturating_add(interval))
    }

    /// Timestamp `interval` earlier than this one, clamped at the epoch
    pub fn saturating_sub(&self, interval: Duration) -> Self {
        Self::from_duration(self.to_duration().saturating_sub(interval))
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        self.to_duration().saturating_sub(earlier.to_duration())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}
