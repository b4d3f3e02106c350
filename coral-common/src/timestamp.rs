//! Monotonic-enough wall-clock timestamps used across Coral crates.
//!
//! A [Timestamp] is microseconds since the unix epoch, stored as a `u64`.
//! Telemetry bucketing, certificate validity windows and registry health
//! derivation all compare these values, so the representation is kept
//! deliberately simple.

use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    ops::{Add, Sub},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Microseconds since the unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;

        Self(micros)
    }

    /// Construct from raw microseconds.
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Construct from unix seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs * 1_000_000)
    }

    /// Raw microseconds since the unix epoch.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whole seconds since the unix epoch.
    pub fn as_secs(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Whole milliseconds since the unix epoch.
    pub fn as_millis(&self) -> u64 {
        self.0 / 1_000
    }

    /// Floor to the start of the minute containing this timestamp.
    ///
    /// Telemetry rows are keyed by this value; see the bucket invariants in
    /// the store.
    pub fn bucket_minute(&self) -> Timestamp {
        const MINUTE: u64 = 60 * 1_000_000;
        Timestamp(self.0 - self.0 % MINUTE)
    }

    /// The duration elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0.saturating_add(rhs.as_micros() as u64))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0.saturating_sub(rhs.as_micros() as u64))
    }
}

impl From<Timestamp> for u64 {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Timestamp(value)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_minute_floors() {
        let ts = Timestamp::from_micros(1_700_000_123_456_789);
        let bucket = ts.bucket_minute();

        assert_eq!(bucket.as_u64() % 60_000_000, 0);
        assert!(bucket <= ts);
        assert!(ts.as_u64() - bucket.as_u64() < 60_000_000);
    }

    #[test]
    fn bucket_is_idempotent() {
        let ts = Timestamp::now();
        assert_eq!(ts.bucket_minute(), ts.bucket_minute().bucket_minute());
    }

    #[test]
    fn arithmetic_saturates() {
        let zero = Timestamp::from_micros(0);
        assert_eq!((zero - Duration::from_secs(10)).as_u64(), 0);
    }

    #[test]
    fn serde_roundtrip_as_u64() {
        let ts = Timestamp::from_micros(42);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "42");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
