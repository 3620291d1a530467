//! Time primitives.
//!
//! Generation: restart detector (process start time, seconds)
//! Version: freshness counter within a generation
//! WallClock: staleness measurement (not ordering)

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Node incarnation number: the process start time in unix seconds.
///
/// A strictly greater generation from a node supersedes every piece of
/// state recorded under lower generations of that node. Restart = new
/// generation; there is no other way a generation moves.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Generation for a process starting now.
    pub fn now() -> Self {
        Self(WallClock::now().secs())
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-entry freshness counter, monotonic within a generation.
///
/// Higher wins on merge; equal preserves the local value so merges are
/// idempotent.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub const ZERO: Version = Version(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wall clock in unix seconds. Used for `update_timestamp` staleness
/// checks and generations - never for merge ordering.
///
/// Copy is fine here - it is a measurement, not causality.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct WallClock(u64);

impl WallClock {
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self(secs)
    }

    pub const fn secs(self) -> u64 {
        self.0
    }

    /// Seconds elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn saturating_since(self, earlier: WallClock) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_since_never_underflows() {
        let early = WallClock::from_secs(100);
        let late = WallClock::from_secs(105);
        assert_eq!(late.saturating_since(early), 5);
        assert_eq!(early.saturating_since(late), 0);
    }

    #[test]
    fn versions_order_numerically() {
        assert!(Version::new(7) > Version::new(5));
        assert_eq!(Version::ZERO.get(), 0);
    }
}
