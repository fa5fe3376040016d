//! Modification timestamps.
//!
//! Every object and pipeline node records when it was last modified using a
//! [`TimeStamp`] drawn from a [`ModifiedClock`]. Timestamps only compare
//! meaningfully when drawn from the same clock.

use std::fmt;

/// A point on a [`ModifiedClock`]. `TimeStamp::ZERO` is older than any tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStamp(u64);

impl TimeStamp {
    /// The timestamp of something that was never modified.
    pub const ZERO: Self = Self(0);

    /// Returns the raw tick value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Monotonic source of [`TimeStamp`]s.
#[derive(Debug, Default)]
pub struct ModifiedClock {
    last: u64,
}

impl ModifiedClock {
    /// Creates a clock whose first tick is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a timestamp newer than every previously returned one.
    pub fn tick(&mut self) -> TimeStamp {
        self.last += 1;
        TimeStamp(self.last)
    }

    /// Returns the most recent timestamp without advancing.
    pub fn now(&self) -> TimeStamp {
        TimeStamp(self.last)
    }
}
