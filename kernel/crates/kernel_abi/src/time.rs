use core::time::Duration;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

const USEC_PER_SEC: i64 = 1_000_000;

/// Seconds and microseconds, as found in capture headers and the read
/// timeout requests.
#[repr(C)]
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, FromBytes, IntoBytes, KnownLayout, Immutable,
)]
pub struct BpfTimeval {
    pub sec: i64,
    pub usec: i64,
}

impl BpfTimeval {
    pub const ZERO: Self = Self { sec: 0, usec: 0 };

    pub const fn new(sec: i64, usec: i64) -> Self {
        Self { sec, usec }
    }

    /// Returns `None` for negative seconds or a microsecond field outside
    /// `[0, 1_000_000)`.
    pub fn to_duration(self) -> Option<Duration> {
        if self.sec < 0 || !(0..USEC_PER_SEC).contains(&self.usec) {
            return None;
        }
        Some(Duration::new(self.sec as u64, (self.usec as u32) * 1000))
    }

    /// Saturates at `i64::MAX` seconds.
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            sec: i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
            usec: i64::from(duration.subsec_micros()),
        }
    }
}
