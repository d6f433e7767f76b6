//! Wall clock access and UTC hour arithmetic.

use time::OffsetDateTime;

use crate::steem::TimePointSec;

const SECS_PER_HOUR: i64 = 3600;

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// The operating system clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// An absolute UTC hour: seconds since the epoch divided by 3600.
///
/// Hour 14 today and hour 14 tomorrow are distinct slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourSlot(i64);

impl HourSlot {
    pub fn containing(at: OffsetDateTime) -> Self {
        Self(at.unix_timestamp().div_euclid(SECS_PER_HOUR))
    }

    pub fn from_index(index: i64) -> Self {
        Self(index)
    }

    pub fn index(self) -> i64 {
        self.0
    }

    /// Hour of day, 0-23.
    pub fn hour_of_day(self) -> u8 {
        // rem_euclid(24) is always in 0..24
        self.0.rem_euclid(24) as u8
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Expiration for transactions built in this slot: the start of the next hour.
    pub fn expiration(self) -> Result<TimePointSec, crate::Error> {
        TimePointSec::from_unix(self.next().0 * SECS_PER_HOUR)
    }
}
