use std::{
    fmt::Display,
    ops::{Add, Sub},
    str::FromStr,
    time::Duration,
};
pub use time::OffsetDateTime as Timestamp;
use time::{format_description::FormatItem, PrimitiveDateTime};

use crate::TimeErr;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Canonical display format for Time.
pub const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");

/// Accepted when parsing a Time without subsecond.
const TIMESTAMP_FORMAT_SECONDS: &[FormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Receive time of a message, as seconds and nanoseconds since the unix epoch.
///
/// `nsec` is always less than one second, so the derived ordering is chronological.
pub struct Time {
    sec: u32,
    nsec: u32,
}

impl Time {
    pub const ZERO: Time = Time { sec: 0, nsec: 0 };
    pub const MAX: Time = Time {
        sec: u32::MAX,
        nsec: 999_999_999,
    };

    /// Nanoseconds overflowing one second are carried into `sec`.
    pub fn new(sec: u32, nsec: u32) -> Self {
        let carry = nsec as u64 / NANOS_PER_SEC;
        Self::from_nanos(
            (sec as u64 + carry) * NANOS_PER_SEC + (nsec as u64 % NANOS_PER_SEC),
        )
    }

    /// Saturates at [`Time::MAX`].
    pub fn from_nanos(nanos: u64) -> Self {
        let sec = nanos / NANOS_PER_SEC;
        if sec > u32::MAX as u64 {
            return Self::MAX;
        }
        Self {
            sec: sec as u32,
            nsec: (nanos % NANOS_PER_SEC) as u32,
        }
    }

    pub fn from_secs_f64(secs: f64) -> Result<Self, TimeErr> {
        if !secs.is_finite() || secs < 0.0 || secs > u32::MAX as f64 {
            return Err(TimeErr::OutOfRange);
        }
        Ok(Self::from_nanos((secs * NANOS_PER_SEC as f64).round() as u64))
    }

    pub fn sec(&self) -> u32 {
        self.sec
    }

    pub fn nsec(&self) -> u32 {
        self.nsec
    }

    pub fn to_nanos(&self) -> u64 {
        self.sec as u64 * NANOS_PER_SEC + self.nsec as u64
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.nsec as f64 / NANOS_PER_SEC as f64
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Returns zero if `earlier` is later than self.
    pub fn duration_since(&self, earlier: Time) -> Duration {
        Duration::from_nanos(self.to_nanos().saturating_sub(earlier.to_nanos()))
    }

    /// The position of self inside `[start, end]` as a fraction in `[0, 1]`.
    pub fn fraction_of(&self, start: Time, end: Time) -> f64 {
        let total = end.to_nanos().saturating_sub(start.to_nanos());
        if total == 0 {
            return if *self >= end { 1.0 } else { 0.0 };
        }
        let elapsed = self.to_nanos().clamp(start.to_nanos(), end.to_nanos()) - start.to_nanos();
        elapsed as f64 / total as f64
    }

    pub fn to_timestamp(&self) -> Timestamp {
        // a u32 of seconds is always within the range of OffsetDateTime
        Timestamp::from_unix_timestamp_nanos(self.to_nanos() as i128)
            .unwrap_or(Timestamp::UNIX_EPOCH)
    }

    pub fn from_timestamp(ts: Timestamp) -> Result<Self, TimeErr> {
        let nanos = ts.unix_timestamp_nanos();
        if nanos < 0 || nanos > Self::MAX.to_nanos() as i128 {
            return Err(TimeErr::OutOfRange);
        }
        Ok(Self::from_nanos(nanos as u64))
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    /// Saturates at [`Time::MAX`].
    fn add(self, rhs: Duration) -> Self::Output {
        let rhs = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        Time::from_nanos(self.to_nanos().saturating_add(rhs))
    }
}

impl Sub<Duration> for Time {
    type Output = Time;

    /// Saturates at [`Time::ZERO`].
    fn sub(self, rhs: Duration) -> Self::Output {
        let rhs = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        Time::from_nanos(self.to_nanos().saturating_sub(rhs))
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_timestamp().format(TIMESTAMP_FORMAT) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "{}.{:09}", self.sec, self.nsec),
        }
    }
}

impl FromStr for Time {
    type Err = TimeErr;

    /// Either a unix timestamp in seconds (`1700000000.25`), or a UTC date time in the
    /// canonical format (`2023-11-14T22:13:20.25`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TimeErr::Empty);
        }
        if let Ok(secs) = s.parse::<f64>() {
            return Self::from_secs_f64(secs);
        }
        let datetime = PrimitiveDateTime::parse(s, TIMESTAMP_FORMAT)
            .or_else(|_| PrimitiveDateTime::parse(s, TIMESTAMP_FORMAT_SECONDS))
            .map_err(|e| TimeErr::Parse(e.to_string()))?;
        Self::from_timestamp(datetime.assume_utc())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_time_normalize() {
        assert_eq!(Time::new(1, 1_500_000_000), Time::new(2, 500_000_000));
        assert_eq!(Time::from_nanos(2_000_000_001).sec(), 2);
        assert_eq!(Time::from_nanos(2_000_000_001).nsec(), 1);
        assert!(Time::new(1, 999_999_999) < Time::new(2, 0));
        assert_eq!(Time::from_nanos(u64::MAX), Time::MAX);
    }

    #[test]
    fn test_time_arithmetic() {
        let t = Time::new(10, 0);
        assert_eq!(t + Duration::from_nanos(1), Time::new(10, 1));
        assert_eq!(t - Duration::from_secs(11), Time::ZERO);
        assert_eq!(Time::MAX + Duration::from_secs(1), Time::MAX);
        assert_eq!(Time::new(12, 0).duration_since(t), Duration::from_secs(2));
        assert_eq!(t.duration_since(Time::new(12, 0)), Duration::ZERO);
        assert_eq!(Time::new(15, 0).fraction_of(t, Time::new(20, 0)), 0.5);
        assert_eq!(Time::new(25, 0).fraction_of(t, Time::new(20, 0)), 1.0);
        assert_eq!(t.fraction_of(t, t), 1.0);
    }

    #[test]
    fn test_time_parse() {
        assert_eq!("10.5".parse::<Time>().unwrap(), Time::new(10, 500_000_000));
        assert_eq!(" ".parse::<Time>(), Err(TimeErr::Empty));
        assert_eq!("-1".parse::<Time>(), Err(TimeErr::OutOfRange));

        let t = Time::new(1_700_000_000, 250_000_000);
        let s = t.to_string();
        assert_eq!(s, "2023-11-14T22:13:20.25");
        assert_eq!(s.parse::<Time>().unwrap(), t);
        assert_eq!(
            "2023-11-14T22:13:20".parse::<Time>().unwrap(),
            Time::new(1_700_000_000, 0)
        );
        assert!(matches!("yesterday".parse::<Time>(), Err(TimeErr::Parse(_))));
    }
}
