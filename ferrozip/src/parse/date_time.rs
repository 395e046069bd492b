use chrono::{
    offset::{LocalResult, TimeZone, Utc},
    DateTime, Datelike, Timelike,
};
use std::fmt;
use winnow::{
    binary::{le_u16, le_u64},
    seq, PResult, Parser, Partial,
};

/// A timestamp in MS-DOS format
///
/// Represents dates from year 1980 to 2107, with 2 second precision.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct MsdosTimestamp {
    /// Time in 2-second intervals
    pub time: u16,

    /// Date in MS-DOS format, cf. <https://docs.microsoft.com/en-us/windows/win32/api/winbase/nf-winbase-dosdatetimetofiletime>
    pub date: u16,
}

impl fmt::Debug for MsdosTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "MsdosTimestamp({})", dt),
            None => write!(f, "MsdosTimestamp(?)"),
        }
    }
}

impl MsdosTimestamp {
    /// The conventional minimum DOS timestamp, stored for any wall time
    /// before 1980. Its on-disk form is the fixed pattern `00 21 00 00`.
    pub const MIN: Self = Self {
        time: 0x2100,
        date: 0x0000,
    };

    /// Parser for MS-DOS timestamps
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        seq! {Self {
            time: le_u16,
            date: le_u16,
        }}
        .parse_next(i)
    }

    /// The four-byte form as stored in headers: time word, then date word,
    /// both little-endian.
    pub fn encode(&self) -> [u8; 4] {
        let t = self.time.to_le_bytes();
        let d = self.date.to_le_bytes();
        [t[0], t[1], d[0], d[1]]
    }

    /// Convert a wall time to a DOS timestamp, clamping dates before 1980
    /// to [Self::MIN].
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let year = dt.year();
        if year < 1980 {
            return Self::MIN;
        }
        // 2107 is the largest year the 7 bit offset can carry
        let year = year.min(2107) as u16;

        let date = ((year - 1980) << 9) | (dt.month() as u16) << 5 | dt.day() as u16;
        let time =
            (dt.hour() as u16) << 11 | (dt.minute() as u16) << 5 | (dt.second() as u16) >> 1;
        Self { time, date }
    }

    /// Attempts to convert to a chrono UTC date time
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        // see https://docs.microsoft.com/en-us/windows/win32/api/winbase/nf-winbase-dosdatetimetofiletime
        let date = match {
            // bits 0-4: day of the month (1-31)
            let d = (self.date & 0b1_1111) as u32;
            // bits 5-8: month (1 = january, 2 = february and so on)
            let m = ((self.date >> 5) & 0b1111) as u32;
            // bits 9-15: year offset from 1980
            let y = ((self.date >> 9) + 1980) as i32;
            Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
        } {
            LocalResult::Single(date) => date,
            _ => return None,
        };

        // bits 0-4: second divided by 2
        let s = (self.time & 0b1_1111) as u32 * 2;
        // bits 5-10: minute (0-59)
        let m = (self.time >> 5 & 0b11_1111) as u32;
        // bits 11-15: hour (0-23 on a 24-hour clock)
        let h = (self.time >> 11) as u32;
        date.with_hour(h)?.with_minute(m)?.with_second(s)
    }
}

/// A timestamp in NTFS format.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct NtfsTimestamp {
    /// Timestamp in 100ns intervals since 1601-01-01 00:00:00 UTC
    pub timestamp: u64,
}

impl fmt::Debug for NtfsTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "NtfsTimestamp({})", dt),
            None => write!(f, "NtfsTimestamp(?)"),
        }
    }
}

/// Windows timestamp resolution, in ticks per second
const NTFS_TICKS_PER_SECOND: u64 = 10_000_000;

/// Seconds between 1601-01-01 and the unix epoch
const NTFS_EPOCH_OFFSET_SECONDS: i64 = 11_644_473_600;

impl NtfsTimestamp {
    /// Parse an NTFS timestamp from a byte slice
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        le_u64.map(|timestamp| Self { timestamp }).parse_next(i)
    }

    /// The full-precision tick count (100ns intervals since 1601-01-01).
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.timestamp
    }

    /// The timestamp truncated to milliseconds since the unix epoch.
    ///
    /// Negative for times before 1970.
    pub fn unix_millis(&self) -> i64 {
        let millis_since_1601 = (self.timestamp / (NTFS_TICKS_PER_SECOND / 1000)) as i64;
        millis_since_1601 - NTFS_EPOCH_OFFSET_SECONDS * 1000
    }

    /// Convert a wall time to NTFS ticks. None for times before 1601.
    pub fn from_datetime(dt: DateTime<Utc>) -> Option<Self> {
        let secs_since_1601 = dt.timestamp().checked_add(NTFS_EPOCH_OFFSET_SECONDS)?;
        if secs_since_1601 < 0 {
            return None;
        }
        let ticks = (secs_since_1601 as u64).checked_mul(NTFS_TICKS_PER_SECOND)?
            + dt.timestamp_subsec_nanos() as u64 / 100;
        Some(Self { timestamp: ticks })
    }

    /// Attempts to convert to a chrono UTC date time
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let secs = (self.timestamp / NTFS_TICKS_PER_SECOND) as i64;
        let nsecs = ((self.timestamp % NTFS_TICKS_PER_SECOND) * 100) as u32;
        match Utc.timestamp_opt(secs - NTFS_EPOCH_OFFSET_SECONDS, nsecs) {
            LocalResult::Single(date) => Some(date),
            _ => None,
        }
    }
}

pub(crate) fn zero_datetime() -> chrono::DateTime<chrono::offset::Utc> {
    chrono::DateTime::from_timestamp(0, 0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{offset::Utc, TimeZone, Timelike};

    #[test]
    fn dos_time_round_trips() {
        let dt = Utc.with_ymd_and_hms(2018, 11, 17, 10, 38, 30).unwrap();
        let ts = MsdosTimestamp::from_datetime(dt);
        assert_eq!(ts.to_datetime(), Some(dt));

        let reparsed = {
            let b = ts.encode();
            MsdosTimestamp {
                time: u16::from_le_bytes([b[0], b[1]]),
                date: u16::from_le_bytes([b[2], b[3]]),
            }
        };
        assert_eq!(reparsed, ts);
    }

    #[test]
    fn dos_time_truncates_odd_seconds() {
        let dt = Utc.with_ymd_and_hms(2018, 11, 17, 10, 38, 31).unwrap();
        let ts = MsdosTimestamp::from_datetime(dt);
        assert_eq!(
            ts.to_datetime(),
            Some(Utc.with_ymd_and_hms(2018, 11, 17, 10, 38, 30).unwrap())
        );
    }

    #[test]
    fn dos_time_clamps_before_1980() {
        let dt = Utc.with_ymd_and_hms(1975, 1, 1, 0, 0, 0).unwrap();
        let ts = MsdosTimestamp::from_datetime(dt);
        assert_eq!(ts, MsdosTimestamp::MIN);
        assert_eq!(ts.encode(), [0x00, 0x21, 0x00, 0x00]);
    }

    #[test]
    fn ntfs_time_round_trips_with_100ns_precision() {
        let dt = Utc
            .with_ymd_and_hms(2017, 11, 6, 21, 9, 27)
            .unwrap()
            .with_nanosecond(867_862_500)
            .unwrap();
        let ts = NtfsTimestamp::from_datetime(dt).unwrap();
        assert_eq!(ts.to_datetime(), Some(dt));
        assert_eq!(ts.ticks() % 10, 5);
    }

    #[test]
    fn ntfs_coarse_accessor_is_milliseconds() {
        let dt = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 1).unwrap();
        let ts = NtfsTimestamp::from_datetime(dt).unwrap();
        assert_eq!(ts.unix_millis(), 1000);
    }
}
