//! FILETIME conversion.
//!
//! Windows stores timestamps as 64-bit counts of 100-nanosecond intervals
//! since 1601-01-01 UTC. Catalog records, directory entries and Windows
//! Search rows all use this representation.
use chrono::{DateTime, Utc};

/// Number of 100-nanosecond intervals between 1601-01-01 and 1970-01-01.
const EPOCH_DIFF: i64 = 116_444_736_000_000_000;

/// Convert a FILETIME value to a UTC instant.
///
/// Zero means "no timestamp recorded" and maps to `None`, as do values too
/// large to represent.
#[inline]
pub fn filetime_to_utc(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let intervals = i64::try_from(filetime).ok()?;
    let nanos = intervals.checked_sub(EPOCH_DIFF)?.checked_mul(100)?;
    Some(DateTime::from_timestamp_nanos(nanos))
}

/// Convert a UTC instant back to a FILETIME value.
///
/// Exact inverse of [`filetime_to_utc`] on the representable range.
#[inline]
pub fn utc_to_filetime(time: DateTime<Utc>) -> u64 {
    let nanos = time.timestamp_nanos_opt().unwrap_or(0);
    ((nanos / 100) + EPOCH_DIFF) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn zero_is_absent() {
        assert_eq!(filetime_to_utc(0), None);
    }

    #[test]
    fn unix_epoch() {
        let t = filetime_to_utc(EPOCH_DIFF as u64).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn known_instant() {
        // 2019-06-01T12:00:00Z
        let expected = Utc.with_ymd_and_hms(2019, 6, 1, 12, 0, 0).unwrap();
        let ft = utc_to_filetime(expected);
        assert_eq!(filetime_to_utc(ft).unwrap(), expected);
    }

    #[test]
    fn round_trip_is_lossless() {
        for ft in [
            EPOCH_DIFF as u64,
            130_000_000_000_000_000u64,
            132_223_104_000_000_000u64,
            1u64,
        ] {
            let t = filetime_to_utc(ft).unwrap();
            assert_eq!(utc_to_filetime(t), ft);
        }
    }
}
