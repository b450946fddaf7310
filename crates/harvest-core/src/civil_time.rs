//! Fixed UTC+1 civil time used for every human-readable timestamp the
//! pipeline produces (detail fields, artifact names, sink datetimes).

use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};

/// Offset of the source market's civil time from UTC, in seconds.
pub const CIVIL_OFFSET_SECS: i32 = 3_600;

/// Epoch values strictly above this are interpreted as milliseconds.
const MILLIS_THRESHOLD: i64 = 10_000_000_000;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[must_use]
pub fn civil_offset() -> FixedOffset {
    FixedOffset::east_opt(CIVIL_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

#[must_use]
pub fn now_civil() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&civil_offset())
}

/// Converts a seconds-or-milliseconds epoch value to civil time.
#[must_use]
pub fn from_epoch(value: i64) -> Option<DateTime<FixedOffset>> {
    let (secs, millis) = if value > MILLIS_THRESHOLD {
        (value.div_euclid(1_000), value.rem_euclid(1_000))
    } else {
        (value, 0)
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = (millis * 1_000_000) as u32;
    civil_offset().timestamp_opt(secs, nanos).single()
}

/// Formats an epoch value as `YYYY-MM-DD HH:MM:SS` in civil time.
#[must_use]
pub fn format_epoch(value: i64) -> Option<String> {
    from_epoch(value).map(|dt| dt.format(DATETIME_FORMAT).to_string())
}

/// Formats an epoch value as `YYYY-MM-DD` in civil time.
#[must_use]
pub fn format_epoch_date(value: i64) -> Option<String> {
    from_epoch(value).map(|dt| dt.format(DATE_FORMAT).to_string())
}

/// Today's date in civil time.
#[must_use]
pub fn today() -> String {
    now_civil().format(DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_epoch_formats_in_utc_plus_one() {
        // 2025-01-01T00:00:00Z
        assert_eq!(
            format_epoch(1_735_689_600).as_deref(),
            Some("2025-01-01 01:00:00")
        );
    }

    #[test]
    fn millisecond_epoch_is_detected() {
        assert_eq!(
            format_epoch(1_735_689_600_123).as_deref(),
            Some("2025-01-01 01:00:00")
        );
    }

    #[test]
    fn date_only_rolls_over_at_civil_midnight() {
        // 2024-12-31T23:30:00Z is already Jan 1st at UTC+1.
        assert_eq!(
            format_epoch_date(1_735_687_800).as_deref(),
            Some("2025-01-01")
        );
    }

    #[test]
    fn threshold_itself_is_read_as_seconds() {
        let at = from_epoch(MILLIS_THRESHOLD).unwrap();
        assert_eq!(at.timestamp(), MILLIS_THRESHOLD);
        let above = from_epoch(MILLIS_THRESHOLD + 1).unwrap();
        assert_eq!(above.timestamp(), 10_000_000);
    }
}
