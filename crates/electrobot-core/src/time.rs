use chrono::{DateTime, Local, NaiveDateTime, Utc};
use chrono_tz::Tz;

/// Layout of timestamps written to the database. Shares its prefix with
/// SQLite's `CURRENT_TIMESTAMP`, so both sort together.
pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Layout shown to users: local calendar time, second precision.
pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn to_storage(ts: DateTime<Utc>) -> String {
    ts.format(STORAGE_FORMAT).to_string()
}

pub fn parse_storage(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(naive.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Formats `ts` in `tz`, falling back to the host's local timezone.
pub fn format_local(ts: DateTime<Utc>, tz: Option<Tz>) -> String {
    match tz {
        Some(tz) => ts.with_timezone(&tz).format(DISPLAY_FORMAT).to_string(),
        None => ts.with_timezone(&Local).format(DISPLAY_FORMAT).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_storage_format_keeps_milliseconds() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(to_storage(ts), "2026-03-01 12:30:05.250");
        assert_eq!(parse_storage("2026-03-01 12:30:05.250"), Some(ts));
    }

    #[test]
    fn test_parse_storage_accepts_sqlite_default_and_rfc3339() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(parse_storage("2026-03-01 12:30:05"), Some(expected));
        assert_eq!(parse_storage("2026-03-01T14:30:05+02:00"), Some(expected));
        assert_eq!(parse_storage("yesterday"), None);
    }

    #[test]
    fn test_storage_strings_sort_chronologically_across_layouts() {
        let default_form = "2026-03-01 12:30:05";
        let written = to_storage(Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 6).unwrap());
        assert!(written.as_str() > default_form);
    }

    #[test]
    fn test_format_local_uses_given_timezone() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 15, 22, 0, 0).unwrap();
        let tokyo: Tz = "Asia/Tokyo".parse().unwrap();
        assert_eq!(format_local(ts, Some(tokyo)), "2026-01-16 07:00:00");
    }

    #[test]
    fn test_format_local_without_timezone_has_second_precision() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 15, 22, 0, 0).unwrap();
        let out = format_local(ts, None);
        assert_eq!(out.len(), "2026-01-15 22:00:00".len());
    }
}
