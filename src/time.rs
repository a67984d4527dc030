use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};

/// `yyyy-MM-dd`
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// `yyyy-MM-dd HH:mm:ss`
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// ISO-8601 local date-time as written on export.
pub const ISO_LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// Compact stamp used in archive and report file names.
pub const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn now_local() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), DATETIME_FORMAT).ok()
}

/// Accepts `2024-03-01T08:30:00`, an optional fractional second, or the
/// minutes-only `2024-03-01T08:30` form.
pub fn parse_iso_local(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .ok()
}

pub fn format_date(value: &NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub fn format_datetime(value: &NaiveDateTime) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

pub fn format_iso_local(value: &NaiveDateTime) -> String {
    value.format(ISO_LOCAL_FORMAT).to_string()
}
