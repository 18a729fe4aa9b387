use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};

use crate::error::{Result, ScheduleError};

pub const GTFS_DATE_FORMAT: &str = "%Y%m%d";

/// A service day in GTFS `YYYYMMDD` form.
///
/// The string form sorts the same way as the date, which is what the store
/// relies on for calendar range checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceDate(NaiveDate);

impl ServiceDate {
    pub fn parse(date: &str) -> Result<Self> {
        if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ScheduleError::InvalidDate(date.to_string()));
        }
        NaiveDate::parse_from_str(date, GTFS_DATE_FORMAT)
            .map(ServiceDate)
            .map_err(|_| ScheduleError::InvalidDate(date.to_string()))
    }

    pub fn weekday(&self) -> Weekday {
        self.0.weekday()
    }

    pub fn to_gtfs_string(&self) -> String {
        self.0.format(GTFS_DATE_FORMAT).to_string()
    }
}

impl From<NaiveDate> for ServiceDate {
    fn from(date: NaiveDate) -> Self {
        ServiceDate(date)
    }
}

impl fmt::Display for ServiceDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_gtfs_string())
    }
}

/// Parses either plain seconds since midnight or `HH:MM:SS`. Hours past 23
/// are allowed for trips that run after midnight.
pub fn parse_time_of_day(value: &str) -> Result<i64> {
    let invalid = || ScheduleError::InvalidTime(value.to_string());
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<i64>() {
        return if seconds < 0 { Err(invalid()) } else { Ok(seconds) };
    }

    let mut parts = trimmed.split(':');
    let (Some(h), Some(m), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    let hours: i64 = h.parse().map_err(|_| invalid())?;
    let minutes: i64 = m.parse().map_err(|_| invalid())?;
    let seconds: i64 = s.parse().map_err(|_| invalid())?;
    if hours < 0 || !(0..60).contains(&minutes) || !(0..60).contains(&seconds) {
        return Err(invalid());
    }
    hours
        .checked_mul(3600)
        .and_then(|h| h.checked_add(minutes * 60 + seconds))
        .ok_or_else(invalid)
}

pub fn format_time_of_day(seconds: i64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

pub(crate) fn ensure_non_negative(seconds: i64) -> Result<i64> {
    if seconds < 0 {
        return Err(ScheduleError::InvalidTime(seconds.to_string()));
    }
    Ok(seconds)
}
