//! Day index arithmetic for time-bucketed statistics.
//!
//! A day index counts days since January 1st of [`EPOCH_YEAR`]. Leap years
//! are every year divisible by four; the Gregorian century exception is
//! deliberately ignored, so 2100 is treated as a leap year. The dumps this
//! crate reads never come near such a year.

use crate::config::EPOCH_YEAR;
use anyhow::{bail, Context, Result};
use std::fmt;

const DAYS_UNTIL_MONTH: [i32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

const DAYS_PER_CYCLE: i32 = 4 * 365 + 1;

pub fn is_leap_year(year: i32) -> bool {
    year.rem_euclid(4) == 0
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// `month` is 1-based and must be in 1..=12.
pub fn day_index(year: i32, month: u32, day: u32) -> i32 {
    debug_assert!((1..=12).contains(&month));
    let leap_day = if month > 2 && is_leap_year(year) { 1 } else { 0 };
    let elapsed_years = year - EPOCH_YEAR;
    elapsed_years * 365
        + (elapsed_years + 3).div_euclid(4)
        + DAYS_UNTIL_MONTH[(month - 1) as usize]
        + leap_day
        + day as i32
        - 1
}

/// Inverse of [`day_index`].
pub fn from_day_index(index: i32) -> (i32, u32, u32) {
    let mut year = EPOCH_YEAR + 4 * index.div_euclid(DAYS_PER_CYCLE);
    let mut rest = index.rem_euclid(DAYS_PER_CYCLE);

    loop {
        let year_len = if is_leap_year(year) { 366 } else { 365 };
        if rest < year_len {
            break;
        }
        rest -= year_len;
        year += 1;
    }

    let mut month = 1;
    loop {
        let month_len = days_in_month(year, month) as i32;
        if rest < month_len {
            break;
        }
        rest -= month_len;
        month += 1;
    }

    (year, month, rest as u32 + 1)
}

/// Index of the fixed-length interval containing `day`.
pub fn interval_index(day: i32, interval_days: i32) -> i32 {
    day.div_euclid(interval_days)
}

/// Last day index belonging to the given interval.
pub fn interval_end_day(interval: i32, interval_days: i32) -> i32 {
    (interval + 1) * interval_days - 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub index: i32,
}

impl DayDate {
    pub fn from_index(index: i32) -> Self {
        let (year, month, day) = from_day_index(index);
        Self {
            year,
            month,
            day,
            index,
        }
    }

    /// Parses the date part of a MediaWiki timestamp (`2013-05-01T12:00:00Z`).
    pub fn parse(timestamp: &str) -> Result<Self> {
        let date = timestamp
            .get(..10)
            .with_context(|| format!("Timestamp too short: {:?}", timestamp))?;
        let bytes = date.as_bytes();
        if bytes[4] != b'-' || bytes[7] != b'-' {
            bail!("Unexpected timestamp format: {:?}", timestamp);
        }
        let year: i32 = date[0..4]
            .parse()
            .with_context(|| format!("Invalid year in timestamp: {:?}", timestamp))?;
        let month: u32 = date[5..7]
            .parse()
            .with_context(|| format!("Invalid month in timestamp: {:?}", timestamp))?;
        let day: u32 = date[8..10]
            .parse()
            .with_context(|| format!("Invalid day in timestamp: {:?}", timestamp))?;
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
            bail!("Date out of range in timestamp: {:?}", timestamp);
        }
        Ok(Self {
            year,
            month,
            day,
            index: day_index(year, month, day),
        })
    }

    /// Parses a bare `YYYY-MM-DD` date; anything after the day is an error.
    pub fn parse_date(date: &str) -> Result<Self> {
        if date.len() != 10 {
            bail!("Expected a date like 2013-05-01, found {:?}", date);
        }
        Self::parse(date)
    }

    /// Timestamp of midnight at the start of this day (`2013-05-01T00:00:00Z`).
    pub fn start_timestamp(&self) -> String {
        format!("{}T00:00:00Z", self)
    }
}

impl fmt::Display for DayDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Remembers the last parsed date; revisions of one block tend to share days.
#[derive(Default)]
pub struct DayCache {
    last: Option<(String, DayDate)>,
}

impl DayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn date_of(&mut self, timestamp: &str) -> Result<DayDate> {
        let key = timestamp.get(..10).unwrap_or(timestamp);
        if let Some((stamp, date)) = &self.last {
            if stamp == key {
                return Ok(*date);
            }
        }
        let date = DayDate::parse(timestamp)?;
        self.last = Some((key.to_string(), date));
        Ok(date)
    }
}
