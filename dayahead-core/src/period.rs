//! Request period encoding.
//!
//! The API takes period boundaries as `YYYYMMDDHHmm` tokens. End boundaries
//! are exclusive: asking for a single calendar day yields a 24 hour window.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const TOKEN_FORMAT: &str = "%Y%m%d%H%M";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    #[error("invalid date format '{0}' (expected YYYY-MM-DD)")]
    InvalidDateFormat(String),
}

/// An encoded period boundary, e.g. `202501010000`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodToken(String);

impl PeriodToken {
    fn from_datetime(dt: NaiveDateTime) -> Self {
        Self(dt.format(TOKEN_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The naive instant this token encodes.
    pub fn to_datetime(&self) -> NaiveDateTime {
        // Tokens are only built from valid datetimes, so this cannot fail.
        NaiveDateTime::parse_from_str(&self.0, TOKEN_FORMAT)
            .unwrap_or(NaiveDateTime::MIN)
    }
}

impl fmt::Display for PeriodToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Start and end tokens of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPeriod {
    pub start: PeriodToken,
    pub end: PeriodToken,
}

impl RequestPeriod {
    /// Build the period covering `start_date` through `end_date` inclusive.
    pub fn from_dates(start_date: &str, end_date: &str) -> Result<Self, PeriodError> {
        Ok(Self {
            start: to_period_boundary(start_date, false)?,
            end: to_period_boundary(end_date, true)?,
        })
    }

    /// Same as [`RequestPeriod::from_dates`] for already-parsed dates.
    pub fn for_days(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: boundary_for(start, false),
            end: boundary_for(end, true),
        }
    }
}

/// Parse a strict `YYYY-MM-DD` calendar date.
pub fn parse_calendar_date(input: &str) -> Result<NaiveDate, PeriodError> {
    // chrono accepts unpadded fields; the API contract does not.
    let well_shaped = input.len() == 10
        && input.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !well_shaped {
        return Err(PeriodError::InvalidDateFormat(input.to_string()));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|_| PeriodError::InvalidDateFormat(input.to_string()))
}

/// Encode a calendar date as a period boundary token.
///
/// Start boundaries are the date at 00:00. End boundaries are advanced by one
/// day first, making the supplied date the last day included.
pub fn to_period_boundary(calendar_date: &str, is_end: bool) -> Result<PeriodToken, PeriodError> {
    let date = parse_calendar_date(calendar_date)?;
    Ok(boundary_for(date, is_end))
}

/// Typed variant of [`to_period_boundary`].
pub fn boundary_for(date: NaiveDate, is_end: bool) -> PeriodToken {
    let day = if is_end {
        date.succ_opt().unwrap_or(date)
    } else {
        date
    };
    PeriodToken::from_datetime(day.and_time(chrono::NaiveTime::MIN))
}

/// Length of the window between two tokens.
pub fn span(start: &PeriodToken, end: &PeriodToken) -> Duration {
    end.to_datetime() - start.to_datetime()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_boundary_is_midnight() {
        let token = to_period_boundary("2025-01-01", false).unwrap();
        assert_eq!(token.as_str(), "202501010000");
    }

    #[test]
    fn end_boundary_is_next_midnight() {
        let token = to_period_boundary("2025-01-01", true).unwrap();
        assert_eq!(token.as_str(), "202501020000");
    }

    #[test]
    fn end_boundary_rolls_over_month_and_year() {
        assert_eq!(
            to_period_boundary("2024-02-29", true).unwrap().as_str(),
            "202403010000"
        );
        assert_eq!(
            to_period_boundary("2024-12-31", true).unwrap().as_str(),
            "202501010000"
        );
    }

    #[test]
    fn single_day_spans_24_hours() {
        let start = to_period_boundary("2025-03-30", false).unwrap();
        let end = to_period_boundary("2025-03-30", true).unwrap();
        assert_eq!(span(&start, &end), Duration::hours(24));
    }

    #[test]
    fn rejects_malformed_dates() {
        for bad in ["2025/01/01", "2025-1-1", "20250101", "2025-13-01", "2025-02-30", ""] {
            assert_eq!(
                to_period_boundary(bad, false),
                Err(PeriodError::InvalidDateFormat(bad.to_string())),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn request_period_from_dates() {
        let period = RequestPeriod::from_dates("2025-01-01", "2025-01-03").unwrap();
        assert_eq!(period.start.as_str(), "202501010000");
        assert_eq!(period.end.as_str(), "202501040000");
        assert_eq!(span(&period.start, &period.end), Duration::hours(72));
    }
}
