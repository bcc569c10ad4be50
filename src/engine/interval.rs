use chrono::{NaiveDate, NaiveTime, TimeDelta, Timelike};

use crate::model::Span;

use super::EngineError;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// `HH:MM`, or `HH:MM:SS` with the seconds dropped.
const TIME_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];

/// Turn a calendar date, a start-of-day time and a duration in minutes into
/// `[start, start + duration)`.
///
/// Past dates are accepted; no business rule beyond `duration > 0` applies.
pub fn parse_interval(
    date: Option<&str>,
    time: Option<&str>,
    duration_minutes: Option<i64>,
) -> Result<Span, EngineError> {
    let date = present(date).ok_or_else(|| EngineError::invalid("date is required"))?;
    let time = present(time).ok_or_else(|| EngineError::invalid("start time is required"))?;
    let minutes = duration_minutes.ok_or_else(|| EngineError::invalid("duration is required"))?;
    if minutes <= 0 {
        return Err(EngineError::invalid(format!(
            "duration must be positive, got {minutes}"
        )));
    }

    let day = NaiveDate::parse_from_str(date, DATE_FORMAT)
        .map_err(|e| EngineError::invalid(format!("bad date {date:?}: {e}")))?;
    let start = day.and_time(parse_time(time)?);
    let end = TimeDelta::try_minutes(minutes)
        .and_then(|d| start.checked_add_signed(d))
        .ok_or_else(|| EngineError::invalid(format!("duration {minutes} out of range")))?;
    Ok(Span::new(start, end))
}

/// Parse a textual duration in minutes. Bad text is an invalid interval, not
/// a syntax error.
pub fn parse_minutes(raw: Option<&str>) -> Result<Option<i64>, EngineError> {
    present(raw)
        .map(|s| {
            s.parse::<i64>()
                .map_err(|e| EngineError::invalid(format!("bad duration {s:?}: {e}")))
        })
        .transpose()
}

fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_time(raw: &str) -> Result<NaiveTime, EngineError> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .ok_or_else(|| EngineError::invalid(format!("bad start time {raw:?}")))
}
