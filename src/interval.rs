//! Date-interval strings used by the query stage's time conditions.
//!
//! Accepted forms, all case-insensitive:
//!
//! - `today`, `yesterday`
//! - `<3d`, `-3d`: within the last three days
//! - `>2w`: more than two weeks ago
//! - `2024-03-01`, `2024/03/01 12:30`, `2024-03-01 12:30:15`: that day, minute or second
//! - `<2024-03-01`, `>2024-03-01`: strictly before or after that day
//! - `2024-01-01 .. 2024-02-15`, `2024-01-01 - 2024-02-15`: an inclusive range
//!
//! Units are `s`, `min`, `h`, `d`, `w`, `m` (30 days) and `y` (365 days).
//! A count without a unit is read as days.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};

/// Inclusive range of Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub lower: i64,
    pub upper: i64,
}

impl TimeInterval {
    /// Zero stamps mean "never" and fall outside every interval.
    pub fn contains(&self, stamp: i64) -> bool {
        stamp != 0 && self.lower <= stamp && stamp <= self.upper
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalParseError {
    #[error("empty date interval")]
    Empty,
    #[error("unrecognised date or interval '{0}'")]
    Unrecognised(String),
    #[error("unknown time unit '{0}'")]
    UnknownUnit(String),
    #[error("interval ends before it starts: '{0}'")]
    Inverted(String),
}

/// Parses `text` relative to the current local time.
pub fn parse_interval(text: &str) -> Result<TimeInterval, IntervalParseError> {
    parse_interval_at(text, &Local::now())
}

/// Parses `text` relative to `now`; day boundaries follow `now`'s time zone.
pub fn parse_interval_at<Tz: TimeZone>(
    text: &str,
    now: &DateTime<Tz>,
) -> Result<TimeInterval, IntervalParseError> {
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(IntervalParseError::Empty);
    }

    if let Some((from, to)) = split_range(&normalized) {
        let (lower, _) = parse_point(from, now)?;
        let (_, upper) = parse_point(to, now)?;
        if lower > upper {
            return Err(IntervalParseError::Inverted(text.trim().to_string()));
        }
        return Ok(TimeInterval { lower, upper });
    }

    let now_secs = now.timestamp();
    if let Some(rest) = normalized.strip_prefix('<') {
        let rest = rest.trim();
        if let Some(span) = parse_span(rest)? {
            return Ok(TimeInterval {
                lower: now_secs.saturating_sub(span),
                upper: now_secs,
            });
        }
        let (start, _) = parse_point(rest, now)?;
        return Ok(TimeInterval {
            lower: i64::MIN,
            upper: start - 1,
        });
    }
    if let Some(rest) = normalized.strip_prefix('>') {
        let rest = rest.trim();
        if let Some(span) = parse_span(rest)? {
            return Ok(TimeInterval {
                lower: i64::MIN,
                upper: now_secs.saturating_sub(span),
            });
        }
        let (_, end) = parse_point(rest, now)?;
        return Ok(TimeInterval {
            lower: end + 1,
            upper: i64::MAX,
        });
    }
    if let Some(rest) = normalized.strip_prefix('-') {
        if let Some(span) = parse_span(rest.trim())? {
            return Ok(TimeInterval {
                lower: now_secs.saturating_sub(span),
                upper: now_secs,
            });
        }
        return Err(IntervalParseError::Unrecognised(text.trim().to_string()));
    }

    let (lower, upper) = parse_point(&normalized, now)?;
    Ok(TimeInterval { lower, upper })
}

/// Builds an interval string from optional calendar bounds. `None` when neither is set.
pub fn format_interval(lower: Option<NaiveDate>, upper: Option<NaiveDate>) -> Option<String> {
    const DATE_FORMAT: &str = "%Y-%m-%d";
    match (lower, upper) {
        (Some(lower), Some(upper)) => Some(format!(
            "{} .. {}",
            lower.format(DATE_FORMAT),
            upper.format(DATE_FORMAT)
        )),
        (Some(lower), None) => lower
            .pred_opt()
            .map(|day| format!(">{}", day.format(DATE_FORMAT))),
        (None, Some(upper)) => upper
            .succ_opt()
            .map(|day| format!("<{}", day.format(DATE_FORMAT))),
        (None, None) => None,
    }
}

fn split_range(text: &str) -> Option<(&str, &str)> {
    if let Some((from, to)) = text.split_once("..") {
        return Some((from.trim(), to.trim()));
    }
    text.split_once(" - ")
        .map(|(from, to)| (from.trim(), to.trim()))
}

/// Parses `N unit` into seconds. `Ok(None)` when `text` does not start with a digit.
fn parse_span(text: &str) -> Result<Option<i64>, IntervalParseError> {
    let digits_end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if digits_end == 0 {
        return Ok(None);
    }
    let unit = text[digits_end..].trim();
    // A date such as 2024-03-01 starts with digits too.
    if unit.starts_with('-') || unit.starts_with('/') {
        return Ok(None);
    }

    let count: i64 = text[..digits_end]
        .parse()
        .map_err(|_| IntervalParseError::Unrecognised(text.to_string()))?;
    let unit_secs: i64 = match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hour" | "hours" => 3_600,
        "" | "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 7 * 86_400,
        "m" | "month" | "months" => 30 * 86_400,
        "y" | "year" | "years" => 365 * 86_400,
        other => return Err(IntervalParseError::UnknownUnit(other.to_string())),
    };
    Ok(Some(count.saturating_mul(unit_secs)))
}

/// Parses a single point in time into the inclusive range of seconds it covers.
fn parse_point<Tz: TimeZone>(text: &str, now: &DateTime<Tz>) -> Result<(i64, i64), IntervalParseError> {
    let unrecognised = || IntervalParseError::Unrecognised(text.to_string());
    let today = now.date_naive();

    match text {
        "today" => return day_bounds(today, now).ok_or_else(unrecognised),
        "yesterday" => {
            let day = today.pred_opt().ok_or_else(unrecognised)?;
            return day_bounds(day, now).ok_or_else(unrecognised);
        }
        _ => {}
    }

    let text = text.replace('/', "-");
    if let Ok(at) = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S") {
        let stamp = local_timestamp(&at, now).ok_or_else(unrecognised)?;
        return Ok((stamp, stamp));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M") {
        let stamp = local_timestamp(&at, now).ok_or_else(unrecognised)?;
        return Ok((stamp, stamp + 59));
    }
    if let Ok(day) = NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
        return day_bounds(day, now).ok_or_else(unrecognised);
    }
    Err(unrecognised())
}

fn day_bounds<Tz: TimeZone>(day: NaiveDate, now: &DateTime<Tz>) -> Option<(i64, i64)> {
    let start = local_timestamp(&day.and_hms_opt(0, 0, 0)?, now)?;
    let next = day.succ_opt()?;
    let next_start = local_timestamp(&next.and_hms_opt(0, 0, 0)?, now)?;
    Some((start, next_start - 1))
}

fn local_timestamp<Tz: TimeZone>(at: &NaiveDateTime, now: &DateTime<Tz>) -> Option<i64> {
    now.timezone()
        .from_local_datetime(at)
        .earliest()
        .map(|resolved| resolved.timestamp())
}

/// Current Unix time in seconds, used for `time_modified` stamps.
pub fn unix_now() -> i64 {
    Local::now().timestamp()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{format_interval, parse_interval_at, IntervalParseError, TimeInterval};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0)
            .single()
            .expect("fixed test time should be valid")
    }

    fn day_start(year: i32, month: u32, day: u32) -> i64 {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
            .single()
            .expect("test date should be valid")
            .timestamp()
    }

    #[test]
    fn test_relative_spans_anchor_on_now() {
        let now_secs = now().timestamp();
        assert_eq!(
            parse_interval_at("<3d", &now()),
            Ok(TimeInterval {
                lower: now_secs - 3 * 86_400,
                upper: now_secs
            })
        );
        assert_eq!(parse_interval_at("-3d", &now()), parse_interval_at("<3 days", &now()));
        assert_eq!(
            parse_interval_at(">2w", &now()),
            Ok(TimeInterval {
                lower: i64::MIN,
                upper: now_secs - 14 * 86_400
            })
        );
        assert_eq!(
            parse_interval_at("<90min", &now()).map(|interval| interval.lower),
            Ok(now_secs - 90 * 60)
        );
    }

    #[test]
    fn test_single_date_covers_whole_day() {
        let interval = parse_interval_at("2024-03-01", &now()).expect("date should parse");
        assert_eq!(interval.lower, day_start(2024, 3, 1));
        assert_eq!(interval.upper, day_start(2024, 3, 2) - 1);
        assert_eq!(parse_interval_at("2024/03/01", &now()), Ok(interval));
    }

    #[test]
    fn test_date_with_time_covers_minute_or_second() {
        let minute = parse_interval_at("2024-03-01 12:30", &now()).expect("minute should parse");
        assert_eq!(minute.upper - minute.lower, 59);
        let second =
            parse_interval_at("2024-03-01 12:30:15", &now()).expect("second should parse");
        assert_eq!(second.lower, second.upper);
        assert_eq!(second.lower, minute.lower + 15);
    }

    #[test]
    fn test_before_and_after_dates_are_exclusive() {
        let before = parse_interval_at("<2024-03-01", &now()).expect("before should parse");
        assert_eq!(before.upper, day_start(2024, 3, 1) - 1);
        let after = parse_interval_at("> 2024-03-01", &now()).expect("after should parse");
        assert_eq!(after.lower, day_start(2024, 3, 2));
        assert_eq!(after.upper, i64::MAX);
    }

    #[test]
    fn test_ranges_and_named_days() {
        let range =
            parse_interval_at("2024-01-01 .. 2024-01-31", &now()).expect("range should parse");
        assert_eq!(range.lower, day_start(2024, 1, 1));
        assert_eq!(range.upper, day_start(2024, 2, 1) - 1);
        assert_eq!(parse_interval_at("2024-01-01 - 2024-01-31", &now()), Ok(range));

        let today = parse_interval_at("Today", &now()).expect("today should parse");
        assert_eq!(today.lower, day_start(2024, 3, 15));
        let span = parse_interval_at("yesterday..today", &now()).expect("span should parse");
        assert_eq!(span.lower, day_start(2024, 3, 14));
        assert_eq!(span.upper, today.upper);
    }

    #[test]
    fn test_malformed_strings_are_errors() {
        assert_eq!(parse_interval_at("   ", &now()), Err(IntervalParseError::Empty));
        assert!(matches!(
            parse_interval_at("last tuesday", &now()),
            Err(IntervalParseError::Unrecognised(_))
        ));
        assert!(matches!(
            parse_interval_at("<3 fortnights", &now()),
            Err(IntervalParseError::UnknownUnit(_))
        ));
        assert!(matches!(
            parse_interval_at("2024-02-01 .. 2024-01-01", &now()),
            Err(IntervalParseError::Inverted(_))
        ));
        assert!(matches!(
            parse_interval_at("2024-02-30", &now()),
            Err(IntervalParseError::Unrecognised(_))
        ));
    }

    #[test]
    fn test_zero_stamp_is_never_inside() {
        let everything = TimeInterval {
            lower: i64::MIN,
            upper: i64::MAX,
        };
        assert!(!everything.contains(0));
        assert!(everything.contains(1));
    }

    #[test]
    fn test_format_interval_round_trips_through_parser() {
        let lower = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
        let upper = NaiveDate::from_ymd_opt(2024, 1, 31).expect("valid date");

        let both = format_interval(Some(lower), Some(upper)).expect("range text");
        assert_eq!(both, "2024-01-01 .. 2024-01-31");

        let from = format_interval(Some(lower), None).expect("lower bound text");
        let parsed = parse_interval_at(&from, &now()).expect("lower bound should parse");
        assert_eq!(parsed.lower, day_start(2024, 1, 1));

        let until = format_interval(None, Some(upper)).expect("upper bound text");
        let parsed = parse_interval_at(&until, &now()).expect("upper bound should parse");
        assert_eq!(parsed.upper, day_start(2024, 2, 1) - 1);

        assert_eq!(format_interval(None, None), None);
    }
}
