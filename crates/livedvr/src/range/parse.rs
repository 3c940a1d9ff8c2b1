use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;

use crate::{DvrError, DvrResult};

static DURATION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([0-9]+)([hms])").unwrap());

/// Parses a user supplied point in time.
///
/// Accepted, in order of priority:
/// - `2024-01-01T11:58:00Z` (explicit offset, `utc` is ignored)
/// - `2024-01-01T11:58:00`, `2024-01-01T11:58`
/// - `01.01.2024 11:58`
/// - `01.01 11:58` (current year)
/// - `11:58:00`, `11:58` (today)
///
/// Naive values are read as UTC when `utc` is set and as local time otherwise.
pub fn parse_datetime(input: &str, utc: bool) -> DvrResult<DateTime<Utc>> {
    let today = if utc {
        Utc::now().date_naive()
    } else {
        Local::now().date_naive()
    };
    parse_datetime_on(input, utc, today)
}

pub(crate) fn parse_datetime_on(
    input: &str,
    utc: bool,
    today: NaiveDate,
) -> DvrResult<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(datetime) = DateTime::parse_from_rfc3339(input) {
        return Ok(datetime.with_timezone(&Utc));
    }

    let naive = parse_naive(input, today)
        .ok_or_else(|| DvrError::TimeParse(input.to_string()))?;
    if utc {
        return Ok(naive.and_utc());
    }

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|datetime| datetime.with_timezone(&Utc))
        .ok_or_else(|| DvrError::TimeParse(format!("{input} does not exist in local time")))
}

fn parse_naive(input: &str, today: NaiveDate) -> Option<NaiveDateTime> {
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%d.%m.%Y %H:%M"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(input, format) {
            return Some(datetime);
        }
    }

    // chrono refuses to build a date without a year, so borrow today's
    let with_year = format!("{input} {}", today.year());
    if let Ok(datetime) = NaiveDateTime::parse_from_str(&with_year, "%d.%m %H:%M %Y") {
        return Some(datetime);
    }

    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(input, format) {
            return Some(today.and_time(time));
        }
    }

    None
}

/// Parses `1h30m`, `1h 30m`, `90m`, `45s`, `2h5s` (tokens in any order) or a
/// bare number of seconds. Zero is rejected.
pub fn parse_duration(input: &str) -> DvrResult<u64> {
    let input = input.trim();
    let invalid = || DvrError::DurationParse(input.to_string());

    let seconds = if let Ok(seconds) = input.parse::<u64>() {
        seconds
    } else {
        let mut covered = 0;
        let mut seconds = 0u64;
        for token in DURATION_TOKEN.captures_iter(input) {
            let whole = token.get(0).ok_or_else(invalid)?;
            // tokens may be separated by whitespace only
            if !input[covered..whole.start()].trim().is_empty() {
                return Err(invalid());
            }
            covered = whole.end();

            let amount = token[1].parse::<u64>().map_err(|_| invalid())?;
            let unit = match token[2].to_ascii_lowercase().as_str() {
                "h" => 3600,
                "m" => 60,
                _ => 1,
            };
            seconds = amount
                .checked_mul(unit)
                .and_then(|s| s.checked_add(seconds))
                .ok_or_else(invalid)?;
        }
        if covered == 0 || covered != input.len() {
            return Err(invalid());
        }
        seconds
    };

    if seconds == 0 {
        return Err(invalid());
    }
    Ok(seconds)
}
