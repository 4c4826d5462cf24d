//! Best-effort conversion of header and parameter strings into typed values.
//!
//! Nothing in here fails loudly: a value that can't be converted is `None`,
//! and the caller picks its own default.

use std::{fmt, str::FromStr, time::SystemTime};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use tracing::debug;

/// Converts `value` into `T` using its [`FromStr`] implementation.
///
/// Failures are logged at `debug` level and reported as `None`.
///
/// # Examples
/// ```
/// use ember_http::{coerce, HttpDate};
///
/// assert_eq!(coerce::<u32>("42"), Some(42));
/// assert_eq!(coerce::<u32>("forty-two"), None);
/// assert!(coerce::<HttpDate>("Sun, 06 Nov 1994 08:49:37 GMT").is_some());
/// ```
pub fn coerce<T>(value: &str) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            debug!(
                value,
                target_type = std::any::type_name::<T>(),
                %error,
                "value coercion failed"
            );
            None
        }
    }
}

/// A point in time read from, or written to, an HTTP header.
///
/// Parsing tries, in order:
/// 1. the three HTTP header formats: IMF-fixdate / RFC 1123
///    (`Sun, 06 Nov 1994 08:49:37 GMT`), RFC 850 / RFC 1036
///    (`Sunday, 06-Nov-94 08:49:37 GMT`) and asctime (`Sun Nov  6 08:49:37 1994`);
/// 2. the looser forms people type by hand, after collapsing runs of
///    whitespace, `,`, `/`, `.` and `-` into single spaces:
///    `6 Nov 94`, `1994 11 6`, `1994 Nov 6` and
///    `Sun Nov 06 08:49:37 GMT 1994`. A bare day and month (`6 Nov`) gets the
///    current year.
///
/// Loose forms carry no timezone and are read as UTC.
///
/// Displays as IMF-fixdate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HttpDate(SystemTime);

impl HttpDate {
    /// The current time, truncated to whole seconds by the HTTP formats when written.
    pub fn now() -> Self {
        HttpDate(SystemTime::now())
    }

    pub fn system_time(&self) -> SystemTime {
        self.0
    }
}

impl From<SystemTime> for HttpDate {
    fn from(time: SystemTime) -> Self {
        HttpDate(time)
    }
}

impl From<HttpDate> for SystemTime {
    fn from(date: HttpDate) -> Self {
        date.0
    }
}

impl fmt::Display for HttpDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&httpdate::fmt_http_date(self.0))
    }
}

/// No format in the fallback chain matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDate;

impl fmt::Display for InvalidDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unrecognized date format")
    }
}

impl std::error::Error for InvalidDate {}

impl FromStr for HttpDate {
    type Err = InvalidDate;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Ok(time) = httpdate::parse_http_date(value) {
            return Ok(HttpDate(time));
        }

        let now = OffsetDateTime::now_utc();
        let normalized = append_year(normalize(value), now.year());
        let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();

        LOOSE_FORMATS
            .iter()
            .find_map(|format| format(&tokens[..], now.year()))
            .map(|datetime| HttpDate(datetime.into()))
            .ok_or(InvalidDate)
    }
}

// LOOSE FORMATS

type LooseFormat = fn(&[&str], i32) -> Option<OffsetDateTime>;

const LOOSE_FORMATS: [LooseFormat; 4] = [
    day_month_year,
    numeric_year_month_day,
    year_month_day,
    unix_date,
];

/// Collapses every run of whitespace, `,`, `/`, `.` and `-` into one space.
///
/// A run directly after a literal `GMT` keeps its first character, so an
/// offset such as `GMT-08` is not torn apart.
fn normalize(value: &str) -> String {
    let is_separator = |c: char| c.is_whitespace() || matches!(c, ',' | '/' | '.' | '-');

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if !is_separator(c) {
            out.push(c);
            continue;
        }

        let mut run_tail = false;
        while chars.peek().copied().is_some_and(is_separator) {
            chars.next();
            run_tail = true;
        }

        if out.ends_with("GMT") {
            out.push(c);
            if run_tail {
                out.push(' ');
            }
        } else {
            out.push(' ');
        }
    }
    out
}

/// A day and a month alone (one space) can't be a date; assume the current year.
fn append_year(mut value: String, year: i32) -> String {
    if value.matches(' ').count() == 1 {
        value.push(' ');
        value.push_str(&year.to_string());
    }
    value
}

/// `6 Nov 94`, `6 November 1994`
fn day_month_year(tokens: &[&str], current_year: i32) -> Option<OffsetDateTime> {
    let [day, month, year, ..] = tokens else {
        return None;
    };
    midnight(
        short_year(year, current_year)?,
        month_name(month)?,
        number(day)?,
    )
}

/// `1994 11 6`
fn numeric_year_month_day(tokens: &[&str], _: i32) -> Option<OffsetDateTime> {
    let [year, month, day, ..] = tokens else {
        return None;
    };
    let month = Month::try_from(number::<u8>(month)?).ok()?;
    midnight(number(year)?, month, number(day)?)
}

/// `1994 Nov 6`
fn year_month_day(tokens: &[&str], _: i32) -> Option<OffsetDateTime> {
    let [year, month, day, ..] = tokens else {
        return None;
    };
    midnight(number(year)?, month_name(month)?, number(day)?)
}

/// `Sun Nov 06 08:49:37 GMT 1994`, the way `date(1)` prints it.
fn unix_date(tokens: &[&str], _: i32) -> Option<OffsetDateTime> {
    let [weekday, month, day, clock, zone, year, ..] = tokens else {
        return None;
    };
    weekday_name(weekday)?;

    let date = Date::from_calendar_date(number(year)?, month_name(month)?, number(day)?).ok()?;
    let datetime = PrimitiveDateTime::new(date, clock_time(clock)?);
    Some(datetime.assume_offset(zone_offset(zone)?))
}

fn midnight(year: i32, month: Month, day: u8) -> Option<OffsetDateTime> {
    let date = Date::from_calendar_date(year, month, day).ok()?;
    Some(PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc())
}

fn number<T: FromStr>(token: &str) -> Option<T> {
    match token.bytes().all(|b| b.is_ascii_digit()) {
        true => token.parse().ok(),
        false => None,
    }
}

/// Two-digit years land within 80 years before and 20 years after `current_year`.
fn short_year(token: &str, current_year: i32) -> Option<i32> {
    let year: i32 = number(token)?;
    if token.len() != 2 {
        return Some(year);
    }

    let floor = current_year - 80;
    let century = floor - floor.rem_euclid(100);
    let candidate = century + year;
    match candidate < floor {
        true => Some(candidate + 100),
        false => Some(candidate),
    }
}

fn clock_time(token: &str) -> Option<Time> {
    let mut parts = token.split(':');
    let hour = number(parts.next()?)?;
    let minute = number(parts.next()?)?;
    let second = number(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    Time::from_hms(hour, minute, second).ok()
}

/// `GMT`, `UTC`, `UT`, `Z` or a numeric `+hhmm` / `-hhmm` offset.
fn zone_offset(token: &str) -> Option<UtcOffset> {
    if ["GMT", "UTC", "UT", "Z"]
        .iter()
        .any(|zone| token.eq_ignore_ascii_case(zone))
    {
        return Some(UtcOffset::UTC);
    }

    let (sign, digits) = match token.as_bytes().first()? {
        b'+' => (1, &token[1..]),
        b'-' => (-1, &token[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i8 = number(&digits[..2])?;
    let minutes: i8 = number(&digits[2..])?;
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}

const MONTHS: [(&str, Month); 12] = [
    ("january", Month::January),
    ("february", Month::February),
    ("march", Month::March),
    ("april", Month::April),
    ("may", Month::May),
    ("june", Month::June),
    ("july", Month::July),
    ("august", Month::August),
    ("september", Month::September),
    ("october", Month::October),
    ("november", Month::November),
    ("december", Month::December),
];

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Full or three-letter month name, any case.
fn month_name(token: &str) -> Option<Month> {
    MONTHS
        .iter()
        .find(|(name, _)| name_matches(name, token))
        .map(|(_, month)| *month)
}

fn weekday_name(token: &str) -> Option<()> {
    WEEKDAYS
        .iter()
        .any(|name| name_matches(name, token))
        .then_some(())
}

fn name_matches(full: &str, token: &str) -> bool {
    token.eq_ignore_ascii_case(full)
        || (token.len() == 3 && full.get(..3).is_some_and(|abbr| token.eq_ignore_ascii_case(abbr)))
}
