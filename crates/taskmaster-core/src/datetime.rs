use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

use crate::error::DateParseError;

pub const TIMEZONE_ENV_VAR: &str =
  "TASKMASTER_TIMEZONE";
pub const DAY_KEY_FORMAT: &str =
  "%Y-%m-%d";

const LOCAL_DATETIME_FORMATS: [&str;
  5] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%d %H:%M"
];
const COMPACT_UTC_FORMAT: &str =
  "%Y%m%dT%H%M%SZ";

/// A task's due value after tolerant parsing.
///
/// Date-only values are due at the end of that day in the configured
/// timezone. Date-times without an offset are wall-clock times in that
/// timezone; values with an offset are absolute instants.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum DueDate {
  Day(NaiveDate),
  Local(NaiveDateTime),
  Instant(DateTime<Utc>)
}

impl DueDate {
  pub fn parse(
    raw: &str
  ) -> Result<Self, DateParseError> {
    let token = raw.trim();
    if token.is_empty() {
      return Err(DateParseError::new(
        raw
      ));
    }

    if let Ok(date) =
      NaiveDate::parse_from_str(
        token,
        DAY_KEY_FORMAT
      )
    {
      return Ok(DueDate::Day(date));
    }

    for fmt in LOCAL_DATETIME_FORMATS {
      if let Ok(ndt) =
        NaiveDateTime::parse_from_str(
          token, fmt
        )
      {
        return Ok(DueDate::Local(ndt));
      }
    }

    if let Ok(dt) =
      DateTime::parse_from_rfc3339(
        token
      )
    {
      return Ok(DueDate::Instant(
        dt.with_timezone(&Utc)
      ));
    }

    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token,
        COMPACT_UTC_FORMAT
      )
    {
      return Ok(DueDate::Instant(
        DateTime::<Utc>::from_naive_utc_and_offset(
          ndt, Utc
        )
      ));
    }

    Err(DateParseError::new(raw))
  }

  pub fn has_time(&self) -> bool {
    !matches!(self, DueDate::Day(_))
  }

  /// Calendar day this value falls on in `tz`.
  pub fn day(
    &self,
    tz: &Tz
  ) -> NaiveDate {
    match self {
      | DueDate::Day(date) => *date,
      | DueDate::Local(ndt) => {
        ndt.date()
      }
      | DueDate::Instant(dt) => {
        dt.with_timezone(tz)
          .date_naive()
      }
    }
  }

  /// Instant the task is due. Date-only values resolve to 23:59 local.
  pub fn deadline(
    &self,
    tz: &Tz
  ) -> Result<DateTime<Utc>, DateParseError>
  {
    match self {
      | DueDate::Day(date) => {
        let end_of_day = date
          .and_time(end_of_day_time());
        to_utc_from_local(
          tz,
          end_of_day,
          "end-of-day"
        )
      }
      | DueDate::Local(ndt) => {
        to_utc_from_local(
          tz, *ndt, "due-local"
        )
      }
      | DueDate::Instant(dt) => Ok(*dt)
    }
  }
}

fn end_of_day_time() -> NaiveTime {
  NaiveTime::from_hms_opt(23, 59, 0)
    .unwrap_or(NaiveTime::MIN)
}

fn to_utc_from_local(
  tz: &Tz,
  local_naive: NaiveDateTime,
  context: &str
) -> Result<DateTime<Utc>, DateParseError>
{
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::debug!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      tracing::warn!(
        context,
        local = %local_naive,
        timezone = %tz,
        "local datetime does not exist in timezone"
      );
      Err(DateParseError::new(
        &local_naive.to_string()
      ))
    }
  }
}

#[must_use]
pub fn day_key(
  date: NaiveDate
) -> String {
  date.format(DAY_KEY_FORMAT).to_string()
}

pub fn parse_day_key(
  raw: &str
) -> Result<NaiveDate, DateParseError> {
  NaiveDate::parse_from_str(
    raw.trim(),
    DAY_KEY_FORMAT
  )
  .map_err(|_| DateParseError::new(raw))
}

/// Resolves the timezone used for "local" calendar days.
///
/// `TASKMASTER_TIMEZONE` wins over the configured id; anything unparseable
/// falls through to UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "config")
  {
    return tz;
  }

  tracing::debug!(
    "no timezone configured; using UTC"
  );
  chrono_tz::UTC
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured calendar timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

pub fn parse_weekday(
  raw: &str
) -> Option<Weekday> {
  match raw
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  date
    .checked_add_signed(Duration::days(
      days
    ))
    .unwrap_or(date)
}

pub fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

pub fn last_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  add_days(
    first_day_of_month(
      next_year, next_month
    ),
    -1
  )
}

pub fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  last_day_of_month(year, month).day()
}

/// Moves by whole months, clamping the day (Jan 31 + 1 month = Feb 28/29).
pub fn shift_months(
  date: NaiveDate,
  months: i32
) -> NaiveDate {
  let mut year = date.year();
  let mut month =
    date.month() as i32 + months;

  while month < 1 {
    month += 12;
    year = year.saturating_sub(1);
  }
  while month > 12 {
    month -= 12;
    year = year.saturating_add(1);
  }

  let month = month as u32;
  let day = date
    .day()
    .min(days_in_month(year, month));
  NaiveDate::from_ymd_opt(
    year, month, day
  )
  .unwrap_or(date)
}

pub fn start_of_week(
  day: NaiveDate,
  week_start: Weekday
) -> NaiveDate {
  let day_idx = day
    .weekday()
    .num_days_from_monday()
    as i64;
  let start_idx = week_start
    .num_days_from_monday()
    as i64;
  let diff =
    (7 + day_idx - start_idx) % 7;
  add_days(day, -diff)
}

pub fn end_of_week(
  day: NaiveDate,
  week_start: Weekday
) -> NaiveDate {
  add_days(
    start_of_week(day, week_start),
    6
  )
}

fn relative_expr_regex()
-> Option<&'static Regex> {
  static RELATIVE: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  RELATIVE
    .get_or_init(|| {
      Regex::new(
        r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$"
      )
      .map_err(|err| {
        tracing::error!(error = %err, "relative date regex failed to compile");
      })
      .ok()
    })
    .as_ref()
}

/// Parses a user-facing date expression into an instant.
///
/// Accepts `now`, `today`, `tomorrow`, `yesterday`, `+Nd`/`-Nh`/`+Nm`, and
/// every due-date form. Date-only values resolve to local midnight.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  let day_offset = match lower.as_str()
  {
    | "now" => return Ok(now),
    | "today" => Some(0),
    | "tomorrow" => Some(1),
    | "yesterday" => Some(-1),
    | _ => None
  };
  if let Some(offset) = day_offset {
    let today =
      now.with_timezone(tz).date_naive();
    return local_midnight(
      tz,
      add_days(today, offset)
    );
  }

  if let Some(caps) =
    relative_expr_regex()
      .and_then(|re| re.captures(token))
  {
    let num: i64 = caps["num"]
      .parse()
      .context(
        "invalid relative number"
      )?;
    let duration = match &caps["unit"]
    {
      | "d" => Duration::days(num),
      | "h" => Duration::hours(num),
      | _ => Duration::minutes(num)
    };
    return Ok(
      if &caps["sign"] == "-" {
        now - duration
      } else {
        now + duration
      }
    );
  }

  match DueDate::parse(token) {
    | Ok(DueDate::Day(date)) => {
      local_midnight(tz, date)
    }
    | Ok(due) => due
      .deadline(tz)
      .map_err(anyhow::Error::from),
    | Err(err) => {
      Err(anyhow::Error::from(err))
        .with_context(|| {
          "supported formats: \
           now/today/tomorrow/yesterday, \
           +Nd/+Nh/+Nm, YYYY-MM-DD, \
           YYYY-MM-DDTHH:MM[:SS], \
           YYYY-MM-DD HH:MM, RFC3339, \
           YYYYMMDDTHHMMSSZ"
        })
    }
  }
}

/// Like [`parse_date_expr`], reduced to a calendar day in `tz`.
pub fn parse_day_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<NaiveDate> {
  if let Ok(due) = DueDate::parse(input)
  {
    return Ok(due.day(tz));
  }
  let instant =
    parse_date_expr(input, now, tz)?;
  Ok(
    instant
      .with_timezone(tz)
      .date_naive()
  )
}

fn local_midnight(
  tz: &Tz,
  date: NaiveDate
) -> anyhow::Result<DateTime<Utc>> {
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct \
         midnight for {date}"
      )
    })?;
  to_utc_from_local(
    tz, midnight, "midnight"
  )
  .map_err(anyhow::Error::from)
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc,
    Weekday
  };

  use super::*;

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn parses_date_only_and_date_time_forms()
  {
    assert_eq!(
      DueDate::parse("2024-06-10")
        .expect("date only"),
      DueDate::Day(date(2024, 6, 10))
    );
    assert_eq!(
      DueDate::parse(" 2024-06-10T15:30 ")
        .expect("local minutes"),
      DueDate::Local(
        date(2024, 6, 10)
          .and_hms_opt(15, 30, 0)
          .expect("valid time")
      )
    );
    assert!(matches!(
      DueDate::parse(
        "2024-06-10T15:30:00.000Z"
      ),
      Ok(DueDate::Instant(_))
    ));
    assert!(matches!(
      DueDate::parse("20240610T153000Z"),
      Ok(DueDate::Instant(_))
    ));
    assert!(
      DueDate::parse("2024-06-10 08:00")
        .expect("space separated")
        .has_time()
    );
  }

  #[test]
  fn rejects_malformed_dates() {
    for raw in [
      "",
      "   ",
      "next week",
      "2024-13-01",
      "2024-02-30",
      "10/06/2024"
    ] {
      assert!(
        DueDate::parse(raw).is_err(),
        "{raw} should not parse"
      );
    }
  }

  #[test]
  fn date_only_deadline_is_end_of_local_day()
  {
    let tz: Tz = "America/New_York"
      .parse()
      .expect("valid tz");
    let deadline =
      DueDate::Day(date(2024, 6, 10))
        .deadline(&tz)
        .expect("deadline");
    assert_eq!(
      deadline,
      Utc
        .with_ymd_and_hms(
          2024, 6, 11, 3, 59, 0
        )
        .single()
        .expect("valid utc")
    );
  }

  #[test]
  fn instant_day_uses_configured_timezone()
  {
    let tz: Tz = "Asia/Tokyo"
      .parse()
      .expect("valid tz");
    let due = DueDate::parse(
      "2024-06-10T20:00:00Z"
    )
    .expect("instant");
    assert_eq!(
      due.day(&tz),
      date(2024, 6, 11)
    );
    assert_eq!(
      due.day(&chrono_tz::UTC),
      date(2024, 6, 10)
    );
  }

  #[test]
  fn shift_months_clamps_day() {
    assert_eq!(
      shift_months(date(2024, 1, 31), 1),
      date(2024, 2, 29)
    );
    assert_eq!(
      shift_months(
        date(2024, 1, 15),
        -1
      ),
      date(2023, 12, 15)
    );
    assert_eq!(
      shift_months(
        date(2024, 12, 31),
        2
      ),
      date(2025, 2, 28)
    );
  }

  #[test]
  fn start_of_week_honors_week_start() {
    let wednesday = date(2024, 6, 12);
    assert_eq!(
      start_of_week(
        wednesday,
        Weekday::Sun
      ),
      date(2024, 6, 9)
    );
    assert_eq!(
      start_of_week(
        wednesday,
        Weekday::Mon
      ),
      date(2024, 6, 10)
    );
    assert_eq!(
      start_of_week(
        date(2024, 6, 9),
        Weekday::Sun
      ),
      date(2024, 6, 9)
    );
  }

  #[test]
  fn parses_relative_and_named_expressions()
  {
    let now = Utc
      .with_ymd_and_hms(
        2024, 6, 9, 10, 0, 0
      )
      .single()
      .expect("valid now");
    let tz = chrono_tz::UTC;

    assert_eq!(
      parse_date_expr("+2h", now, &tz)
        .expect("relative"),
      now + Duration::hours(2)
    );
    assert_eq!(
      parse_day_expr(
        "tomorrow", now, &tz
      )
      .expect("tomorrow"),
      date(2024, 6, 10)
    );
    assert_eq!(
      parse_date_expr(
        "2024-06-09T10:00",
        now,
        &tz
      )
      .expect("local datetime"),
      now
    );
    assert!(
      parse_date_expr(
        "someday", now, &tz
      )
      .is_err()
    );
  }

  #[test]
  fn day_keys_round_trip() {
    let key = day_key(date(2024, 6, 1));
    assert_eq!(key, "2024-06-01");
    assert_eq!(
      parse_day_key(&key)
        .expect("parse key"),
      date(2024, 6, 1)
    );
    assert!(
      parse_day_key("2024-6-1x").is_err()
    );
  }
}
