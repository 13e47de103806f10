//! Cron schedule evaluation
//!
//! Standard five-field expressions (`minute hour day-of-month month
//! day-of-week`), evaluated in UTC. Each field accepts `*`, single values,
//! lists, ranges and steps (`*/15`, `10-40/5`, `5/10`). Month and weekday
//! fields also accept three-letter names (`jan`, `mon`). Day-of-week `7` is
//! Sunday, same as `0`.
//!
//! When both day fields are restricted, a day matches if *either* field
//! matches (the classic Vixie cron rule).

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a cron expression
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expr}': {reason}")]
    Invalid { expr: String, reason: String },
}

/// How far ahead [`CronSchedule::next_after`] searches before giving up.
const SEARCH_HORIZON_DAYS: i64 = 366 * 4 + 1;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Set of allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Offset added to a name's index (months are 1-based)
    name_base: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    name_base: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    name_base: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    name_base: 1,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &WEEKDAY_NAMES,
    name_base: 0,
};

/// A parsed cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a five-field cron expression
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let invalid = |reason: String| ScheduleError::Invalid {
            expr: expr.to_string(),
            reason,
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        let minutes = parse_field(fields[0], &MINUTE).map_err(invalid)?;
        let hours = parse_field(fields[1], &HOUR).map_err(invalid)?;
        let days_of_month = parse_field(fields[2], &DAY_OF_MONTH).map_err(invalid)?;
        let months = parse_field(fields[3], &MONTH).map_err(invalid)?;
        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK).map_err(invalid)?;

        // 7 is an alias for Sunday
        if days_of_week.contains(7) {
            days_of_week = FieldSet((days_of_week.0 | 1) & !(1u64 << 7));
        }

        Ok(Self {
            source: fields.join(" "),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    /// The normalized expression text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the schedule fires during the minute containing `at`.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.months.contains(at.month())
            && self.day_matches(at.date_naive())
            && self.hours.contains(at.hour())
            && self.minutes.contains(at.minute())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());

        // A `*`-prefixed field sets every bit it allows, so AND is exact there
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First fire time strictly after `after`, at minute granularity.
    ///
    /// Returns `None` for expressions that never fire within four years
    /// (for example `0 0 30 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = after + Duration::days(SEARCH_HORIZON_DAYS);

        while t <= limit {
            if !self.months.contains(t.month()) {
                t = start_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(t.date_naive()) {
                t = start_of_day(t.date_naive().succ_opt()?)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }

        None
    }

    /// The next `count` fire times after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = after;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Earliest next fire time across several schedules, with the schedule that fires.
pub fn next_fire<'a>(
    schedules: &'a [CronSchedule],
    after: DateTime<Utc>,
) -> Option<(DateTime<Utc>, &'a CronSchedule)> {
    schedules
        .iter()
        .filter_map(|s| s.next_after(after).map(|t| (t, s)))
        .min_by_key(|(t, _)| *t)
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    start_of_day(NaiveDate::from_ymd_opt(year, month, 1)?)
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<FieldSet, String> {
    let mut bits = 0u64;

    for part in field.split(',') {
        if part.is_empty() {
            return Err(format!("empty list item in {} field", spec.name));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}' in {} field", step, spec.name))?;
                if step == 0 {
                    return Err(format!("step must be positive in {} field", spec.name));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, spec)?, parse_value(hi, spec)?)
        } else {
            let value = parse_value(range, spec)?;
            // `5/10` means "from 5 to the end, every 10"
            if part.contains('/') {
                (value, spec.max)
            } else {
                (value, value)
            }
        };

        if start > end {
            return Err(format!(
                "range {}-{} is backwards in {} field",
                start, end, spec.name
            ));
        }

        let mut value = start;
        while value <= end {
            bits |= 1u64 << value;
            value += step;
        }
    }

    Ok(FieldSet(bits))
}

fn parse_value(token: &str, spec: &FieldSpec) -> Result<u32, String> {
    let lower = token.to_ascii_lowercase();
    if let Some(index) = spec.names.iter().position(|n| *n == lower) {
        return Ok(index as u32 + spec.name_base);
    }

    let value: u32 = token
        .parse()
        .map_err(|_| format!("invalid value '{}' in {} field", token, spec.name))?;
    if value < spec.min || value > spec.max {
        return Err(format!(
            "value {} out of range {}-{} in {} field",
            value, spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_default_workflow_schedule() {
        let cron = CronSchedule::parse("0 3,5,9 * * *").unwrap();

        assert_eq!(
            cron.next_after(utc(2024, 3, 19, 0, 0)),
            Some(utc(2024, 3, 19, 3, 0))
        );
        assert_eq!(
            cron.next_after(utc(2024, 3, 19, 3, 0)),
            Some(utc(2024, 3, 19, 5, 0))
        );
        assert_eq!(
            cron.next_after(utc(2024, 3, 19, 5, 30)),
            Some(utc(2024, 3, 19, 9, 0))
        );
        // After the last slot of the day, roll over to tomorrow 03:00
        assert_eq!(
            cron.next_after(utc(2024, 3, 19, 9, 0)),
            Some(utc(2024, 3, 20, 3, 0))
        );
    }

    #[test]
    fn test_matches() {
        let cron = CronSchedule::parse("0 3,5,9 * * *").unwrap();
        assert!(cron.matches(utc(2024, 3, 19, 3, 0)));
        assert!(cron.matches(utc(2024, 3, 19, 9, 0)));
        assert!(!cron.matches(utc(2024, 3, 19, 4, 0)));
        assert!(!cron.matches(utc(2024, 3, 19, 3, 1)));
    }

    #[test]
    fn test_next_after_ignores_seconds_and_is_strict() {
        let cron = CronSchedule::parse("* * * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 42).unwrap();
        assert_eq!(cron.next_after(at), Some(utc(2024, 1, 1, 10, 16)));
    }

    #[test]
    fn test_steps_and_ranges() {
        let cron = CronSchedule::parse("*/15 9-17 * * 1-5").unwrap();
        // Saturday 2024-03-23 -> Monday 2024-03-25 09:00
        assert_eq!(
            cron.next_after(utc(2024, 3, 22, 17, 45)),
            Some(utc(2024, 3, 25, 9, 0))
        );
        assert_eq!(
            cron.next_after(utc(2024, 3, 25, 9, 0)),
            Some(utc(2024, 3, 25, 9, 15))
        );

        let offset = CronSchedule::parse("5/20 * * * *").unwrap();
        assert_eq!(
            offset.upcoming(utc(2024, 1, 1, 0, 0), 3),
            vec![
                utc(2024, 1, 1, 0, 5),
                utc(2024, 1, 1, 0, 25),
                utc(2024, 1, 1, 0, 45)
            ]
        );
    }

    #[test]
    fn test_month_rollover_and_year_end() {
        let cron = CronSchedule::parse("30 12 1 * *").unwrap();
        assert_eq!(
            cron.next_after(utc(2024, 12, 15, 0, 0)),
            Some(utc(2025, 1, 1, 12, 30))
        );
    }

    #[test]
    fn test_names_and_sunday_alias() {
        let cron = CronSchedule::parse("0 0 * jan sun").unwrap();
        // 2024-01-07 is the first Sunday of January 2024
        assert_eq!(
            cron.next_after(utc(2024, 1, 1, 0, 0)),
            Some(utc(2024, 1, 7, 0, 0))
        );

        let seven = CronSchedule::parse("0 0 * * 7").unwrap();
        let zero = CronSchedule::parse("0 0 * * 0").unwrap();
        let from = utc(2024, 5, 1, 0, 0);
        assert_eq!(seven.next_after(from), zero.next_after(from));
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // 13th of the month OR any Friday
        let cron = CronSchedule::parse("0 0 13 * 5").unwrap();
        // 2024-03-15 is a Friday, before that the 13th (Wednesday)
        assert_eq!(
            cron.next_after(utc(2024, 3, 12, 0, 0)),
            Some(utc(2024, 3, 13, 0, 0))
        );
        assert_eq!(
            cron.next_after(utc(2024, 3, 13, 0, 0)),
            Some(utc(2024, 3, 15, 0, 0))
        );
    }

    #[test]
    fn test_stepped_day_of_month_still_restricts() {
        let cron = CronSchedule::parse("0 0 */10 * *").unwrap();
        assert_eq!(
            cron.upcoming(utc(2024, 3, 1, 12, 0), 3),
            vec![
                utc(2024, 3, 11, 0, 0),
                utc(2024, 3, 21, 0, 0),
                utc(2024, 3, 31, 0, 0)
            ]
        );
    }

    #[test]
    fn test_leap_day() {
        let cron = CronSchedule::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            cron.next_after(utc(2024, 3, 1, 0, 0)),
            Some(utc(2028, 2, 29, 0, 0))
        );
    }

    #[test]
    fn test_impossible_date_never_fires() {
        let cron = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert_eq!(cron.next_after(utc(2024, 1, 1, 0, 0)), None);
        assert!(cron.upcoming(utc(2024, 1, 1, 0, 0), 3).is_empty());
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in [
            "",
            "0 3 * *",
            "0 3 * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "*/0 * * * *",
            "5-1 * * * *",
            "a * * * *",
            "1,,2 * * * *",
        ] {
            assert!(CronSchedule::parse(expr).is_err(), "{:?} should fail", expr);
        }
    }

    #[test]
    fn test_display_normalizes_whitespace() {
        let cron: CronSchedule = "0  3,5,9 *   * *".parse().unwrap();
        assert_eq!(cron.to_string(), "0 3,5,9 * * *");
    }

    #[test]
    fn test_next_fire_across_schedules() {
        let schedules = vec![
            CronSchedule::parse("0 9 * * *").unwrap(),
            CronSchedule::parse("30 4 * * *").unwrap(),
        ];
        let (at, which) = next_fire(&schedules, utc(2024, 3, 19, 0, 0)).unwrap();
        assert_eq!(at, utc(2024, 3, 19, 4, 30));
        assert_eq!(which.as_str(), "30 4 * * *");
        assert!(next_fire(&[], utc(2024, 3, 19, 0, 0)).is_none());
    }
}
