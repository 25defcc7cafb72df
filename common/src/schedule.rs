// Cron parsing and next fire time calculation
//
// Watch lists use standard 5-field cron (minute hour day-of-month month
// day-of-week, Sunday = 0 or 7). The `cron` crate expects a seconds field and
// numbers weekdays from 1, so 5-field expressions are rewritten before
// parsing. 6 and 7-field expressions are passed through unchanged.
//
// When both day-of-month and day-of-week are restricted a day matches if
// either field matches. The `cron` crate requires both, so such expressions
// are split into one schedule per day field.

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Parsed cron expression bound to the timezone it is evaluated in
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: String,
    schedules: Vec<CronSchedule>,
    timezone: Tz,
}

impl CronTrigger {
    pub fn parse(expression: &str, timezone: Tz) -> Result<Self, ScheduleError> {
        let normalized = normalize_cron(expression)?;
        let schedules = split_day_fields(&normalized)
            .iter()
            .map(|variant| parse_cron_expression(variant))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| match e {
                ScheduleError::InvalidCronExpression { reason, .. } => {
                    ScheduleError::InvalidCronExpression {
                        expression: expression.to_string(),
                        reason,
                    }
                }
                other => other,
            })?;

        Ok(Self {
            expression: expression.to_string(),
            schedules,
            timezone,
        })
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let reference = after.with_timezone(&self.timezone);
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&reference).next())
            .min()
            .map(|next| next.with_timezone(&Utc))
            .ok_or_else(|| ScheduleError::NoNextExecution(self.expression.clone()))
    }
}

/// Parse and validate an expression in the `cron` crate's own syntax
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    Tz::from_str(name).map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Rewrite a watch-list cron expression into the `cron` crate's syntax
pub fn normalize_cron(expression: &str) -> Result<String, ScheduleError> {
    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        return Ok(trimmed.to_string());
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.len() {
        5 => {
            let weekdays = normalize_day_of_week(fields[4]).map_err(|reason| {
                ScheduleError::InvalidCronExpression {
                    expression: expression.to_string(),
                    reason,
                }
            })?;
            Ok(format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], weekdays
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason: format!("expected 5, 6 or 7 fields, found {}", n),
        }),
    }
}

/// Split a normalized expression whose day-of-month and day-of-week are both
/// restricted into one variant per day field
fn split_day_fields(normalized: &str) -> Vec<String> {
    let fields: Vec<&str> = normalized.split_whitespace().collect();
    if fields.len() < 6 || is_unrestricted(fields[3]) || is_unrestricted(fields[5]) {
        return vec![normalized.to_string()];
    }

    let mut by_month_day = fields.clone();
    by_month_day[5] = "*";
    let mut by_weekday = fields;
    by_weekday[3] = "*";
    vec![by_month_day.join(" "), by_weekday.join(" ")]
}

fn is_unrestricted(field: &str) -> bool {
    field == "*" || field == "?"
}

/// Expand a standard day-of-week field into an explicit list of weekday names
fn normalize_day_of_week(field: &str) -> Result<String, String> {
    let mut days = [false; 7];

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}' in day-of-week", step))?;
                if step == 0 {
                    return Err("day-of-week step must be greater than 0".to_string());
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" || range == "?" {
            (0, 6)
        } else if let Some((from, to)) = range.split_once('-') {
            (parse_weekday(from)?, parse_weekday(to)?)
        } else {
            let day = parse_weekday(range)?;
            // "n/step" runs from n to the end of the week
            (day, if step.is_some() { 7 } else { day })
        };

        if start > end {
            return Err(format!("day-of-week range '{}' is reversed", range));
        }

        let step = step.unwrap_or(1);
        let mut day = start;
        while day <= end {
            days[day % 7] = true;
            day += step;
        }
    }

    if days.iter().all(|on| *on) {
        return Ok("*".to_string());
    }

    Ok(days
        .iter()
        .enumerate()
        .filter(|(_, on)| **on)
        .map(|(index, _)| WEEKDAY_NAMES[index])
        .collect::<Vec<_>>()
        .join(","))
}

fn parse_weekday(token: &str) -> Result<usize, String> {
    if let Ok(day) = token.parse::<usize>() {
        if day <= 7 {
            return Ok(day);
        }
        return Err(format!("day-of-week {} is out of range 0-7", day));
    }

    let upper = token.to_ascii_uppercase();
    WEEKDAY_NAMES
        .iter()
        .position(|name| *name == upper)
        .ok_or_else(|| format!("unknown day-of-week '{}'", token))
}
