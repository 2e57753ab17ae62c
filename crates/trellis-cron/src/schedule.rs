//! Schedule expressions.
//!
//! Three forms are accepted:
//!
//! - `@every <duration>`: a fixed interval such as `@every 5s`, `@every 250ms`
//!   or `@every 1h30m`
//! - cron expressions with 5, 6 or 7 fields (a 5-field expression fires at
//!   second zero)
//! - the `@yearly`, `@monthly`, `@weekly`, `@daily` and `@hourly` aliases

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Computes fire times for a task.
pub trait Schedule: Send + Sync + fmt::Debug {
    /// The first fire time strictly after `after`, or `None` if the schedule
    /// never fires again.
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// A shared schedule.
pub type BoxedSchedule = Arc<dyn Schedule>;

/// Fires at a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Every(Duration);

impl Every {
    pub fn new(interval: Duration) -> Self {
        Self(interval)
    }

    pub fn interval(&self) -> Duration {
        self.0
    }
}

impl Schedule for Every {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = chrono::Duration::from_std(self.0).ok()?;
        after.checked_add_signed(step)
    }
}

/// A cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr(cron::Schedule);

impl Schedule for CronExpr {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.0.after(&after).next()
    }
}

impl FromStr for CronExpr {
    type Err = String;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let expr = expr.trim();
        let normalized = if !expr.starts_with('@') && expr.split_whitespace().count() == 5 {
            format!("0 {expr}")
        } else {
            expr.to_string()
        };
        cron::Schedule::from_str(&normalized)
            .map(Self)
            .map_err(|e| e.to_string())
    }
}

/// Parses a schedule expression.
pub fn parse(expr: &str) -> Result<BoxedSchedule, String> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err("empty expression".to_string());
    }
    if let Some(rest) = expr.strip_prefix("@every") {
        let interval = parse_duration(rest)?;
        if interval.is_zero() {
            return Err("interval must be positive".to_string());
        }
        return Ok(Arc::new(Every::new(interval)));
    }
    Ok(Arc::new(expr.parse::<CronExpr>()?))
}

/// Parses a duration such as `500ms`, `5s`, `2m`, `1h` or `1h30m`.
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("missing duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in '{s}'"))?;
        if digits == 0 {
            return Err(format!("invalid duration '{s}'"));
        }
        let value: u64 = rest[..digits].parse().map_err(|e| format!("{e}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let too_large = || format!("duration '{s}' is too large");
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(too_large)?),
            "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(too_large)?),
            unit => return Err(format!("unknown unit '{unit}' in '{s}'")),
        };
        total = total.checked_add(part).ok_or_else(too_large)?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration(" 250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("7"), Ok(Duration::from_secs(7)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("ms").is_err());
    }

    #[test]
    fn oversized_durations_are_errors() {
        assert!(parse_duration("9999999999999999h").is_err());
        assert!(parse_duration("99999999999999999999m").is_err());
        assert!(parse_duration("18446744073709551615s1s").is_err());
        assert!(parse("@every 9999999999999999h").is_err());
    }

    #[test]
    fn every_adds_interval() {
        let schedule = parse("@every 5s").unwrap();
        assert_eq!(schedule.next_after(at(10, 0, 0)), Some(at(10, 0, 5)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(parse("@every 0s").is_err());
    }

    #[test]
    fn six_field_expression() {
        let schedule = parse("*/10 * * * * *").unwrap();
        assert_eq!(schedule.next_after(at(10, 0, 3)), Some(at(10, 0, 10)));
    }

    #[test]
    fn five_field_expression_fires_on_second_zero() {
        let schedule = parse("*/15 * * * *").unwrap();
        assert_eq!(schedule.next_after(at(10, 1, 0)), Some(at(10, 15, 0)));
    }

    #[test]
    fn aliases() {
        let schedule = parse("@hourly").unwrap();
        assert_eq!(schedule.next_after(at(10, 20, 0)), Some(at(11, 0, 0)));
    }

    #[test]
    fn malformed_expression() {
        assert!(parse("not a schedule").is_err());
        assert!(parse("   ").is_err());
    }
}
