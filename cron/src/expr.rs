//! Cron expression parsing and date matching.
//!
//! Both the traditional 5-field form (`m h dom mon dow`) and the extended
//! 6-field form with a leading seconds field are accepted. Field syntax:
//! `*`, `*/N`, `a-b`, `a-b/N`, lists `a,b,c`, single values. Day-of-week 0
//! and 7 both mean Sunday.

use chrono::DateTime;
use chrono::Datelike;
use chrono::Duration;
use chrono::TimeZone;
use chrono::Timelike;
use chrono::Utc;

use crate::CronError;
use crate::Result;

/// Upper bound on the fast-forward search for the next firing; an
/// expression that cannot fire within this many jumps (a Feb 30, say)
/// yields `None`.
const MAX_SEARCH_STEPS: usize = 200_000;

/// One field as a set of permitted values, bitmask-backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    mask: u64,
    /// Whether the field was written `*` (relevant for the dom/dow rule).
    wildcard: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        self.mask & (1 << value) != 0
    }
}

fn parse_field(spec: &str, min: u32, max: u32, dow: bool) -> Result<FieldSet> {
    if spec.is_empty() {
        return Err(CronError::field(spec, "empty field"));
    }
    let mut mask: u64 = 0;
    let mut wildcard = false;
    for part in spec.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| CronError::field(part, "step is not a number"))?;
                if step == 0 {
                    return Err(CronError::field(part, "step must be positive"));
                }
                (range, step)
            }
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            if part == "*" {
                wildcard = true;
            }
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo = parse_value(a, dow).map_err(|reason| CronError::field(part, reason))?;
            let hi = parse_value(b, dow).map_err(|reason| CronError::field(part, reason))?;
            (lo, hi)
        } else {
            let v = parse_value(range, dow).map_err(|reason| CronError::field(part, reason))?;
            (v, v)
        };
        if lo < min || hi > max || lo > hi {
            return Err(CronError::field(
                part,
                format!("out of range {min}-{max}"),
            ));
        }
        let mut v = lo;
        while v <= hi {
            mask |= 1 << v;
            v += step;
        }
    }
    Ok(FieldSet { mask, wildcard })
}

fn parse_value(s: &str, dow: bool) -> std::result::Result<u32, String> {
    let v: u32 = s.parse().map_err(|_| "not a number".to_string())?;
    // dow 7 is Sunday, same as 0.
    if dow && v == 7 { Ok(0) } else { Ok(v) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronExpression {
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    dom: FieldSet,
    month: FieldSet,
    dow: FieldSet,
    /// 5 or 6, as written.
    pub fields: usize,
}

impl CronExpression {
    /// Parses a 5- or 6-field expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let tokens: Vec<&str> = expr.split_whitespace().collect();
        Self::parse_tokens(&tokens)
    }

    fn parse_tokens(tokens: &[&str]) -> Result<Self> {
        let (seconds, rest) = match tokens.len() {
            5 => (
                FieldSet {
                    mask: 1,
                    wildcard: false,
                },
                tokens,
            ),
            6 => (parse_field(tokens[0], 0, 59, false)?, &tokens[1..]),
            n => return Err(CronError::WrongFieldCount(n)),
        };
        Ok(Self {
            seconds,
            minutes: parse_field(rest[0], 0, 59, false)?,
            hours: parse_field(rest[1], 0, 23, false)?,
            dom: parse_field(rest[2], 1, 31, false)?,
            month: parse_field(rest[3], 1, 12, false)?,
            dow: parse_field(rest[4], 0, 6, true)?,
            fields: tokens.len(),
        })
    }

    /// The day rule is classic cron: when both day-of-month and day-of-week
    /// are restricted, a date matches if *either* does.
    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom_ok = self.dom.contains(t.day());
        let dow_ok = self.dow.contains(t.weekday().num_days_from_sunday());
        match (self.dom.wildcard, self.dow.wildcard) {
            (false, false) => dom_ok || dow_ok,
            _ => dom_ok && dow_ok,
        }
    }

    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        self.seconds.contains(t.second())
            && self.minutes.contains(t.minute())
            && self.hours.contains(t.hour())
            && self.month.contains(t.month())
            && self.day_matches(&t)
    }

    /// The first firing strictly after `from`, or `None` when the
    /// expression can never fire.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = from.with_nanosecond(0)? + Duration::seconds(1);
        for _ in 0..MAX_SEARCH_STEPS {
            if !self.month.contains(t.month()) {
                t = start_of_next_month(&t)?;
                continue;
            }
            if !self.day_matches(&t) {
                let next_day = t.date_naive() + Duration::days(1);
                t = Utc.from_utc_datetime(&next_day.and_hms_opt(0, 0, 0)?);
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.with_minute(0)?.with_second(0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t = t.with_second(0)? + Duration::minutes(1);
                continue;
            }
            if !self.seconds.contains(t.second()) {
                t += Duration::seconds(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    /// The next `n` firings after `from`.
    pub fn next_occurrences(&self, from: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        let mut out = Vec::with_capacity(n);
        let mut cursor = from;
        for _ in 0..n {
            match self.next_after(cursor) {
                Some(t) => {
                    cursor = t;
                    out.push(t);
                }
                None => break,
            }
        }
        out
    }
}

fn start_of_next_month(t: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

/// Splits a crontab line into its schedule and command. Lines with six or
/// more leading schedule-looking tokens prefer the 6-field reading; when
/// that fails to parse, the 5-field reading wins and the sixth token starts
/// the command.
pub fn parse_line(line: &str) -> Result<(CronExpression, String)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 6 {
        return Err(CronError::MissingCommand(line.to_string()));
    }
    if tokens.len() >= 7 {
        if let Ok(expr) = CronExpression::parse_tokens(&tokens[..6]) {
            return Ok((expr, tokens[6..].join(" ")));
        }
    }
    let expr = CronExpression::parse_tokens(&tokens[..5])?;
    Ok((expr, tokens[5..].join(" ")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn at(
        y: i32,
        mo: u32,
        d: u32,
        h: u32,
        mi: u32,
        s: u32,
    ) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn five_field_matches_only_at_second_zero() {
        let expr = CronExpression::parse("*/5 * * * *").expect("parse");
        assert!(expr.matches(at(2026, 3, 1, 10, 25, 0)));
        assert!(!expr.matches(at(2026, 3, 1, 10, 25, 30)));
        assert!(!expr.matches(at(2026, 3, 1, 10, 26, 0)));
    }

    #[test]
    fn six_field_every_second() {
        let expr = CronExpression::parse("* * * * * *").expect("parse");
        assert_eq!(expr.fields, 6);
        assert!(expr.matches(at(2026, 1, 1, 0, 0, 17)));
    }

    #[test]
    fn ranges_lists_and_steps() {
        let expr = CronExpression::parse("0 9-17/2 * * 1-5").expect("parse");
        assert!(expr.matches(at(2026, 3, 2, 9, 0, 0))); // Monday
        assert!(expr.matches(at(2026, 3, 2, 11, 0, 0)));
        assert!(!expr.matches(at(2026, 3, 2, 10, 0, 0)));
        assert!(!expr.matches(at(2026, 3, 1, 9, 0, 0))); // Sunday
    }

    #[test]
    fn dow_seven_is_sunday() {
        let expr = CronExpression::parse("0 0 * * 7").expect("parse");
        assert!(expr.matches(at(2026, 3, 1, 0, 0, 0))); // a Sunday
    }

    #[test]
    fn restricted_dom_and_dow_match_either() {
        // The 13th of any month, or any Friday.
        let expr = CronExpression::parse("0 0 13 * 5").expect("parse");
        assert!(expr.matches(at(2026, 3, 13, 0, 0, 0))); // Friday the 13th
        assert!(expr.matches(at(2026, 3, 6, 0, 0, 0))); // a plain Friday
        assert!(expr.matches(at(2026, 4, 13, 0, 0, 0))); // a Monday the 13th
        assert!(!expr.matches(at(2026, 3, 7, 0, 0, 0))); // Saturday the 7th
    }

    #[test]
    fn next_occurrences_walk_forward() {
        let expr = CronExpression::parse("30 2 * * *").expect("parse");
        let from = at(2026, 5, 10, 12, 0, 0);
        let next = expr.next_occurrences(from, 3);
        assert_eq!(
            next,
            vec![
                at(2026, 5, 11, 2, 30, 0),
                at(2026, 5, 12, 2, 30, 0),
                at(2026, 5, 13, 2, 30, 0),
            ]
        );
    }

    #[test]
    fn next_after_crosses_month_boundaries() {
        let expr = CronExpression::parse("0 0 1 * *").expect("parse");
        let next = expr.next_after(at(2026, 1, 31, 23, 59, 59)).expect("next");
        assert_eq!(next, at(2026, 2, 1, 0, 0, 0));
    }

    #[test]
    fn impossible_dates_yield_none() {
        let expr = CronExpression::parse("0 0 30 2 *").expect("parse");
        assert_eq!(expr.next_after(at(2026, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn bad_fields_are_rejected() {
        assert!(CronExpression::parse("60 * * * *").is_err());
        assert!(CronExpression::parse("* * 0 * *").is_err());
        assert!(CronExpression::parse("* * * * * * *").is_err());
        assert!(CronExpression::parse("*/0 * * * *").is_err());
        assert!(CronExpression::parse("5-1 * * * *").is_err());
    }

    #[test]
    fn line_prefers_six_field_reading_when_it_parses() {
        // "0 0 12 * * 1" parses as 6-field, so the command starts at "echo".
        let (expr, command) = parse_line("0 0 12 * * 1 echo weekly").expect("parse");
        assert_eq!(expr.fields, 6);
        assert_eq!(command, "echo weekly");
    }

    #[test]
    fn line_falls_back_to_five_fields() {
        let (expr, command) = parse_line("*/5 * * * * echo tick").expect("parse");
        assert_eq!(expr.fields, 5);
        assert_eq!(command, "echo tick");

        // Seven tokens whose sixth is not a field also fall back.
        let (expr, command) = parse_line("*/5 * * * * echo tick tock").expect("parse");
        assert_eq!(expr.fields, 5);
        assert_eq!(command, "echo tick tock");
    }

    #[test]
    fn line_without_command_is_rejected() {
        assert_eq!(
            parse_line("* * * * *"),
            Err(CronError::MissingCommand("* * * * *".to_string()))
        );
    }
}
