//! Recurrence expressions and most-recent-fire evaluation.
//!
//! An expression has six fields: second, minute, hour, day-of-month, month,
//! day-of-week. Five-field expressions are accepted and get second `0`.
//! Each field is `*`, a literal, a comma list, a range `a-b`, or a step
//! (`a/n`, `a-b/n`, `*/n`). Month and weekday names are accepted.
//!
//! Day-of-month and day-of-week restrictions are combined with AND, which is
//! what the `cron` crate does as well.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

/// Default step used when no precise answer is available (1 minute).
pub const DEFAULT_EVALUATION_UNIT: std::time::Duration = std::time::Duration::from_secs(60);

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];
const CRON_WEEKDAYS: &[&str] = &["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Error returned when an expression cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecurrenceError {
    #[error("expected 5 or 6 fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}': {reason}")]
    Field {
        field: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    const ORDER: [FieldKind; 6] = [
        Self::Second,
        Self::Minute,
        Self::Hour,
        Self::DayOfMonth,
        Self::Month,
        Self::DayOfWeek,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::DayOfMonth => "day-of-month",
            Self::Month => "month",
            Self::DayOfWeek => "day-of-week",
        }
    }

    /// Inclusive bounds accepted for literals.
    fn bounds(self) -> (u32, u32) {
        match self {
            Self::Second | Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::DayOfMonth => (1, 31),
            Self::Month => (1, 12),
            Self::DayOfWeek => (0, 7),
        }
    }

    /// Upper end of `*` and open-ended steps. Weekday 7 is only an alias.
    fn open_max(self) -> u32 {
        match self {
            Self::DayOfWeek => 6,
            other => other.bounds().1,
        }
    }

    fn lookup_name(self, token: &str) -> Option<u32> {
        let upper = token.to_ascii_uppercase();
        match self {
            Self::Month => MONTH_NAMES
                .iter()
                .position(|n| *n == upper)
                .map(|i| i as u32 + 1),
            Self::DayOfWeek => WEEKDAY_NAMES
                .iter()
                .position(|n| *n == upper)
                .map(|i| i as u32),
            _ => None,
        }
    }

    fn fold(self, value: u32) -> u32 {
        match (self, value) {
            (Self::DayOfWeek, 7) => 0,
            (_, v) => v,
        }
    }

    fn full_mask(self) -> u64 {
        let (min, _) = self.bounds();
        (min..=self.open_max()).fold(0u64, |mask, v| mask | (1 << v))
    }
}

/// The set of values one field matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    restricted: bool,
}

impl FieldSet {
    fn parse(kind: FieldKind, text: &str) -> Result<Self, RecurrenceError> {
        let err = |reason: &str| RecurrenceError::Field {
            field: kind.name(),
            value: text.to_string(),
            reason: reason.to_string(),
        };
        let (min, max) = kind.bounds();

        let value = |token: &str| -> Result<u32, RecurrenceError> {
            let v = match token.parse::<u32>() {
                Ok(v) => v,
                Err(_) => kind
                    .lookup_name(token)
                    .ok_or_else(|| err(&format!("'{token}' is not a number or name")))?,
            };
            if v < min || v > max {
                return Err(err(&format!("{v} is outside {min}-{max}")));
            }
            Ok(v)
        };

        let mut bits = 0u64;
        for part in text.split(',') {
            if part.is_empty() {
                return Err(err("empty list element"));
            }

            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step.parse().map_err(|_| err("step is not a number"))?;
                    if step == 0 {
                        return Err(err("step must be positive"));
                    }
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if range == "*" || range == "?" {
                (min, kind.open_max())
            } else if let Some((a, b)) = range.split_once('-') {
                (value(a)?, value(b)?)
            } else {
                let a = value(range)?;
                if step.is_some() { (a, kind.open_max().max(a)) } else { (a, a) }
            };

            if start > end {
                return Err(err(&format!("range {start}-{end} is reversed")));
            }

            for v in (start..=end).step_by(step.unwrap_or(1) as usize) {
                bits |= 1 << kind.fold(v);
            }
        }

        Ok(Self {
            bits,
            restricted: bits != kind.full_mask(),
        })
    }

    fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }

    fn only(&self, value: u32) -> bool {
        self.bits == 1 << value
    }

    fn values(&self) -> impl Iterator<Item = u32> + '_ {
        (0..64u32).filter(|v| self.contains(*v))
    }
}

/// A parsed recurrence expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceExpression {
    source: String,
    fields: [FieldSet; 6],
}

impl RecurrenceExpression {
    pub fn parse(expression: &str) -> Result<Self, RecurrenceError> {
        let mut parts: Vec<&str> = expression.split_whitespace().collect();
        match parts.len() {
            6 => {}
            5 => parts.insert(0, "0"),
            n => return Err(RecurrenceError::FieldCount(n)),
        }

        let mut fields = [FieldSet {
            bits: 0,
            restricted: false,
        }; 6];
        for (slot, (kind, text)) in fields.iter_mut().zip(FieldKind::ORDER.iter().zip(parts)) {
            *slot = FieldSet::parse(*kind, text)?;
        }

        Ok(Self {
            source: expression.trim().to_string(),
            fields,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn field(&self, kind: FieldKind) -> &FieldSet {
        &self.fields[kind as usize]
    }

    /// Whether the expression fires at the given local wall-clock second.
    pub fn matches<T: Datelike + Timelike>(&self, t: &T) -> bool {
        self.field(FieldKind::Second).contains(t.second())
            && self.field(FieldKind::Minute).contains(t.minute())
            && self.field(FieldKind::Hour).contains(t.hour())
            && self.field(FieldKind::DayOfMonth).contains(t.day())
            && self.field(FieldKind::Month).contains(t.month())
            && self
                .field(FieldKind::DayOfWeek)
                .contains(t.weekday().num_days_from_sunday())
    }

    /// `* * * * * *`: fires every second.
    pub fn is_every_second(&self) -> bool {
        self.fields.iter().all(|f| !f.restricted)
    }

    /// `0 * * * * *`: fires at second zero of every minute.
    pub fn is_every_minute(&self) -> bool {
        self.field(FieldKind::Second).only(0) && self.fields[1..].iter().all(|f| !f.restricted)
    }

    /// Canonical rendering understood by the `cron` crate.
    ///
    /// Restricted fields are spelled out as explicit lists and weekdays as
    /// names, so the numbering difference between cron dialects never
    /// matters.
    pub fn to_cron_syntax(&self) -> String {
        FieldKind::ORDER
            .iter()
            .map(|kind| {
                let set = self.field(*kind);
                if !set.restricted {
                    return "*".to_string();
                }
                let values: Vec<String> = match kind {
                    FieldKind::DayOfWeek => set
                        .values()
                        .map(|v| CRON_WEEKDAYS[v as usize].to_string())
                        .collect(),
                    _ => set.values().map(|v| v.to_string()).collect(),
                };
                values.join(",")
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl FromStr for RecurrenceExpression {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RecurrenceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Precise backward search for the latest fire instant.
///
/// Implementations return the latest instant at or before `now` at which the
/// expression fires, or `None` if they cannot answer.
pub trait RecurrenceMath: Send + Sync {
    fn previous_fire(
        &self,
        expression: &RecurrenceExpression,
        now: DateTime<Tz>,
    ) -> Option<DateTime<Tz>>;
}

/// [`RecurrenceMath`] backed by the `cron` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CronMath;

impl RecurrenceMath for CronMath {
    fn previous_fire(
        &self,
        expression: &RecurrenceExpression,
        now: DateTime<Tz>,
    ) -> Option<DateTime<Tz>> {
        let at = now.with_nanosecond(0)?;
        if expression.matches(&at) {
            return Some(at);
        }

        let syntax = expression.to_cron_syntax();
        let schedule = match cron::Schedule::from_str(&syntax) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(expression = %expression, syntax = %syntax, error = %e, "cron rejected expression");
                return None;
            }
        };

        schedule.after(&at).next_back()
    }
}

/// Answers "when did this expression most recently fire?".
#[derive(Clone)]
pub struct RecurrenceEvaluator {
    math: Option<Arc<dyn RecurrenceMath>>,
    timezone: Tz,
    evaluation_unit: chrono::Duration,
}

impl RecurrenceEvaluator {
    /// Evaluator with the `cron`-backed helper, in UTC.
    pub fn new() -> Self {
        Self::with_math(Arc::new(CronMath))
    }

    /// Evaluator with a custom helper.
    pub fn with_math(math: Arc<dyn RecurrenceMath>) -> Self {
        Self {
            math: Some(math),
            timezone: chrono_tz::UTC,
            evaluation_unit: chrono::Duration::seconds(DEFAULT_EVALUATION_UNIT.as_secs() as i64),
        }
    }

    /// Evaluator without a helper: only the coarse fallback is used.
    pub fn coarse() -> Self {
        Self {
            math: None,
            ..Self::new()
        }
    }

    /// Evaluate wall-clock fields in the given timezone.
    pub fn timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn evaluation_unit(mut self, unit: std::time::Duration) -> Self {
        self.evaluation_unit =
            chrono::Duration::from_std(unit).unwrap_or(self.evaluation_unit);
        self
    }

    /// The latest instant at or before `now` at which `expression` fired.
    ///
    /// Returns `None` only when the expression does not parse.
    pub fn most_recent_fire(&self, expression: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match RecurrenceExpression::parse(expression) {
            Ok(parsed) => Some(self.most_recent_fire_parsed(&parsed, now)),
            Err(e) => {
                debug!(expression = %expression, error = %e, "unparseable recurrence expression");
                None
            }
        }
    }

    pub fn most_recent_fire_parsed(
        &self,
        expression: &RecurrenceExpression,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let local = now.with_timezone(&self.timezone);

        if let Some(math) = &self.math {
            match math.previous_fire(expression, local) {
                Some(fired) if fired <= local && expression.matches(&fired) => {
                    return fired.with_timezone(&Utc);
                }
                Some(fired) => {
                    warn!(
                        expression = %expression,
                        answer = %fired,
                        "discarding recurrence answer that is in the future or does not match"
                    );
                }
                None => {
                    debug!(expression = %expression, "no precise answer, using coarse fallback");
                }
            }
        }

        self.coarse_previous(expression, now)
    }

    fn coarse_previous(&self, expression: &RecurrenceExpression, now: DateTime<Utc>) -> DateTime<Utc> {
        let second = now.with_nanosecond(0).unwrap_or(now);
        if expression.is_every_second() {
            second
        } else if expression.is_every_minute() {
            second.with_second(0).unwrap_or(second)
        } else {
            now - self.evaluation_unit
        }
    }
}

impl Default for RecurrenceEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecurrenceEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecurrenceEvaluator")
            .field("precise", &self.math.is_some())
            .field("timezone", &self.timezone)
            .field("evaluation_unit", &self.evaluation_unit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_six_and_five_fields() {
        let six = RecurrenceExpression::parse("0 30 9 * * *").unwrap();
        let five = RecurrenceExpression::parse("30 9 * * *").unwrap();
        assert_eq!(six.to_cron_syntax(), five.to_cron_syntax());
        assert_eq!(five.source(), "30 9 * * *");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            RecurrenceExpression::parse("* * *"),
            Err(RecurrenceError::FieldCount(3))
        );
        assert!(RecurrenceExpression::parse("").is_err());
        assert!(RecurrenceExpression::parse("60 * * * * *").is_err());
        assert!(RecurrenceExpression::parse("0 */0 * * * *").is_err());
        assert!(RecurrenceExpression::parse("0 30-10 * * * *").is_err());
        assert!(RecurrenceExpression::parse("0 0 0 0 * *").is_err());
        assert!(RecurrenceExpression::parse("0 0 0 * FOO *").is_err());
        assert!(RecurrenceExpression::parse("0 1,,2 * * * *").is_err());
    }

    #[test]
    fn test_field_forms() {
        let expr = RecurrenceExpression::parse("0 5/20 8-10 1,15 JAN-MAR MON-FRI").unwrap();
        assert_eq!(
            expr.to_cron_syntax(),
            "0 5,25,45 8,9,10 1,15 1,2,3 Mon,Tue,Wed,Thu,Fri"
        );

        let expr = RecurrenceExpression::parse("*/15 * * * * *").unwrap();
        assert_eq!(expr.to_cron_syntax(), "0,15,30,45 * * * * *");
    }

    #[test]
    fn test_weekday_seven_is_sunday() {
        let expr = RecurrenceExpression::parse("0 0 9 * * 7").unwrap();
        assert_eq!(expr.to_cron_syntax(), "0 0 9 * * Sun");

        let all = RecurrenceExpression::parse("0 0 9 * * 0-7").unwrap();
        assert_eq!(all.to_cron_syntax(), "0 0 9 * * *");
    }

    #[test]
    fn test_matches() {
        let expr = RecurrenceExpression::parse("0 30 9 * * MON").unwrap();
        // 2026-03-02 is a Monday.
        assert!(expr.matches(&at(2026, 3, 2, 9, 30, 0)));
        assert!(!expr.matches(&at(2026, 3, 3, 9, 30, 0)));
        assert!(!expr.matches(&at(2026, 3, 2, 9, 30, 1)));
    }

    #[test]
    fn test_special_patterns() {
        assert!(RecurrenceExpression::parse("* * * * * *").unwrap().is_every_second());
        assert!(RecurrenceExpression::parse("0 * * * * *").unwrap().is_every_minute());
        assert!(RecurrenceExpression::parse("* * * * *").unwrap().is_every_minute());
        assert!(!RecurrenceExpression::parse("0 0 * * * *").unwrap().is_every_minute());
    }

    #[test]
    fn test_most_recent_hourly_fires() {
        let evaluator = RecurrenceEvaluator::new();
        let now = at(2026, 3, 4, 10, 45, 0);
        assert_eq!(
            evaluator.most_recent_fire("0 0 * * * *", now),
            Some(at(2026, 3, 4, 10, 0, 0))
        );
        assert_eq!(
            evaluator.most_recent_fire("0 30 * * * *", now),
            Some(at(2026, 3, 4, 10, 30, 0))
        );
    }

    #[test]
    fn test_fire_exactly_now_counts() {
        let evaluator = RecurrenceEvaluator::new();
        let now = at(2026, 3, 4, 10, 30, 0) + chrono::Duration::milliseconds(250);
        assert_eq!(
            evaluator.most_recent_fire("0 30 * * * *", now),
            Some(at(2026, 3, 4, 10, 30, 0))
        );
    }

    #[test]
    fn test_month_length_rollover() {
        let evaluator = RecurrenceEvaluator::new();
        let now = at(2026, 3, 15, 12, 0, 0);
        assert_eq!(
            evaluator.most_recent_fire("0 0 0 31 * *", now),
            Some(at(2026, 1, 31, 0, 0, 0))
        );
    }

    #[test]
    fn test_weekday_search() {
        let evaluator = RecurrenceEvaluator::new();
        // Wednesday 2026-03-04; the previous Monday 09:00 is 2026-03-02.
        let now = at(2026, 3, 4, 8, 0, 0);
        assert_eq!(
            evaluator.most_recent_fire("0 0 9 * * MON", now),
            Some(at(2026, 3, 2, 9, 0, 0))
        );
    }

    #[test]
    fn test_timezone_evaluation() {
        let evaluator = RecurrenceEvaluator::new().timezone(chrono_tz::Asia::Tokyo);
        // 01:00 UTC is 10:00 JST; 09:00 JST today is 00:00 UTC.
        let now = at(2026, 3, 4, 1, 0, 0);
        assert_eq!(
            evaluator.most_recent_fire("0 0 9 * * *", now),
            Some(at(2026, 3, 4, 0, 0, 0))
        );
    }

    #[test]
    fn test_unparseable_is_none() {
        let evaluator = RecurrenceEvaluator::new();
        assert_eq!(evaluator.most_recent_fire("every day", Utc::now()), None);
    }

    #[test]
    fn test_coarse_fallback() {
        let evaluator = RecurrenceEvaluator::coarse();
        let now = at(2026, 3, 4, 10, 45, 30) + chrono::Duration::milliseconds(400);

        assert_eq!(
            evaluator.most_recent_fire("* * * * * *", now),
            Some(at(2026, 3, 4, 10, 45, 30))
        );
        assert_eq!(
            evaluator.most_recent_fire("0 * * * * *", now),
            Some(at(2026, 3, 4, 10, 45, 0))
        );
        assert_eq!(
            evaluator.most_recent_fire("0 30 * * * *", now),
            Some(now - chrono::Duration::seconds(60))
        );
    }

    struct FutureMath;

    impl RecurrenceMath for FutureMath {
        fn previous_fire(
            &self,
            _expression: &RecurrenceExpression,
            now: DateTime<Tz>,
        ) -> Option<DateTime<Tz>> {
            Some(now + chrono::Duration::hours(1))
        }
    }

    #[test]
    fn test_future_answer_is_discarded() {
        let evaluator = RecurrenceEvaluator::with_math(Arc::new(FutureMath))
            .evaluation_unit(std::time::Duration::from_secs(10));
        let now = at(2026, 3, 4, 10, 45, 0);
        assert_eq!(
            evaluator.most_recent_fire("0 30 * * * *", now),
            Some(now - chrono::Duration::seconds(10))
        );
    }
}
