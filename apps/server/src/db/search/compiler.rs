//! Criterion compiler: (field, operator, raw value) -> secured, typed predicate.
//!
//! Datetime values are interpreted in the acting user's timezone at the
//! precision they were typed with, so `2024-01-01 00:00` means the minute
//! starting at local midnight and `2024-01-01` means the whole local day.
//! Comparison operators then work on that span:
//! - `eq`: inside the span
//! - `nq`: outside the span (or blank)
//! - `gt`: at or after the span's end
//! - `lt`: before the span's start

use super::escape::split_list_values;
use super::operators::Operator;
use super::predicate::{CompareOp, LikeKind, Predicate, ValueRef};
use crate::error::CompileError;
use crate::fields::Field;
use crate::models::{Criterion, DataType, ScalarValue, User};
use chrono::{
    DateTime, Datelike, Days, LocalResult, Months, NaiveDate, NaiveDateTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Everything a compilation depends on besides the criterion itself.
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    pub user: &'a User,
    pub timezone: Tz,
    pub now: DateTime<Utc>,
}

impl<'a> CompileContext<'a> {
    pub fn new(user: &'a User, timezone: Tz, now: DateTime<Utc>) -> Self {
        Self {
            user,
            timezone,
            now,
        }
    }

    /// Context using the user's own timezone.
    pub fn for_user(user: &'a User, now: DateTime<Utc>) -> Self {
        Self::new(user, user.tz(), now)
    }

    fn today(&self) -> NaiveDate {
        self.now.with_timezone(&self.timezone).date_naive()
    }
}

/// Compile a stored criterion against its resolved field.
pub fn compile_criterion(
    field: &Field,
    criterion: &Criterion,
    ctx: &CompileContext<'_>,
) -> Result<Predicate, CompileError> {
    compile(
        field,
        criterion.operator,
        &criterion.value,
        criterion.secondary_value.as_deref(),
        criterion.include_empty,
        ctx,
    )
}

pub fn compile(
    field: &Field,
    operator: Operator,
    raw: &str,
    secondary: Option<&str>,
    include_empty: bool,
    ctx: &CompileContext<'_>,
) -> Result<Predicate, CompileError> {
    if !field.is_visible_to(ctx.user) {
        tracing::warn!(
            user_id = ctx.user.id,
            uid = %field.uid,
            "Rejected criterion on field not visible to user"
        );
        return Err(CompileError::ForbiddenField {
            uid: field.uid.clone(),
        });
    }
    if !operator.legal_for(field.data_type) {
        return Err(CompileError::InvalidOperator {
            uid: field.uid.clone(),
            operator: operator.code().to_string(),
            data_type: field.data_type,
        });
    }

    let c = Compilation {
        field,
        operator,
        target: field.value_ref(),
        ctx,
    };

    let core = match operator {
        Operator::IsBlank => Predicate::IsBlank(c.target.clone()),
        Operator::IsNotBlank => Predicate::not(Predicate::IsBlank(c.target.clone())),
        Operator::Contains => c.like(LikeKind::Contains, raw)?,
        Operator::StartsWith => c.like(LikeKind::StartsWith, raw)?,
        Operator::EndsWith => c.like(LikeKind::EndsWith, raw)?,
        Operator::NotContains => c.or_blank(Predicate::not(c.like(LikeKind::Contains, raw)?)),
        Operator::InList => c.in_list(raw)?,
        Operator::NotInList => c.or_blank(Predicate::not(c.in_list(raw)?)),
        Operator::Between => c.between(raw, secondary)?,
        Operator::Equals | Operator::NotEquals | Operator::GreaterThan | Operator::LessThan => {
            c.comparison(raw)?
        }
        Operator::BeforeDaysAgo
        | Operator::AfterDaysAgo
        | Operator::BeforeDaysFromNow
        | Operator::AfterDaysFromNow
        | Operator::PreviousMonths
        | Operator::CurrentMonth => c.relative(raw)?,
    };

    if include_empty && !matches!(operator, Operator::IsBlank | Operator::IsNotBlank) {
        Ok(c.or_blank(core))
    } else {
        Ok(core)
    }
}

struct Compilation<'a> {
    field: &'a Field,
    operator: Operator,
    target: ValueRef,
    ctx: &'a CompileContext<'a>,
}

/// A local time span converted to UTC bounds: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl<'a> Compilation<'a> {
    fn invalid(&self, value: &str, reason: impl Into<String>) -> CompileError {
        CompileError::InvalidValue {
            uid: self.field.uid.clone(),
            operator: self.operator.code().to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn cmp(&self, op: CompareOp, value: ScalarValue) -> Predicate {
        Predicate::compare(self.target.clone(), op, value)
    }

    fn or_blank(&self, p: Predicate) -> Predicate {
        Predicate::or(vec![p, Predicate::IsBlank(self.target.clone())])
    }

    fn like(&self, kind: LikeKind, raw: &str) -> Result<Predicate, CompileError> {
        if raw.is_empty() {
            return Err(self.invalid(raw, "a value is required"));
        }
        Ok(Predicate::Like {
            target: self.target.clone(),
            kind,
            needle: raw.to_string(),
        })
    }

    fn in_list(&self, raw: &str) -> Result<Predicate, CompileError> {
        let lines = split_list_values(raw);
        if lines.is_empty() {
            return Err(self.invalid(raw, "at least one value is required"));
        }
        let values = lines
            .into_iter()
            .map(|line| self.scalar(line))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Predicate::InList {
            target: self.target.clone(),
            values,
        })
    }

    /// Parse a single non-datetime value for the field's type.
    fn scalar(&self, raw: &str) -> Result<ScalarValue, CompileError> {
        let trimmed = raw.trim();
        match self.field.data_type {
            DataType::String | DataType::Text => Ok(ScalarValue::Text(trimmed.to_string())),
            DataType::Integer => trimmed
                .replace(',', "")
                .parse::<i64>()
                .map(ScalarValue::Integer)
                .map_err(|_| self.invalid(raw, "expected a whole number")),
            DataType::Decimal => Decimal::from_str(&trimmed.replace(',', ""))
                .map(ScalarValue::Decimal)
                .map_err(|_| self.invalid(raw, "expected a number")),
            DataType::Boolean => parse_bool(trimmed)
                .map(ScalarValue::Boolean)
                .ok_or_else(|| self.invalid(raw, "expected true or false")),
            DataType::Date => parse_date(trimmed)
                .map(ScalarValue::Date)
                .ok_or_else(|| self.invalid(raw, "expected a date as YYYY-MM-DD")),
            DataType::DateTime => self
                .span(raw)
                .map(|span| ScalarValue::DateTime(span.start)),
        }
    }

    fn span(&self, raw: &str) -> Result<Span, CompileError> {
        parse_datetime_span(raw.trim(), self.ctx.timezone).ok_or_else(|| {
            self.invalid(
                raw,
                "expected a date/time as YYYY-MM-DD, YYYY-MM-DD HH:MM or YYYY-MM-DD HH:MM:SS",
            )
        })
    }

    fn comparison(&self, raw: &str) -> Result<Predicate, CompileError> {
        let op = self.operator;
        match self.field.data_type {
            DataType::DateTime => {
                let span = self.span(raw)?;
                let start = ScalarValue::DateTime(span.start);
                let end = ScalarValue::DateTime(span.end);
                Ok(match op {
                    Operator::Equals => Predicate::and(vec![
                        self.cmp(CompareOp::Ge, start),
                        self.cmp(CompareOp::Lt, end),
                    ]),
                    Operator::NotEquals => Predicate::or(vec![
                        self.cmp(CompareOp::Lt, start),
                        self.cmp(CompareOp::Ge, end),
                        Predicate::IsBlank(self.target.clone()),
                    ]),
                    Operator::GreaterThan => self.cmp(CompareOp::Ge, end),
                    _ => self.cmp(CompareOp::Lt, start),
                })
            }
            DataType::Boolean => {
                let wanted = match self.scalar(raw)? {
                    ScalarValue::Boolean(b) => b,
                    _ => return Err(self.invalid(raw, "expected true or false")),
                };
                // NULL counts as false
                let is_true = self.cmp(CompareOp::Eq, ScalarValue::Boolean(true));
                let is_false = self.or_blank(self.cmp(CompareOp::Eq, ScalarValue::Boolean(false)));
                Ok(match (op, wanted) {
                    (Operator::Equals, true) | (Operator::NotEquals, false) => is_true,
                    _ => is_false,
                })
            }
            _ => {
                let value = self.scalar(raw)?;
                Ok(match op {
                    Operator::Equals => self.cmp(CompareOp::Eq, value),
                    Operator::NotEquals => {
                        self.or_blank(Predicate::not(self.cmp(CompareOp::Eq, value)))
                    }
                    Operator::GreaterThan => self.cmp(CompareOp::Gt, value),
                    _ => self.cmp(CompareOp::Lt, value),
                })
            }
        }
    }

    fn between(&self, raw: &str, secondary: Option<&str>) -> Result<Predicate, CompileError> {
        let secondary = secondary.map(str::trim).filter(|s| !s.is_empty());
        let (low, high) = match secondary {
            Some(high) => (raw.trim(), high),
            None => {
                let lines = split_list_values(raw);
                match lines.as_slice() {
                    [low, high] => (*low, *high),
                    _ => return Err(self.invalid(raw, "between requires two values")),
                }
            }
        };

        if self.field.data_type == DataType::DateTime {
            let low = self.span(low)?;
            let high = self.span(high)?;
            return Ok(Predicate::and(vec![
                self.cmp(CompareOp::Ge, ScalarValue::DateTime(low.start)),
                self.cmp(CompareOp::Lt, ScalarValue::DateTime(high.end)),
            ]));
        }

        Ok(Predicate::and(vec![
            self.cmp(CompareOp::Ge, self.scalar(low)?),
            self.cmp(CompareOp::Le, self.scalar(high)?),
        ]))
    }

    fn relative(&self, raw: &str) -> Result<Predicate, CompileError> {
        let today = self.ctx.today();
        let first_of_month = today.with_day(1).unwrap_or(today);

        let count = || -> Result<u32, CompileError> {
            raw.trim()
                .parse::<u32>()
                .map_err(|_| self.invalid(raw, "expected a whole number"))
        };
        let overflow = || self.invalid(raw, "date out of range");

        match self.operator {
            Operator::BeforeDaysAgo | Operator::AfterDaysAgo => {
                let anchor = today
                    .checked_sub_days(Days::new(u64::from(count()?)))
                    .ok_or_else(overflow)?;
                let op = if self.operator == Operator::BeforeDaysAgo {
                    CompareOp::Lt
                } else {
                    CompareOp::Ge
                };
                Ok(self.cmp(op, self.day_start(anchor, raw)?))
            }
            Operator::BeforeDaysFromNow | Operator::AfterDaysFromNow => {
                let anchor = today
                    .checked_add_days(Days::new(u64::from(count()?)))
                    .ok_or_else(overflow)?;
                let op = if self.operator == Operator::BeforeDaysFromNow {
                    CompareOp::Lt
                } else {
                    CompareOp::Ge
                };
                Ok(self.cmp(op, self.day_start(anchor, raw)?))
            }
            Operator::PreviousMonths => {
                let start = first_of_month
                    .checked_sub_months(Months::new(count()?))
                    .ok_or_else(overflow)?;
                Ok(Predicate::and(vec![
                    self.cmp(CompareOp::Ge, self.day_start(start, raw)?),
                    self.cmp(CompareOp::Lt, self.day_start(first_of_month, raw)?),
                ]))
            }
            _ => {
                let next = first_of_month
                    .checked_add_months(Months::new(1))
                    .ok_or_else(overflow)?;
                Ok(Predicate::and(vec![
                    self.cmp(CompareOp::Ge, self.day_start(first_of_month, raw)?),
                    self.cmp(CompareOp::Lt, self.day_start(next, raw)?),
                ]))
            }
        }
    }

    /// Start of a local day as a value comparable with this field.
    fn day_start(&self, date: NaiveDate, raw: &str) -> Result<ScalarValue, CompileError> {
        match self.field.data_type {
            DataType::DateTime => local_to_utc(date.and_time(chrono::NaiveTime::MIN), self.ctx.timezone)
                .map(ScalarValue::DateTime)
                .ok_or_else(|| self.invalid(raw, "date out of range")),
            _ => Ok(ScalarValue::Date(date)),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// `YYYY-MM-DD`, optionally followed by a time which is ignored.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    let (date, _time) = raw.split_at_checked(10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Resolve a local wall-clock time. Ambiguous times take the earlier instant;
/// times skipped by a DST jump move forward one hour.
fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    let local = match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest(),
    };
    local.map(|t| t.with_timezone(&Utc))
}

fn parse_datetime_span(raw: &str, tz: Tz) -> Option<Span> {
    if let Ok(exact) = DateTime::parse_from_rfc3339(raw) {
        let start = exact.with_timezone(&Utc);
        return Some(Span {
            start,
            end: start + chrono::Duration::seconds(1),
        });
    }

    const SECOND_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
    const MINUTE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];

    for format in SECOND_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            let start = local_to_utc(naive, tz)?;
            let end = local_to_utc(naive + chrono::Duration::seconds(1), tz)?;
            return Some(Span { start, end });
        }
    }
    for format in MINUTE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            let start = local_to_utc(naive, tz)?;
            let end = local_to_utc(naive + chrono::Duration::minutes(1), tz)?;
            return Some(Span { start, end });
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let start = local_to_utc(date.and_time(chrono::NaiveTime::MIN), tz)?;
        let next = date.succ_opt()?;
        let end = local_to_utc(next.and_time(chrono::NaiveTime::MIN), tz)?;
        return Some(Span { start, end });
    }
    None
}
