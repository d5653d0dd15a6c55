//! Predicate IR produced by the criterion compiler.
//!
//! A `Predicate` renders to a parameterised PostgreSQL fragment (values are
//! always bound as `$n`, never interpolated) and evaluates against in-memory
//! records with SQL three-valued logic, so both backends agree on NULL handling:
//! - comparisons against a missing value are unknown (`None`)
//! - `AND`/`OR`/`NOT` follow Kleene logic
//! - a row matches only when the predicate is `Some(true)`
//!
//! Text comparisons are case-insensitive on both sides.

use super::escape::{escape_like_pattern, quote_ident};
use super::query_builder::bind::{push_text, push_text_array};
use super::query_builder::BindValue;
use crate::models::{DataType, ScalarValue};
use std::cmp::Ordering;

/// What a predicate reads from a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueRef {
    /// A column of the module's table.
    Column { column: String, data_type: DataType },
    /// A user-defined value stored in `custom_values`.
    Custom {
        definition_id: i64,
        data_type: DataType,
    },
    /// The row's primary id.
    RecordId,
}

impl ValueRef {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Column { data_type, .. } | Self::Custom { data_type, .. } => *data_type,
            Self::RecordId => DataType::Integer,
        }
    }

    pub(crate) fn sql_expr(&self, ctx: &SqlContext<'_>) -> String {
        match self {
            Self::Column { column, .. } => format!("{}.{}", ctx.alias, quote_ident(column)),
            Self::Custom {
                definition_id,
                data_type,
            } => format!(
                "(SELECT cv.{} FROM custom_values cv WHERE cv.custom_definition_id = {} AND cv.customizable_id = {}.{})",
                data_type.custom_value_column(),
                definition_id,
                ctx.alias,
                quote_ident(ctx.id_column)
            ),
            Self::RecordId => format!("{}.{}", ctx.alias, quote_ident(ctx.id_column)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    fn holds(&self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::Ne => ord != Ordering::Equal,
            Self::Gt => ord == Ordering::Greater,
            Self::Ge => ord != Ordering::Less,
            Self::Lt => ord == Ordering::Less,
            Self::Le => ord != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeKind {
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    Compare {
        target: ValueRef,
        op: CompareOp,
        value: ScalarValue,
    },
    /// Case-insensitive substring match.
    Like {
        target: ValueRef,
        kind: LikeKind,
        needle: String,
    },
    InList {
        target: ValueRef,
        values: Vec<ScalarValue>,
    },
    /// NULL, or the empty string for textual values.
    IsBlank(ValueRef),
    IdIn(Vec<i64>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

/// Naming context for rendering: the table alias and its id column.
#[derive(Debug, Clone, Copy)]
pub struct SqlContext<'a> {
    pub alias: &'a str,
    pub id_column: &'a str,
}

/// Access to a row's values for in-memory evaluation.
pub trait RecordValues {
    fn record_id(&self) -> i64;
    fn value(&self, target: &ValueRef) -> Option<ScalarValue>;
}

fn value_cast(value: &ScalarValue) -> &'static str {
    match value {
        ScalarValue::Boolean(_) => "boolean",
        ScalarValue::Integer(_) => "bigint",
        ScalarValue::Decimal(_) => "numeric",
        ScalarValue::Date(_) => "date",
        ScalarValue::DateTime(_) => "timestamptz",
        ScalarValue::Text(_) => "text",
    }
}

fn lowered(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Text(s) => s.to_lowercase(),
        other => other.to_bind_text(),
    }
}

impl Predicate {
    /// Conjunction that flattens nested `And`s and drops `True`.
    pub fn and(parts: Vec<Predicate>) -> Predicate {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Predicate::True => {}
                Predicate::False => return Predicate::False,
                Predicate::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::True,
            1 => out.remove(0),
            _ => Predicate::And(out),
        }
    }

    /// Disjunction that flattens nested `Or`s and drops `False`.
    pub fn or(parts: Vec<Predicate>) -> Predicate {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Predicate::False => {}
                Predicate::True => return Predicate::True,
                Predicate::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::False,
            1 => out.remove(0),
            _ => Predicate::Or(out),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Predicate) -> Predicate {
        match inner {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::Not(p) => *p,
            other => Predicate::Not(Box::new(other)),
        }
    }

    pub fn compare(target: ValueRef, op: CompareOp, value: ScalarValue) -> Predicate {
        Predicate::Compare { target, op, value }
    }

    /// Render as a SQL boolean expression, appending bind values.
    pub fn to_sql(&self, ctx: &SqlContext<'_>, binds: &mut Vec<BindValue>) -> String {
        match self {
            Predicate::True => "TRUE".to_string(),
            Predicate::False => "FALSE".to_string(),
            Predicate::Compare { target, op, value } => {
                let expr = target.sql_expr(ctx);
                if target.data_type().is_textual() {
                    let idx = push_text(binds, lowered(value));
                    format!("lower({}) {} ${}", expr, op.sql(), idx)
                } else {
                    let idx = push_text(binds, value.to_bind_text());
                    format!("{} {} ${}::{}", expr, op.sql(), idx, value_cast(value))
                }
            }
            Predicate::Like {
                target,
                kind,
                needle,
            } => {
                let escaped = escape_like_pattern(needle);
                let pattern = match kind {
                    LikeKind::Contains => format!("%{}%", escaped),
                    LikeKind::StartsWith => format!("{}%", escaped),
                    LikeKind::EndsWith => format!("%{}", escaped),
                };
                let idx = push_text(binds, pattern);
                format!(
                    "{}::text ILIKE ${} ESCAPE E'\\\\'",
                    target.sql_expr(ctx),
                    idx
                )
            }
            Predicate::InList { target, values } => {
                if values.is_empty() {
                    return "FALSE".to_string();
                }
                let expr = target.sql_expr(ctx);
                if target.data_type().is_textual() {
                    let idx = push_text_array(binds, values.iter().map(lowered).collect());
                    format!("lower({}) = ANY(${}::text[])", expr, idx)
                } else {
                    let cast = value_cast(&values[0]);
                    let idx = push_text_array(
                        binds,
                        values.iter().map(ScalarValue::to_bind_text).collect(),
                    );
                    format!("{} = ANY(${}::{}[])", expr, idx, cast)
                }
            }
            Predicate::IsBlank(target) => {
                let expr = target.sql_expr(ctx);
                if target.data_type().is_textual() {
                    format!("({} IS NULL OR {} = '')", expr, expr)
                } else {
                    format!("{} IS NULL", expr)
                }
            }
            Predicate::IdIn(ids) => {
                if ids.is_empty() {
                    return "FALSE".to_string();
                }
                let idx = push_text_array(binds, ids.iter().map(i64::to_string).collect());
                format!(
                    "{}.{} = ANY(${}::bigint[])",
                    ctx.alias,
                    quote_ident(ctx.id_column),
                    idx
                )
            }
            Predicate::And(parts) => join(parts, " AND ", "TRUE", ctx, binds),
            Predicate::Or(parts) => join(parts, " OR ", "FALSE", ctx, binds),
            Predicate::Not(inner) => format!("NOT ({})", inner.to_sql(ctx, binds)),
        }
    }

    /// Evaluate with SQL three-valued logic. `None` is SQL's unknown.
    pub fn eval(&self, record: &dyn RecordValues) -> Option<bool> {
        match self {
            Predicate::True => Some(true),
            Predicate::False => Some(false),
            Predicate::Compare { target, op, value } => {
                let actual = record.value(target)?;
                let ord = actual.compare(value)?;
                Some(op.holds(ord))
            }
            Predicate::Like {
                target,
                kind,
                needle,
            } => {
                let actual = lowered(&record.value(target)?);
                let needle = needle.to_lowercase();
                Some(match kind {
                    LikeKind::Contains => actual.contains(&needle),
                    LikeKind::StartsWith => actual.starts_with(&needle),
                    LikeKind::EndsWith => actual.ends_with(&needle),
                })
            }
            Predicate::InList { target, values } => {
                let actual = record.value(target)?;
                Some(
                    values
                        .iter()
                        .any(|v| actual.compare(v) == Some(Ordering::Equal)),
                )
            }
            Predicate::IsBlank(target) => Some(match record.value(target) {
                None => true,
                Some(ScalarValue::Text(s)) => s.is_empty(),
                Some(_) => false,
            }),
            Predicate::IdIn(ids) => Some(ids.contains(&record.record_id())),
            Predicate::And(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.eval(record) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(true)
                }
            }
            Predicate::Or(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.eval(record) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Predicate::Not(inner) => inner.eval(record).map(|b| !b),
        }
    }

    pub fn matches(&self, record: &dyn RecordValues) -> bool {
        self.eval(record) == Some(true)
    }
}

fn join(
    parts: &[Predicate],
    sep: &str,
    empty: &str,
    ctx: &SqlContext<'_>,
    binds: &mut Vec<BindValue>,
) -> String {
    match parts.len() {
        0 => empty.to_string(),
        1 => parts[0].to_sql(ctx, binds),
        _ => {
            let rendered: Vec<String> = parts.iter().map(|p| p.to_sql(ctx, binds)).collect();
            format!("({})", rendered.join(sep))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TestRow {
        id: i64,
        values: HashMap<String, ScalarValue>,
    }

    impl RecordValues for TestRow {
        fn record_id(&self) -> i64 {
            self.id
        }

        fn value(&self, target: &ValueRef) -> Option<ScalarValue> {
            match target {
                ValueRef::Column { column, .. } => self.values.get(column).cloned(),
                ValueRef::RecordId => Some(ScalarValue::Integer(self.id)),
                ValueRef::Custom { .. } => None,
            }
        }
    }

    fn name() -> ValueRef {
        ValueRef::Column {
            column: "name".into(),
            data_type: DataType::String,
        }
    }

    fn ctx() -> SqlContext<'static> {
        SqlContext {
            alias: "r",
            id_column: "id",
        }
    }

    #[test]
    fn text_compare_renders_lowered_bind() {
        let p = Predicate::compare(name(), CompareOp::Eq, ScalarValue::Text("Acme".into()));
        let mut binds = Vec::new();
        let sql = p.to_sql(&ctx(), &mut binds);
        assert_eq!(sql, "lower(r.\"name\") = $1");
        assert!(matches!(&binds[0], BindValue::Text(v) if v == "acme"));
    }

    #[test]
    fn like_escapes_and_binds_pattern() {
        let p = Predicate::Like {
            target: name(),
            kind: LikeKind::StartsWith,
            needle: "50%".into(),
        };
        let mut binds = Vec::new();
        let sql = p.to_sql(&ctx(), &mut binds);
        assert!(sql.contains("ILIKE $1"));
        assert!(matches!(&binds[0], BindValue::Text(v) if v == "50\\%%"));
    }

    #[test]
    fn custom_values_read_through_subselect() {
        let target = ValueRef::Custom {
            definition_id: 12,
            data_type: DataType::Decimal,
        };
        let p = Predicate::compare(
            target,
            CompareOp::Gt,
            ScalarValue::Decimal(rust_decimal::Decimal::new(5, 0)),
        );
        let mut binds = Vec::new();
        let sql = p.to_sql(
            &SqlContext {
                alias: "r",
                id_column: "order_id",
            },
            &mut binds,
        );
        assert!(sql.starts_with("(SELECT cv.decimal_value FROM custom_values cv"));
        assert!(sql.contains("cv.customizable_id = r.\"order_id\""));
        assert!(sql.ends_with("> $1::numeric"));
    }

    #[test]
    fn empty_lists_render_false() {
        let mut binds = Vec::new();
        assert_eq!(Predicate::IdIn(vec![]).to_sql(&ctx(), &mut binds), "FALSE");
        assert_eq!(
            Predicate::InList {
                target: name(),
                values: vec![]
            }
            .to_sql(&ctx(), &mut binds),
            "FALSE"
        );
        assert!(binds.is_empty());
    }

    #[test]
    fn null_comparisons_are_unknown_and_negation_preserves_unknown() {
        let row = TestRow {
            id: 1,
            values: HashMap::new(),
        };
        let eq = Predicate::compare(name(), CompareOp::Eq, ScalarValue::Text("x".into()));
        assert_eq!(eq.eval(&row), None);
        assert_eq!(Predicate::not(eq.clone()).eval(&row), None);
        assert!(Predicate::or(vec![eq, Predicate::IsBlank(name())]).matches(&row));
    }

    #[test]
    fn and_or_builders_simplify() {
        assert_eq!(Predicate::and(vec![]), Predicate::True);
        assert_eq!(
            Predicate::and(vec![Predicate::True, Predicate::IdIn(vec![1])]),
            Predicate::IdIn(vec![1])
        );
        assert_eq!(
            Predicate::or(vec![Predicate::False, Predicate::True]),
            Predicate::True
        );
        assert_eq!(Predicate::not(Predicate::not(Predicate::False)), Predicate::False);
    }
}
