//! Human-readable rendering of criteria

use super::escape::split_list_values;
use super::operators::Operator;
use crate::fields::FieldRegistry;
use crate::models::Criterion;

impl Criterion {
    /// Render for display, e.g. `Customer Name Contains Acme`. Never fails:
    /// criteria on fields that no longer exist render with their uid.
    pub async fn describe(&self, registry: &FieldRegistry) -> String {
        let label = registry.label_for(Some(&self.field_uid)).await;
        let label = if label.is_empty() {
            format!("[{}]", self.field_uid)
        } else {
            label
        };
        let mut out = format!("{} {}", label, describe_operation(self));
        if self.include_empty && !matches!(self.operator, Operator::IsBlank | Operator::IsNotBlank)
        {
            out.push_str(" (or empty)");
        }
        out
    }
}

fn describe_operation(c: &Criterion) -> String {
    let op = c.operator;
    match op {
        Operator::IsBlank | Operator::IsNotBlank | Operator::CurrentMonth => op.label().to_string(),
        Operator::InList | Operator::NotInList => {
            format!("{} {}", op.label(), split_list_values(&c.value).join(", "))
        }
        Operator::Between => {
            let (low, high) = match c.secondary_value.as_deref() {
                Some(high) if !high.trim().is_empty() => (c.value.trim().to_string(), high.trim().to_string()),
                _ => {
                    let lines = split_list_values(&c.value);
                    (
                        lines.first().copied().unwrap_or_default().to_string(),
                        lines.get(1).copied().unwrap_or_default().to_string(),
                    )
                }
            };
            format!("{} {} And {}", op.label(), low, high)
        }
        _ if op.is_relative_date() => op.label().replace('_', c.value.trim()),
        _ => format!("{} {}", op.label(), c.value),
    }
}
