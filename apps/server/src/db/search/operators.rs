//! Criterion operators and their legality per data type

use crate::models::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of criterion operators. The serde names are the stable wire codes
/// stored with each criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "eq")]
    Equals,
    #[serde(rename = "nq")]
    NotEquals,
    #[serde(rename = "co")]
    Contains,
    #[serde(rename = "nc")]
    NotContains,
    #[serde(rename = "sw")]
    StartsWith,
    #[serde(rename = "ew")]
    EndsWith,
    #[serde(rename = "gt")]
    GreaterThan,
    #[serde(rename = "lt")]
    LessThan,
    #[serde(rename = "bt")]
    Between,
    #[serde(rename = "null")]
    IsBlank,
    #[serde(rename = "notnull")]
    IsNotBlank,
    #[serde(rename = "in")]
    InList,
    #[serde(rename = "notin")]
    NotInList,
    /// Before the day N days ago.
    #[serde(rename = "bda")]
    BeforeDaysAgo,
    /// On or after the day N days ago.
    #[serde(rename = "ada")]
    AfterDaysAgo,
    /// Before the day N days from now.
    #[serde(rename = "bdf")]
    BeforeDaysFromNow,
    /// On or after the day N days from now.
    #[serde(rename = "adf")]
    AfterDaysFromNow,
    /// The N whole months before the current month.
    #[serde(rename = "pm")]
    PreviousMonths,
    #[serde(rename = "cmo")]
    CurrentMonth,
}

const ALL: [Operator; 19] = [
    Operator::Equals,
    Operator::NotEquals,
    Operator::Contains,
    Operator::NotContains,
    Operator::StartsWith,
    Operator::EndsWith,
    Operator::GreaterThan,
    Operator::LessThan,
    Operator::Between,
    Operator::IsBlank,
    Operator::IsNotBlank,
    Operator::InList,
    Operator::NotInList,
    Operator::BeforeDaysAgo,
    Operator::AfterDaysAgo,
    Operator::BeforeDaysFromNow,
    Operator::AfterDaysFromNow,
    Operator::PreviousMonths,
    Operator::CurrentMonth,
];

impl Operator {
    pub fn all() -> &'static [Operator] {
        &ALL
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Equals => "eq",
            Self::NotEquals => "nq",
            Self::Contains => "co",
            Self::NotContains => "nc",
            Self::StartsWith => "sw",
            Self::EndsWith => "ew",
            Self::GreaterThan => "gt",
            Self::LessThan => "lt",
            Self::Between => "bt",
            Self::IsBlank => "null",
            Self::IsNotBlank => "notnull",
            Self::InList => "in",
            Self::NotInList => "notin",
            Self::BeforeDaysAgo => "bda",
            Self::AfterDaysAgo => "ada",
            Self::BeforeDaysFromNow => "bdf",
            Self::AfterDaysFromNow => "adf",
            Self::PreviousMonths => "pm",
            Self::CurrentMonth => "cmo",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Equals => "Equals",
            Self::NotEquals => "Not Equal To",
            Self::Contains => "Contains",
            Self::NotContains => "Doesn't Contain",
            Self::StartsWith => "Starts With",
            Self::EndsWith => "Ends With",
            Self::GreaterThan => "Greater Than",
            Self::LessThan => "Less Than",
            Self::Between => "Between",
            Self::IsBlank => "Is Empty",
            Self::IsNotBlank => "Is Not Empty",
            Self::InList => "One Of",
            Self::NotInList => "Not One Of",
            Self::BeforeDaysAgo => "Before _ Days Ago",
            Self::AfterDaysAgo => "After _ Days Ago",
            Self::BeforeDaysFromNow => "Before _ Days From Now",
            Self::AfterDaysFromNow => "After _ Days From Now",
            Self::PreviousMonths => "Previous _ Months",
            Self::CurrentMonth => "Current Month",
        }
    }

    /// Whether the operator reads the criterion value at all.
    pub fn takes_value(&self) -> bool {
        !matches!(self, Self::IsBlank | Self::IsNotBlank | Self::CurrentMonth)
    }

    pub fn is_relative_date(&self) -> bool {
        matches!(
            self,
            Self::BeforeDaysAgo
                | Self::AfterDaysAgo
                | Self::BeforeDaysFromNow
                | Self::AfterDaysFromNow
                | Self::PreviousMonths
                | Self::CurrentMonth
        )
    }

    /// Operators that select rows lacking a property also select rows with no value.
    pub fn is_negated(&self) -> bool {
        matches!(self, Self::NotEquals | Self::NotContains | Self::NotInList)
    }

    pub fn legal_for(&self, data_type: DataType) -> bool {
        use Operator::*;
        let common = matches!(self, Equals | NotEquals | IsBlank | IsNotBlank);
        if common {
            return true;
        }
        match data_type {
            DataType::String | DataType::Text => matches!(
                self,
                Contains
                    | NotContains
                    | StartsWith
                    | EndsWith
                    | GreaterThan
                    | LessThan
                    | InList
                    | NotInList
            ),
            DataType::Integer | DataType::Decimal => {
                matches!(self, GreaterThan | LessThan | Between | InList | NotInList)
            }
            DataType::Date | DataType::DateTime => {
                matches!(self, GreaterThan | LessThan | Between) || self.is_relative_date()
            }
            DataType::Boolean => false,
        }
    }

    pub fn legal_operators(data_type: DataType) -> Vec<Operator> {
        ALL.iter().copied().filter(|op| op.legal_for(data_type)).collect()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL.iter()
            .copied()
            .find(|op| op.code() == s)
            .ok_or_else(|| format!("unknown operator '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_operators_only_apply_to_text() {
        assert!(Operator::Contains.legal_for(DataType::String));
        assert!(Operator::Contains.legal_for(DataType::Text));
        assert!(!Operator::Contains.legal_for(DataType::Integer));
        assert!(!Operator::StartsWith.legal_for(DataType::DateTime));
    }

    #[test]
    fn relative_date_operators_only_apply_to_temporal_types() {
        for op in Operator::all().iter().filter(|op| op.is_relative_date()) {
            assert!(op.legal_for(DataType::Date), "{op}");
            assert!(op.legal_for(DataType::DateTime), "{op}");
            assert!(!op.legal_for(DataType::Decimal), "{op}");
        }
    }

    #[test]
    fn boolean_fields_take_equality_and_blank_checks() {
        assert_eq!(
            Operator::legal_operators(DataType::Boolean),
            vec![
                Operator::Equals,
                Operator::NotEquals,
                Operator::IsBlank,
                Operator::IsNotBlank
            ]
        );
    }

    #[test]
    fn wire_codes_parse() {
        assert_eq!("notin".parse::<Operator>(), Ok(Operator::NotInList));
        assert!("like".parse::<Operator>().is_err());
        let json = serde_json::to_string(&Operator::PreviousMonths).unwrap();
        assert_eq!(json, "\"pm\"");
    }
}
