//! Field conditions and their evaluation against a record.
//!
//! Evaluation is total: malformed bounds, missing fields, and non-numeric
//! values all degrade to `false`. Nothing here returns an error.

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Comparison operator of a [`Condition`].
///
/// Deserialisation rejects unknown operator names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    Between,
    NotEmpty,
    IsEmpty,
}

/// One predicate on one record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: String,
    /// Upper bound for [`Operator::Between`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<String>,
}

impl Condition {
    pub fn new(field: &str, operator: Operator, value: &str) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value: value.to_string(),
            value2: None,
        }
    }

    pub fn between(field: &str, low: &str, high: &str) -> Self {
        Self {
            field: field.to_string(),
            operator: Operator::Between,
            value: low.to_string(),
            value2: Some(high.to_string()),
        }
    }

    /// Evaluate this condition against `record`.
    pub fn evaluate(&self, record: &Record) -> bool {
        evaluate(record, self)
    }
}

/// Evaluate one condition against one record.
pub fn evaluate(record: &Record, condition: &Condition) -> bool {
    let actual = record.get(&condition.field);

    match condition.operator {
        Operator::IsEmpty => actual.is_empty(),
        Operator::NotEmpty => !actual.is_empty(),

        Operator::Equals | Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
            let actual = actual.to_string().to_lowercase();
            let expected = condition.value.to_lowercase();
            match condition.operator {
                Operator::Equals => actual == expected,
                Operator::Contains => actual.contains(&expected),
                Operator::StartsWith => actual.starts_with(&expected),
                _ => actual.ends_with(&expected),
            }
        }

        Operator::GreaterThan | Operator::LessThan => {
            let (Some(a), Some(b)) = (actual.as_number(), parse_number(&condition.value)) else {
                return false;
            };
            if condition.operator == Operator::GreaterThan {
                a > b
            } else {
                a < b
            }
        }

        Operator::Between => {
            let high = condition.value2.as_deref().and_then(parse_number);
            match (actual.as_number(), parse_number(&condition.value), high) {
                (Some(a), Some(low), Some(high)) => low <= a && a <= high,
                _ => false,
            }
        }
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}
