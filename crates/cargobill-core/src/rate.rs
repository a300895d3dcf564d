//! Rate definitions and monetary value computation.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::DEFAULT_WEIGHT_FIELD;
use crate::record::Record;
use crate::rule::Rule;
use crate::ruleset::{AssignmentResult, resolve_rule};

/// Pricing model of a [`RateDefinition`].
///
/// Unrecognised names are preserved as [`RateType::Unknown`] so a rate list
/// with one bad entry still loads; computing with it yields
/// [`RateError::UnknownRateType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RateType {
    Fixed,
    PerKg,
    Multiplier,
    Unknown(String),
}

impl From<String> for RateType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "fixed" => Self::Fixed,
            "per_kg" => Self::PerKg,
            "multiplier" => Self::Multiplier,
            _ => Self::Unknown(s),
        }
    }
}

impl From<RateType> for String {
    fn from(t: RateType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => f.write_str("fixed"),
            Self::PerKg => f.write_str("per_kg"),
            Self::Multiplier => f.write_str("multiplier"),
            Self::Unknown(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateDefinition {
    pub id: String,
    pub rate_type: RateType,
    #[serde(default)]
    pub base_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    pub currency: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateError {
    #[error("unknown rate type '{rate_type}' on rate {rate_id}")]
    UnknownRateType { rate_id: String, rate_type: String },
}

/// Computes rate values from a record's weight.
#[derive(Debug, Clone)]
pub struct RateCalculator {
    weight_field: String,
}

impl Default for RateCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_WEIGHT_FIELD)
    }
}

impl RateCalculator {
    pub fn new(weight_field: &str) -> Self {
        Self {
            weight_field: weight_field.to_string(),
        }
    }

    /// Value of `rate` applied to `record`, rounded to 2 decimal places.
    ///
    /// Missing or non-numeric weight and NaN base rate count as `0`. An
    /// unknown rate type is an error; callers treat it as "needs a manual
    /// rate", distinct from a computed zero.
    pub fn compute(&self, record: &Record, rate: &RateDefinition) -> Result<f64, RateError> {
        let base = finite_or_zero(rate.base_rate);
        let weight = || finite_or_zero(record.number(&self.weight_field).unwrap_or(0.0));

        let value = match &rate.rate_type {
            RateType::Fixed => base,
            RateType::PerKg => weight() * base,
            RateType::Multiplier => {
                let multiplier = rate.multiplier.map(finite_or_zero).unwrap_or(1.0);
                weight() * base * multiplier
            }
            RateType::Unknown(name) => {
                return Err(RateError::UnknownRateType {
                    rate_id: rate.id.clone(),
                    rate_type: name.clone(),
                });
            }
        };
        Ok(round_cents(value))
    }
}

fn finite_or_zero(n: f64) -> f64 {
    if n.is_finite() { n } else { 0.0 }
}

/// Round half away from zero to 2 decimal places.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rate definitions indexed by id.
#[derive(Debug, Clone, Default)]
pub struct RateBook {
    rates: HashMap<String, RateDefinition>,
}

impl RateBook {
    pub fn new(rates: impl IntoIterator<Item = RateDefinition>) -> Self {
        Self {
            rates: rates.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&RateDefinition> {
        self.rates.get(id)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateStatus {
    Computed,
    /// A rule matched but its rate could not be priced.
    NeedsManualRate,
    Unassigned,
}

/// Result of the "assign rate" workflow for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateAssignment {
    pub result: AssignmentResult,
    pub rate_definition_id: Option<String>,
    pub status: RateStatus,
}

/// Resolve the rate rule for `record` and price it.
pub fn resolve_rate(
    record: &Record,
    rules: &[Rule],
    book: &RateBook,
    calculator: &RateCalculator,
) -> RateAssignment {
    let Some(rule) = resolve_rule(record, rules) else {
        return RateAssignment {
            result: AssignmentResult::unassigned(),
            rate_definition_id: None,
            status: RateStatus::Unassigned,
        };
    };

    let rate_id = rule.assignment.rate_definition_id.clone();
    let priced = match rate_id.as_deref().and_then(|id| book.get(id)) {
        Some(rate) => match calculator.compute(record, rate) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(record = %record.id, rule = %rule.id, error = %e, "rate needs manual assignment");
                None
            }
        },
        None => {
            warn!(
                record = %record.id,
                rule = %rule.id,
                rate = rate_id.as_deref().unwrap_or("-"),
                "matched rule has no rate definition"
            );
            None
        }
    };

    RateAssignment {
        result: AssignmentResult {
            matched_rule_id: Some(rule.id.clone()),
            target_id: Some(rule.assignment.target_id.clone()),
            computed_value: priced.unwrap_or(0.0),
        },
        rate_definition_id: rate_id,
        status: if priced.is_some() {
            RateStatus::Computed
        } else {
            RateStatus::NeedsManualRate
        },
    }
}
