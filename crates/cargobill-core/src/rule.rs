//! Assignment rules and the per-rule match decision.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::record::Record;

/// How a rule combines its conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Logic {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

/// What a matching rule assigns.
///
/// Customer rules carry only `target_id`; rate rules also name the
/// [`RateDefinition`](crate::rate::RateDefinition) to price with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_definition_id: Option<String>,
}

/// A conditionally-activated assignment. Lower `priority` is evaluated first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub priority: u32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logic: Logic,
    pub assignment: Assignment,
}

fn default_active() -> bool {
    true
}

impl Rule {
    /// Whether this rule fires for `record`.
    ///
    /// Inactive rules and rules without conditions never match.
    pub fn matches(&self, record: &Record) -> bool {
        if !self.is_active || self.conditions.is_empty() {
            return false;
        }
        match self.logic {
            Logic::And => self.conditions.iter().all(|c| c.evaluate(record)),
            Logic::Or => self.conditions.iter().any(|c| c.evaluate(record)),
        }
    }
}

/// Which rule list a rule belongs to. Both lists share one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleListKind {
    Customer,
    Rate,
}

impl RuleListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Rate => "rate",
        }
    }
}

impl fmt::Display for RuleListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleListKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "rate" => Ok(Self::Rate),
            other => Err(format!("unknown rule list: {other}")),
        }
    }
}
