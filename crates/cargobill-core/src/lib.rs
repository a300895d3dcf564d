//! Core types and pure logic: records, assignment rules, rates, row conversion.

pub mod condition;
pub mod config;
pub mod convert;
pub mod rate;
pub mod record;
pub mod reorder;
pub mod rule;
pub mod ruleset;

pub use condition::{Condition, Operator};
pub use config::{FieldNames, IngestSettings, QuotaSettings};
pub use convert::{ConversionError, FieldKind, FieldSpec, RawRow, RowConverter};
pub use rate::{
    RateAssignment, RateBook, RateCalculator, RateDefinition, RateError, RateStatus, RateType,
    resolve_rate,
};
pub use record::{FieldValue, Record};
pub use reorder::{PriorityUpdate, reorder};
pub use rule::{Assignment, Logic, Rule, RuleListKind};
pub use ruleset::{AssignmentResult, RuleSet, RuleSetError, resolve};
