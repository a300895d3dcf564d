use std::collections::BTreeMap;

use async_trait::async_trait;
use cargobill_core::{
    Condition, FieldValue, PriorityUpdate, RateDefinition, Record, Rule, RuleListKind,
};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Field changes for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub id: String,
    pub fields: BTreeMap<String, FieldValue>,
}

/// One failed item of a bulk update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFailure {
    pub id: String,
    pub message: String,
}

/// Per-item outcome of [`RecordStore::bulk_update`]. Updates are not
/// all-or-nothing: each item succeeds or fails on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkUpdateReport {
    pub total_updated: usize,
    pub total_failed: usize,
    pub errors: Vec<UpdateFailure>,
}

impl BulkUpdateReport {
    /// Report where every update in `updates` failed with the same message.
    pub fn all_failed(updates: &[RecordUpdate], message: &str) -> Self {
        Self {
            total_updated: 0,
            total_failed: updates.len(),
            errors: updates
                .iter()
                .map(|u| UpdateFailure {
                    id: u.id.clone(),
                    message: message.to_string(),
                })
                .collect(),
        }
    }

    pub fn merge(&mut self, other: BulkUpdateReport) {
        self.total_updated += other.total_updated;
        self.total_failed += other.total_failed;
        self.errors.extend(other.errors);
    }
}

/// Record query: all conditions must hold. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub conditions: Vec<Condition>,
}

impl RecordFilter {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| c.evaluate(record))
    }
}

/// The persistent store collaborator.
///
/// Any key-addressable backend qualifies. Each call is independent: there
/// is no cross-call transaction, so a failed call leaves earlier successful
/// calls committed. A single `bulk_insert` or `update_priorities` call is
/// applied entirely or not at all.
///
/// Implementations must be `Send + Sync` so one store can be shared across
/// tasks.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ── Records ──

    /// Insert a batch of new records. Fails on duplicate ids.
    async fn bulk_insert(&self, records: &[Record]) -> Result<(), StoreError>;

    /// Apply field updates item by item.
    async fn bulk_update(&self, updates: &[RecordUpdate]) -> BulkUpdateReport;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Delete every listed id that exists. Returns the number removed.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize, StoreError>;

    async fn count(&self, filter: Option<&RecordFilter>) -> Result<usize, StoreError>;

    /// Records in insertion order.
    async fn fetch_records(&self, filter: Option<&RecordFilter>)
    -> Result<Vec<Record>, StoreError>;

    // ── Rule lists and rates ──

    /// Overwrite only the priorities of the listed rules.
    async fn update_priorities(
        &self,
        kind: RuleListKind,
        updates: &[PriorityUpdate],
    ) -> Result<(), StoreError>;

    async fn fetch_rules(&self, kind: RuleListKind) -> Result<Vec<Rule>, StoreError>;

    /// Replace a whole rule list.
    async fn save_rules(&self, kind: RuleListKind, rules: &[Rule]) -> Result<(), StoreError>;

    async fn fetch_rates(&self) -> Result<Vec<RateDefinition>, StoreError>;

    /// Replace the rate definitions.
    async fn save_rates(&self, rates: &[RateDefinition]) -> Result<(), StoreError>;
}
