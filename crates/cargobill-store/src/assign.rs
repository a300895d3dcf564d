//! The "assign customer" and "assign rate" workflows: resolve every record
//! against a rule list, then write the assignments back with bulk updates.

use std::collections::BTreeMap;

use cargobill_core::{
    FieldNames, FieldValue, RateBook, RateCalculator, RateStatus, Record, RuleSet, resolve_rate,
};
use serde::Serialize;
use tracing::info;

use crate::StoreError;
use crate::traits::{BulkUpdateReport, RecordStore, RecordUpdate};

/// Which workflow is running.
#[derive(Debug, Clone, Copy)]
pub enum AssignMode<'a> {
    Customer,
    Rate(&'a RateBook),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    NeedsManualRate,
    Unassigned,
}

/// Resolution outcome for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedAssignment {
    pub record_id: String,
    pub matched_rule_id: Option<String>,
    pub target_id: Option<String>,
    pub rate_definition_id: Option<String>,
    pub computed_value: f64,
    pub status: AssignmentStatus,
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentPlan {
    pub rows: Vec<PlannedAssignment>,
    /// Only records with a complete assignment get an update.
    pub updates: Vec<RecordUpdate>,
}

impl AssignmentPlan {
    pub fn count(&self, status: AssignmentStatus) -> usize {
        self.rows.iter().filter(|r| r.status == status).count()
    }
}

/// Resolve every record. Pure; nothing is written.
pub fn plan_assignments(
    records: &[Record],
    rules: &RuleSet,
    mode: AssignMode<'_>,
    fields: &FieldNames,
) -> AssignmentPlan {
    let calculator = RateCalculator::new(&fields.weight_field);
    let mut plan = AssignmentPlan::default();

    for record in records {
        let row = match mode {
            AssignMode::Customer => {
                let result = rules.resolve(record);
                PlannedAssignment {
                    record_id: record.id.clone(),
                    status: if result.is_assigned() {
                        AssignmentStatus::Assigned
                    } else {
                        AssignmentStatus::Unassigned
                    },
                    matched_rule_id: result.matched_rule_id,
                    target_id: result.target_id,
                    rate_definition_id: None,
                    computed_value: result.computed_value,
                }
            }
            AssignMode::Rate(book) => {
                let rate = resolve_rate(record, rules.rules(), book, &calculator);
                PlannedAssignment {
                    record_id: record.id.clone(),
                    matched_rule_id: rate.result.matched_rule_id,
                    target_id: rate.result.target_id,
                    rate_definition_id: rate.rate_definition_id,
                    computed_value: rate.result.computed_value,
                    status: match rate.status {
                        RateStatus::Computed => AssignmentStatus::Assigned,
                        RateStatus::NeedsManualRate => AssignmentStatus::NeedsManualRate,
                        RateStatus::Unassigned => AssignmentStatus::Unassigned,
                    },
                }
            }
        };

        if row.status == AssignmentStatus::Assigned {
            plan.updates.push(update_for(&row, mode, fields));
        }
        plan.rows.push(row);
    }
    plan
}

fn update_for(row: &PlannedAssignment, mode: AssignMode<'_>, fields: &FieldNames) -> RecordUpdate {
    let mut changes = BTreeMap::new();
    match mode {
        AssignMode::Customer => {
            if let Some(target) = &row.target_id {
                changes.insert(fields.customer_field.clone(), FieldValue::from(target.as_str()));
            }
        }
        AssignMode::Rate(_) => {
            if let Some(rate_id) = &row.rate_definition_id {
                changes.insert(fields.rate_id_field.clone(), FieldValue::from(rate_id.as_str()));
            }
            changes.insert(
                fields.rate_value_field.clone(),
                FieldValue::Number(row.computed_value),
            );
        }
    }
    RecordUpdate {
        id: row.record_id.clone(),
        fields: changes,
    }
}

/// Write `updates` in chunks of `chunk_size`, aggregating the per-item reports.
pub async fn write_assignments<S: RecordStore + ?Sized>(
    store: &S,
    updates: &[RecordUpdate],
    chunk_size: usize,
) -> BulkUpdateReport {
    let mut total = BulkUpdateReport::default();
    for chunk in updates.chunks(chunk_size.max(1)) {
        total.merge(store.bulk_update(chunk).await);
        tokio::task::yield_now().await;
    }
    info!(
        updated = total.total_updated,
        failed = total.total_failed,
        "assignments written"
    );
    total
}

/// Plan and write-back result of [`assign_records`].
#[derive(Debug, Clone)]
pub struct AssignOutcome {
    pub plan: AssignmentPlan,
    pub report: BulkUpdateReport,
}

/// Fetch every stored record, resolve it, and write the assignments back.
pub async fn assign_records<S: RecordStore + ?Sized>(
    store: &S,
    rules: &RuleSet,
    mode: AssignMode<'_>,
    fields: &FieldNames,
    chunk_size: usize,
) -> Result<AssignOutcome, StoreError> {
    let records = store.fetch_records(None).await?;
    let plan = plan_assignments(&records, rules, mode, fields);
    info!(
        records = records.len(),
        assigned = plan.count(AssignmentStatus::Assigned),
        manual = plan.count(AssignmentStatus::NeedsManualRate),
        unassigned = plan.count(AssignmentStatus::Unassigned),
        "assignments resolved"
    );
    let report = write_assignments(store, &plan.updates, chunk_size).await;
    Ok(AssignOutcome { plan, report })
}
