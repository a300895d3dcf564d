//! In-memory record store.
//!
//! Used for sessions that do not persist and as the store under test. Faults
//! can be injected per call to exercise partial-failure paths.

use async_trait::async_trait;
use cargobill_core::{PriorityUpdate, RateDefinition, Record, Rule, RuleListKind};
use tokio::sync::Mutex;
use tracing::debug;

use crate::StoreError;
use crate::state::StoreState;
use crate::traits::{BulkUpdateReport, RecordFilter, RecordStore, RecordUpdate};

#[derive(Debug, Default)]
struct Faults {
    /// 1-based `bulk_insert` call that fails.
    insert_call: Option<usize>,
    /// 1-based `delete_by_ids` call that fails.
    delete_call: Option<usize>,
    priorities: bool,
    updates: bool,
}

#[derive(Debug, Default)]
struct Calls {
    insert_sizes: Vec<usize>,
    delete_calls: usize,
}

#[derive(Debug, Default)]
struct Inner {
    state: StoreState,
    faults: Faults,
    calls: Calls,
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `call`-th `bulk_insert` (1-based). Earlier and later calls succeed.
    pub fn fail_insert_on_call(mut self, call: usize) -> Self {
        self.inner.get_mut().faults.insert_call = Some(call);
        self
    }

    /// Fail the `call`-th `delete_by_ids` (1-based).
    pub fn fail_delete_on_call(mut self, call: usize) -> Self {
        self.inner.get_mut().faults.delete_call = Some(call);
        self
    }

    /// Fail every `update_priorities` call.
    pub fn fail_priority_writes(mut self) -> Self {
        self.inner.get_mut().faults.priorities = true;
        self
    }

    /// Fail every item of every `bulk_update` call.
    pub fn fail_updates(mut self) -> Self {
        self.inner.get_mut().faults.updates = true;
        self
    }

    /// Sizes of every `bulk_insert` call attempted so far, failed ones included.
    pub async fn insert_batch_sizes(&self) -> Vec<usize> {
        self.inner.lock().await.calls.insert_sizes.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn bulk_insert(&self, records: &[Record]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.calls.insert_sizes.push(records.len());
        let call = inner.calls.insert_sizes.len();
        if inner.faults.insert_call == Some(call) {
            return Err(StoreError::Other(format!("injected failure on insert call {call}")));
        }
        inner.state.insert_all(records)?;
        debug!(count = records.len(), call, "inserted records");
        Ok(())
    }

    async fn bulk_update(&self, updates: &[RecordUpdate]) -> BulkUpdateReport {
        let mut inner = self.inner.lock().await;
        if inner.faults.updates {
            return BulkUpdateReport::all_failed(updates, "injected update failure");
        }
        inner.state.update_each(updates)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.lock().await.state.delete(id)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.calls.delete_calls += 1;
        let call = inner.calls.delete_calls;
        if inner.faults.delete_call == Some(call) {
            return Err(StoreError::Other(format!("injected failure on delete call {call}")));
        }
        Ok(inner.state.delete_ids(ids))
    }

    async fn count(&self, filter: Option<&RecordFilter>) -> Result<usize, StoreError> {
        Ok(self.inner.lock().await.state.count(filter))
    }

    async fn fetch_records(
        &self,
        filter: Option<&RecordFilter>,
    ) -> Result<Vec<Record>, StoreError> {
        Ok(self.inner.lock().await.state.query(filter))
    }

    async fn update_priorities(
        &self,
        kind: RuleListKind,
        updates: &[PriorityUpdate],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.faults.priorities {
            return Err(StoreError::Other("injected priority write failure".into()));
        }
        inner.state.set_priorities(kind, updates)
    }

    async fn fetch_rules(&self, kind: RuleListKind) -> Result<Vec<Rule>, StoreError> {
        Ok(self.inner.lock().await.state.rules(kind))
    }

    async fn save_rules(&self, kind: RuleListKind, rules: &[Rule]) -> Result<(), StoreError> {
        self.inner.lock().await.state.set_rules(kind, rules);
        Ok(())
    }

    async fn fetch_rates(&self) -> Result<Vec<RateDefinition>, StoreError> {
        Ok(self.inner.lock().await.state.rates())
    }

    async fn save_rates(&self, rates: &[RateDefinition]) -> Result<(), StoreError> {
        self.inner.lock().await.state.set_rates(rates);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cargobill_core::{Assignment, Condition, FieldValue, Logic, Operator};
    use std::collections::BTreeMap;

    fn rec(id: &str, orig: &str) -> Record {
        Record::new(id).with("orig_oe", orig).with("total_kg", 10.0)
    }

    fn rule(id: &str, priority: u32) -> Rule {
        Rule {
            id: id.into(),
            name: id.into(),
            is_active: true,
            priority,
            conditions: vec![],
            logic: Logic::And,
            assignment: Assignment {
                target_id: "t".into(),
                rate_definition_id: None,
            },
        }
    }

    #[tokio::test]
    async fn insert_count_and_fetch_in_order() {
        let store = MemoryStore::new();
        store
            .bulk_insert(&[rec("b", "DEFRA"), rec("a", "GBLHRA"), rec("c", "DEFRA")])
            .await
            .unwrap();
        assert_eq!(store.count(None).await.unwrap(), 3);

        let filter = RecordFilter::new(vec![Condition::new("orig_oe", Operator::Equals, "defra")]);
        assert_eq!(store.count(Some(&filter)).await.unwrap(), 2);

        let ids: Vec<String> = store
            .fetch_records(None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected_whole() {
        let store = MemoryStore::new();
        store.bulk_insert(&[rec("a", "X")]).await.unwrap();
        let err = store
            .bulk_insert(&[rec("b", "X"), rec("a", "X")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(id) if id == "a"));
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bulk_update_is_per_item() {
        let store = MemoryStore::new();
        store.bulk_insert(&[rec("a", "X")]).await.unwrap();
        let fields = BTreeMap::from([("customer_id".to_string(), FieldValue::from("c1"))]);
        let report = store
            .bulk_update(&[
                RecordUpdate {
                    id: "a".into(),
                    fields: fields.clone(),
                },
                RecordUpdate {
                    id: "ghost".into(),
                    fields,
                },
            ])
            .await;
        assert_eq!(report.total_updated, 1);
        assert_eq!(report.total_failed, 1);
        assert_eq!(report.errors[0].id, "ghost");

        let a = &store.fetch_records(None).await.unwrap()[0];
        assert_eq!(a.get("customer_id").to_string(), "c1");
    }

    #[tokio::test]
    async fn deletes() {
        let store = MemoryStore::new();
        store
            .bulk_insert(&[rec("a", "X"), rec("b", "X"), rec("c", "X")])
            .await
            .unwrap();
        store.delete("b").await.unwrap();
        assert!(matches!(store.delete("b").await, Err(StoreError::NotFound(_))));
        let removed = store
            .delete_by_ids(&["a".into(), "zzz".into()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn priorities_update_atomically() {
        let store = MemoryStore::new();
        store
            .save_rules(RuleListKind::Customer, &[rule("a", 1), rule("b", 2)])
            .await
            .unwrap();

        let err = store
            .update_priorities(
                RuleListKind::Customer,
                &[
                    PriorityUpdate { id: "b".into(), priority: 1 },
                    PriorityUpdate { id: "ghost".into(), priority: 2 },
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RuleNotFound { .. }));
        let rules = store.fetch_rules(RuleListKind::Customer).await.unwrap();
        assert_eq!(rules[0].id, "a");
        assert_eq!(rules[0].priority, 1);

        store
            .update_priorities(
                RuleListKind::Customer,
                &[
                    PriorityUpdate { id: "b".into(), priority: 1 },
                    PriorityUpdate { id: "a".into(), priority: 2 },
                ],
            )
            .await
            .unwrap();
        let rules = store.fetch_rules(RuleListKind::Customer).await.unwrap();
        assert_eq!(rules[0].id, "b");
        assert!(store.fetch_rules(RuleListKind::Rate).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_insert_failure_hits_only_that_call() {
        let store = MemoryStore::new().fail_insert_on_call(2);
        store.bulk_insert(&[rec("a", "X")]).await.unwrap();
        assert!(store.bulk_insert(&[rec("b", "X")]).await.is_err());
        store.bulk_insert(&[rec("c", "X")]).await.unwrap();
        assert_eq!(store.insert_batch_sizes().await, vec![1, 1, 1]);
        assert_eq!(store.count(None).await.unwrap(), 2);
    }
}
