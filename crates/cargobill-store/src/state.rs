//! Store contents shared by the in-memory and JSON-file backends.

use std::collections::{BTreeMap, HashMap, HashSet};

use cargobill_core::{PriorityUpdate, RateDefinition, Record, Rule, RuleListKind};
#[cfg(feature = "json-file")]
use serde::{Deserialize, Serialize};

use crate::StoreError;
use crate::traits::{BulkUpdateReport, RecordFilter, RecordUpdate, UpdateFailure};

/// Serialised form: records as an ordered list.
#[cfg(feature = "json-file")]
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    #[serde(default)]
    records: Vec<Record>,
    #[serde(default)]
    rules: BTreeMap<RuleListKind, Vec<Rule>>,
    #[serde(default)]
    rates: Vec<RateDefinition>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    records: HashMap<String, Record>,
    order: Vec<String>,
    rules: BTreeMap<RuleListKind, Vec<Rule>>,
    rates: Vec<RateDefinition>,
}

impl StoreState {
    #[cfg(feature = "json-file")]
    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Result<Self, StoreError> {
        let mut state = Self {
            rules: snapshot.rules,
            rates: snapshot.rates,
            ..Default::default()
        };
        state.insert_all(&snapshot.records)?;
        Ok(state)
    }

    #[cfg(feature = "json-file")]
    pub(crate) fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            records: self.ordered().cloned().collect(),
            rules: self.rules.clone(),
            rates: self.rates.clone(),
        }
    }

    fn ordered(&self) -> impl Iterator<Item = &Record> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// All-or-nothing: ids are checked before anything is inserted.
    pub(crate) fn insert_all(&mut self, records: &[Record]) -> Result<(), StoreError> {
        let mut seen = HashSet::with_capacity(records.len());
        for r in records {
            if self.records.contains_key(&r.id) || !seen.insert(r.id.as_str()) {
                return Err(StoreError::DuplicateId(r.id.clone()));
            }
        }
        for r in records {
            self.order.push(r.id.clone());
            self.records.insert(r.id.clone(), r.clone());
        }
        Ok(())
    }

    pub(crate) fn update_each(&mut self, updates: &[RecordUpdate]) -> BulkUpdateReport {
        let mut report = BulkUpdateReport::default();
        for u in updates {
            match self.records.get_mut(&u.id) {
                Some(record) => {
                    record.apply(&u.fields);
                    report.total_updated += 1;
                }
                None => {
                    report.total_failed += 1;
                    report.errors.push(UpdateFailure {
                        id: u.id.clone(),
                        message: StoreError::NotFound(u.id.clone()).to_string(),
                    });
                }
            }
        }
        report
    }

    pub(crate) fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        if self.records.remove(id).is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.order.retain(|o| o != id);
        Ok(())
    }

    pub(crate) fn delete_ids(&mut self, ids: &[String]) -> usize {
        let removed: HashSet<&str> = ids
            .iter()
            .filter(|id| self.records.remove(id.as_str()).is_some())
            .map(|id| id.as_str())
            .collect();
        self.order.retain(|o| !removed.contains(o.as_str()));
        removed.len()
    }

    pub(crate) fn query(&self, filter: Option<&RecordFilter>) -> Vec<Record> {
        self.ordered()
            .filter(|r| filter.is_none_or(|f| f.matches(r)))
            .cloned()
            .collect()
    }

    pub(crate) fn count(&self, filter: Option<&RecordFilter>) -> usize {
        match filter {
            None => self.records.len(),
            Some(f) => self.ordered().filter(|r| f.matches(r)).count(),
        }
    }

    /// All-or-nothing: every id must exist in the list.
    pub(crate) fn set_priorities(
        &mut self,
        kind: RuleListKind,
        updates: &[PriorityUpdate],
    ) -> Result<(), StoreError> {
        let rules = self.rules.entry(kind).or_default();
        let mut positions = Vec::with_capacity(updates.len());
        for u in updates {
            let idx = rules
                .iter()
                .position(|r| r.id == u.id)
                .ok_or_else(|| StoreError::RuleNotFound {
                    kind,
                    id: u.id.clone(),
                })?;
            positions.push((idx, u.priority));
        }
        for (idx, priority) in positions {
            rules[idx].priority = priority;
        }
        rules.sort_by_key(|r| r.priority);
        Ok(())
    }

    pub(crate) fn rules(&self, kind: RuleListKind) -> Vec<Rule> {
        self.rules.get(&kind).cloned().unwrap_or_default()
    }

    pub(crate) fn set_rules(&mut self, kind: RuleListKind, rules: &[Rule]) {
        self.rules.insert(kind, rules.to_vec());
    }

    pub(crate) fn rates(&self) -> Vec<RateDefinition> {
        self.rates.clone()
    }

    pub(crate) fn set_rates(&mut self, rates: &[RateDefinition]) {
        self.rates = rates.to_vec();
    }
}
