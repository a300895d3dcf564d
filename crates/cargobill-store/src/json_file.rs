//! JSON-file record store.
//!
//! The whole store lives in one JSON document that is rewritten after every
//! mutating call (write to a sibling temp file, then rename). A call whose
//! write fails leaves both the file and the in-memory view unchanged.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cargobill_core::{PriorityUpdate, RateDefinition, Record, Rule, RuleListKind};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::StoreError;
use crate::state::{Snapshot, StoreState};
use crate::traits::{BulkUpdateReport, RecordFilter, RecordStore, RecordUpdate};

pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating an empty one if the file does not exist.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let state = match tokio::fs::read(path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                let state = StoreState::from_snapshot(snapshot)?;
                info!(path = %path.display(), records = state.count(None), "opened store");
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to a copy of the state, persist the copy, then swap it in.
    async fn commit<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *state = next;
        Ok(out)
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec_pretty(&state.to_snapshot())?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn bulk_insert(&self, records: &[Record]) -> Result<(), StoreError> {
        self.commit(|s| s.insert_all(records)).await
    }

    async fn bulk_update(&self, updates: &[RecordUpdate]) -> BulkUpdateReport {
        match self.commit(|s| Ok(s.update_each(updates))).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, count = updates.len(), "bulk update not persisted");
                BulkUpdateReport::all_failed(updates, &e.to_string())
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.commit(|s| s.delete(id)).await
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize, StoreError> {
        self.commit(|s| Ok(s.delete_ids(ids))).await
    }

    async fn count(&self, filter: Option<&RecordFilter>) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.count(filter))
    }

    async fn fetch_records(
        &self,
        filter: Option<&RecordFilter>,
    ) -> Result<Vec<Record>, StoreError> {
        Ok(self.state.lock().await.query(filter))
    }

    async fn update_priorities(
        &self,
        kind: RuleListKind,
        updates: &[PriorityUpdate],
    ) -> Result<(), StoreError> {
        self.commit(|s| s.set_priorities(kind, updates)).await
    }

    async fn fetch_rules(&self, kind: RuleListKind) -> Result<Vec<Rule>, StoreError> {
        Ok(self.state.lock().await.rules(kind))
    }

    async fn save_rules(&self, kind: RuleListKind, rules: &[Rule]) -> Result<(), StoreError> {
        self.commit(|s| {
            s.set_rules(kind, rules);
            Ok(())
        })
        .await
    }

    async fn fetch_rates(&self) -> Result<Vec<RateDefinition>, StoreError> {
        Ok(self.state.lock().await.rates())
    }

    async fn save_rates(&self, rates: &[RateDefinition]) -> Result<(), StoreError> {
        self.commit(|s| {
            s.set_rates(rates);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cargobill_core::{Assignment, Logic, RateType};

    fn rec(id: &str) -> Record {
        Record::new(id).with("orig_oe", "DEFRA").with("total_kg", 12.0)
    }

    #[tokio::test]
    async fn open_missing_file_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = JsonFileStore::open(&tmp.path().join("store.json")).await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
        // Nothing is written until the first mutation.
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn persists_and_reopens() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("store.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        store.bulk_insert(&[rec("a"), rec("b")]).await.unwrap();
        store.delete("a").await.unwrap();
        store
            .save_rules(
                RuleListKind::Rate,
                &[Rule {
                    id: "r1".into(),
                    name: "all DEFRA".into(),
                    is_active: true,
                    priority: 1,
                    conditions: vec![],
                    logic: Logic::And,
                    assignment: Assignment {
                        target_id: "cust".into(),
                        rate_definition_id: Some("kg".into()),
                    },
                }],
            )
            .await
            .unwrap();
        store
            .save_rates(&[RateDefinition {
                id: "kg".into(),
                rate_type: RateType::PerKg,
                base_rate: 1.5,
                multiplier: None,
                currency: "EUR".into(),
            }])
            .await
            .unwrap();
        drop(store);

        let store = JsonFileStore::open(&path).await.unwrap();
        let records = store.fetch_records(None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], rec("b"));
        assert_eq!(store.fetch_rules(RuleListKind::Rate).await.unwrap().len(), 1);
        assert_eq!(store.fetch_rates().await.unwrap()[0].rate_type, RateType::PerKg);
    }

    #[tokio::test]
    async fn failed_mutation_changes_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("store.json");
        let store = JsonFileStore::open(&path).await.unwrap();
        store.bulk_insert(&[rec("a")]).await.unwrap();
        assert!(store.bulk_insert(&[rec("b"), rec("a")]).await.is_err());

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.count(None).await.unwrap(), 1);
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("store.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path).await,
            Err(StoreError::Json(_))
        ));
    }
}
