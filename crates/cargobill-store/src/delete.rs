//! Cancellable bulk delete in fixed-size batches.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::StoreError;
use crate::traits::RecordStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: usize,
    pub cancelled: bool,
}

#[derive(Debug, Error)]
#[error("delete failed after {deleted} records were removed: {source}")]
pub struct BulkDeleteError {
    pub deleted: usize,
    #[source]
    pub source: StoreError,
}

/// Delete `ids` through [`RecordStore::delete_by_ids`], `batch_size` at a time.
///
/// `cancel` is checked before every batch. Batches already deleted are not
/// restored on cancellation or failure.
pub async fn delete_in_batches<S: RecordStore + ?Sized>(
    store: &S,
    ids: &[String],
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<DeleteReport, BulkDeleteError> {
    let mut deleted = 0;
    for batch in ids.chunks(batch_size.max(1)) {
        if cancel.is_cancelled() {
            info!(deleted, "delete cancelled");
            return Ok(DeleteReport {
                deleted,
                cancelled: true,
            });
        }
        match store.delete_by_ids(batch).await {
            Ok(n) => deleted += n,
            Err(source) => {
                error!(deleted, error = %source, "delete batch failed");
                return Err(BulkDeleteError { deleted, source });
            }
        }
        tokio::task::yield_now().await;
    }
    info!(deleted, "delete complete");
    Ok(DeleteReport {
        deleted,
        cancelled: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use cargobill_core::Record;

    async fn seeded(store: MemoryStore, n: usize) -> (MemoryStore, Vec<String>) {
        let records: Vec<Record> = (0..n).map(|i| Record::new(format!("r{i}"))).collect();
        store.bulk_insert(&records).await.unwrap();
        (store, records.into_iter().map(|r| r.id).collect())
    }

    #[tokio::test]
    async fn deletes_everything_in_batches() {
        let (store, ids) = seeded(MemoryStore::new(), 120).await;
        let report = delete_in_batches(&store, &ids, 50, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report, DeleteReport { deleted: 120, cancelled: false });
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_batch_reports_partial_count() {
        let (store, ids) = seeded(MemoryStore::new().fail_delete_on_call(2), 120).await;
        let err = delete_in_batches(&store, &ids, 50, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.deleted, 50);
        assert_eq!(store.count(None).await.unwrap(), 70);
    }

    #[tokio::test]
    async fn cancelled_before_start_deletes_nothing() {
        let (store, ids) = seeded(MemoryStore::new(), 10).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = delete_in_batches(&store, &ids, 5, &cancel).await.unwrap();
        assert_eq!(report, DeleteReport { deleted: 0, cancelled: true });
        assert_eq!(store.count(None).await.unwrap(), 10);
    }
}
