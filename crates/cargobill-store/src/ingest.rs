//! Batched ingestion: convert raw rows, chunk them, and write the chunks
//! sequentially with progress reporting.
//!
//! Chunks are written strictly one after another in submission order. A
//! failed chunk aborts the import; chunks already written stay written.
//! Rows that fail conversion are skipped, up to the configured drop rate.

use cargobill_core::{ConversionError, IngestSettings, RawRow, Record, RowConverter};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::StoreError;
use crate::traits::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Preparing,
    Saving,
    Completed,
    Cancelled,
    Error,
}

/// One progress event. Percentages only ever reflect records actually
/// written, so they never go backwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestProgress {
    pub percentage: f64,
    pub current_count: usize,
    pub total_count: usize,
    /// 1-based; `0` before the first chunk.
    pub current_batch: usize,
    pub total_batches: usize,
    pub status: IngestStatus,
}

/// A row skipped during conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRejection {
    /// 0-based index into the input rows.
    pub row: usize,
    pub error: ConversionError,
}

/// Converted records split into write chunks.
#[derive(Debug, Clone)]
pub struct IngestionBatch {
    pub records: Vec<Record>,
    pub chunk_size: usize,
    pub total_chunks: usize,
}

impl IngestionBatch {
    pub fn new(records: Vec<Record>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let total_chunks = records.len().div_ceil(chunk_size);
        Self {
            records,
            chunk_size,
            total_chunks,
        }
    }

    pub fn chunks(&self) -> std::slice::Chunks<'_, Record> {
        self.records.chunks(self.chunk_size)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub saved_count: usize,
    /// Records that converted successfully.
    pub total_count: usize,
    pub batches_written: usize,
    pub rejected: Vec<RowRejection>,
    pub cancelled: bool,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(
        "{rejected} of {total} rows failed conversion, above the {:.1}% limit",
        .max_drop_rate * 100.0
    )]
    TooManyRejected {
        rejected: usize,
        total: usize,
        max_drop_rate: f64,
        rows: Vec<RowRejection>,
    },

    #[error("batch {batch_index}/{total_batches} failed after {saved_count} records were saved: {source}")]
    ChunkWrite {
        saved_count: usize,
        batch_index: usize,
        total_batches: usize,
        #[source]
        source: StoreError,
    },
}

impl IngestError {
    /// Records committed before the failure.
    pub fn saved_count(&self) -> usize {
        match self {
            Self::TooManyRejected { .. } => 0,
            Self::ChunkWrite { saved_count, .. } => *saved_count,
        }
    }
}

/// Converts and writes imported rows into a [`RecordStore`].
pub struct IngestionPipeline<'a, S: RecordStore + ?Sized> {
    store: &'a S,
    converter: RowConverter,
    settings: IngestSettings,
}

impl<'a, S: RecordStore + ?Sized> IngestionPipeline<'a, S> {
    pub fn new(store: &'a S, converter: RowConverter, settings: IngestSettings) -> Self {
        Self {
            store,
            converter,
            settings,
        }
    }

    /// Convert every row, keeping the ones that succeed.
    pub fn prepare(&self, rows: &[RawRow]) -> (Vec<Record>, Vec<RowRejection>) {
        let mut records = Vec::with_capacity(rows.len());
        let mut rejected = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            match self.converter.convert(row) {
                Ok(r) => records.push(r),
                Err(e) => {
                    warn!(row = i, error = %e, "skipping row");
                    rejected.push(RowRejection { row: i, error: e });
                }
            }
        }
        (records, rejected)
    }

    /// Run the import.
    ///
    /// `on_progress` receives `Preparing`, then a `Saving` event before and
    /// after every chunk, then exactly one terminal event (`Completed`,
    /// `Cancelled`, or `Error`). `cancel` is checked before each chunk.
    pub async fn ingest(
        &self,
        rows: &[RawRow],
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(&IngestProgress),
    ) -> Result<IngestReport, IngestError> {
        let mut progress = IngestProgress {
            percentage: 0.0,
            current_count: 0,
            total_count: rows.len(),
            current_batch: 0,
            total_batches: 0,
            status: IngestStatus::Preparing,
        };
        on_progress(&progress);

        let (records, rejected) = self.prepare(rows);
        if exceeds_drop_rate(rejected.len(), rows.len(), self.settings.max_drop_rate) {
            progress.status = IngestStatus::Error;
            on_progress(&progress);
            error!(
                rejected = rejected.len(),
                total = rows.len(),
                "import rejected: too many rows failed conversion"
            );
            return Err(IngestError::TooManyRejected {
                rejected: rejected.len(),
                total: rows.len(),
                max_drop_rate: self.settings.max_drop_rate,
                rows: rejected,
            });
        }

        let batch = IngestionBatch::new(records, self.settings.chunk_size);
        let total = batch.records.len();
        progress.total_count = total;
        progress.total_batches = batch.total_chunks;

        let mut saved = 0usize;
        for (i, chunk) in batch.chunks().enumerate() {
            if cancel.is_cancelled() {
                progress.status = IngestStatus::Cancelled;
                on_progress(&progress);
                info!(saved, total, "import cancelled");
                return Ok(IngestReport {
                    saved_count: saved,
                    total_count: total,
                    batches_written: i,
                    rejected,
                    cancelled: true,
                });
            }

            progress.current_batch = i + 1;
            progress.status = IngestStatus::Saving;
            on_progress(&progress);

            if let Err(e) = self.store.bulk_insert(chunk).await {
                progress.status = IngestStatus::Error;
                on_progress(&progress);
                error!(batch = i + 1, saved, error = %e, "chunk write failed, aborting import");
                return Err(IngestError::ChunkWrite {
                    saved_count: saved,
                    batch_index: i + 1,
                    total_batches: batch.total_chunks,
                    source: e,
                });
            }

            saved += chunk.len();
            progress.current_count = saved;
            progress.percentage = percent(saved, total);
            on_progress(&progress);
            info!(batch = i + 1, of = batch.total_chunks, saved, "chunk written");

            if i + 1 < batch.total_chunks {
                self.pause().await;
            }
        }

        progress.percentage = 100.0;
        progress.status = IngestStatus::Completed;
        on_progress(&progress);
        info!(saved, skipped = rejected.len(), "import complete");

        Ok(IngestReport {
            saved_count: saved,
            total_count: total,
            batches_written: batch.total_chunks,
            rejected,
            cancelled: false,
        })
    }

    async fn pause(&self) {
        if self.settings.yield_between_chunks.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.settings.yield_between_chunks).await;
        }
    }
}

fn exceeds_drop_rate(rejected: usize, total: usize, max_drop_rate: f64) -> bool {
    total > 0 && rejected as f64 / total as f64 > max_drop_rate
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn rows(n: usize) -> Vec<RawRow> {
        (0..n)
            .map(|i| match json!({"id": format!("r{i}"), "orig_oe": "DEFRA", "total_kg": i}) {
                serde_json::Value::Object(m) => m,
                _ => unreachable!(),
            })
            .collect()
    }

    fn bad_row() -> RawRow {
        match json!({"orig_oe": "DEFRA", "total_kg": "n/a"}) {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    fn settings() -> IngestSettings {
        IngestSettings {
            yield_between_chunks: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn writes_three_chunks_of_fifty_fifty_twenty() {
        let store = MemoryStore::new();
        let pipeline = IngestionPipeline::new(&store, RowConverter::default(), settings());
        let mut events = Vec::new();
        let report = pipeline
            .ingest(&rows(120), &CancellationToken::new(), |p| events.push(p.clone()))
            .await
            .unwrap();

        assert_eq!(report.saved_count, 120);
        assert_eq!(report.batches_written, 3);
        assert!(!report.cancelled);
        assert_eq!(store.insert_batch_sizes().await, vec![50, 50, 20]);
        assert_eq!(store.count(None).await.unwrap(), 120);

        let last = events.last().unwrap();
        assert_eq!(last.status, IngestStatus::Completed);
        assert_eq!(last.percentage, 100.0);
        assert_eq!(last.total_batches, 3);
        assert_eq!(events[0].status, IngestStatus::Preparing);
    }

    #[tokio::test]
    async fn progress_is_monotonic() {
        let store = MemoryStore::new();
        let pipeline = IngestionPipeline::new(&store, RowConverter::default(), settings());
        let mut events = Vec::new();
        pipeline
            .ingest(&rows(120), &CancellationToken::new(), |p| events.push(p.clone()))
            .await
            .unwrap();
        for pair in events.windows(2) {
            assert!(pair[0].percentage <= pair[1].percentage);
            assert!(pair[0].current_count <= pair[1].current_count);
        }
        let counts: Vec<usize> = events
            .iter()
            .filter(|e| e.status == IngestStatus::Saving)
            .map(|e| e.current_count)
            .collect();
        assert_eq!(counts, vec![0, 50, 50, 100, 100, 120]);
    }

    #[tokio::test]
    async fn failure_on_second_chunk_keeps_first() {
        let store = MemoryStore::new().fail_insert_on_call(2);
        let pipeline = IngestionPipeline::new(&store, RowConverter::default(), settings());
        let mut last = None;
        let err = pipeline
            .ingest(&rows(120), &CancellationToken::new(), |p| last = Some(p.clone()))
            .await
            .unwrap_err();

        assert_eq!(err.saved_count(), 50);
        assert!(matches!(err, IngestError::ChunkWrite { batch_index: 2, .. }));
        assert_eq!(last.unwrap().status, IngestStatus::Error);
        // Chunk 3 is never attempted; chunk 1 is not rolled back.
        assert_eq!(store.insert_batch_sizes().await, vec![50, 50]);
        assert_eq!(store.count(None).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn bad_rows_are_skipped_within_drop_rate() {
        let store = MemoryStore::new();
        let mut input = rows(99);
        input.insert(10, bad_row());
        let pipeline = IngestionPipeline::new(&store, RowConverter::default(), settings());
        let report = pipeline
            .ingest(&input, &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(report.saved_count, 99);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].row, 10);
    }

    #[tokio::test]
    async fn too_many_bad_rows_abort_before_writing() {
        let store = MemoryStore::new();
        let mut input = rows(10);
        input.push(bad_row());
        let pipeline = IngestionPipeline::new(&store, RowConverter::default(), settings());
        let err = pipeline
            .ingest(&input, &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::TooManyRejected {
                rejected: 1,
                total: 11,
                ..
            }
        ));
        assert!(store.insert_batch_sizes().await.is_empty());
    }

    #[tokio::test]
    async fn lenient_drop_rate_accepts_everything_convertible() {
        let store = MemoryStore::new();
        let mut input = rows(2);
        input.push(bad_row());
        let lenient = IngestSettings {
            max_drop_rate: 1.0,
            ..settings()
        };
        let pipeline = IngestionPipeline::new(&store, RowConverter::default(), lenient);
        let report = pipeline
            .ingest(&input, &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(report.saved_count, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_between_chunks() {
        let store = MemoryStore::new();
        let pipeline = IngestionPipeline::new(&store, RowConverter::default(), settings());
        let cancel = CancellationToken::new();
        let mut last = None;
        let report = pipeline
            .ingest(&rows(120), &cancel, |p| {
                if p.status == IngestStatus::Saving && p.current_count == 50 {
                    cancel.cancel();
                }
                last = Some(p.clone());
            })
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.saved_count, 50);
        assert_eq!(report.batches_written, 1);
        assert_eq!(last.unwrap().status, IngestStatus::Cancelled);
        assert_eq!(store.count(None).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn empty_import_completes() {
        let store = MemoryStore::new();
        let pipeline = IngestionPipeline::new(&store, RowConverter::default(), settings());
        let mut last = None;
        let report = pipeline
            .ingest(&[], &CancellationToken::new(), |p| last = Some(p.clone()))
            .await
            .unwrap();
        assert_eq!(report.saved_count, 0);
        let last = last.unwrap();
        assert_eq!(last.status, IngestStatus::Completed);
        assert_eq!(last.total_batches, 0);
    }

    #[test]
    fn batch_chunk_math() {
        let recs: Vec<Record> = (0..101).map(|i| Record::new(format!("r{i}"))).collect();
        let batch = IngestionBatch::new(recs, 50);
        assert_eq!(batch.total_chunks, 3);
        let sizes: Vec<usize> = batch.chunks().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![50, 50, 1]);
        assert_eq!(IngestionBatch::new(vec![], 0).total_chunks, 0);
    }
}
