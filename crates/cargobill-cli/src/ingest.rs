//! Import pipeline: read a JSON row file, write records in chunks, cache the
//! raw dataset locally.

use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use cargobill_cache::{QuotaMonitor, SafeSetOutcome, keys};
use cargobill_core::{IngestSettings, RawRow, RowConverter};
use cargobill_store::{IngestProgress, IngestReport, IngestStatus, IngestionPipeline, RecordStore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct IngestStats {
    pub report: IngestReport,
    pub dataset_id: String,
    pub cached: bool,
    pub elapsed_secs: f64,
}

#[derive(Serialize)]
struct UploadSession<'a> {
    dataset_id: &'a str,
    file: &'a str,
    saved_count: usize,
    total_count: usize,
}

pub fn read_rows(path: &Path) -> anyhow::Result<Vec<RawRow>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a JSON array of row objects", path.display()))
}

/// Run the full import: read rows → convert → chunked writes → cache.
pub async fn run_ingest(
    store: &dyn RecordStore,
    monitor: &QuotaMonitor,
    path: &Path,
    settings: IngestSettings,
    cancel: &CancellationToken,
) -> anyhow::Result<IngestStats> {
    let start = Instant::now();
    let rows = read_rows(path)?;
    eprintln!("  Read {} rows from {}", rows.len(), path.display());

    let pipeline = IngestionPipeline::new(store, RowConverter::default(), settings);
    let result = pipeline.ingest(&rows, cancel, print_progress).await;
    eprintln!();
    let report = result.context("import failed")?;

    let dataset_id = uuid::Uuid::new_v4().to_string();
    let cached = cache_dataset(monitor, &dataset_id, path, &rows, &report).await;

    Ok(IngestStats {
        report,
        dataset_id,
        cached,
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}

fn print_progress(p: &IngestProgress) {
    match p.status {
        IngestStatus::Preparing => {}
        IngestStatus::Saving | IngestStatus::Completed => eprint!(
            "\r  Saved {}/{} (batch {}/{}, {:.1}%)",
            p.current_count, p.total_count, p.current_batch, p.total_batches, p.percentage
        ),
        IngestStatus::Cancelled => eprint!("\r  Cancelled after {} records", p.current_count),
        IngestStatus::Error => eprint!("\r  Stopped after {} records", p.current_count),
    }
}

/// Keep a local copy of the import. Failure here never fails the import.
async fn cache_dataset(
    monitor: &QuotaMonitor,
    dataset_id: &str,
    path: &Path,
    rows: &[RawRow],
    report: &IngestReport,
) -> bool {
    let payload = match serde_json::to_string(rows) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "dataset not cached");
            return false;
        }
    };
    let outcome = monitor
        .safe_set_item(&keys::dataset_key(dataset_id), &payload)
        .await;
    if let SafeSetOutcome::Failed { error, .. } = &outcome {
        eprintln!("  warning: dataset not cached locally ({error}); it will not survive a restart");
        return false;
    }

    let file = path.display().to_string();
    let session = UploadSession {
        dataset_id,
        file: &file,
        saved_count: report.saved_count,
        total_count: report.total_count,
    };
    if let Ok(session) = serde_json::to_string(&session) {
        let key = keys::upload_session_key("current");
        if !monitor.safe_set_item(&key, &session).await.is_stored() {
            warn!("upload session not cached");
        }
    }
    true
}
