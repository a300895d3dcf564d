//! Storage layer: the record store contract, in-memory and JSON-file stores,
//! and the workflows that write through it (ingest, assign, reorder, delete).

mod error;
pub use error::StoreError;

mod traits;
pub use traits::{BulkUpdateReport, RecordFilter, RecordStore, RecordUpdate, UpdateFailure};

mod state;

mod memory;
pub use memory::MemoryStore;

#[cfg(feature = "json-file")]
mod json_file;
#[cfg(feature = "json-file")]
pub use json_file::JsonFileStore;

pub mod ingest;
pub use ingest::{
    IngestError, IngestProgress, IngestReport, IngestStatus, IngestionBatch, IngestionPipeline,
    RowRejection,
};

pub mod assign;
pub use assign::{
    AssignMode, AssignOutcome, AssignmentPlan, AssignmentStatus, PlannedAssignment,
    assign_records, plan_assignments, write_assignments,
};

mod priority;
pub use priority::{PriorityPersistError, reorder_and_persist};

mod delete;
pub use delete::{BulkDeleteError, DeleteReport, delete_in_batches};
