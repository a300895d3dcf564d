//! Persisting a drag-and-drop reorder.
//!
//! The reordered list is shown immediately (optimistic update). If the store
//! rejects the new priorities, the previous list is shown again and the
//! error is surfaced.

use cargobill_core::{RuleListKind, RuleSet};
use thiserror::Error;
use tracing::{error, info};

use crate::StoreError;
use crate::traits::RecordStore;

#[derive(Debug, Error)]
#[error("failed to save {kind} rule priorities: {source}")]
pub struct PriorityPersistError {
    pub kind: RuleListKind,
    /// The list as it was before the move; callers continue from this.
    pub restored: RuleSet,
    #[source]
    pub source: StoreError,
}

/// Move `moved_id` onto `target_id`'s position and persist every priority.
///
/// `on_change` sees the optimistic list before the store is written, and the
/// restored list again if the write fails. A no-op move writes nothing and
/// does not call `on_change`.
pub async fn reorder_and_persist<S: RecordStore + ?Sized>(
    store: &S,
    kind: RuleListKind,
    current: &RuleSet,
    moved_id: &str,
    target_id: &str,
    mut on_change: impl FnMut(&RuleSet),
) -> Result<RuleSet, PriorityPersistError> {
    let next = current.reorder(moved_id, target_id);
    if next.version == current.version {
        return Ok(next);
    }

    on_change(&next);

    match store.update_priorities(kind, &next.priority_updates()).await {
        Ok(()) => {
            info!(%kind, moved = moved_id, target = target_id, "rule priorities saved");
            Ok(next)
        }
        Err(source) => {
            error!(%kind, moved = moved_id, error = %source, "rule priorities not saved; reverting");
            let restored = current.clone();
            on_change(&restored);
            Err(PriorityPersistError {
                kind,
                restored,
                source,
            })
        }
    }
}
