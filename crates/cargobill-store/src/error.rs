use cargobill_core::RuleListKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record id: {0}")]
    DuplicateId(String),

    #[error("rule {id} not found in {kind} list")]
    RuleNotFound { kind: RuleListKind, id: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "json-file")]
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
