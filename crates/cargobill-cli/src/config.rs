//! Optional JSON settings file. Every section and field falls back to its
//! default, so `{}` is a valid file.

use std::path::Path;

use anyhow::Context;
use cargobill_core::{FieldNames, IngestSettings, QuotaSettings};
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ingest: IngestSettings,
    pub quota: QuotaSettings,
    pub fields: FieldNames,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
