//! Tunables for ingestion, the local cache, and the fields assignments write.
//!
//! Every struct deserialises with defaults, so a partial config is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_WEIGHT_FIELD: &str = "total_kg";
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Settings for the batched ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Records per bulk insert.
    pub chunk_size: usize,
    /// Fraction of rows (0.0..=1.0) that may fail conversion before the
    /// whole import is rejected.
    pub max_drop_rate: f64,
    /// Pause between chunk writes. Zero still yields to the scheduler.
    #[serde(with = "millis")]
    pub yield_between_chunks: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_drop_rate: 0.05,
            yield_between_chunks: Duration::from_millis(10),
        }
    }
}

/// Thresholds and retention windows for the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaSettings {
    pub quota_bytes: u64,
    /// `is_near_limit` when usage is above this percentage.
    pub near_limit_percent: f64,
    /// `is_full` when usage is above this percentage...
    pub full_percent: f64,
    /// ...or when less than this many bytes remain.
    pub min_available_bytes: u64,
    /// Progressive cleanup stops once usage drops below this percentage.
    pub recovered_percent: f64,
    #[serde(with = "secs")]
    pub watch_interval: Duration,
    #[serde(with = "secs")]
    pub dataset_retention: Duration,
    #[serde(with = "secs")]
    pub aggressive_dataset_retention: Duration,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            quota_bytes: 5 * 1024 * 1024,
            near_limit_percent: 70.0,
            full_percent: 90.0,
            min_available_bytes: 200 * 1024,
            recovered_percent: 70.0,
            watch_interval: Duration::from_secs(30),
            dataset_retention: Duration::from_secs(24 * 60 * 60),
            aggressive_dataset_retention: Duration::from_secs(60 * 60),
        }
    }
}

/// Record fields written back by the assignment workflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub weight_field: String,
    pub customer_field: String,
    pub rate_id_field: String,
    pub rate_value_field: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            weight_field: DEFAULT_WEIGHT_FIELD.to_string(),
            customer_field: "customer_id".to_string(),
            rate_id_field: "rate_id".to_string(),
            rate_value_field: "rate_value".to_string(),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
