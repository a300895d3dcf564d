//! Cache cleanup strategies, ordered from least to most destructive.
//!
//! Every strategy is idempotent: running it twice removes nothing the second
//! time. Only namespaced keys are ever removed.

use std::time::Duration;

use cargobill_core::QuotaSettings;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::CacheError;
use crate::backend::{CacheBackend, CacheEntryMeta};
use crate::keys;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupStrategy {
    /// Cached datasets stored longer ago than `retention`.
    OldDatasets { retention: Duration },
    FileBlobs,
    UploadSessions,
    ColumnMappings,
    /// Same as `OldDatasets`, with a much shorter window.
    AggressiveDatasets { retention: Duration },
    /// Every key in the application namespace.
    Emergency,
}

impl CleanupStrategy {
    /// The standard order used by progressive cleanup.
    pub fn progressive(settings: &QuotaSettings) -> Vec<CleanupStrategy> {
        vec![
            CleanupStrategy::OldDatasets {
                retention: settings.dataset_retention,
            },
            CleanupStrategy::FileBlobs,
            CleanupStrategy::UploadSessions,
            CleanupStrategy::ColumnMappings,
            CleanupStrategy::AggressiveDatasets {
                retention: settings.aggressive_dataset_retention,
            },
            CleanupStrategy::Emergency,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            CleanupStrategy::OldDatasets { .. } => "old_datasets",
            CleanupStrategy::FileBlobs => "file_blobs",
            CleanupStrategy::UploadSessions => "upload_sessions",
            CleanupStrategy::ColumnMappings => "column_mappings",
            CleanupStrategy::AggressiveDatasets { .. } => "aggressive_datasets",
            CleanupStrategy::Emergency => "emergency",
        }
    }

    pub fn description(&self) -> String {
        match self {
            CleanupStrategy::OldDatasets { retention } => {
                format!("remove cached datasets older than {}", human(*retention))
            }
            CleanupStrategy::FileBlobs => "remove stored file blobs".to_string(),
            CleanupStrategy::UploadSessions => "clear the upload session".to_string(),
            CleanupStrategy::ColumnMappings => "clear saved column mappings".to_string(),
            CleanupStrategy::AggressiveDatasets { retention } => {
                format!("remove cached datasets older than {}", human(*retention))
            }
            CleanupStrategy::Emergency => "clear every application cache key".to_string(),
        }
    }

    fn selects(&self, entry: &CacheEntryMeta, now: DateTime<Utc>) -> bool {
        match self {
            CleanupStrategy::OldDatasets { retention }
            | CleanupStrategy::AggressiveDatasets { retention } => {
                entry.key.starts_with(keys::DATASET_PREFIX) && older_than(entry, *retention, now)
            }
            CleanupStrategy::FileBlobs => entry.key.starts_with(keys::FILE_PREFIX),
            CleanupStrategy::UploadSessions => entry.key.starts_with(keys::UPLOAD_SESSION_PREFIX),
            CleanupStrategy::ColumnMappings => entry.key.starts_with(keys::COLUMN_MAPPING_PREFIX),
            CleanupStrategy::Emergency => keys::is_namespaced(&entry.key),
        }
    }

    /// Remove every entry this strategy selects. Returns how many were removed.
    pub async fn execute(
        &self,
        cache: &dyn CacheBackend,
        now: DateTime<Utc>,
    ) -> Result<usize, CacheError> {
        let mut removed = 0;
        for entry in cache.entries().await? {
            if self.selects(&entry, now) && cache.remove_item(&entry.key).await? {
                debug!(strategy = self.name(), key = %entry.key, bytes = entry.size, "evicted");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn older_than(entry: &CacheEntryMeta, retention: Duration, now: DateTime<Utc>) -> bool {
    let cutoff = TimeDelta::from_std(retention)
        .ok()
        .and_then(|d| now.checked_sub_signed(d));
    cutoff.is_some_and(|cutoff| entry.stored_at < cutoff)
}

fn human(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCache;

    async fn seeded(now: DateTime<Utc>) -> MemoryCache {
        let cache = MemoryCache::new(1 << 20);
        let two_days_ago = now - TimeDelta::days(2);
        let two_hours_ago = now - TimeDelta::hours(2);
        cache
            .set_item_at(&keys::dataset_key("stale"), "x", two_days_ago)
            .await
            .unwrap();
        cache
            .set_item_at(&keys::dataset_key("recent"), "x", two_hours_ago)
            .await
            .unwrap();
        cache.set_item_at(&keys::dataset_key("fresh"), "x", now).await.unwrap();
        cache.set_item_at(&keys::file_key("a.csv"), "x", now).await.unwrap();
        cache
            .set_item_at(&keys::upload_session_key("s"), "x", now)
            .await
            .unwrap();
        cache
            .set_item_at(&keys::column_mapping_key("m"), "x", now)
            .await
            .unwrap();
        cache.set_item_at("other-app:token", "x", two_days_ago).await.unwrap();
        cache
    }

    async fn keys_of(cache: &MemoryCache) -> Vec<String> {
        cache.entries().await.unwrap().into_iter().map(|e| e.key).collect()
    }

    #[tokio::test]
    async fn progressive_order_walks_down_to_emergency() {
        let now = Utc::now();
        let cache = seeded(now).await;
        let strategies = CleanupStrategy::progressive(&QuotaSettings::default());
        let names: Vec<&str> = strategies.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "old_datasets",
                "file_blobs",
                "upload_sessions",
                "column_mappings",
                "aggressive_datasets",
                "emergency"
            ]
        );

        let removed: Vec<usize> = {
            let mut out = Vec::new();
            for s in &strategies {
                out.push(s.execute(&cache, now).await.unwrap());
            }
            out
        };
        assert_eq!(removed, vec![1, 1, 1, 1, 1, 1]);
        assert_eq!(keys_of(&cache).await, vec!["other-app:token"]);
    }

    #[tokio::test]
    async fn strategies_are_idempotent() {
        let now = Utc::now();
        let cache = seeded(now).await;
        let s = CleanupStrategy::OldDatasets {
            retention: Duration::from_secs(24 * 3600),
        };
        assert_eq!(s.execute(&cache, now).await.unwrap(), 1);
        assert_eq!(s.execute(&cache, now).await.unwrap(), 0);
    }

    #[test]
    fn descriptions_name_the_window() {
        let s = CleanupStrategy::AggressiveDatasets {
            retention: Duration::from_secs(3600),
        };
        assert_eq!(s.description(), "remove cached datasets older than 1h");
    }
}
