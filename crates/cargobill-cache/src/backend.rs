use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::CacheError;

/// One stored key, without its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntryMeta {
    pub key: String,
    /// Key length plus value length, in bytes.
    pub size: u64,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheUsage {
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

/// A string key/value cache with a fixed byte quota.
///
/// Usage is counted as key bytes plus value bytes. A write that would take
/// usage over the quota fails with [`CacheError::QuotaExceeded`] and leaves
/// the previous value (if any) in place.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Returns whether the key existed.
    async fn remove_item(&self, key: &str) -> Result<bool, CacheError>;

    async fn entries(&self) -> Result<Vec<CacheEntryMeta>, CacheError>;

    async fn usage(&self) -> Result<CacheUsage, CacheError>;
}

pub(crate) fn entry_size(key: &str, value_len: u64) -> u64 {
    key.len() as u64 + value_len
}

/// Fails if replacing `key`'s current entry (`existing` bytes) with
/// `requested` bytes would go over the quota.
pub(crate) fn check_fits(
    key: &str,
    usage: CacheUsage,
    existing: u64,
    requested: u64,
) -> Result<(), CacheError> {
    let available = usage
        .quota_bytes
        .saturating_sub(usage.used_bytes.saturating_sub(existing));
    if requested > available {
        return Err(CacheError::QuotaExceeded {
            key: key.to_string(),
            requested,
            available,
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    stored_at: DateTime<Utc>,
}

/// Cache held in process memory.
#[derive(Debug)]
pub struct MemoryCache {
    quota_bytes: u64,
    slots: Mutex<BTreeMap<String, Slot>>,
}

impl MemoryCache {
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            quota_bytes,
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    /// Like [`CacheBackend::set_item`] with an explicit store time.
    pub async fn set_item_at(
        &self,
        key: &str,
        value: &str,
        stored_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let mut slots = self.slots.lock().await;
        let used = slots
            .iter()
            .map(|(k, s)| entry_size(k, s.value.len() as u64))
            .sum();
        let existing = slots
            .get(key)
            .map_or(0, |s| entry_size(key, s.value.len() as u64));
        check_fits(
            key,
            CacheUsage {
                used_bytes: used,
                quota_bytes: self.quota_bytes,
            },
            existing,
            entry_size(key, value.len() as u64),
        )?;
        slots.insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                stored_at,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get_item(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.slots.lock().await.get(key).map(|s| s.value.clone()))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.set_item_at(key, value, Utc::now()).await
    }

    async fn remove_item(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.slots.lock().await.remove(key).is_some())
    }

    async fn entries(&self) -> Result<Vec<CacheEntryMeta>, CacheError> {
        Ok(self
            .slots
            .lock()
            .await
            .iter()
            .map(|(k, s)| CacheEntryMeta {
                key: k.clone(),
                size: entry_size(k, s.value.len() as u64),
                stored_at: s.stored_at,
            })
            .collect())
    }

    async fn usage(&self) -> Result<CacheUsage, CacheError> {
        let used_bytes = self
            .slots
            .lock()
            .await
            .iter()
            .map(|(k, s)| entry_size(k, s.value.len() as u64))
            .sum();
        Ok(CacheUsage {
            used_bytes,
            quota_bytes: self.quota_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let cache = MemoryCache::new(1024);
        cache.set_item("k", "value").await.unwrap();
        assert_eq!(cache.get_item("k").await.unwrap().as_deref(), Some("value"));
        assert_eq!(cache.usage().await.unwrap().used_bytes, 6);
        assert!(cache.remove_item("k").await.unwrap());
        assert!(!cache.remove_item("k").await.unwrap());
        assert_eq!(cache.get_item("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn quota_is_enforced_and_old_value_kept() {
        let cache = MemoryCache::new(10);
        cache.set_item("k", "12345").await.unwrap();
        let err = cache.set_item("k", "1234567890").await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(cache.get_item("k").await.unwrap().as_deref(), Some("12345"));
    }

    #[tokio::test]
    async fn overwrite_counts_only_the_new_value() {
        // 1 key byte + 9 value bytes fills the quota exactly, even while the
        // old 5-byte value is still stored.
        let cache = MemoryCache::new(10);
        cache.set_item("k", "12345").await.unwrap();
        cache.set_item("k", "123456789").await.unwrap();
        assert_eq!(cache.usage().await.unwrap().used_bytes, 10);
    }
}
