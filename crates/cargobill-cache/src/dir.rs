//! Directory-backed cache: one file per key.
//!
//! File names are the key with every byte outside `[A-Za-z0-9_-]` written as
//! `%XX`. Names that do not decode (such as in-flight `.tmp` files) are
//! ignored.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::CacheError;
use crate::backend::{CacheBackend, CacheEntryMeta, CacheUsage, check_fits, entry_size};

pub struct DirCache {
    dir: PathBuf,
    quota_bytes: u64,
}

impl DirCache {
    /// Open (creating if needed) the cache directory at `dir`.
    pub async fn open(dir: &Path, quota_bytes: u64) -> Result<Self, CacheError> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(Self {
            dir: dir.to_path_buf(),
            quota_bytes,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(escape(key))
    }

    async fn scan(&self) -> Result<Vec<CacheEntryMeta>, CacheError> {
        let mut out = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(unescape) else {
                continue;
            };
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let stored_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            out.push(CacheEntryMeta {
                size: entry_size(&key, meta.len()),
                key,
                stored_at,
            });
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

#[async_trait]
impl CacheBackend for DirCache {
    async fn get_item(&self, key: &str) -> Result<Option<String>, CacheError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let entries = self.scan().await?;
        let used_bytes = entries.iter().map(|e| e.size).sum();
        let existing = entries
            .iter()
            .find(|e| e.key == key)
            .map_or(0, |e| e.size);
        check_fits(
            key,
            CacheUsage {
                used_bytes,
                quota_bytes: self.quota_bytes,
            },
            existing,
            entry_size(key, value.len() as u64),
        )?;

        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key, bytes = value.len(), "cached");
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<bool, CacheError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn entries(&self) -> Result<Vec<CacheEntryMeta>, CacheError> {
        self.scan().await
    }

    async fn usage(&self) -> Result<CacheUsage, CacheError> {
        let used_bytes = self.scan().await?.iter().map(|e| e.size).sum();
        Ok(CacheUsage {
            used_bytes,
            quota_bytes: self.quota_bytes,
        })
    }
}

fn escape(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn unescape(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = name.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;

    #[test]
    fn escaping_round_trips_awkward_keys() {
        for key in ["cargobill:file:a/b c.csv", "..", "plain", "ünïcode:ß"] {
            let name = escape(key);
            assert!(!name.contains('/') && !name.contains('.'), "{name}");
            assert_eq!(unescape(&name).as_deref(), Some(key));
        }
        assert_eq!(unescape("abc.tmp"), None);
        assert_eq!(unescape("bad%4"), None);
    }

    #[tokio::test]
    async fn stores_values_as_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cache = DirCache::open(&tmp.path().join("cache"), 1024).await.unwrap();
        let key = keys::file_key("manifest.csv");

        cache.set_item(&key, "a,b\n1,2\n").await.unwrap();
        assert_eq!(cache.get_item(&key).await.unwrap().as_deref(), Some("a,b\n1,2\n"));

        let entries = cache.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, key);
        assert_eq!(entries[0].size, (key.len() + 8) as u64);
        assert_eq!(cache.usage().await.unwrap().used_bytes, entries[0].size);

        assert!(cache.remove_item(&key).await.unwrap());
        assert_eq!(cache.get_item(&key).await.unwrap(), None);
        assert!(cache.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quota_matches_memory_cache() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cache = DirCache::open(tmp.path(), 10).await.unwrap();
        cache.set_item("k", "123456789").await.unwrap();
        let err = cache.set_item("j", "1").await.unwrap_err();
        assert!(err.is_quota_exceeded());
        // Replacing an existing value only needs room for the new one.
        cache.set_item("k", "abcdefghi").await.unwrap();
        assert_eq!(cache.get_item("k").await.unwrap().as_deref(), Some("abcdefghi"));
    }
}
