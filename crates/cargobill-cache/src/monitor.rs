//! Quota checks, progressive cleanup, and the write-with-retry entry point.

use std::sync::Arc;

use cargobill_core::QuotaSettings;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::CacheError;
use crate::backend::{CacheBackend, CacheUsage};
use crate::cleanup::CleanupStrategy;

/// Snapshot of cache usage against the quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub percentage: f64,
    pub is_near_limit: bool,
    pub is_full: bool,
}

impl QuotaStatus {
    pub fn from_usage(usage: CacheUsage, settings: &QuotaSettings) -> Self {
        let available_bytes = usage.quota_bytes.saturating_sub(usage.used_bytes);
        let percentage = if usage.quota_bytes == 0 {
            100.0
        } else {
            usage.used_bytes as f64 / usage.quota_bytes as f64 * 100.0
        };
        Self {
            used_bytes: usage.used_bytes,
            available_bytes,
            percentage,
            is_near_limit: percentage > settings.near_limit_percent,
            is_full: percentage > settings.full_percent
                || available_bytes < settings.min_available_bytes,
        }
    }

    /// Enough room that cleanup can stop.
    pub fn is_recovered(&self, settings: &QuotaSettings) -> bool {
        !self.is_full && self.percentage < settings.recovered_percent
    }
}

/// Emitted after each strategy of a progressive cleanup.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupProgress {
    pub strategy: &'static str,
    pub description: String,
    /// 1-based.
    pub step: usize,
    pub total_steps: usize,
    pub items_removed: usize,
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    /// The cache is no longer full.
    pub success: bool,
    pub strategies_used: Vec<&'static str>,
    pub total_items_removed: usize,
    pub final_status: Option<QuotaStatus>,
}

/// Result of [`QuotaMonitor::safe_set_item`]. A failed cache write never
/// fails the caller's workflow; it only means the value was not cached.
#[derive(Debug)]
pub enum SafeSetOutcome {
    Stored,
    StoredAfterCleanup(CleanupReport),
    Failed {
        error: CacheError,
        cleanup: Option<CleanupReport>,
    },
}

impl SafeSetOutcome {
    pub fn is_stored(&self) -> bool {
        !matches!(self, SafeSetOutcome::Failed { .. })
    }

    pub fn cleanup_performed(&self) -> bool {
        match self {
            SafeSetOutcome::Stored => false,
            SafeSetOutcome::StoredAfterCleanup(_) => true,
            SafeSetOutcome::Failed { cleanup, .. } => cleanup.is_some(),
        }
    }
}

pub struct QuotaMonitor {
    cache: Arc<dyn CacheBackend>,
    settings: QuotaSettings,
    strategies: Vec<CleanupStrategy>,
    /// Held for the whole of a progressive cleanup; passes never overlap.
    cleanup_lock: Mutex<()>,
}

impl QuotaMonitor {
    pub fn new(cache: Arc<dyn CacheBackend>, settings: QuotaSettings) -> Self {
        let strategies = CleanupStrategy::progressive(&settings);
        Self {
            cache,
            settings,
            strategies,
            cleanup_lock: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    pub fn settings(&self) -> &QuotaSettings {
        &self.settings
    }

    pub async fn check_quota(&self) -> Result<QuotaStatus, CacheError> {
        let usage = self.cache.usage().await?;
        Ok(QuotaStatus::from_usage(usage, &self.settings))
    }

    /// Run the strategies in order, re-checking the quota after each, and
    /// stop as soon as usage has recovered. A strategy that errors is logged
    /// and skipped.
    pub async fn perform_progressive_cleanup(
        &self,
        mut on_progress: impl FnMut(&CleanupProgress),
    ) -> CleanupReport {
        let _guard = self.cleanup_lock.lock().await;
        let total_steps = self.strategies.len();
        let mut report = CleanupReport::default();

        for (i, strategy) in self.strategies.iter().enumerate() {
            let removed = match strategy.execute(self.cache.as_ref(), Utc::now()).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "cleanup strategy failed");
                    0
                }
            };
            report.strategies_used.push(strategy.name());
            report.total_items_removed += removed;

            let status = match self.check_quota().await {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!(error = %e, "quota check failed during cleanup");
                    None
                }
            };
            info!(
                strategy = strategy.name(),
                removed,
                percentage = status.map(|s| s.percentage),
                "cleanup strategy ran"
            );
            on_progress(&CleanupProgress {
                strategy: strategy.name(),
                description: strategy.description(),
                step: i + 1,
                total_steps,
                items_removed: removed,
                percentage: status.map(|s| s.percentage),
            });
            report.final_status = status;

            if status.is_some_and(|s| s.is_recovered(&self.settings)) {
                break;
            }
        }

        report.success = report.final_status.is_some_and(|s| !s.is_full);
        if !report.success {
            warn!(
                strategies = report.strategies_used.len(),
                removed = report.total_items_removed,
                "cache still full after cleanup"
            );
        }
        report
    }

    /// Write `value`; on a quota failure run progressive cleanup and retry
    /// exactly once.
    pub async fn safe_set_item(&self, key: &str, value: &str) -> SafeSetOutcome {
        match self.cache.set_item(key, value).await {
            Ok(()) => return SafeSetOutcome::Stored,
            Err(e) if e.is_quota_exceeded() => {
                warn!(key, error = %e, "cache quota exceeded; running cleanup");
            }
            Err(error) => {
                warn!(key, error = %error, "cache write failed");
                return SafeSetOutcome::Failed {
                    error,
                    cleanup: None,
                };
            }
        }

        let cleanup = self.perform_progressive_cleanup(|_| {}).await;
        match self.cache.set_item(key, value).await {
            Ok(()) => {
                info!(key, removed = cleanup.total_items_removed, "cached after cleanup");
                SafeSetOutcome::StoredAfterCleanup(cleanup)
            }
            Err(error) => {
                warn!(key, error = %error, "cache write failed after cleanup; value not cached");
                SafeSetOutcome::Failed {
                    error,
                    cleanup: Some(cleanup),
                }
            }
        }
    }
}
