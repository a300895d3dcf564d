//! Local cache layer: key/value backends with a byte quota, the ordered
//! cleanup strategies, and the quota monitor that runs them.

mod error;
pub use error::CacheError;

pub mod keys;

mod backend;
pub use backend::{CacheBackend, CacheEntryMeta, CacheUsage, MemoryCache};

mod dir;
pub use dir::DirCache;

mod cleanup;
pub use cleanup::CleanupStrategy;

mod monitor;
pub use monitor::{CleanupProgress, CleanupReport, QuotaMonitor, QuotaStatus, SafeSetOutcome};

mod watch;
pub use watch::spawn_quota_watch;
