//! Page cache control between benchmark runs
//!
//! A cached read of the source makes every candidate after the first look
//! faster than the device really is, so each measured copy starts from a
//! synced, dropped cache.

use crate::error::{Error, Result};
use autodd_platform::DiskOps;

/// What a flush managed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Whether clean caches were dropped after the sync
    pub caches_dropped: bool,
}

/// Sync pending writes, then drop clean caches
///
/// # Errors
///
/// Returns [`Error::CacheFlushFailed`] if the sync fails. A failure to drop
/// caches is only logged.
pub fn flush(disk: &dyn DiskOps) -> Result<FlushOutcome> {
    disk.sync_all()
        .map_err(|e| Error::CacheFlushFailed(format!("sync: {e}")))?;

    match disk.drop_caches() {
        Ok(()) => {
            tracing::debug!("Synced and dropped caches");
            Ok(FlushOutcome {
                caches_dropped: true,
            })
        }
        Err(e) => {
            tracing::warn!(
                "Could not drop caches ({}); cached reads may inflate benchmark results",
                e
            );
            Ok(FlushOutcome {
                caches_dropped: false,
            })
        }
    }
}
