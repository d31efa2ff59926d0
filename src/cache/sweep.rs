//! Expiry sweeping
//!
//! Deletes every artifact older than the retention window it was written
//! with. The registry runs one sweep when it is opened; there is no timer, so
//! long-running processes re-sweep by calling
//! [`CacheRegistry::delete_old_disk_caches`](crate::CacheRegistry::delete_old_disk_caches).

use crate::cache::store::{remove_artifact, ArtifactEntry, ArtifactStore};
use crate::error::CacheResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Stale or unreadable artifacts removed
    pub deleted: usize,
    /// Artifacts still within their window
    pub kept: usize,
    /// Artifacts that should have been removed but could not be
    pub failed: usize,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} deleted, {} kept, {} failed",
            self.deleted, self.kept, self.failed
        )
    }
}

/// Remove every artifact that is stale at `now`
///
/// A failure to open or delete one artifact or function directory is logged
/// and counted; the sweep carries on with the rest. Only failing to read the
/// store root is an error.
pub fn sweep(store: &ArtifactStore, now: DateTime<Utc>) -> CacheResult<SweepReport> {
    let report = sweep_entries(store.list_all()?, now);

    if report.deleted > 0 {
        store.prune_function_dirs();
    }

    debug!("Sweep of {} finished: {}", store.root().display(), report);
    Ok(report)
}

fn sweep_entries(entries: Vec<ArtifactEntry>, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();

    for entry in entries {
        match &entry {
            ArtifactEntry::Valid(meta) if !meta.retention.is_stale(meta.created_at, now) => {
                report.kept += 1;
                continue;
            }
            ArtifactEntry::Valid(meta) => {
                info!(
                    "Removing stale cache file {}, > {} days",
                    meta.path.display(),
                    meta.retention.n_days()
                );
            }
            ArtifactEntry::Corrupt { path, reason } => {
                info!("Removing unreadable cache file {}: {}", path.display(), reason);
            }
            ArtifactEntry::Inaccessible { path, reason } => {
                warn!("Cannot sweep {}: {}", path.display(), reason);
                report.failed += 1;
                continue;
            }
        }

        match remove_artifact(entry.path()) {
            Ok(true) => report.deleted += 1,
            Ok(false) => debug!("{} was already removed", entry.path().display()),
            Err(e) => {
                warn!("{}", e);
                report.failed += 1;
            }
        }
    }

    report
}
