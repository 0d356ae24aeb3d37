//! Hybrid mtime + checksum change detection.
//!
//! Modification times are cheap but noisy: checkouts and rebases touch
//! files without changing their bytes. Checksums are exact but require
//! reading the file. [`ChangeDetector`] uses the mtime to decide whether
//! a checksum is needed at all, and the checksum to decide whether the
//! file really changed. A touched-but-unchanged file gets its stored
//! mtime refreshed so the next run takes the fast path again.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::store::Store;

pub struct ChangeDetector {
    store: Arc<dyn Store>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Decide with an already computed checksum.
    ///
    /// - unknown path: `true`
    /// - checksum differs from the stored one: `true`, whatever the mtime
    /// - same checksum, newer mtime: refresh the stored mtime, `false`
    /// - otherwise: `false`
    pub async fn needs_reindexing(&self, path: &str, checksum: &str, mtime_ms: i64) -> Result<bool> {
        let Some(record) = self.store.get_file_record(path).await? else {
            return Ok(true);
        };
        if record.content_checksum != checksum {
            return Ok(true);
        }
        if mtime_ms > record.last_modified_at {
            self.store.update_file_mtime(path, mtime_ms).await?;
            tracing::debug!(path, "mtime moved but content unchanged");
        }
        Ok(false)
    }

    /// Decide, computing the checksum only when the stat data says the
    /// file may have changed.
    ///
    /// The fast path (`false` without hashing) needs both an mtime no
    /// newer than the stored one and an unchanged size. A checksum that
    /// cannot be computed counts as changed: the file is re-indexed
    /// rather than silently skipped.
    pub async fn needs_reindexing_with<F, Fut>(
        &self,
        path: &str,
        mtime_ms: i64,
        size_bytes: i64,
        compute_checksum: F,
    ) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let Some(record) = self.store.get_file_record(path).await? else {
            return Ok(true);
        };
        if mtime_ms <= record.last_modified_at && size_bytes == record.file_size_bytes {
            return Ok(false);
        }

        let checksum = match compute_checksum().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path, "checksum failed, treating as changed: {}", e);
                return Ok(true);
            }
        };
        if checksum != record.content_checksum {
            return Ok(true);
        }
        if mtime_ms > record.last_modified_at {
            self.store.update_file_mtime(path, mtime_ms).await?;
            tracing::debug!(path, "mtime moved but content unchanged");
        }
        Ok(false)
    }

    /// Active tracked paths missing from `current_paths`, sorted.
    pub async fn detect_deleted_files(&self, current_paths: &HashSet<String>) -> Result<Vec<String>> {
        let tracked = self.store.get_all_tracked_files().await?;
        let mut deleted: Vec<String> = tracked
            .into_keys()
            .filter(|path| !current_paths.contains(path))
            .collect();
        deleted.sort();
        Ok(deleted)
    }
}
