//! In-memory [`Store`] implementation for tests and dry runs.
//!
//! All state lives in one `std::sync::RwLock`, so every operation is
//! atomic with respect to the others. Vector search is brute-force
//! cosine similarity. Backups are JSON dumps.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{
    check_dimensions, codec, rank_hits, DeletedFile, Store, StoreDump, StoreResult, DIMS_SETTING,
};
use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::migrate;
use crate::models::{now_ms, ChunkRecord, FileRecord, IndexMetadata, SearchHit, StoreStats};

#[derive(Default)]
struct State {
    files: HashMap<String, FileRecord>,
    chunks: HashMap<String, ChunkRecord>,
    deleted: HashMap<String, DeletedFile>,
    index: Option<IndexMetadata>,
    settings: BTreeMap<String, String>,
    schema_version: u32,
}

impl State {
    fn pinned(&self) -> StoreResult<Option<usize>> {
        self.settings
            .get(DIMS_SETTING)
            .map(|raw| codec::parse_dims(raw))
            .transpose()
    }

    fn dump(&self) -> StoreDump {
        let mut files: Vec<FileRecord> = self.files.values().cloned().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let mut chunks: Vec<ChunkRecord> = self.chunks.values().cloned().collect();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        let mut deleted_files: Vec<DeletedFile> = self.deleted.values().cloned().collect();
        deleted_files.sort_by(|a, b| a.path.cmp(&b.path));
        StoreDump {
            schema_version: self.schema_version,
            created_at: now_ms(),
            index: self.index.clone(),
            files,
            chunks,
            deleted_files,
            settings: self.settings.clone(),
        }
    }

    fn load(dump: StoreDump) -> Self {
        State {
            files: dump.files.into_iter().map(|f| (f.path.clone(), f)).collect(),
            chunks: dump.chunks.into_iter().map(|c| (c.id.clone(), c)).collect(),
            deleted: dump
                .deleted_files
                .into_iter()
                .map(|d| (d.path.clone(), d))
                .collect(),
            index: dump.index,
            settings: dump.settings,
            schema_version: dump.schema_version,
        }
    }
}

/// In-memory store for tests and `backend = "memory"` runs.
pub struct InMemoryStore {
    state: RwLock<State>,
    backup_dir: Option<PathBuf>,
    initialized: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            backup_dir: None,
            initialized: AtomicBool::new(false),
        }
    }

    /// A store that can write JSON backups into `dir`.
    pub fn with_backup_dir(dir: PathBuf) -> Self {
        Self {
            backup_dir: Some(dir),
            ..Self::new()
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(StoreError::NotInitialized);
        }
        Ok(self.state.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(StoreError::NotInitialized);
        }
        Ok(self.state.write().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn initialize(&self) -> StoreResult<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        // Validates the recorded version the same way the SQL backends do.
        let _ = migrate::pending(state.schema_version)?;
        state.schema_version = migrate::latest_version();
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn schema_version(&self) -> StoreResult<u32> {
        Ok(self.read()?.schema_version)
    }

    async fn get_file_record(&self, path: &str) -> StoreResult<Option<FileRecord>> {
        Ok(self
            .read()?
            .files
            .get(path)
            .filter(|f| !f.is_deleted())
            .cloned())
    }

    async fn set_file_record(
        &self,
        path: &str,
        checksum: &str,
        size: i64,
        mtime: i64,
        chunk_count: i64,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        state.files.insert(
            path.to_string(),
            FileRecord {
                path: path.to_string(),
                content_checksum: checksum.to_string(),
                file_size_bytes: size,
                last_modified_at: mtime,
                last_indexed_at: now_ms(),
                chunk_count,
                deleted_at: None,
            },
        );
        state.deleted.remove(path);
        Ok(())
    }

    async fn update_file_mtime(&self, path: &str, mtime: i64) -> StoreResult<()> {
        let mut state = self.write()?;
        if let Some(rec) = state.files.get_mut(path).filter(|f| !f.is_deleted()) {
            rec.last_modified_at = mtime;
        }
        Ok(())
    }

    async fn get_all_tracked_files(&self) -> StoreResult<HashMap<String, FileRecord>> {
        Ok(self
            .read()?
            .files
            .values()
            .filter(|f| !f.is_deleted())
            .map(|f| (f.path.clone(), f.clone()))
            .collect())
    }

    async fn mark_file_deleted(&self, path: &str) -> StoreResult<()> {
        let now = now_ms();
        let mut state = self.write()?;
        let chunk_count = match state.files.get_mut(path).filter(|f| !f.is_deleted()) {
            Some(rec) => {
                rec.deleted_at = Some(now);
                rec.chunk_count
            }
            None => return Ok(()),
        };
        for chunk in state.chunks.values_mut() {
            if chunk.file_path == path && chunk.deleted_at.is_none() {
                chunk.deleted_at = Some(now);
            }
        }
        state.deleted.insert(
            path.to_string(),
            DeletedFile {
                path: path.to_string(),
                deleted_at: now,
                chunk_count,
                cleaned_up: false,
            },
        );
        Ok(())
    }

    async fn cleanup_deleted_files(&self) -> StoreResult<usize> {
        let mut state = self.write()?;
        let pending: Vec<String> = state
            .deleted
            .values()
            .filter(|d| !d.cleaned_up)
            .map(|d| d.path.clone())
            .collect();
        for path in &pending {
            state.chunks.retain(|_, c| &c.file_path != path);
            if state.files.get(path).map(FileRecord::is_deleted).unwrap_or(false) {
                state.files.remove(path);
            }
            if let Some(entry) = state.deleted.get_mut(path) {
                entry.cleaned_up = true;
            }
        }
        state.chunks.retain(|_, c| c.deleted_at.is_none());
        Ok(pending.len())
    }

    async fn save_chunks(&self, chunks: &[ChunkRecord]) -> StoreResult<()> {
        let mut state = self.write()?;
        check_dimensions(state.pinned()?, chunks)?;
        for chunk in chunks {
            let created_at = state
                .chunks
                .get(&chunk.id)
                .map(|existing| existing.created_at)
                .unwrap_or(chunk.created_at);
            state.chunks.insert(
                chunk.id.clone(),
                ChunkRecord {
                    created_at,
                    deleted_at: None,
                    ..chunk.clone()
                },
            );
        }
        Ok(())
    }

    async fn get_chunks(&self, file_path: &str) -> StoreResult<Vec<ChunkRecord>> {
        let state = self.read()?;
        let pinned = state.pinned()?;
        let mut out: Vec<ChunkRecord> = state
            .chunks
            .values()
            .filter(|c| c.file_path == file_path && c.deleted_at.is_none())
            .cloned()
            .collect();
        if let Some(expected) = pinned {
            if let Some(bad) = out.iter().find(|c| c.embedding.len() != expected) {
                return Err(StoreError::corruption(
                    format!("embedding of chunk {}", bad.id),
                    format!("length {} does not match pinned dimension {}", bad.embedding.len(), expected),
                ));
            }
        }
        out.sort_by(|a, b| {
            a.start_line
                .cmp(&b.start_line)
                .then(a.end_line.cmp(&b.end_line))
        });
        Ok(out)
    }

    async fn delete_chunks(&self, file_path: &str) -> StoreResult<()> {
        let now = now_ms();
        let mut state = self.write()?;
        for chunk in state.chunks.values_mut() {
            if chunk.file_path == file_path && chunk.deleted_at.is_none() {
                chunk.deleted_at = Some(now);
            }
        }
        Ok(())
    }

    async fn save_index(&self, metadata: &IndexMetadata) -> StoreResult<()> {
        self.write()?.index = Some(metadata.clone());
        Ok(())
    }

    async fn load_index(&self) -> StoreResult<Option<IndexMetadata>> {
        Ok(self.read()?.index.clone())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let state = self.read()?;
        Ok(StoreStats {
            active_files: state.files.values().filter(|f| !f.is_deleted()).count() as i64,
            active_chunks: state.chunks.values().filter(|c| c.deleted_at.is_none()).count() as i64,
            pending_cleanup: state.deleted.values().filter(|d| !d.cleaned_up).count() as i64,
        })
    }

    async fn pinned_dimension(&self) -> StoreResult<Option<usize>> {
        self.read()?.pinned()
    }

    async fn pin_dimension(&self, dims: usize) -> StoreResult<()> {
        let mut state = self.write()?;
        match state.pinned()? {
            Some(expected) if expected != dims => Err(StoreError::DimensionMismatch {
                expected,
                actual: dims,
            }),
            Some(_) => Ok(()),
            None => {
                state
                    .settings
                    .insert(DIMS_SETTING.to_string(), dims.to_string());
                Ok(())
            }
        }
    }

    async fn search(&self, query: &[f32], limit: usize) -> StoreResult<Vec<SearchHit>> {
        let state = self.read()?;
        if let Some(expected) = state.pinned()? {
            if query.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }
        let hits = state
            .chunks
            .values()
            .filter(|c| c.deleted_at.is_none())
            .map(|c| SearchHit {
                chunk_id: c.id.clone(),
                file_path: c.file_path.clone(),
                start_line: c.start_line,
                end_line: c.end_line,
                language: c.language.clone(),
                name: c.name.clone(),
                score: cosine_similarity(query, &c.embedding),
                content: c.content.clone(),
            })
            .collect();
        Ok(rank_hits(hits, limit))
    }

    async fn create_backup(&self) -> StoreResult<PathBuf> {
        let dump = self.read()?.dump();
        let dir = self
            .backup_dir
            .as_deref()
            .ok_or_else(|| StoreError::Backup("no backup directory configured".to_string()))?;
        let path = dump.write(dir).await?;
        tracing::info!(path = %path.display(), "created backup");
        Ok(path)
    }

    async fn restore_backup(&self, path: &Path) -> StoreResult<()> {
        let current_version = self.read()?.schema_version;
        let dump = StoreDump::read(path).await?;
        if dump.schema_version != current_version {
            return Err(StoreError::Backup(format!(
                "backup schema version {} does not match store version {}",
                dump.schema_version, current_version
            )));
        }
        self.create_backup().await?;
        *self.write()? = State::load(dump);
        tracing::info!(path = %path.display(), "restored backup");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing;

    async fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_requires_initialization() {
        testing::requires_initialization(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_initialize_sets_latest_version() {
        let store = InMemoryStore::new();
        store.initialize().await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), migrate::latest_version());
    }

    #[tokio::test]
    async fn test_file_records() {
        testing::file_record_lifecycle(&store().await).await;
    }

    #[tokio::test]
    async fn test_chunks() {
        testing::chunk_lifecycle(&store().await).await;
    }

    #[tokio::test]
    async fn test_deletion() {
        testing::deletion_round_trip(&store().await).await;
    }

    #[tokio::test]
    async fn test_reappearing_file() {
        testing::reappearing_file_is_not_purged(&store().await).await;
    }

    #[tokio::test]
    async fn test_index_metadata() {
        testing::index_metadata_round_trip(&store().await).await;
    }

    #[tokio::test]
    async fn test_dimension_pinning() {
        testing::dimension_pinning(&store().await).await;
    }

    #[tokio::test]
    async fn test_search() {
        testing::search_ranks_active_chunks(&store().await).await;
    }

    #[tokio::test]
    async fn test_backup_restore() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::with_backup_dir(dir.path().to_path_buf());
        store.initialize().await.unwrap();
        testing::backup_and_restore(&store).await;
    }

    #[tokio::test]
    async fn test_backup_without_dir_fails() {
        assert!(matches!(
            store().await.create_backup().await,
            Err(StoreError::Backup(_))
        ));
    }
}
