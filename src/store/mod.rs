//! Storage abstraction for the index.
//!
//! The [`Store`] trait is the only thing the change detector and the
//! indexer talk to. Three backends implement it with identical behaviour:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteStore`] | embedded local store (WAL, single machine) |
//! | [`RemoteStore`] | SQL gateway over HTTPS (serverless / multi-writer) |
//! | [`InMemoryStore`] | tests and throwaway runs |
//!
//! Every operation on a store that has not been [`initialize`](Store::initialize)d
//! fails with [`StoreError::NotInitialized`]. Initialization applies
//! pending schema migrations; a failed migration is fatal.
//!
//! Deletion is two-phase: [`mark_file_deleted`](Store::mark_file_deleted)
//! soft-deletes a file and its chunks, and
//! [`cleanup_deleted_files`](Store::cleanup_deleted_files) purges them later.

mod codec;
pub mod memory;
pub mod remote;
mod sql;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use remote::RemoteStore;
pub use sqlite::SqliteStore;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{DbConfig, StoreBackend};
use crate::error::StoreError;
use crate::models::{ChunkRecord, FileRecord, IndexMetadata, SearchHit, StoreStats};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Settings key holding the pinned embedding dimension.
pub(crate) const DIMS_SETTING: &str = "embedding_dims";

#[async_trait]
pub trait Store: Send + Sync {
    /// `"sqlite"`, `"remote"`, or `"memory"`.
    fn backend_name(&self) -> &'static str;

    /// Apply pending migrations and mark the store usable. Idempotent.
    async fn initialize(&self) -> StoreResult<()>;

    /// Latest applied migration version.
    async fn schema_version(&self) -> StoreResult<u32>;

    /// Active (not soft-deleted) record for `path`.
    async fn get_file_record(&self, path: &str) -> StoreResult<Option<FileRecord>>;

    /// Upsert after a genuine (re)index: stamps `last_indexed_at` with the
    /// current time, clears any soft-delete marker, and drops the path
    /// from the pending-cleanup set.
    async fn set_file_record(
        &self,
        path: &str,
        checksum: &str,
        size: i64,
        mtime: i64,
        chunk_count: i64,
    ) -> StoreResult<()>;

    /// Refresh only the stored mtime of an active record whose content is
    /// unchanged. Checksum and `last_indexed_at` are left alone.
    async fn update_file_mtime(&self, path: &str, mtime: i64) -> StoreResult<()>;

    /// All active records keyed by path.
    async fn get_all_tracked_files(&self) -> StoreResult<HashMap<String, FileRecord>>;

    /// Soft delete: the file leaves the active set, its chunks are
    /// soft-deleted, and it is queued for cleanup with its chunk count.
    /// Unknown or already-deleted paths are a no-op.
    async fn mark_file_deleted(&self, path: &str) -> StoreResult<()>;

    /// Hard-purge files queued by [`mark_file_deleted`](Store::mark_file_deleted)
    /// along with their chunks, plus any chunk rows soft-deleted by
    /// re-indexing. Returns the number of files cleaned; a second call
    /// returns 0.
    async fn cleanup_deleted_files(&self) -> StoreResult<usize>;

    /// Upsert one chunk by id.
    async fn save_chunk(&self, chunk: &ChunkRecord) -> StoreResult<()> {
        self.save_chunks(std::slice::from_ref(chunk)).await
    }

    /// Upsert chunks atomically. Rejects vectors that do not match the
    /// pinned dimension. Re-saving a soft-deleted id revives it.
    async fn save_chunks(&self, chunks: &[ChunkRecord]) -> StoreResult<()>;

    /// Active chunks of a file ordered by `start_line`.
    async fn get_chunks(&self, file_path: &str) -> StoreResult<Vec<ChunkRecord>>;

    /// Soft-delete every active chunk of a file.
    async fn delete_chunks(&self, file_path: &str) -> StoreResult<()>;

    async fn save_index(&self, metadata: &IndexMetadata) -> StoreResult<()>;

    async fn load_index(&self) -> StoreResult<Option<IndexMetadata>>;

    /// Active counts computed from the stored rows.
    async fn stats(&self) -> StoreResult<StoreStats>;

    async fn pinned_dimension(&self) -> StoreResult<Option<usize>>;

    /// Pin the embedding dimension. Pinning the same value again is a
    /// no-op; a different value fails with [`StoreError::DimensionMismatch`].
    async fn pin_dimension(&self, dims: usize) -> StoreResult<()>;

    /// Top `limit` active chunks by cosine similarity to `query`.
    async fn search(&self, query: &[f32], limit: usize) -> StoreResult<Vec<SearchHit>>;

    /// Write a full point-in-time copy and return its path.
    async fn create_backup(&self) -> StoreResult<PathBuf>;

    /// Replace the store contents with a backup. The current state is
    /// snapshotted first, so a restore can itself be undone.
    async fn restore_backup(&self, path: &Path) -> StoreResult<()>;

    /// Active paths, sorted.
    async fn tracked_paths(&self) -> StoreResult<Vec<String>> {
        let mut paths: Vec<String> = self.get_all_tracked_files().await?.into_keys().collect();
        paths.sort();
        Ok(paths)
    }
}

/// Construct the configured backend. The store still needs
/// [`Store::initialize`].
pub async fn open_store(config: &DbConfig) -> StoreResult<Arc<dyn Store>> {
    let backup_dir = config.backup_dir();
    match config.backend {
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&config.path, backup_dir).await?)),
        StoreBackend::Remote => {
            let remote = config
                .remote
                .as_ref()
                .ok_or_else(|| StoreError::Remote("missing [db.remote] configuration".to_string()))?;
            let token = std::env::var(&remote.token_env).map_err(|_| {
                StoreError::Remote(format!("{} environment variable not set", remote.token_env))
            })?;
            Ok(Arc::new(RemoteStore::new(
                &remote.endpoint,
                token,
                std::time::Duration::from_secs(remote.timeout_secs),
                backup_dir,
            )?))
        }
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::with_backup_dir(backup_dir))),
    }
}

/// Soft-deleted file awaiting (or past) cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedFile {
    pub path: String,
    pub deleted_at: i64,
    pub chunk_count: i64,
    pub cleaned_up: bool,
}

/// Portable JSON image of a store, used for memory and remote backups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreDump {
    pub schema_version: u32,
    pub created_at: i64,
    pub index: Option<IndexMetadata>,
    pub files: Vec<FileRecord>,
    pub chunks: Vec<ChunkRecord>,
    pub deleted_files: Vec<DeletedFile>,
    pub settings: BTreeMap<String, String>,
}

impl StoreDump {
    pub(crate) async fn write(&self, dir: &Path) -> StoreResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = codec::backup_path(dir, "json");
        let bytes = serde_json::to_vec(self)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    pub(crate) async fn read(path: &Path) -> StoreResult<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            StoreError::Backup(format!("cannot read backup {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::corruption(format!("backup {}", path.display()), e))
    }
}

pub(crate) fn check_dimensions(pinned: Option<usize>, chunks: &[ChunkRecord]) -> StoreResult<()> {
    for chunk in chunks {
        if chunk.embedding.is_empty() {
            return Err(StoreError::corruption(
                format!("chunk {}", chunk.id),
                "embedding is empty",
            ));
        }
        if let Some(expected) = pinned {
            if chunk.embedding.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: chunk.embedding.len(),
                });
            }
        }
    }
    Ok(())
}

pub(crate) fn rank_hits(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(limit);
    hits
}

#[cfg(test)]
pub(crate) mod testing {
    //! Behaviour every backend must share; each backend's tests call in.

    use super::*;
    use crate::models::now_ms;

    pub fn chunk(path: &str, start: i64, text: &str, embedding: Vec<f32>) -> ChunkRecord {
        let now = now_ms();
        ChunkRecord {
            id: crate::checksum::chunk_checksum(path, text, start, start + 1),
            file_path: path.to_string(),
            content: text.to_string(),
            start_line: start,
            end_line: start + 1,
            language: "rust".to_string(),
            chunk_type: "block".to_string(),
            name: None,
            signature: None,
            symbols: vec!["main".to_string()],
            dependencies: Vec::new(),
            exports: Vec::new(),
            imports: vec!["use std::io;".to_string()],
            metadata: serde_json::json!({}),
            embedding,
            checksum: crate::checksum::checksum(text.as_bytes()),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub async fn file_record_lifecycle(store: &dyn Store) {
        assert!(store.get_file_record("a.rs").await.unwrap().is_none());
        store.set_file_record("a.rs", "c1", 10, 1_000, 2).await.unwrap();
        let rec = store.get_file_record("a.rs").await.unwrap().unwrap();
        assert_eq!(rec.content_checksum, "c1");
        assert_eq!(rec.last_modified_at, 1_000);
        assert_eq!(rec.chunk_count, 2);
        assert!(rec.last_indexed_at > 0);
        assert!(rec.deleted_at.is_none());

        store.update_file_mtime("a.rs", 2_000).await.unwrap();
        let touched = store.get_file_record("a.rs").await.unwrap().unwrap();
        assert_eq!(touched.last_modified_at, 2_000);
        assert_eq!(touched.content_checksum, "c1");
        assert_eq!(touched.last_indexed_at, rec.last_indexed_at);

        store.set_file_record("b.rs", "c2", 5, 1_000, 1).await.unwrap();
        assert_eq!(store.tracked_paths().await.unwrap(), vec!["a.rs", "b.rs"]);
    }

    pub async fn chunk_lifecycle(store: &dyn Store) {
        let late = chunk("a.rs", 20, "fn late() {}", vec![0.0, 1.0]);
        let early = chunk("a.rs", 1, "fn early() {}", vec![1.0, 0.0]);
        store.save_chunks(&[late.clone(), early.clone()]).await.unwrap();

        let chunks = store.get_chunks("a.rs").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, early.id);
        assert_eq!(chunks[1].id, late.id);
        assert_eq!(chunks[0].symbols, vec!["main".to_string()]);
        assert_eq!(chunks[0].embedding, vec![1.0, 0.0]);

        store.delete_chunks("a.rs").await.unwrap();
        assert!(store.get_chunks("a.rs").await.unwrap().is_empty());

        // Same content-addressed id comes back to life on re-save.
        store.save_chunk(&early).await.unwrap();
        let revived = store.get_chunks("a.rs").await.unwrap();
        assert_eq!(revived.len(), 1);
        assert_eq!(revived[0].id, early.id);
    }

    pub async fn deletion_round_trip(store: &dyn Store) {
        store.set_file_record("gone.rs", "c", 3, 1, 1).await.unwrap();
        store
            .save_chunk(&chunk("gone.rs", 1, "fn gone() {}", vec![1.0, 0.0]))
            .await
            .unwrap();

        store.mark_file_deleted("gone.rs").await.unwrap();
        assert!(store.get_file_record("gone.rs").await.unwrap().is_none());
        assert!(!store.get_all_tracked_files().await.unwrap().contains_key("gone.rs"));
        assert!(store.get_chunks("gone.rs").await.unwrap().is_empty());
        assert_eq!(store.stats().await.unwrap().pending_cleanup, 1);

        // Marking twice or marking an unknown path changes nothing.
        store.mark_file_deleted("gone.rs").await.unwrap();
        store.mark_file_deleted("never-seen.rs").await.unwrap();

        assert_eq!(store.cleanup_deleted_files().await.unwrap(), 1);
        assert_eq!(store.cleanup_deleted_files().await.unwrap(), 0);
        assert_eq!(store.stats().await.unwrap().pending_cleanup, 0);
        assert_eq!(store.stats().await.unwrap().active_chunks, 0);
    }

    pub async fn reappearing_file_is_not_purged(store: &dyn Store) {
        store.set_file_record("back.rs", "c", 3, 1, 1).await.unwrap();
        store.mark_file_deleted("back.rs").await.unwrap();
        store.set_file_record("back.rs", "c2", 3, 2, 1).await.unwrap();
        store
            .save_chunk(&chunk("back.rs", 1, "fn back() {}", vec![1.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(store.cleanup_deleted_files().await.unwrap(), 0);
        assert!(store.get_file_record("back.rs").await.unwrap().is_some());
        assert_eq!(store.get_chunks("back.rs").await.unwrap().len(), 1);
    }

    pub async fn index_metadata_round_trip(store: &dyn Store) {
        assert!(store.load_index().await.unwrap().is_none());
        let meta = IndexMetadata {
            index_id: "idx-1".to_string(),
            schema_version: store.schema_version().await.unwrap(),
            files_indexed: 3,
            chunks_indexed: 7,
            version: "0.3.0".to_string(),
            last_updated_at: 42,
        };
        store.save_index(&meta).await.unwrap();
        assert_eq!(store.load_index().await.unwrap(), Some(meta.clone()));

        let updated = IndexMetadata {
            files_indexed: 4,
            ..meta
        };
        store.save_index(&updated).await.unwrap();
        assert_eq!(store.load_index().await.unwrap().unwrap().files_indexed, 4);
    }

    pub async fn dimension_pinning(store: &dyn Store) {
        assert_eq!(store.pinned_dimension().await.unwrap(), None);
        store.pin_dimension(2).await.unwrap();
        store.pin_dimension(2).await.unwrap();
        assert!(matches!(
            store.pin_dimension(3).await,
            Err(StoreError::DimensionMismatch { .. })
        ));
        let wrong = chunk("a.rs", 1, "fn a() {}", vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            store.save_chunk(&wrong).await,
            Err(StoreError::DimensionMismatch { .. })
        ));
    }

    pub async fn search_ranks_active_chunks(store: &dyn Store) {
        store
            .save_chunks(&[
                chunk("a.rs", 1, "fn x() {}", vec![1.0, 0.0]),
                chunk("a.rs", 5, "fn y() {}", vec![0.0, 1.0]),
                chunk("b.rs", 1, "fn z() {}", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();
        store.delete_chunks("b.rs").await.unwrap();

        let hits = store.search(&[1.0, 0.1], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "fn x() {}");
        assert!(hits[0].score > hits[1].score);

        assert_eq!(store.search(&[1.0, 0.1], 1).await.unwrap().len(), 1);
    }

    pub async fn backup_and_restore(store: &dyn Store) {
        store.set_file_record("keep.rs", "c", 1, 1, 1).await.unwrap();
        store
            .save_chunk(&chunk("keep.rs", 1, "fn keep() {}", vec![1.0, 0.0]))
            .await
            .unwrap();
        let backup = store.create_backup().await.unwrap();
        assert!(backup.exists());

        store.set_file_record("later.rs", "c", 1, 1, 1).await.unwrap();
        store.mark_file_deleted("keep.rs").await.unwrap();

        store.restore_backup(&backup).await.unwrap();
        assert_eq!(store.tracked_paths().await.unwrap(), vec!["keep.rs"]);
        assert_eq!(store.get_chunks("keep.rs").await.unwrap().len(), 1);

        // The pre-restore state was snapshotted next to the backup.
        let dir = backup.parent().unwrap();
        let snapshots = std::fs::read_dir(dir).unwrap().count();
        assert!(snapshots >= 2);
    }

    pub async fn requires_initialization(store: &dyn Store) {
        assert!(matches!(
            store.get_file_record("a.rs").await,
            Err(StoreError::NotInitialized)
        ));
        assert!(matches!(
            store.save_chunks(&[]).await,
            Err(StoreError::NotInitialized)
        ));
        assert!(matches!(
            store.create_backup().await,
            Err(StoreError::NotInitialized)
        ));
    }
}
