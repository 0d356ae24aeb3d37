//! Embedded SQLite backend.
//!
//! One database file in WAL mode. Multi-statement operations run inside
//! a transaction; backups use `VACUUM INTO` and restores copy tables in
//! from an attached backup file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::codec::{self, decode_embedding, decode_list, decode_metadata, encode_embedding, encode_list};
use super::{check_dimensions, rank_hits, sql, Store, StoreResult, DIMS_SETTING};
use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::migrate;
use crate::models::{now_ms, ChunkRecord, FileRecord, IndexMetadata, SearchHit, StoreStats};

pub struct SqliteStore {
    pool: SqlitePool,
    backup_dir: PathBuf,
    initialized: AtomicBool,
}

impl SqliteStore {
    /// Connect to (or create) the database. Call [`Store::initialize`]
    /// before use.
    pub async fn open(db_path: &Path, backup_dir: PathBuf) -> StoreResult<Self> {
        let pool = crate::db::connect(db_path).await?;
        Ok(Self {
            pool,
            backup_dir,
            initialized: AtomicBool::new(false),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn ensure_initialized(&self) -> StoreResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    async fn read_pinned(&self) -> StoreResult<Option<usize>> {
        let value: Option<String> = sqlx::query_scalar(sql::GET_SETTING)
            .bind(DIMS_SETTING)
            .fetch_optional(&self.pool)
            .await?;
        value.as_deref().map(codec::parse_dims).transpose()
    }
}

fn file_from_row(row: &SqliteRow) -> FileRecord {
    FileRecord {
        path: row.get("path"),
        content_checksum: row.get("checksum"),
        file_size_bytes: row.get("file_size"),
        last_modified_at: row.get("last_modified"),
        last_indexed_at: row.get("last_indexed"),
        chunk_count: row.get("chunk_count"),
        deleted_at: row.get("deleted_at"),
    }
}

fn chunk_from_row(row: &SqliteRow, pinned: Option<usize>) -> StoreResult<ChunkRecord> {
    let id: String = row.get("id");
    let symbols: Option<String> = row.get("symbols");
    let dependencies: Option<String> = row.get("dependencies");
    let exports: Option<String> = row.get("exports");
    let imports: Option<String> = row.get("imports");
    let metadata: Option<String> = row.get("metadata");
    let embedding: String = row.get("embedding");

    Ok(ChunkRecord {
        file_path: row.get("file_path"),
        content: row.get("content"),
        start_line: row.get("start_line"),
        end_line: row.get("end_line"),
        language: row.get("language"),
        chunk_type: row.get("chunk_type"),
        name: row.get("name"),
        signature: row.get("signature"),
        symbols: decode_list(&id, "symbols", symbols.as_deref())?,
        dependencies: decode_list(&id, "dependencies", dependencies.as_deref())?,
        exports: decode_list(&id, "exports", exports.as_deref())?,
        imports: decode_list(&id, "imports", imports.as_deref())?,
        metadata: decode_metadata(&id, metadata.as_deref())?,
        embedding: decode_embedding(&id, &embedding, pinned)?,
        checksum: row.get("checksum"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
        id,
    })
}

/// (table, columns) copied by a restore.
const RESTORE_COLUMNS: &[(&str, &str)] = &[
    (
        "index_metadata",
        "id, index_id, version, files_indexed, chunks_indexed, last_updated, schema_version",
    ),
    ("indexed_files", sql::FILE_COLUMNS),
    ("code_chunks", sql::CHUNK_COLUMNS),
    ("deleted_files", "path, deleted_at, chunk_count, cleaned_up"),
    ("index_settings", "key, value"),
];

#[async_trait]
impl Store for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn initialize(&self) -> StoreResult<()> {
        let version = migrate::run_sqlite_migrations(&self.pool).await?;
        tracing::debug!(version, "sqlite store ready");
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn schema_version(&self) -> StoreResult<u32> {
        self.ensure_initialized()?;
        let version: i64 = sqlx::query_scalar(migrate::CURRENT_VERSION_SQL)
            .fetch_one(&self.pool)
            .await?;
        Ok(version as u32)
    }

    async fn get_file_record(&self, path: &str) -> StoreResult<Option<FileRecord>> {
        self.ensure_initialized()?;
        let row = sqlx::query(sql::GET_FILE)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(file_from_row))
    }

    async fn set_file_record(
        &self,
        path: &str,
        checksum: &str,
        size: i64,
        mtime: i64,
        chunk_count: i64,
    ) -> StoreResult<()> {
        self.ensure_initialized()?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(sql::UPSERT_FILE)
            .bind(path)
            .bind(checksum)
            .bind(size)
            .bind(mtime)
            .bind(now_ms())
            .bind(chunk_count)
            .execute(&mut *tx)
            .await?;
        sqlx::query(sql::FORGET_DELETION)
            .bind(path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_file_mtime(&self, path: &str, mtime: i64) -> StoreResult<()> {
        self.ensure_initialized()?;
        sqlx::query(sql::UPDATE_MTIME)
            .bind(mtime)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all_tracked_files(&self) -> StoreResult<HashMap<String, FileRecord>> {
        self.ensure_initialized()?;
        let rows = sqlx::query(sql::ALL_ACTIVE_FILES)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(file_from_row)
            .map(|rec| (rec.path.clone(), rec))
            .collect())
    }

    async fn mark_file_deleted(&self, path: &str) -> StoreResult<()> {
        self.ensure_initialized()?;
        let now = now_ms();
        let mut tx = self.pool.begin().await?;
        sqlx::query(sql::QUEUE_DELETION)
            .bind(now)
            .bind(path)
            .execute(&mut *tx)
            .await?;
        let updated = sqlx::query(sql::SOFT_DELETE_FILE)
            .bind(now)
            .bind(path)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated > 0 {
            sqlx::query(sql::SOFT_DELETE_CHUNKS)
                .bind(now)
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn cleanup_deleted_files(&self) -> StoreResult<usize> {
        self.ensure_initialized()?;
        let mut tx = self.pool.begin().await?;
        let paths: Vec<String> = sqlx::query_scalar(sql::PENDING_DELETIONS)
            .fetch_all(&mut *tx)
            .await?;
        for path in &paths {
            sqlx::query(sql::PURGE_FILE_CHUNKS)
                .bind(path)
                .execute(&mut *tx)
                .await?;
            sqlx::query(sql::PURGE_FILE)
                .bind(path)
                .execute(&mut *tx)
                .await?;
            sqlx::query(sql::MARK_CLEANED)
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }
        let replaced = sqlx::query(sql::PURGE_REPLACED_CHUNKS)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        if !paths.is_empty() || replaced > 0 {
            tracing::info!(files = paths.len(), replaced_chunks = replaced, "purged deleted rows");
        }
        Ok(paths.len())
    }

    async fn save_chunks(&self, chunks: &[ChunkRecord]) -> StoreResult<()> {
        self.ensure_initialized()?;
        if chunks.is_empty() {
            return Ok(());
        }
        check_dimensions(self.read_pinned().await?, chunks)?;

        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(sql::UPSERT_CHUNK)
                .bind(&chunk.id)
                .bind(&chunk.file_path)
                .bind(&chunk.content)
                .bind(chunk.start_line)
                .bind(chunk.end_line)
                .bind(&chunk.language)
                .bind(&chunk.chunk_type)
                .bind(&chunk.name)
                .bind(&chunk.signature)
                .bind(encode_list(&chunk.symbols))
                .bind(encode_list(&chunk.dependencies))
                .bind(encode_list(&chunk.exports))
                .bind(encode_list(&chunk.imports))
                .bind(chunk.metadata.to_string())
                .bind(encode_embedding(&chunk.embedding))
                .bind(&chunk.checksum)
                .bind(chunk.created_at)
                .bind(chunk.updated_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_chunks(&self, file_path: &str) -> StoreResult<Vec<ChunkRecord>> {
        self.ensure_initialized()?;
        let pinned = self.read_pinned().await?;
        let rows = sqlx::query(sql::ACTIVE_CHUNKS_FOR_FILE)
            .bind(file_path)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| chunk_from_row(row, pinned)).collect()
    }

    async fn delete_chunks(&self, file_path: &str) -> StoreResult<()> {
        self.ensure_initialized()?;
        sqlx::query(sql::SOFT_DELETE_CHUNKS)
            .bind(now_ms())
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_index(&self, metadata: &IndexMetadata) -> StoreResult<()> {
        self.ensure_initialized()?;
        sqlx::query(sql::UPSERT_INDEX)
            .bind(&metadata.index_id)
            .bind(&metadata.version)
            .bind(metadata.files_indexed)
            .bind(metadata.chunks_indexed)
            .bind(metadata.last_updated_at)
            .bind(metadata.schema_version as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_index(&self) -> StoreResult<Option<IndexMetadata>> {
        self.ensure_initialized()?;
        let row = sqlx::query(sql::LOAD_INDEX)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| {
            let schema_version: i64 = row.get("schema_version");
            IndexMetadata {
                index_id: row.get("index_id"),
                schema_version: schema_version as u32,
                files_indexed: row.get("files_indexed"),
                chunks_indexed: row.get("chunks_indexed"),
                version: row.get("version"),
                last_updated_at: row.get("last_updated"),
            }
        }))
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        self.ensure_initialized()?;
        let row = sqlx::query(sql::STATS).fetch_one(&self.pool).await?;
        Ok(StoreStats {
            active_files: row.get("active_files"),
            active_chunks: row.get("active_chunks"),
            pending_cleanup: row.get("pending_cleanup"),
        })
    }

    async fn pinned_dimension(&self) -> StoreResult<Option<usize>> {
        self.ensure_initialized()?;
        self.read_pinned().await
    }

    async fn pin_dimension(&self, dims: usize) -> StoreResult<()> {
        self.ensure_initialized()?;
        sqlx::query(sql::INSERT_SETTING)
            .bind(DIMS_SETTING)
            .bind(dims.to_string())
            .execute(&self.pool)
            .await?;
        match self.read_pinned().await? {
            Some(expected) if expected != dims => Err(StoreError::DimensionMismatch {
                expected,
                actual: dims,
            }),
            _ => Ok(()),
        }
    }

    async fn search(&self, query: &[f32], limit: usize) -> StoreResult<Vec<SearchHit>> {
        self.ensure_initialized()?;
        let pinned = self.read_pinned().await?;
        if let Some(expected) = pinned {
            if query.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(sql::SEARCH_CANDIDATES)
            .fetch_all(&self.pool)
            .await?;
        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let raw: String = row.get("embedding");
            let vector = decode_embedding(&id, &raw, pinned)?;
            hits.push(SearchHit {
                score: cosine_similarity(query, &vector),
                file_path: row.get("file_path"),
                start_line: row.get("start_line"),
                end_line: row.get("end_line"),
                language: row.get("language"),
                name: row.get("name"),
                content: row.get("content"),
                chunk_id: id,
            });
        }
        Ok(rank_hits(hits, limit))
    }

    async fn create_backup(&self) -> StoreResult<PathBuf> {
        self.ensure_initialized()?;
        std::fs::create_dir_all(&self.backup_dir)?;
        let path = codec::backup_path(&self.backup_dir, "sqlite");
        sqlx::query("VACUUM INTO ?")
            .bind(path.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backup(format!("VACUUM INTO {}: {}", path.display(), e)))?;
        tracing::info!(path = %path.display(), "created backup");
        Ok(path)
    }

    async fn restore_backup(&self, path: &Path) -> StoreResult<()> {
        self.ensure_initialized()?;
        if !path.is_file() {
            return Err(StoreError::Backup(format!(
                "backup {} does not exist",
                path.display()
            )));
        }

        let version = self.schema_version().await?;
        let snapshot = self.create_backup().await?;
        tracing::info!(snapshot = %snapshot.display(), "saved pre-restore snapshot");

        // ATTACH is per connection, so the whole restore stays on one.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("ATTACH DATABASE ? AS restore_src")
            .bind(path.to_string_lossy().into_owned())
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Backup(format!("cannot open {}: {}", path.display(), e)))?;

        let result = copy_from_attached(&mut conn, version).await;

        if let Err(e) = sqlx::query("DETACH DATABASE restore_src")
            .execute(&mut *conn)
            .await
        {
            tracing::warn!("failed to detach restore source: {}", e);
        }
        result?;
        tracing::info!(path = %path.display(), "restored backup");
        Ok(())
    }
}

async fn copy_from_attached(
    conn: &mut sqlx::pool::PoolConnection<sqlx::Sqlite>,
    expected_version: u32,
) -> StoreResult<()> {
    let backup_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM restore_src.schema_migrations")
            .fetch_one(&mut **conn)
            .await
            .map_err(|e| StoreError::Backup(format!("not an index backup: {}", e)))?;
    if backup_version as u32 != expected_version {
        return Err(StoreError::Backup(format!(
            "backup schema version {} does not match store version {}",
            backup_version, expected_version
        )));
    }

    let mut tx = sqlx::Connection::begin(&mut **conn).await?;
    for table in sql::DATA_TABLES {
        sqlx::query(&format!("DELETE FROM main.{}", table))
            .execute(&mut *tx)
            .await?;
    }
    for (table, columns) in RESTORE_COLUMNS {
        sqlx::query(&format!(
            "INSERT INTO main.{table} ({columns}) SELECT {columns} FROM restore_src.{table}"
        ))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
