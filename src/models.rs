//! Core data models persisted by the store and passed through the
//! indexing pipeline.
//!
//! All timestamps are Unix epoch milliseconds.

use serde::{Deserialize, Serialize};

/// Per-file change-detection record. Primary key is `path`, relative to
/// the indexed root and `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    /// Hex SHA-256 of the file bytes as of `last_indexed_at`.
    pub content_checksum: String,
    pub file_size_bytes: i64,
    /// Filesystem mtime observed for the file.
    pub last_modified_at: i64,
    pub last_indexed_at: i64,
    pub chunk_count: i64,
    pub deleted_at: Option<i64>,
}

impl FileRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// One embedded unit of source code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Content-addressed id, see [`crate::checksum::chunk_checksum`].
    pub id: String,
    pub file_path: String,
    pub content: String,
    pub start_line: i64,
    pub end_line: i64,
    pub language: String,
    pub chunk_type: String,
    pub name: Option<String>,
    pub signature: Option<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub embedding: Vec<f32>,
    /// SHA-256 of `content` alone.
    pub checksum: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

/// The single metadata row describing an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub index_id: String,
    pub schema_version: u32,
    pub files_indexed: i64,
    pub chunks_indexed: i64,
    /// Version of the crate that last wrote the index.
    pub version: String,
    pub last_updated_at: i64,
}

/// Active row counts, recomputed from the store on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub active_files: i64,
    pub active_chunks: i64,
    /// Soft-deleted files whose chunks have not been purged yet.
    pub pending_cleanup: i64,
}

/// A ranked chunk returned from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub language: String,
    pub name: Option<String>,
    pub score: f32,
    pub content: String,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
