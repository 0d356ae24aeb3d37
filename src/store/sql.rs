//! Statements shared by the SQLite and remote backends. Both speak the
//! SQLite dialect; parameters are positional `?`.

pub(crate) const FILE_COLUMNS: &str =
    "path, checksum, file_size, last_modified, last_indexed, chunk_count, deleted_at";

pub(crate) const CHUNK_COLUMNS: &str = "id, file_path, content, start_line, end_line, language, \
    chunk_type, name, signature, symbols, dependencies, exports, imports, metadata, embedding, \
    checksum, created_at, updated_at, deleted_at";

pub(crate) const GET_FILE: &str = "SELECT path, checksum, file_size, last_modified, last_indexed, \
    chunk_count, deleted_at FROM indexed_files WHERE path = ? AND deleted_at IS NULL";

pub(crate) const ALL_ACTIVE_FILES: &str = "SELECT path, checksum, file_size, last_modified, \
    last_indexed, chunk_count, deleted_at FROM indexed_files WHERE deleted_at IS NULL";

/// Params: path, checksum, file_size, last_modified, last_indexed, chunk_count.
pub(crate) const UPSERT_FILE: &str = "INSERT INTO indexed_files \
    (path, checksum, file_size, last_modified, last_indexed, chunk_count, deleted_at) \
    VALUES (?, ?, ?, ?, ?, ?, NULL) \
    ON CONFLICT(path) DO UPDATE SET \
        checksum = excluded.checksum, \
        file_size = excluded.file_size, \
        last_modified = excluded.last_modified, \
        last_indexed = excluded.last_indexed, \
        chunk_count = excluded.chunk_count, \
        deleted_at = NULL";

pub(crate) const FORGET_DELETION: &str = "DELETE FROM deleted_files WHERE path = ?";

/// Params: last_modified, path.
pub(crate) const UPDATE_MTIME: &str =
    "UPDATE indexed_files SET last_modified = ? WHERE path = ? AND deleted_at IS NULL";

/// Params: deleted_at, path. Must run before [`SOFT_DELETE_FILE`].
pub(crate) const QUEUE_DELETION: &str = "INSERT INTO deleted_files \
    (path, deleted_at, chunk_count, cleaned_up) \
    SELECT path, ?, chunk_count, 0 FROM indexed_files WHERE path = ? AND deleted_at IS NULL \
    ON CONFLICT(path) DO UPDATE SET \
        deleted_at = excluded.deleted_at, \
        chunk_count = excluded.chunk_count, \
        cleaned_up = 0";

/// Params: deleted_at, path.
pub(crate) const SOFT_DELETE_FILE: &str =
    "UPDATE indexed_files SET deleted_at = ? WHERE path = ? AND deleted_at IS NULL";

/// Params: deleted_at, file_path.
pub(crate) const SOFT_DELETE_CHUNKS: &str =
    "UPDATE code_chunks SET deleted_at = ? WHERE file_path = ? AND deleted_at IS NULL";

/// Params: deleted_at, file_path, path, deleted_at. Only touches chunks of
/// a file that [`SOFT_DELETE_FILE`] just marked with the same timestamp.
pub(crate) const SOFT_DELETE_CHUNKS_OF_MARKED: &str = "UPDATE code_chunks SET deleted_at = ? \
    WHERE file_path = ? AND deleted_at IS NULL \
    AND EXISTS (SELECT 1 FROM indexed_files WHERE path = ? AND deleted_at = ?)";

pub(crate) const PENDING_DELETIONS: &str =
    "SELECT path FROM deleted_files WHERE cleaned_up = 0 ORDER BY path";

pub(crate) const PURGE_FILE_CHUNKS: &str = "DELETE FROM code_chunks WHERE file_path = ?";

pub(crate) const PURGE_FILE: &str =
    "DELETE FROM indexed_files WHERE path = ? AND deleted_at IS NOT NULL";

pub(crate) const MARK_CLEANED: &str = "UPDATE deleted_files SET cleaned_up = 1 WHERE path = ?";

pub(crate) const PURGE_REPLACED_CHUNKS: &str = "DELETE FROM code_chunks WHERE deleted_at IS NOT NULL";

/// Params follow [`CHUNK_COLUMNS`] minus `deleted_at`.
pub(crate) const UPSERT_CHUNK: &str = "INSERT INTO code_chunks \
    (id, file_path, content, start_line, end_line, language, chunk_type, name, signature, \
     symbols, dependencies, exports, imports, metadata, embedding, checksum, created_at, \
     updated_at, deleted_at) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL) \
    ON CONFLICT(id) DO UPDATE SET \
        file_path = excluded.file_path, \
        content = excluded.content, \
        start_line = excluded.start_line, \
        end_line = excluded.end_line, \
        language = excluded.language, \
        chunk_type = excluded.chunk_type, \
        name = excluded.name, \
        signature = excluded.signature, \
        symbols = excluded.symbols, \
        dependencies = excluded.dependencies, \
        exports = excluded.exports, \
        imports = excluded.imports, \
        metadata = excluded.metadata, \
        embedding = excluded.embedding, \
        checksum = excluded.checksum, \
        updated_at = excluded.updated_at, \
        deleted_at = NULL";

pub(crate) const ACTIVE_CHUNKS_FOR_FILE: &str = "SELECT id, file_path, content, start_line, \
    end_line, language, chunk_type, name, signature, symbols, dependencies, exports, imports, \
    metadata, embedding, checksum, created_at, updated_at, deleted_at \
    FROM code_chunks WHERE file_path = ? AND deleted_at IS NULL \
    ORDER BY start_line ASC, end_line ASC";

pub(crate) const SEARCH_CANDIDATES: &str = "SELECT id, file_path, start_line, end_line, language, \
    name, content, embedding FROM code_chunks WHERE deleted_at IS NULL";

/// Params: index_id, version, files_indexed, chunks_indexed, last_updated, schema_version.
pub(crate) const UPSERT_INDEX: &str = "INSERT INTO index_metadata \
    (id, index_id, version, files_indexed, chunks_indexed, last_updated, schema_version) \
    VALUES (1, ?, ?, ?, ?, ?, ?) \
    ON CONFLICT(id) DO UPDATE SET \
        index_id = excluded.index_id, \
        version = excluded.version, \
        files_indexed = excluded.files_indexed, \
        chunks_indexed = excluded.chunks_indexed, \
        last_updated = excluded.last_updated, \
        schema_version = excluded.schema_version";

pub(crate) const LOAD_INDEX: &str = "SELECT index_id, version, files_indexed, chunks_indexed, \
    last_updated, schema_version FROM index_metadata WHERE id = 1";

pub(crate) const STATS: &str = "SELECT \
    (SELECT COUNT(*) FROM indexed_files WHERE deleted_at IS NULL) AS active_files, \
    (SELECT COUNT(*) FROM code_chunks WHERE deleted_at IS NULL) AS active_chunks, \
    (SELECT COUNT(*) FROM deleted_files WHERE cleaned_up = 0) AS pending_cleanup";

pub(crate) const GET_SETTING: &str = "SELECT value FROM index_settings WHERE key = ?";

pub(crate) const INSERT_SETTING: &str =
    "INSERT INTO index_settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING";

/// Data tables in restore order. `schema_migrations` is not restored.
pub(crate) const DATA_TABLES: &[&str] = &[
    "index_metadata",
    "indexed_files",
    "code_chunks",
    "deleted_files",
    "index_settings",
];

pub(crate) const ALL_DELETED_FILES: &str =
    "SELECT path, deleted_at, chunk_count, cleaned_up FROM deleted_files";

pub(crate) const ALL_SETTINGS: &str = "SELECT key, value FROM index_settings";

pub(crate) const ALL_FILES: &str = "SELECT path, checksum, file_size, last_modified, last_indexed, \
    chunk_count, deleted_at FROM indexed_files";

pub(crate) const ALL_CHUNKS: &str = "SELECT id, file_path, content, start_line, end_line, \
    language, chunk_type, name, signature, symbols, dependencies, exports, imports, metadata, \
    embedding, checksum, created_at, updated_at, deleted_at FROM code_chunks";

/// Params: every column of [`FILE_COLUMNS`].
pub(crate) const RESTORE_FILE: &str = "INSERT INTO indexed_files \
    (path, checksum, file_size, last_modified, last_indexed, chunk_count, deleted_at) \
    VALUES (?, ?, ?, ?, ?, ?, ?)";

/// Params: every column of [`CHUNK_COLUMNS`].
pub(crate) const RESTORE_CHUNK: &str = "INSERT INTO code_chunks \
    (id, file_path, content, start_line, end_line, language, chunk_type, name, signature, \
     symbols, dependencies, exports, imports, metadata, embedding, checksum, created_at, \
     updated_at, deleted_at) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

pub(crate) const RESTORE_DELETED: &str = "INSERT INTO deleted_files \
    (path, deleted_at, chunk_count, cleaned_up) VALUES (?, ?, ?, ?)";

pub(crate) const RESTORE_SETTING: &str = "INSERT INTO index_settings (key, value) VALUES (?, ?)";

/// Params: index_id, version, files_indexed, chunks_indexed, last_updated, schema_version.
pub(crate) const RESTORE_INDEX: &str = "INSERT INTO index_metadata \
    (id, index_id, version, files_indexed, chunks_indexed, last_updated, schema_version) \
    VALUES (1, ?, ?, ?, ?, ?, ?)";
