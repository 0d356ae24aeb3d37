//! Remote backend: a SQLite-dialect SQL gateway spoken to over HTTPS.
//!
//! Two endpoints, both authenticated with a bearer token:
//!
//! - `POST {endpoint}/query` with `{"sql": "...", "params": [...]}`
//! - `POST {endpoint}/batch` with `{"statements": [{"sql", "params"}, ...]}`,
//!   executed atomically by the gateway.
//!
//! Both answer `{"success": bool, "result": [{"results": [row, ...],
//! "meta": {"changes": n}}], "errors": [...]}`, one result per statement.
//! Rows are JSON objects keyed by column name.
//!
//! Migrations are the same statements the SQLite backend runs; each one
//! goes out as a single batch with its ledger row. Backups are JSON dumps
//! written to a local directory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::codec::{self, decode_embedding, decode_list, decode_metadata, encode_embedding, encode_list};
use super::{check_dimensions, rank_hits, sql, DeletedFile, Store, StoreDump, StoreResult, DIMS_SETTING};
use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::migrate;
use crate::models::{now_ms, ChunkRecord, FileRecord, IndexMetadata, SearchHit, StoreStats};

type Row = Map<String, Value>;

#[derive(Debug, Clone, Serialize)]
struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    fn new(sql: &str, params: Vec<Value>) -> Self {
        Self {
            sql: sql.to_string(),
            params,
        }
    }
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    statements: &'a [Statement],
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    success: bool,
    #[serde(default)]
    result: Vec<QueryResult>,
    #[serde(default)]
    errors: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResult {
    #[serde(default)]
    results: Vec<Row>,
    #[serde(default)]
    meta: QueryMeta,
}

#[derive(Debug, Default, Deserialize)]
struct QueryMeta {
    #[serde(default)]
    changes: u64,
}

pub struct RemoteStore {
    endpoint: String,
    token: String,
    client: reqwest::Client,
    backup_dir: PathBuf,
    initialized: AtomicBool,
    version: AtomicU32,
}

impl RemoteStore {
    pub fn new(
        endpoint: &str,
        token: impl Into<String>,
        timeout: Duration,
        backup_dir: PathBuf,
    ) -> StoreResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.into(),
            client,
            backup_dir,
            initialized: AtomicBool::new(false),
            version: AtomicU32::new(0),
        })
    }

    fn ensure_initialized(&self) -> StoreResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, route: &str, body: &T) -> StoreResult<Vec<QueryResult>> {
        let url = format!("{}/{}", self.endpoint, route);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Remote(format!(
                "gateway returned {} for {}: {}",
                status, route, text
            )));
        }

        let parsed: GatewayResponse = response.json().await?;
        if !parsed.success {
            let errors: Vec<String> = parsed.errors.iter().map(Value::to_string).collect();
            return Err(StoreError::Remote(format!(
                "gateway reported failure: {}",
                errors.join("; ")
            )));
        }
        Ok(parsed.result)
    }

    async fn query(&self, sql: &str, params: Vec<Value>) -> StoreResult<QueryResult> {
        let statement = Statement::new(sql, params);
        let mut results = self.post("query", &statement).await?;
        if results.is_empty() {
            return Ok(QueryResult::default());
        }
        Ok(results.swap_remove(0))
    }

    async fn batch(&self, statements: &[Statement]) -> StoreResult<Vec<QueryResult>> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        self.post("batch", &BatchRequest { statements }).await
    }

    async fn read_pinned(&self) -> StoreResult<Option<usize>> {
        let result = self.query(sql::GET_SETTING, vec![json!(DIMS_SETTING)]).await?;
        match result.results.first() {
            Some(row) => Ok(Some(codec::parse_dims(&col_str(row, "value")?)?)),
            None => Ok(None),
        }
    }

    async fn dump(&self) -> StoreResult<StoreDump> {
        let pinned = self.read_pinned().await?;
        let files = self
            .query(sql::ALL_FILES, vec![])
            .await?
            .results
            .iter()
            .map(file_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        let chunks = self
            .query(sql::ALL_CHUNKS, vec![])
            .await?
            .results
            .iter()
            .map(|row| chunk_from_row(row, pinned))
            .collect::<StoreResult<Vec<_>>>()?;
        let deleted_files = self
            .query(sql::ALL_DELETED_FILES, vec![])
            .await?
            .results
            .iter()
            .map(|row| {
                Ok(DeletedFile {
                    path: col_str(row, "path")?,
                    deleted_at: col_i64(row, "deleted_at")?,
                    chunk_count: col_i64(row, "chunk_count")?,
                    cleaned_up: col_i64(row, "cleaned_up")? != 0,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        let settings: BTreeMap<String, String> = self
            .query(sql::ALL_SETTINGS, vec![])
            .await?
            .results
            .iter()
            .map(|row| Ok((col_str(row, "key")?, col_str(row, "value")?)))
            .collect::<StoreResult<_>>()?;

        Ok(StoreDump {
            schema_version: self.version.load(Ordering::Acquire),
            created_at: now_ms(),
            index: self.load_index().await?,
            files,
            chunks,
            deleted_files,
            settings,
        })
    }
}

fn corrupt_column(column: &str, message: &str) -> StoreError {
    StoreError::corruption(format!("remote column {}", column), message)
}

fn col_str(row: &Row, column: &str) -> StoreResult<String> {
    row.get(column)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| corrupt_column(column, "expected text"))
}

fn col_opt_str(row: &Row, column: &str) -> StoreResult<Option<String>> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(corrupt_column(column, "expected text or null")),
    }
}

fn col_i64(row: &Row, column: &str) -> StoreResult<i64> {
    row.get(column)
        .and_then(Value::as_i64)
        .ok_or_else(|| corrupt_column(column, "expected integer"))
}

fn col_opt_i64(row: &Row, column: &str) -> StoreResult<Option<i64>> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| corrupt_column(column, "expected integer or null")),
    }
}

fn file_from_row(row: &Row) -> StoreResult<FileRecord> {
    Ok(FileRecord {
        path: col_str(row, "path")?,
        content_checksum: col_str(row, "checksum")?,
        file_size_bytes: col_i64(row, "file_size")?,
        last_modified_at: col_i64(row, "last_modified")?,
        last_indexed_at: col_i64(row, "last_indexed")?,
        chunk_count: col_i64(row, "chunk_count")?,
        deleted_at: col_opt_i64(row, "deleted_at")?,
    })
}

fn chunk_from_row(row: &Row, pinned: Option<usize>) -> StoreResult<ChunkRecord> {
    let id = col_str(row, "id")?;
    Ok(ChunkRecord {
        file_path: col_str(row, "file_path")?,
        content: col_str(row, "content")?,
        start_line: col_i64(row, "start_line")?,
        end_line: col_i64(row, "end_line")?,
        language: col_str(row, "language")?,
        chunk_type: col_str(row, "chunk_type")?,
        name: col_opt_str(row, "name")?,
        signature: col_opt_str(row, "signature")?,
        symbols: decode_list(&id, "symbols", col_opt_str(row, "symbols")?.as_deref())?,
        dependencies: decode_list(&id, "dependencies", col_opt_str(row, "dependencies")?.as_deref())?,
        exports: decode_list(&id, "exports", col_opt_str(row, "exports")?.as_deref())?,
        imports: decode_list(&id, "imports", col_opt_str(row, "imports")?.as_deref())?,
        metadata: decode_metadata(&id, col_opt_str(row, "metadata")?.as_deref())?,
        embedding: decode_embedding(&id, &col_str(row, "embedding")?, pinned)?,
        checksum: col_str(row, "checksum")?,
        created_at: col_i64(row, "created_at")?,
        updated_at: col_i64(row, "updated_at")?,
        deleted_at: col_opt_i64(row, "deleted_at")?,
        id,
    })
}

fn chunk_params(chunk: &ChunkRecord) -> Vec<Value> {
    vec![
        json!(chunk.id),
        json!(chunk.file_path),
        json!(chunk.content),
        json!(chunk.start_line),
        json!(chunk.end_line),
        json!(chunk.language),
        json!(chunk.chunk_type),
        json!(chunk.name),
        json!(chunk.signature),
        json!(encode_list(&chunk.symbols)),
        json!(encode_list(&chunk.dependencies)),
        json!(encode_list(&chunk.exports)),
        json!(encode_list(&chunk.imports)),
        json!(chunk.metadata.to_string()),
        json!(encode_embedding(&chunk.embedding)),
        json!(chunk.checksum),
        json!(chunk.created_at),
        json!(chunk.updated_at),
    ]
}

fn restore_statements(dump: &StoreDump) -> Vec<Statement> {
    let mut statements: Vec<Statement> = sql::DATA_TABLES
        .iter()
        .map(|table| Statement::new(&format!("DELETE FROM {}", table), vec![]))
        .collect();

    if let Some(meta) = &dump.index {
        statements.push(Statement::new(
            sql::RESTORE_INDEX,
            vec![
                json!(meta.index_id),
                json!(meta.version),
                json!(meta.files_indexed),
                json!(meta.chunks_indexed),
                json!(meta.last_updated_at),
                json!(meta.schema_version),
            ],
        ));
    }
    for f in &dump.files {
        statements.push(Statement::new(
            sql::RESTORE_FILE,
            vec![
                json!(f.path),
                json!(f.content_checksum),
                json!(f.file_size_bytes),
                json!(f.last_modified_at),
                json!(f.last_indexed_at),
                json!(f.chunk_count),
                json!(f.deleted_at),
            ],
        ));
    }
    for c in &dump.chunks {
        let mut params = chunk_params(c);
        params.push(json!(c.deleted_at));
        statements.push(Statement::new(sql::RESTORE_CHUNK, params));
    }
    for d in &dump.deleted_files {
        statements.push(Statement::new(
            sql::RESTORE_DELETED,
            vec![
                json!(d.path),
                json!(d.deleted_at),
                json!(d.chunk_count),
                json!(d.cleaned_up as i64),
            ],
        ));
    }
    for (key, value) in &dump.settings {
        statements.push(Statement::new(sql::RESTORE_SETTING, vec![json!(key), json!(value)]));
    }
    statements
}

#[async_trait]
impl Store for RemoteStore {
    fn backend_name(&self) -> &'static str {
        "remote"
    }

    async fn initialize(&self) -> StoreResult<()> {
        self.query(migrate::LEDGER_DDL, vec![]).await?;
        let current = self.query(migrate::CURRENT_VERSION_SQL, vec![]).await?;
        let mut version = match current.results.first() {
            Some(row) => col_i64(row, "version")? as u32,
            None => 0,
        };

        for migration in migrate::pending(version)? {
            let mut statements: Vec<Statement> = migration
                .statements
                .iter()
                .map(|s| Statement::new(s, vec![]))
                .collect();
            statements.push(Statement::new(
                migrate::RECORD_SQL,
                vec![json!(migration.version), json!(migration.name), json!(now_ms())],
            ));
            self.batch(&statements)
                .await
                .map_err(|e| StoreError::Migration {
                    version: migration.version,
                    message: e.to_string(),
                })?;
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "applied remote schema migration"
            );
            version = migration.version;
        }

        self.version.store(version, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn schema_version(&self) -> StoreResult<u32> {
        self.ensure_initialized()?;
        Ok(self.version.load(Ordering::Acquire))
    }

    async fn get_file_record(&self, path: &str) -> StoreResult<Option<FileRecord>> {
        self.ensure_initialized()?;
        let result = self.query(sql::GET_FILE, vec![json!(path)]).await?;
        result.results.first().map(file_from_row).transpose()
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
        self.batch(&[
            Statement::new(
                sql::UPSERT_FILE,
                vec![
                    json!(path),
                    json!(checksum),
                    json!(size),
                    json!(mtime),
                    json!(now_ms()),
                    json!(chunk_count),
                ],
            ),
            Statement::new(sql::FORGET_DELETION, vec![json!(path)]),
        ])
        .await?;
        Ok(())
    }

    async fn update_file_mtime(&self, path: &str, mtime: i64) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.query(sql::UPDATE_MTIME, vec![json!(mtime), json!(path)])
            .await?;
        Ok(())
    }

    async fn get_all_tracked_files(&self) -> StoreResult<HashMap<String, FileRecord>> {
        self.ensure_initialized()?;
        let result = self.query(sql::ALL_ACTIVE_FILES, vec![]).await?;
        result
            .results
            .iter()
            .map(|row| file_from_row(row).map(|rec| (rec.path.clone(), rec)))
            .collect()
    }

    async fn mark_file_deleted(&self, path: &str) -> StoreResult<()> {
        self.ensure_initialized()?;
        let now = now_ms();
        let results = self.batch(&mark_deleted_statements(path, now)).await?;
        if let Some(file) = results.get(1) {
            tracing::debug!(path, changed = file.meta.changes, "marked file deleted");
        }
        Ok(())
    }

    async fn cleanup_deleted_files(&self) -> StoreResult<usize> {
        self.ensure_initialized()?;
        let pending = self.query(sql::PENDING_DELETIONS, vec![]).await?;
        let paths = pending
            .results
            .iter()
            .map(|row| col_str(row, "path"))
            .collect::<StoreResult<Vec<_>>>()?;

        let mut statements = Vec::with_capacity(paths.len() * 3 + 1);
        for path in &paths {
            statements.push(Statement::new(sql::PURGE_FILE_CHUNKS, vec![json!(path)]));
            statements.push(Statement::new(sql::PURGE_FILE, vec![json!(path)]));
            statements.push(Statement::new(sql::MARK_CLEANED, vec![json!(path)]));
        }
        statements.push(Statement::new(sql::PURGE_REPLACED_CHUNKS, vec![]));
        self.batch(&statements).await?;
        Ok(paths.len())
    }

    async fn save_chunks(&self, chunks: &[ChunkRecord]) -> StoreResult<()> {
        self.ensure_initialized()?;
        if chunks.is_empty() {
            return Ok(());
        }
        check_dimensions(self.read_pinned().await?, chunks)?;
        let statements: Vec<Statement> = chunks
            .iter()
            .map(|c| Statement::new(sql::UPSERT_CHUNK, chunk_params(c)))
            .collect();
        self.batch(&statements).await?;
        Ok(())
    }

    async fn get_chunks(&self, file_path: &str) -> StoreResult<Vec<ChunkRecord>> {
        self.ensure_initialized()?;
        let pinned = self.read_pinned().await?;
        let result = self
            .query(sql::ACTIVE_CHUNKS_FOR_FILE, vec![json!(file_path)])
            .await?;
        result
            .results
            .iter()
            .map(|row| chunk_from_row(row, pinned))
            .collect()
    }

    async fn delete_chunks(&self, file_path: &str) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.query(sql::SOFT_DELETE_CHUNKS, vec![json!(now_ms()), json!(file_path)])
            .await?;
        Ok(())
    }

    async fn save_index(&self, metadata: &IndexMetadata) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.query(
            sql::UPSERT_INDEX,
            vec![
                json!(metadata.index_id),
                json!(metadata.version),
                json!(metadata.files_indexed),
                json!(metadata.chunks_indexed),
                json!(metadata.last_updated_at),
                json!(metadata.schema_version),
            ],
        )
        .await?;
        Ok(())
    }

    async fn load_index(&self) -> StoreResult<Option<IndexMetadata>> {
        self.ensure_initialized()?;
        let result = self.query(sql::LOAD_INDEX, vec![]).await?;
        result
            .results
            .first()
            .map(|row| {
                Ok(IndexMetadata {
                    index_id: col_str(row, "index_id")?,
                    schema_version: col_i64(row, "schema_version")? as u32,
                    files_indexed: col_i64(row, "files_indexed")?,
                    chunks_indexed: col_i64(row, "chunks_indexed")?,
                    version: col_str(row, "version")?,
                    last_updated_at: col_i64(row, "last_updated")?,
                })
            })
            .transpose()
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        self.ensure_initialized()?;
        let result = self.query(sql::STATS, vec![]).await?;
        let row = result
            .results
            .first()
            .ok_or_else(|| StoreError::Remote("stats query returned no rows".to_string()))?;
        Ok(StoreStats {
            active_files: col_i64(row, "active_files")?,
            active_chunks: col_i64(row, "active_chunks")?,
            pending_cleanup: col_i64(row, "pending_cleanup")?,
        })
    }

    async fn pinned_dimension(&self) -> StoreResult<Option<usize>> {
        self.ensure_initialized()?;
        self.read_pinned().await
    }

    async fn pin_dimension(&self, dims: usize) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.query(
            sql::INSERT_SETTING,
            vec![json!(DIMS_SETTING), json!(dims.to_string())],
        )
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

        let result = self.query(sql::SEARCH_CANDIDATES, vec![]).await?;
        let mut hits = Vec::with_capacity(result.results.len());
        for row in &result.results {
            let id = col_str(row, "id")?;
            let vector = decode_embedding(&id, &col_str(row, "embedding")?, pinned)?;
            hits.push(SearchHit {
                score: cosine_similarity(query, &vector),
                file_path: col_str(row, "file_path")?,
                start_line: col_i64(row, "start_line")?,
                end_line: col_i64(row, "end_line")?,
                language: col_str(row, "language")?,
                name: col_opt_str(row, "name")?,
                content: col_str(row, "content")?,
                chunk_id: id,
            });
        }
        Ok(rank_hits(hits, limit))
    }

    async fn create_backup(&self) -> StoreResult<PathBuf> {
        self.ensure_initialized()?;
        let dump = self.dump().await?;
        let path = dump.write(&self.backup_dir).await?;
        tracing::info!(path = %path.display(), "created remote backup");
        Ok(path)
    }

    async fn restore_backup(&self, path: &Path) -> StoreResult<()> {
        self.ensure_initialized()?;
        let dump = StoreDump::read(path).await?;
        let current = self.version.load(Ordering::Acquire);
        if dump.schema_version != current {
            return Err(StoreError::Backup(format!(
                "backup schema version {} does not match store version {}",
                dump.schema_version, current
            )));
        }

        let snapshot = self.create_backup().await?;
        tracing::info!(snapshot = %snapshot.display(), "saved pre-restore snapshot");

        self.batch(&restore_statements(&dump)).await?;
        tracing::info!(path = %path.display(), "restored remote backup");
        Ok(())
    }
}

/// Soft-delete batch for one path. Every statement is a no-op unless the
/// file row was active, matching the transactional backends.
fn mark_deleted_statements(path: &str, now: i64) -> Vec<Statement> {
    vec![
        Statement::new(sql::QUEUE_DELETION, vec![json!(now), json!(path)]),
        Statement::new(sql::SOFT_DELETE_FILE, vec![json!(now), json!(path)]),
        Statement::new(
            sql::SOFT_DELETE_CHUNKS_OF_MARKED,
            vec![json!(now), json!(path), json!(path), json!(now)],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn ok_rows(rows: Value) -> String {
        json!({
            "success": true,
            "result": [{ "results": rows, "meta": { "changes": 0 } }],
            "errors": []
        })
        .to_string()
    }

    fn store_for(server: &mockito::ServerGuard) -> RemoteStore {
        RemoteStore::new(
            &format!("{}/db/", server.url()),
            "secret",
            Duration::from_secs(5),
            std::env::temp_dir(),
        )
        .unwrap()
    }

    async fn mock_ledger(server: &mut mockito::ServerGuard, version: i64) -> (mockito::Mock, mockito::Mock) {
        let ddl = server
            .mock("POST", "/db/query")
            .match_body(Matcher::PartialJson(json!({ "sql": migrate::LEDGER_DDL })))
            .with_status(200)
            .with_body(ok_rows(json!([])))
            .create_async()
            .await;
        let current = server
            .mock("POST", "/db/query")
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::PartialJson(json!({ "sql": migrate::CURRENT_VERSION_SQL })))
            .with_status(200)
            .with_body(ok_rows(json!([{ "version": version }])))
            .create_async()
            .await;
        (ddl, current)
    }

    #[tokio::test]
    async fn test_requires_initialization_without_network() {
        let server = mockito::Server::new_async().await;
        let store = store_for(&server);
        crate::store::testing::requires_initialization(&store).await;
    }

    #[tokio::test]
    async fn test_initialize_applies_pending_migrations() {
        let mut server = mockito::Server::new_async().await;
        let _ledger = mock_ledger(&mut server, 2).await;
        let batch = server
            .mock("POST", "/db/batch")
            .with_status(200)
            .with_body(ok_rows(json!([])))
            .expect(2)
            .create_async()
            .await;

        let store = store_for(&server);
        store.initialize().await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), 4);
        batch.assert_async().await;
    }

    #[tokio::test]
    async fn test_up_to_date_store_runs_no_migrations() {
        let mut server = mockito::Server::new_async().await;
        let _ledger = mock_ledger(&mut server, 4).await;
        let batch = server
            .mock("POST", "/db/batch")
            .expect(0)
            .create_async()
            .await;

        let store = store_for(&server);
        store.initialize().await.unwrap();
        batch.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_migration_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _ledger = mock_ledger(&mut server, 0).await;
        let _batch_fails = server
            .mock("POST", "/db/batch")
            .with_status(200)
            .with_body(json!({ "success": false, "errors": ["syntax error"] }).to_string())
            .create_async()
            .await;

        let store = store_for(&server);
        let err = store.initialize().await.unwrap_err();
        assert!(matches!(err, StoreError::Migration { version: 1, .. }));
        assert!(matches!(
            store.get_file_record("a.rs").await,
            Err(StoreError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_get_file_record_parses_row() {
        let mut server = mockito::Server::new_async().await;
        let _ledger = mock_ledger(&mut server, 4).await;
        let _file_row = server
            .mock("POST", "/db/query")
            .match_body(Matcher::PartialJson(json!({ "sql": sql::GET_FILE, "params": ["src/a.rs"] })))
            .with_status(200)
            .with_body(ok_rows(json!([{
                "path": "src/a.rs",
                "checksum": "abc",
                "file_size": 12,
                "last_modified": 1000,
                "last_indexed": 2000,
                "chunk_count": 3,
                "deleted_at": null
            }])))
            .create_async()
            .await;

        let store = store_for(&server);
        store.initialize().await.unwrap();
        let rec = store.get_file_record("src/a.rs").await.unwrap().unwrap();
        assert_eq!(rec.content_checksum, "abc");
        assert_eq!(rec.chunk_count, 3);
        assert!(rec.deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_http_error_surfaces_as_remote_error() {
        let mut server = mockito::Server::new_async().await;
        let _ledger = mock_ledger(&mut server, 4).await;
        let _unavailable = server
            .mock("POST", "/db/query")
            .match_body(Matcher::PartialJson(json!({ "sql": sql::STATS })))
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let store = store_for(&server);
        store.initialize().await.unwrap();
        assert!(matches!(store.stats().await, Err(StoreError::Remote(_))));
    }

    #[tokio::test]
    async fn test_corrupt_embedding_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _ledger = mock_ledger(&mut server, 4).await;
        let _pinned = server
            .mock("POST", "/db/query")
            .match_body(Matcher::PartialJson(json!({ "sql": sql::GET_SETTING })))
            .with_status(200)
            .with_body(ok_rows(json!([{ "value": "2" }])))
            .create_async()
            .await;
        let _chunk_row = server
            .mock("POST", "/db/query")
            .match_body(Matcher::PartialJson(json!({ "sql": sql::ACTIVE_CHUNKS_FOR_FILE })))
            .with_status(200)
            .with_body(ok_rows(json!([{
                "id": "c1", "file_path": "a.rs", "content": "x", "start_line": 1, "end_line": 1,
                "language": "rust", "chunk_type": "block", "name": null, "signature": null,
                "symbols": "[]", "dependencies": "[]", "exports": "[]", "imports": "[]",
                "metadata": "{}", "embedding": "[1.0, 2.0, 3.0]", "checksum": "k",
                "created_at": 1, "updated_at": 1, "deleted_at": null
            }])))
            .create_async()
            .await;

        let store = store_for(&server);
        store.initialize().await.unwrap();
        assert!(matches!(
            store.get_chunks("a.rs").await,
            Err(StoreError::Corruption { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_chunks_rejects_wrong_dimension_before_sending() {
        let mut server = mockito::Server::new_async().await;
        let _ledger = mock_ledger(&mut server, 4).await;
        let _pinned2 = server
            .mock("POST", "/db/query")
            .match_body(Matcher::PartialJson(json!({ "sql": sql::GET_SETTING })))
            .with_status(200)
            .with_body(ok_rows(json!([{ "value": "2" }])))
            .create_async()
            .await;
        let batch = server
            .mock("POST", "/db/batch")
            .expect(0)
            .create_async()
            .await;

        let store = store_for(&server);
        store.initialize().await.unwrap();
        let chunk = crate::store::testing::chunk("a.rs", 1, "fn a() {}", vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            store.save_chunk(&chunk).await,
            Err(StoreError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        batch.assert_async().await;
    }

    #[test]
    fn test_mark_deleted_only_touches_chunks_of_marked_file() {
        let statements = mark_deleted_statements("a.rs", 42);
        assert_eq!(statements.len(), 3);
        let chunks = &statements[2];
        assert!(chunks.sql.contains("EXISTS (SELECT 1 FROM indexed_files"));
        assert_eq!(chunks.params, vec![json!(42), json!("a.rs"), json!("a.rs"), json!(42)]);
    }

    #[tokio::test]
    async fn test_mark_file_deleted_sends_guarded_batch() {
        let mut server = mockito::Server::new_async().await;
        let _ledger = mock_ledger(&mut server, 4).await;
        let batch = server
            .mock("POST", "/db/batch")
            .match_body(Matcher::Regex("EXISTS \\(SELECT 1 FROM indexed_files".to_string()))
            .with_status(200)
            .with_body(json!({
                "success": true,
                "result": [
                    { "results": [], "meta": { "changes": 0 } },
                    { "results": [], "meta": { "changes": 0 } },
                    { "results": [], "meta": { "changes": 0 } }
                ],
                "errors": []
            }).to_string())
            .expect(1)
            .create_async()
            .await;

        let store = store_for(&server);
        store.initialize().await.unwrap();
        store.mark_file_deleted("never-indexed.rs").await.unwrap();
        batch.assert_async().await;
    }

    #[test]
    fn test_restore_statements_clear_then_insert() {
        let dump = StoreDump {
            schema_version: 4,
            files: vec![FileRecord {
                path: "a.rs".to_string(),
                content_checksum: "c".to_string(),
                file_size_bytes: 1,
                last_modified_at: 1,
                last_indexed_at: 1,
                chunk_count: 0,
                deleted_at: None,
            }],
            ..Default::default()
        };
        let statements = restore_statements(&dump);
        assert_eq!(statements.len(), sql::DATA_TABLES.len() + 1);
        assert!(statements[0].sql.starts_with("DELETE FROM"));
        assert_eq!(statements.last().unwrap().sql, sql::RESTORE_FILE);
        assert_eq!(statements.last().unwrap().params.len(), 7);
    }
}
