//! Versioned schema migrations.
//!
//! Each [`Migration`] is a list of statements applied in one transaction
//! together with its `schema_migrations` ledger row. The SQLite backend
//! runs them through [`run_sqlite_migrations`]; the remote backend sends
//! the same statements to its gateway as one atomic batch.
//!
//! Applied versions are never edited. Schema changes append a new entry.

use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::now_ms;

pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

pub const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL
)";

pub const CURRENT_VERSION_SQL: &str = "SELECT COALESCE(MAX(version), 0) AS version FROM schema_migrations";

pub const RECORD_SQL: &str = "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)";

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "base_tables",
        statements: &[
            "CREATE TABLE IF NOT EXISTS index_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                index_id TEXT NOT NULL,
                version TEXT NOT NULL,
                files_indexed INTEGER NOT NULL DEFAULT 0,
                chunks_indexed INTEGER NOT NULL DEFAULT 0,
                last_updated INTEGER NOT NULL,
                schema_version INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS indexed_files (
                path TEXT PRIMARY KEY,
                checksum TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                last_modified INTEGER NOT NULL,
                last_indexed INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE TABLE IF NOT EXISTS code_chunks (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                content TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                language TEXT NOT NULL,
                chunk_type TEXT NOT NULL,
                name TEXT,
                signature TEXT,
                symbols TEXT NOT NULL DEFAULT '[]',
                dependencies TEXT NOT NULL DEFAULT '[]',
                exports TEXT NOT NULL DEFAULT '[]',
                imports TEXT NOT NULL DEFAULT '[]',
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding TEXT NOT NULL,
                checksum TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (file_path) REFERENCES indexed_files(path)
            )",
        ],
    },
    Migration {
        version: 2,
        name: "soft_delete",
        statements: &[
            "ALTER TABLE indexed_files ADD COLUMN deleted_at INTEGER",
            "ALTER TABLE code_chunks ADD COLUMN deleted_at INTEGER",
            "CREATE TABLE IF NOT EXISTS deleted_files (
                path TEXT PRIMARY KEY,
                deleted_at INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                cleaned_up INTEGER NOT NULL DEFAULT 0
            )",
        ],
    },
    Migration {
        version: 3,
        name: "lookup_indexes",
        statements: &[
            "CREATE INDEX IF NOT EXISTS idx_indexed_files_checksum ON indexed_files(checksum)",
            "CREATE INDEX IF NOT EXISTS idx_indexed_files_last_modified ON indexed_files(last_modified)",
            "CREATE INDEX IF NOT EXISTS idx_indexed_files_deleted_at ON indexed_files(deleted_at)",
            "CREATE INDEX IF NOT EXISTS idx_code_chunks_file_path ON code_chunks(file_path, start_line)",
            "CREATE INDEX IF NOT EXISTS idx_deleted_files_cleaned_up ON deleted_files(cleaned_up)",
        ],
    },
    Migration {
        version: 4,
        name: "index_settings",
        statements: &["CREATE TABLE IF NOT EXISTS index_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )"],
    },
];

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Migrations newer than `current`, in order. A store written by a newer
/// build than this one is refused.
pub fn pending(current: u32) -> Result<impl Iterator<Item = &'static Migration>, StoreError> {
    let latest = latest_version();
    if current > latest {
        return Err(StoreError::Migration {
            version: current,
            message: format!(
                "store schema version {} is newer than supported version {}",
                current, latest
            ),
        });
    }
    Ok(MIGRATIONS.iter().filter(move |m| m.version > current))
}

/// Bring a SQLite database up to [`latest_version`]. Returns the version
/// the database ends at.
pub async fn run_sqlite_migrations(pool: &SqlitePool) -> Result<u32, StoreError> {
    sqlx::query(LEDGER_DDL).execute(pool).await?;

    let current: i64 = sqlx::query_scalar(CURRENT_VERSION_SQL).fetch_one(pool).await?;
    let mut version = current as u32;

    for migration in pending(version)? {
        apply_sqlite(pool, migration)
            .await
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: e.to_string(),
            })?;
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applied schema migration"
        );
        version = migration.version;
    }

    Ok(version)
}

async fn apply_sqlite(pool: &SqlitePool, migration: &Migration) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in migration.statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    sqlx::query(RECORD_SQL)
        .bind(migration.version as i64)
        .bind(migration.name)
        .bind(now_ms())
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}
