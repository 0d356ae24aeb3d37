use anyhow::{bail, Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Remote,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub remote: Option<RemoteStoreConfig>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
            backup_dir: None,
            remote: None,
        }
    }
}

impl DbConfig {
    /// Directory that receives backups; `<db dir>/backups` unless configured.
    pub fn backup_dir(&self) -> PathBuf {
        if let Some(dir) = &self.backup_dir {
            return dir.clone();
        }
        self.path
            .parent()
            .map(|p| p.join("backups"))
            .unwrap_or_else(|| PathBuf::from("backups"))
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/index.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteStoreConfig {
    pub endpoint: String,
    #[serde(default = "default_remote_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_remote_token_env() -> String {
    "CIDX_REMOTE_TOKEN".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_true")]
    pub incremental: bool,
    #[serde(default = "default_true")]
    pub detect_deleted: bool,
    #[serde(default)]
    pub cleanup_deleted: bool,
    #[serde(default = "default_store_batch_size")]
    pub store_batch_size: usize,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_file_size_bytes: default_max_file_size(),
            incremental: true,
            detect_deleted: true,
            cleanup_deleted: false,
            store_batch_size: default_store_batch_size(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_max_file_size() -> u64 {
    1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_store_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    #[serde(default = "default_min_lines")]
    pub min_lines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            min_lines: default_min_lines(),
        }
    }
}

fn default_max_lines() -> usize {
    200
}
fn default_min_lines() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub primary: Option<RemoteProviderConfig>,
    #[serde(default)]
    pub secondary: Option<LocalProviderConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dims: default_dims(),
            batch_size: default_batch_size(),
            cache_size: default_cache_size(),
            timeout_secs: default_timeout_secs(),
            primary: None,
            secondary: None,
        }
    }
}

fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    32
}
fn default_cache_size() -> usize {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

/// Hosted inference endpoint, authenticated with a bearer token.
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteProviderConfig {
    pub url: String,
    #[serde(default = "default_embed_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_embed_token_env() -> String {
    "CIDX_EMBED_TOKEN".to_string()
}

/// Loopback or LAN inference service.
#[derive(Debug, Deserialize, Clone)]
pub struct LocalProviderConfig {
    pub url: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.indexing.store_batch_size == 0 {
            bail!("indexing.store_batch_size must be > 0");
        }
        for pattern in self
            .indexing
            .include_globs
            .iter()
            .chain(self.indexing.exclude_globs.iter())
        {
            Glob::new(pattern).with_context(|| format!("Invalid glob pattern: '{}'", pattern))?;
        }

        if self.chunking.max_lines == 0 {
            bail!("chunking.max_lines must be > 0");
        }
        if self.chunking.min_lines > self.chunking.max_lines {
            bail!("chunking.min_lines must be <= chunking.max_lines");
        }

        if self.embedding.dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.cache_size == 0 {
            bail!("embedding.cache_size must be > 0");
        }

        if self.db.backend == StoreBackend::Remote && self.db.remote.is_none() {
            bail!("db.backend = \"remote\" requires a [db.remote] section");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.db.backend, StoreBackend::Sqlite);
        assert_eq!(config.indexing.store_batch_size, 100);
        assert_eq!(config.embedding.dims, 384);
        assert!(config.indexing.incremental);
        assert!(config.embedding.primary.is_none());
    }

    #[test]
    fn test_full_config_parses() {
        let config: Config = toml::from_str(
            r#"
[db]
backend = "remote"
path = "/tmp/idx.sqlite"

[db.remote]
endpoint = "https://sql.example.com/v1/db/idx"

[indexing]
include_globs = ["**/*.rs"]
exclude_globs = ["**/generated/**"]
max_file_size_bytes = 2048
incremental = false

[embedding]
dims = 768

[embedding.primary]
url = "https://api.example.com/embed"

[embedding.secondary]
url = "http://127.0.0.1:11434/api/embeddings"
model = "nomic-embed-text"
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.db.backend, StoreBackend::Remote);
        assert_eq!(
            config.db.remote.as_ref().unwrap().token_env,
            "CIDX_REMOTE_TOKEN"
        );
        assert_eq!(config.indexing.max_file_size_bytes, 2048);
        assert!(!config.indexing.incremental);
        assert_eq!(config.embedding.dims, 768);
        assert_eq!(
            config.embedding.secondary.unwrap().model.as_deref(),
            Some("nomic-embed-text")
        );
    }

    #[test]
    fn test_remote_backend_requires_section() {
        let config: Config = toml::from_str("[db]\nbackend = \"remote\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let config: Config = toml::from_str("[indexing]\ninclude_globs = [\"a[\"]\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config: Config = toml::from_str("[indexing]\nstore_batch_size = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backup_dir_defaults_next_to_db() {
        let db = DbConfig {
            path: PathBuf::from("/var/idx/index.sqlite"),
            ..DbConfig::default()
        };
        assert_eq!(db.backup_dir(), PathBuf::from("/var/idx/backups"));
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config = toml::from_str(include_str!("../config/cidx.example.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chunking.max_lines, 200);
        assert_eq!(config.indexing.exclude_globs.len(), 2);
    }
}
