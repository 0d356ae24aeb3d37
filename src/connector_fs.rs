//! Collect stage: walk a directory tree and produce index candidates.
//!
//! Paths are matched against include/exclude globs relative to the root.
//! Entries that cannot be read or stat'ed are skipped with a warning.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::IndexingConfig;
use crate::error::{IndexError, Result};

/// A file that passed the collection filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// `/`-separated path relative to the collection root; the index key.
    pub relative_path: String,
    pub size_bytes: u64,
    pub modified_ms: i64,
}

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Clone)]
pub struct FileCollector {
    include: GlobSet,
    exclude: GlobSet,
    max_file_size: u64,
    follow_symlinks: bool,
    skip_prefixes: Vec<PathBuf>,
}

impl FileCollector {
    pub fn new(config: &IndexingConfig) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;

        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            include,
            exclude,
            max_file_size: config.max_file_size_bytes,
            follow_symlinks: config.follow_symlinks,
            skip_prefixes: Vec::new(),
        })
    }

    /// Never collect anything under `path` (e.g. the store's own files).
    pub fn skip_path(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.skip_prefixes
            .push(std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));
        self
    }

    /// Collect candidates under `root`, sorted by relative path.
    pub fn collect(&self, root: &Path) -> Result<Vec<CandidateFile>> {
        if !root.is_dir() {
            return Err(IndexError::InvalidInput(format!(
                "index root is not a directory: {}",
                root.display()
            )));
        }
        let root = std::fs::canonicalize(root)?;

        let mut files = Vec::new();
        let walker = WalkDir::new(&root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if self.skip_prefixes.iter().any(|p| path.starts_with(p)) {
                continue;
            }

            let Ok(rel) = path.strip_prefix(&root) else {
                continue;
            };
            let Some(relative) = normalize_relative(rel) else {
                tracing::warn!("skipping non-UTF-8 path: {}", rel.display());
                continue;
            };
            if self.exclude.is_match(&relative) || !self.include.is_match(&relative) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("skipping {}: {}", relative, e);
                    continue;
                }
            };
            if metadata.len() > self.max_file_size {
                tracing::debug!(
                    "skipping {} ({} bytes exceeds limit of {})",
                    relative,
                    metadata.len(),
                    self.max_file_size
                );
                continue;
            }

            files.push(CandidateFile {
                path: path.to_path_buf(),
                relative_path: relative,
                size_bytes: metadata.len(),
                modified_ms: modified_ms(metadata.modified().ok()),
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }
}

/// Stat a single file: `(size, mtime_ms)`.
pub async fn stat_file(path: &Path) -> std::io::Result<(u64, i64)> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok((metadata.len(), modified_ms(metadata.modified().ok())))
}

fn modified_ms(modified: Option<SystemTime>) -> i64 {
    modified
        .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Forward-slash relative path, or `None` when a component is not UTF-8.
fn normalize_relative(rel: &Path) -> Option<String> {
    rel.components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.join("/"))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| IndexError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IndexError::Config(e.to_string()))
}
