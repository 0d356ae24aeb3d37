//! Indexing pipeline orchestration.
//!
//! One run walks a directory and converges the store onto it:
//!
//! ```text
//! Collect → DetectDeleted → FilterUnchanged → PerFileExtract
//!         → BatchEmbed → Store → UpdateMetadata → Done
//! ```
//!
//! A file that cannot be read or chunked, whose store batch fails, or
//! that is edited mid-run is recorded in [`IndexResult::failed_files`];
//! the run carries on. Store initialization and change-detection reads
//! are fatal.
//!
//! A file's record is written only after all of its chunks are stored,
//! so an interrupted run leaves the file looking changed and the next run
//! picks it up again.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::checksum::file_checksum;
use crate::chunk::{Chunker, ExtractedChunk};
use crate::config::IndexingConfig;
use crate::connector_fs::{stat_file, CandidateFile, FileCollector};
use crate::detect::ChangeDetector;
use crate::embedding::EmbeddingService;
use crate::error::{IndexError, Result};
use crate::models::{now_ms, ChunkRecord, IndexMetadata};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter, Stage};
use crate::store::Store;

/// Per-run switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    /// Re-index every collected file, ignoring change detection.
    pub full: bool,
    /// Use change detection. Off behaves like `full`.
    pub incremental: bool,
    /// Soft-delete tracked files that are gone from disk (incremental only).
    pub detect_deleted: bool,
    /// Purge soft-deleted rows at the end of the run. Off by default;
    /// `cidx cleanup` purges explicitly.
    pub cleanup_deleted: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            full: false,
            incremental: true,
            detect_deleted: true,
            cleanup_deleted: false,
        }
    }
}

impl IndexOptions {
    pub fn from_config(config: &IndexingConfig) -> Self {
        Self {
            full: false,
            incremental: config.incremental,
            detect_deleted: config.detect_deleted,
            cleanup_deleted: config.cleanup_deleted,
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexResult {
    /// Files (re)indexed by this run.
    pub files_indexed: usize,
    /// Chunks stored by this run.
    pub chunks_indexed: usize,
    pub errors_count: usize,
    pub duration_ms: u64,
    /// Relative paths of files that failed, sorted.
    pub failed_files: Vec<String>,
    pub files_unchanged: usize,
    pub files_deleted: usize,
    pub files_cleaned: usize,
    /// Vectors that came from the placeholder tier.
    pub placeholder_embeddings: usize,
    pub summary: String,
}

struct ExtractedFile<'a> {
    candidate: &'a CandidateFile,
    /// Content checksum taken just before extraction.
    checksum: String,
    chunks: Vec<ExtractedChunk>,
}

pub struct Indexer {
    store: Arc<dyn Store>,
    detector: ChangeDetector,
    embeddings: EmbeddingService,
    chunker: Arc<dyn Chunker>,
    collector: FileCollector,
    store_batch_size: usize,
    progress: Box<dyn ProgressReporter>,
}

impl Indexer {
    /// Build an indexer over an initialized store.
    ///
    /// The embedding service is pinned to the index dimension. A fresh
    /// index is pinned to the service's fallback dimension; an existing
    /// pin always wins over the configured one.
    pub async fn new(
        store: Arc<dyn Store>,
        embeddings: EmbeddingService,
        chunker: Arc<dyn Chunker>,
        collector: FileCollector,
        store_batch_size: usize,
    ) -> Result<Self> {
        let wanted = embeddings.fallback_dims();
        let dims = match store.pinned_dimension().await? {
            Some(pinned) => {
                if pinned != wanted {
                    tracing::warn!(
                        "index is pinned to {}-dimension embeddings, ignoring configured {}",
                        pinned,
                        wanted
                    );
                }
                pinned
            }
            None => {
                store.pin_dimension(wanted).await?;
                tracing::info!(dims = wanted, "pinned index embedding dimension");
                wanted
            }
        };

        Ok(Self {
            detector: ChangeDetector::new(store.clone()),
            store,
            embeddings: embeddings.with_pinned_dims(dims),
            chunker,
            collector,
            store_batch_size: store_batch_size.max(1),
            progress: Box::new(NoProgress),
        })
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    fn report(&self, stage: Stage, n: usize, total: usize) {
        self.progress
            .report(ProgressEvent::new(stage, n as u64, total as u64));
    }

    /// Run the pipeline over `root`.
    pub async fn index(&self, root: &Path, options: &IndexOptions) -> Result<IndexResult> {
        let started = Instant::now();
        let mut result = IndexResult::default();

        // Collect
        self.report(Stage::Collect, 0, 1);
        let candidates = self.collector.collect(root)?;
        self.report(Stage::Collect, 1, 1);
        tracing::info!(files = candidates.len(), root = %root.display(), "collected files");

        // DetectDeleted
        if options.incremental && options.detect_deleted {
            let current: HashSet<String> = candidates
                .iter()
                .map(|c| c.relative_path.clone())
                .collect();
            let deleted = self.detector.detect_deleted_files(&current).await?;
            for path in &deleted {
                self.store.mark_file_deleted(path).await?;
                tracing::info!(path = %path, "file removed from source tree, soft-deleted");
            }
            result.files_deleted = deleted.len();
        }
        self.report(Stage::DetectDeleted, result.files_deleted, result.files_deleted);

        // FilterUnchanged
        let changed = self.filter_unchanged(&candidates, options).await?;
        result.files_unchanged = candidates.len() - changed.len();

        if changed.is_empty() {
            if result.files_deleted > 0 || self.store.load_index().await?.is_none() {
                self.finalize(options, &mut result).await?;
            }
            self.report(Stage::Done, 1, 1);
            return Ok(self.finish(result, started));
        }

        // PerFileExtract
        let mut extracted = Vec::with_capacity(changed.len());
        for (i, candidate) in changed.iter().copied().enumerate() {
            let checksum = match file_checksum(&candidate.path).await {
                Ok(checksum) => checksum,
                Err(e) => {
                    tracing::warn!("{}", e);
                    result.failed_files.push(candidate.relative_path.clone());
                    self.report(Stage::PerFileExtract, i + 1, changed.len());
                    continue;
                }
            };
            match self
                .chunker
                .chunk_file(&candidate.path, &candidate.relative_path)
                .await
            {
                Ok(mut chunks) => {
                    chunks.retain(|c| !c.content.trim().is_empty());
                    extracted.push(ExtractedFile {
                        candidate,
                        checksum,
                        chunks,
                    });
                }
                Err(e) => {
                    let err = IndexError::Extraction {
                        path: candidate.relative_path.clone(),
                        message: format!("{:#}", e),
                    };
                    tracing::warn!("{}", err);
                    result.failed_files.push(candidate.relative_path.clone());
                }
            }
            self.report(Stage::PerFileExtract, i + 1, changed.len());
        }

        // BatchEmbed
        let total_chunks: usize = extracted.iter().map(|f| f.chunks.len()).sum();
        self.report(Stage::BatchEmbed, 0, total_chunks);
        let texts: Vec<String> = extracted
            .iter()
            .flat_map(|f| f.chunks.iter().map(|c| c.content.clone()))
            .collect();
        let mut vectors = self.embeddings.embed_batch_detailed(&texts).await?.into_iter();

        let mut per_file: Vec<Vec<ChunkRecord>> = Vec::with_capacity(extracted.len());
        for file in &extracted {
            let mut records = Vec::with_capacity(file.chunks.len());
            for chunk in &file.chunks {
                let embedded = vectors.next().ok_or_else(|| {
                    IndexError::ProviderUnavailable("embedding count mismatch".to_string())
                })?;
                if embedded.is_placeholder() {
                    result.placeholder_embeddings += 1;
                }
                records.push(to_record(
                    &file.candidate.relative_path,
                    chunk,
                    embedded.vector,
                    &embedded.provider,
                ));
            }
            per_file.push(records);
        }
        self.report(Stage::BatchEmbed, total_chunks, total_chunks);

        // Store
        let stored_ok = self.store_chunks(&extracted, &per_file, &mut result).await?;

        // UpdateMetadata
        let ok_files: Vec<usize> = (0..extracted.len()).filter(|&i| stored_ok[i]).collect();
        for (n, &i) in ok_files.iter().enumerate() {
            let file = &extracted[i];
            let rel = &file.candidate.relative_path;
            let refreshed = async {
                let (size, mtime) = stat_file(&file.candidate.path).await?;
                let checksum = file_checksum(&file.candidate.path).await?;
                Ok::<_, IndexError>((size, mtime, checksum))
            }
            .await;
            match refreshed {
                Ok((_, _, checksum)) if checksum != file.checksum => {
                    tracing::warn!(path = %rel, "file changed during indexing, leaving it for the next run");
                    result.failed_files.push(rel.clone());
                }
                Ok((size, mtime, checksum)) => {
                    self.store
                        .set_file_record(rel, &checksum, size as i64, mtime, per_file[i].len() as i64)
                        .await?;
                    result.files_indexed += 1;
                    result.chunks_indexed += per_file[i].len();
                }
                Err(e) => {
                    tracing::warn!(path = %rel, "file vanished during indexing: {}", e);
                    result.failed_files.push(rel.clone());
                }
            }
            self.report(Stage::UpdateMetadata, n + 1, ok_files.len() + 1);
        }
        self.finalize(options, &mut result).await?;
        self.report(Stage::Done, 1, 1);

        Ok(self.finish(result, started))
    }

    async fn filter_unchanged<'a>(
        &self,
        candidates: &'a [CandidateFile],
        options: &IndexOptions,
    ) -> Result<Vec<&'a CandidateFile>> {
        let total = candidates.len();
        if options.full || !options.incremental {
            self.report(Stage::FilterUnchanged, total, total);
            return Ok(candidates.iter().collect());
        }

        let mut changed = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            let needs = self
                .detector
                .needs_reindexing_with(
                    &candidate.relative_path,
                    candidate.modified_ms,
                    candidate.size_bytes as i64,
                    || file_checksum(&candidate.path),
                )
                .await?;
            if needs {
                changed.push(candidate);
            }
            self.report(Stage::FilterUnchanged, i + 1, total);
        }
        tracing::info!(
            changed = changed.len(),
            unchanged = total - changed.len(),
            "change detection complete"
        );
        Ok(changed)
    }

    /// Replace each file's chunks and write them in fixed-size batches.
    /// Returns, per file, whether every chunk was stored. A failed batch
    /// fails only the files it carried.
    async fn store_chunks(
        &self,
        extracted: &[ExtractedFile<'_>],
        per_file: &[Vec<ChunkRecord>],
        result: &mut IndexResult,
    ) -> Result<Vec<bool>> {
        let total: usize = per_file.iter().map(Vec::len).sum();
        let mut stored_ok = vec![true; extracted.len()];
        let mut batch: Vec<(usize, ChunkRecord)> = Vec::with_capacity(self.store_batch_size);
        let mut written = 0usize;

        for (i, records) in per_file.iter().enumerate() {
            let rel = &extracted[i].candidate.relative_path;
            if let Err(e) = self.store.delete_chunks(rel).await {
                tracing::warn!(path = %rel, "failed to retire old chunks: {}", e);
                stored_ok[i] = false;
                continue;
            }
            for record in records {
                batch.push((i, record.clone()));
                if batch.len() >= self.store_batch_size {
                    written += self.flush(&mut batch, &mut stored_ok).await;
                    self.report(Stage::Store, written, total);
                }
            }
        }
        written += self.flush(&mut batch, &mut stored_ok).await;
        self.report(Stage::Store, written, total);

        for (i, ok) in stored_ok.iter().enumerate() {
            if !ok {
                let rel = &extracted[i].candidate.relative_path;
                self.invalidate_record(rel).await?;
                result.failed_files.push(rel.clone());
            }
        }
        Ok(stored_ok)
    }

    /// Make a tracked file look changed to the next run. Its old chunks
    /// may already be retired, so the existing record must stop vouching
    /// for the content on disk.
    async fn invalidate_record(&self, rel: &str) -> Result<()> {
        if let Some(record) = self.store.get_file_record(rel).await? {
            self.store
                .set_file_record(rel, "", record.file_size_bytes, 0, 0)
                .await?;
            tracing::debug!(path = %rel, "invalidated file record after a failed store");
        }
        Ok(())
    }

    /// Write one batch, returning how many chunks were stored.
    async fn flush(&self, batch: &mut Vec<(usize, ChunkRecord)>, stored_ok: &mut [bool]) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let (owners, records): (Vec<usize>, Vec<ChunkRecord>) = batch.drain(..).unzip();
        match self.store.save_chunks(&records).await {
            Ok(()) => records.len(),
            Err(e) => {
                tracing::warn!("failed to store a batch of {} chunks: {}", records.len(), e);
                for i in owners {
                    stored_ok[i] = false;
                }
                0
            }
        }
    }

    /// Purge soft-deleted rows if asked, then rewrite the index metadata
    /// from the store's actual counts.
    async fn finalize(&self, options: &IndexOptions, result: &mut IndexResult) -> Result<()> {
        if options.cleanup_deleted {
            result.files_cleaned = self.store.cleanup_deleted_files().await?;
        }

        let stats = self.store.stats().await?;
        let index_id = match self.store.load_index().await? {
            Some(existing) => existing.index_id,
            None => uuid::Uuid::new_v4().to_string(),
        };
        let metadata = IndexMetadata {
            index_id,
            schema_version: self.store.schema_version().await?,
            files_indexed: stats.active_files,
            chunks_indexed: stats.active_chunks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            last_updated_at: now_ms(),
        };
        self.store.save_index(&metadata).await?;
        Ok(())
    }

    fn finish(&self, mut result: IndexResult, started: Instant) -> IndexResult {
        result.failed_files.sort();
        result.failed_files.dedup();
        result.errors_count = result.failed_files.len();
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.summary = if result.files_indexed == 0 && result.errors_count == 0 {
            format!(
                "index up to date ({} unchanged, {} deleted)",
                result.files_unchanged, result.files_deleted
            )
        } else {
            format!(
                "indexed {} files ({} chunks), {} unchanged, {} deleted, {} failed in {}ms",
                result.files_indexed,
                result.chunks_indexed,
                result.files_unchanged,
                result.files_deleted,
                result.errors_count,
                result.duration_ms
            )
        };
        if result.placeholder_embeddings > 0 {
            tracing::warn!(
                count = result.placeholder_embeddings,
                "placeholder embeddings were stored; search relevance is degraded for them"
            );
        }
        result
    }
}

fn to_record(file_path: &str, chunk: &ExtractedChunk, embedding: Vec<f32>, provider: &str) -> ChunkRecord {
    let now = now_ms();
    let mut symbols = chunk.classes.clone();
    symbols.extend(chunk.functions.iter().cloned());

    let name = chunk.primary_name().map(str::to_string);
    let signature = name.as_deref().and_then(|n| {
        chunk
            .content
            .lines()
            .map(str::trim)
            .find(|line| line.contains(n))
            .map(str::to_string)
    });

    ChunkRecord {
        id: chunk.id.clone(),
        file_path: file_path.to_string(),
        content: chunk.content.clone(),
        start_line: chunk.start_line,
        end_line: chunk.end_line,
        language: chunk.language.clone(),
        chunk_type: chunk.chunk_type().to_string(),
        name,
        signature,
        symbols,
        dependencies: chunk.dependencies.clone(),
        exports: Vec::new(),
        imports: chunk.imports.clone(),
        metadata: serde_json::json!({
            "functions": chunk.functions,
            "classes": chunk.classes,
            "embedding_provider": provider,
        }),
        embedding,
        checksum: crate::checksum::checksum(chunk.content.as_bytes()),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}
