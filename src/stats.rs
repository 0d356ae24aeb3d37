//! Index status overview.
//!
//! Summarizes what an index holds: metadata written by the last run,
//! live file and chunk counts, rows waiting for cleanup, the schema
//! version and the pinned embedding dimension. Used by `cidx status`.

use serde::Serialize;

use crate::error::Result;
use crate::models::IndexMetadata;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub backend: &'static str,
    pub schema_version: u32,
    pub embedding_dims: Option<usize>,
    pub active_files: i64,
    pub active_chunks: i64,
    pub pending_cleanup: i64,
    /// `None` until the first index run completes.
    pub metadata: Option<IndexMetadata>,
}

pub async fn collect_status(store: &dyn Store) -> Result<IndexStatus> {
    let stats = store.stats().await?;
    Ok(IndexStatus {
        backend: store.backend_name(),
        schema_version: store.schema_version().await?,
        embedding_dims: store.pinned_dimension().await?,
        active_files: stats.active_files,
        active_chunks: stats.active_chunks,
        pending_cleanup: stats.pending_cleanup,
        metadata: store.load_index().await?,
    })
}

/// Print the status block shown by `cidx status`.
pub fn print_status(status: &IndexStatus, location: &str, size_bytes: Option<u64>) {
    println!("codeindex status");
    println!("================");
    println!();
    println!("  Backend:     {}", status.backend);
    println!("  Location:    {}", location);
    if let Some(size) = size_bytes {
        println!("  Size:        {}", format_bytes(size));
    }
    println!("  Schema:      v{}", status.schema_version);
    match status.embedding_dims {
        Some(dims) => println!("  Dimensions:  {}", dims),
        None => println!("  Dimensions:  (not pinned)"),
    }
    println!();
    println!("  Files:       {}", status.active_files);
    println!("  Chunks:      {}", status.active_chunks);
    println!("  Pending:     {} deleted file(s) awaiting cleanup", status.pending_cleanup);
    println!();
    match &status.metadata {
        Some(meta) => {
            println!("  Index id:    {}", meta.index_id);
            println!("  Written by:  codeindex {}", meta.version);
            println!("  Updated:     {}", format_ts_relative(meta.last_updated_at / 1000));
        }
        None => println!("  Never indexed. Run `cidx index` to build the index."),
    }
    println!();
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp (seconds) relative to now, e.g. "3 hours ago".
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::chunk;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_status_of_fresh_store() {
        let store = InMemoryStore::new();
        store.initialize().await.unwrap();
        let status = collect_status(&store).await.unwrap();
        assert_eq!(status.backend, "memory");
        assert_eq!(status.schema_version, crate::migrate::latest_version());
        assert_eq!(status.active_files, 0);
        assert!(status.metadata.is_none());
        assert!(status.embedding_dims.is_none());
    }

    #[tokio::test]
    async fn test_status_counts_pending_cleanup() {
        let store = InMemoryStore::new();
        store.initialize().await.unwrap();
        store.pin_dimension(2).await.unwrap();
        store
            .save_chunks(&[chunk("a.rs", 1, "fn a() {}", vec![1.0, 0.0])])
            .await
            .unwrap();
        store.set_file_record("a.rs", "c1", 9, 1, 1).await.unwrap();
        store.set_file_record("b.rs", "c2", 9, 1, 0).await.unwrap();
        store.mark_file_deleted("b.rs").await.unwrap();

        let status = collect_status(&store).await.unwrap();
        assert_eq!(status.active_files, 1);
        assert_eq!(status.active_chunks, 1);
        assert_eq!(status.pending_cleanup, 1);
        assert_eq!(status.embedding_dims, Some(2));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
