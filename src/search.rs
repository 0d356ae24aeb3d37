//! Similarity search over indexed chunks.
//!
//! The query goes through the same [`EmbeddingService`] the indexer
//! uses, pinned to the index dimension, and the store ranks active
//! chunks by cosine similarity. Results are ordered by score descending,
//! ties broken by chunk id.

use std::sync::Arc;

use crate::embedding::EmbeddingService;
use crate::error::Result;
use crate::models::SearchHit;
use crate::store::Store;

pub struct Searcher {
    store: Arc<dyn Store>,
    /// `None` until the index has a pinned dimension (nothing stored yet).
    embeddings: Option<EmbeddingService>,
}

impl Searcher {
    pub async fn new(store: Arc<dyn Store>, embeddings: EmbeddingService) -> Result<Self> {
        let embeddings = store
            .pinned_dimension()
            .await?
            .map(|dims| embeddings.with_pinned_dims(dims));
        Ok(Self { store, embeddings })
    }

    /// Top `limit` chunks for `query`. A blank query or an empty index
    /// yields no hits.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let Some(embeddings) = &self.embeddings else {
            tracing::debug!("index has no pinned dimension yet; nothing to search");
            return Ok(Vec::new());
        };

        let vector = embeddings.embed(query).await?;
        let hits = self.store.search(&vector, limit).await?;
        tracing::debug!(query, hits = hits.len(), "search complete");
        Ok(hits)
    }
}

/// Print hits the way `cidx search` shows them.
pub fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}:{}-{}",
            i + 1,
            hit.score,
            hit.file_path,
            hit.start_line,
            hit.end_line
        );
        match &hit.name {
            Some(name) => println!("    {} ({})", name, hit.language),
            None => println!("    ({})", hit.language),
        }
        println!("    excerpt: \"{}\"", excerpt(&hit.content, 160));
        println!("    id: {}", hit.chunk_id);
        println!();
    }
}

fn excerpt(content: &str, max_chars: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::placeholder_vector;
    use crate::store::testing::chunk;
    use crate::store::InMemoryStore;

    async fn seeded() -> Arc<dyn Store> {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        store.initialize().await.unwrap();
        store.pin_dimension(8).await.unwrap();
        let texts = [("a.rs", "fn alpha() {}"), ("b.rs", "fn beta() {}"), ("c.rs", "struct Gamma;")];
        for (path, text) in texts {
            store
                .save_chunks(&[chunk(path, 1, text, placeholder_vector(text, 8))])
                .await
                .unwrap();
        }
        store
    }

    fn service() -> EmbeddingService {
        EmbeddingService::new(Vec::new(), 384, 10, 4)
    }

    #[tokio::test]
    async fn test_exact_text_ranks_first() {
        let searcher = Searcher::new(seeded().await, service()).await.unwrap();
        let hits = searcher.search("fn beta() {}", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].file_path, "b.rs");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_query_uses_index_dimension() {
        // The service would produce 384-d placeholders, but the index is pinned to 8.
        let searcher = Searcher::new(seeded().await, service()).await.unwrap();
        assert!(searcher.search("anything", 5).await.is_ok());
    }

    #[tokio::test]
    async fn test_blank_query_and_empty_index() {
        let searcher = Searcher::new(seeded().await, service()).await.unwrap();
        assert!(searcher.search("   ", 5).await.unwrap().is_empty());
        assert!(searcher.search("fn alpha", 0).await.unwrap().is_empty());

        let empty: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        empty.initialize().await.unwrap();
        let searcher = Searcher::new(empty, service()).await.unwrap();
        assert!(searcher.search("fn alpha", 5).await.unwrap().is_empty());
    }

    #[test]
    fn test_excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("fn a() {\n    1\n}", 100), "fn a() { 1 }");
        assert_eq!(excerpt("abcdef", 3), "abc...");
    }
}
