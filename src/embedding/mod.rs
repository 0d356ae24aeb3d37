//! Embedding generation with a provider fallback chain.
//!
//! [`EmbeddingService`] turns text into vectors by trying, in order:
//!
//! 1. **[`RemoteProvider`]**: a hosted inference endpoint (bearer auth).
//! 2. **[`LocalProvider`]**: a loopback/LAN inference service.
//! 3. **Placeholder**: a hash-derived unit vector. Always succeeds, is
//!    semantically meaningless, and logs a warning every time it is used.
//!
//! A tier failure (transport error, non-2xx, malformed payload, wrong
//! dimension) falls through to the next tier for the affected items only.
//! Results from any tier go into a bounded in-process cache keyed by a
//! hash of the text, so repeated texts never reach a provider twice.
//!
//! # Dimension pinning
//!
//! A service built with [`EmbeddingService::with_pinned_dims`] only
//! accepts vectors of that length; a tier returning anything else counts
//! as failed. The indexer always pins to the index's dimension so one
//! index never mixes vector sizes. An unpinned service accepts whatever
//! the first working tier returns.

mod cache;
mod local;
mod placeholder;
mod remote;

pub use cache::{CacheEntry, EmbeddingCache};
pub use local::LocalProvider;
pub use placeholder::{placeholder_vector, PLACEHOLDER_PROVIDER};
pub use remote::RemoteProvider;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{IndexError, Result};
use crate::models::now_ms;

/// One tier of the fallback chain.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short tier name recorded with cached vectors (e.g. `"remote"`).
    fn name(&self) -> &str;

    /// Embed `texts`, returning one slot per input in order.
    ///
    /// `Err` means the whole call failed; `None` in a slot means only that
    /// item failed. Either way the affected items move to the next tier.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>>;
}

/// An embedding plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub provider: String,
    pub cached: bool,
}

impl Embedded {
    pub fn is_placeholder(&self) -> bool {
        self.provider == PLACEHOLDER_PROVIDER
    }
}

pub struct EmbeddingService {
    providers: Vec<Box<dyn EmbeddingProvider>>,
    cache: EmbeddingCache,
    placeholder_dims: usize,
    pinned_dims: Option<usize>,
    batch_size: usize,
}

impl EmbeddingService {
    /// Build an unpinned service over `providers` (tried in order), with
    /// the placeholder tier producing `placeholder_dims`-length vectors.
    pub fn new(
        providers: Vec<Box<dyn EmbeddingProvider>>,
        placeholder_dims: usize,
        cache_size: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            providers,
            cache: EmbeddingCache::new(cache_size),
            placeholder_dims,
            pinned_dims: None,
            batch_size: batch_size.max(1),
        }
    }

    /// Build the configured chain. A primary tier whose token variable is
    /// unset is left out with a warning.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut providers: Vec<Box<dyn EmbeddingProvider>> = Vec::new();

        if let Some(primary) = &config.primary {
            match std::env::var(&primary.token_env) {
                Ok(token) if !token.is_empty() => {
                    providers.push(Box::new(RemoteProvider::new(
                        primary.url.clone(),
                        token,
                        primary.model.clone(),
                        timeout,
                    )?));
                }
                _ => tracing::warn!(
                    "{} is not set; remote embedding provider disabled",
                    primary.token_env
                ),
            }
        }
        if let Some(secondary) = &config.secondary {
            providers.push(Box::new(LocalProvider::new(
                secondary.url.clone(),
                secondary.model.clone(),
                timeout,
            )?));
        }
        if providers.is_empty() {
            tracing::warn!("no embedding providers configured; all vectors will be placeholders");
        }

        Ok(Self::new(
            providers,
            config.dims,
            config.cache_size,
            config.batch_size,
        ))
    }

    /// Only accept vectors of length `dims` from any tier.
    pub fn with_pinned_dims(mut self, dims: usize) -> Self {
        self.pinned_dims = Some(dims);
        self
    }

    pub fn pinned_dims(&self) -> Option<usize> {
        self.pinned_dims
    }

    /// Dimension the placeholder tier produces.
    pub fn fallback_dims(&self) -> usize {
        self.pinned_dims.unwrap_or(self.placeholder_dims)
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.embed_batch_detailed(&[text.to_string()]).await?;
        results
            .pop()
            .map(|e| e.vector)
            .ok_or_else(|| IndexError::ProviderUnavailable("empty embedding result".to_string()))
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self
            .embed_batch_detailed(texts)
            .await?
            .into_iter()
            .map(|e| e.vector)
            .collect())
    }

    /// Embed every text, reporting the tier that produced each vector.
    ///
    /// Fails only with [`IndexError::InvalidInput`] when a text is empty.
    pub async fn embed_batch_detailed(&self, texts: &[String]) -> Result<Vec<Embedded>> {
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(IndexError::InvalidInput(format!(
                "embedding text at position {} is empty",
                pos
            )));
        }

        let keys: Vec<String> = texts.iter().map(|t| EmbeddingCache::key_for(t)).collect();
        let mut resolved: HashMap<String, Embedded> = HashMap::new();
        let mut pending: Vec<usize> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for (i, key) in keys.iter().enumerate() {
            if !seen.insert(key.as_str()) {
                continue;
            }
            match self.cache.get(key) {
                Some(entry) => {
                    resolved.insert(
                        key.clone(),
                        Embedded {
                            vector: entry.vector,
                            provider: entry.provider,
                            cached: true,
                        },
                    );
                }
                None => pending.push(i),
            }
        }

        for provider in &self.providers {
            if pending.is_empty() {
                break;
            }
            let mut still_pending = Vec::new();
            for batch in pending.chunks(self.batch_size) {
                let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
                let slots = match provider.embed_batch(&batch_texts).await {
                    Ok(slots) if slots.len() == batch.len() => slots,
                    Ok(slots) => {
                        tracing::warn!(
                            "{} provider returned {} vectors for {} texts; falling back",
                            provider.name(),
                            slots.len(),
                            batch.len()
                        );
                        still_pending.extend_from_slice(batch);
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("{} provider failed: {}; falling back", provider.name(), e);
                        still_pending.extend_from_slice(batch);
                        continue;
                    }
                };

                for (&i, slot) in batch.iter().zip(slots) {
                    match slot {
                        Some(vector) if self.accepts(&vector) => {
                            self.remember(&keys[i], &vector, provider.name());
                            resolved.insert(
                                keys[i].clone(),
                                Embedded {
                                    vector,
                                    provider: provider.name().to_string(),
                                    cached: false,
                                },
                            );
                        }
                        Some(vector) => {
                            tracing::warn!(
                                "{} provider returned a {}-dimension vector, index expects {:?}; falling back",
                                provider.name(),
                                vector.len(),
                                self.pinned_dims
                            );
                            still_pending.push(i);
                        }
                        None => still_pending.push(i),
                    }
                }
            }
            pending = still_pending;
        }

        if !pending.is_empty() {
            tracing::warn!(
                "all embedding providers failed for {} text(s); using placeholder vectors, search relevance is degraded",
                pending.len()
            );
            let dims = self.fallback_dims();
            for i in pending {
                let vector = placeholder_vector(&texts[i], dims);
                self.remember(&keys[i], &vector, PLACEHOLDER_PROVIDER);
                resolved.insert(
                    keys[i].clone(),
                    Embedded {
                        vector,
                        provider: PLACEHOLDER_PROVIDER.to_string(),
                        cached: false,
                    },
                );
            }
        }

        keys.iter()
            .map(|key| {
                resolved.get(key).cloned().ok_or_else(|| {
                    IndexError::ProviderUnavailable("embedding missing for input".to_string())
                })
            })
            .collect()
    }

    fn accepts(&self, vector: &[f32]) -> bool {
        if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
            return false;
        }
        self.pinned_dims.map_or(true, |d| d == vector.len())
    }

    fn remember(&self, key: &str, vector: &[f32], provider: &str) {
        self.cache.insert(
            key.to_string(),
            CacheEntry {
                vector: vector.to_vec(),
                provider: provider.to_string(),
                inserted_at: now_ms(),
            },
        );
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn remote(url: String) -> Box<dyn EmbeddingProvider> {
        Box::new(RemoteProvider::new(url, "secret", None, Duration::from_secs(5)).unwrap())
    }

    fn local(url: String) -> Box<dyn EmbeddingProvider> {
        Box::new(LocalProvider::new(url, None, Duration::from_secs(5)).unwrap())
    }

    fn remote_body(vectors: &[Vec<f32>]) -> String {
        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        serde_json::json!({
            "success": true,
            "result": { "shape": [vectors.len(), dims], "data": vectors }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let service = EmbeddingService::new(Vec::new(), 8, 10, 4);
        let err = service.embed("").await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidInput(_)));
        let err = service
            .embed_batch(&["ok".to_string(), "   ".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_cache_prevents_second_provider_call() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/embed")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(remote_body(&[vec![0.1, 0.2, 0.3]]))
            .expect(1)
            .create_async()
            .await;

        let service = EmbeddingService::new(vec![remote(format!("{}/embed", server.url()))], 3, 10, 4);
        let first = service.embed("fn main() {}").await.unwrap();
        let second = service.embed("fn main() {}").await.unwrap();
        assert_eq!(first, vec![0.1, 0.2, 0.3]);
        assert_eq!(first, second);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_distinct_texts_call_provider_each() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/embed")
            .with_status(200)
            .with_body(remote_body(&[vec![1.0, 0.0]]))
            .expect(2)
            .create_async()
            .await;

        let service = EmbeddingService::new(vec![remote(format!("{}/embed", server.url()))], 2, 10, 4);
        service.embed("alpha").await.unwrap();
        service.embed("beta").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fallback_to_secondary_dimension() {
        let mut primary = Server::new_async().await;
        let primary_mock = primary
            .mock("POST", "/embed")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;
        let mut secondary = Server::new_async().await;
        let secondary_mock = secondary
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_body(serde_json::json!({ "embedding": vec![0.5f32; 6] }).to_string())
            .create_async()
            .await;

        let service = EmbeddingService::new(
            vec![
                remote(format!("{}/embed", primary.url())),
                local(format!("{}/api/embeddings", secondary.url())),
            ],
            3,
            10,
            4,
        );
        let detailed = service
            .embed_batch_detailed(&["struct Point;".to_string()])
            .await
            .unwrap();
        assert_eq!(detailed[0].vector.len(), 6);
        assert_eq!(detailed[0].provider, "local");
        primary_mock.assert_async().await;
        secondary_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_placeholder_when_all_tiers_fail() {
        let mut server = Server::new_async().await;
        let _bad = server
            .mock("POST", "/embed")
            .with_status(200)
            .with_body("{\"success\": false}")
            .create_async()
            .await;

        let service = EmbeddingService::new(vec![remote(format!("{}/embed", server.url()))], 12, 10, 4);
        let detailed = service
            .embed_batch_detailed(&["let x = 1;".to_string()])
            .await
            .unwrap();
        assert!(detailed[0].is_placeholder());
        assert_eq!(detailed[0].vector, placeholder_vector("let x = 1;", 12));
    }

    #[tokio::test]
    async fn test_pinned_dims_reject_mismatched_tier() {
        let mut server = Server::new_async().await;
        let _wrong = server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_body(serde_json::json!({ "embedding": vec![0.5f32; 768] }).to_string())
            .create_async()
            .await;

        let service = EmbeddingService::new(
            vec![local(format!("{}/api/embeddings", server.url()))],
            384,
            10,
            4,
        )
        .with_pinned_dims(384);
        let vector = service.embed("impl Foo {}").await.unwrap();
        assert_eq!(vector.len(), 384);
        assert_eq!(vector, placeholder_vector("impl Foo {}", 384));
    }

    #[tokio::test]
    async fn test_batch_items_fall_back_independently() {
        let mut server = Server::new_async().await;
        let _good = server
            .mock("POST", "/api/embeddings")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({ "text": "good" })))
            .with_status(200)
            .with_body(serde_json::json!({ "embedding": [1.0, 2.0] }).to_string())
            .create_async()
            .await;
        let _bad = server
            .mock("POST", "/api/embeddings")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({ "text": "bad" })))
            .with_status(500)
            .create_async()
            .await;

        let service = EmbeddingService::new(
            vec![local(format!("{}/api/embeddings", server.url()))],
            2,
            10,
            8,
        );
        let detailed = service
            .embed_batch_detailed(&["good".to_string(), "bad".to_string(), "good".to_string()])
            .await
            .unwrap();
        assert_eq!(detailed[0].provider, "local");
        assert_eq!(detailed[0].vector, vec![1.0, 2.0]);
        assert!(detailed[1].is_placeholder());
        assert_eq!(detailed[2].vector, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_unreachable_provider_falls_through() {
        // Port 9 (discard) on loopback is not expected to accept connections.
        let service = EmbeddingService::new(
            vec![local("http://127.0.0.1:9/api/embeddings".to_string())],
            4,
            10,
            4,
        );
        let vector = service.embed("anything").await.unwrap();
        assert_eq!(vector.len(), 4);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
