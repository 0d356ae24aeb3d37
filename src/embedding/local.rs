//! Secondary tier: a locally reachable inference service.
//!
//! One request per text: `POST <url>` with `{"text": "..."}` (plus
//! `"model"` when configured), answered by `{"embedding": [...]}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::error::{IndexError, Result};

pub struct LocalProvider {
    url: String,
    model: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct LocalRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct LocalResponse {
    embedding: Vec<f32>,
}

impl LocalProvider {
    pub fn new(url: impl Into<String>, model: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            model,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    /// A transport failure aborts the whole call, since the service is
    /// down for every remaining item too. A bad status or payload only
    /// fails that item.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let request = LocalRequest {
                text,
                model: self.model.as_deref(),
            };
            let response = self
                .client
                .post(&self.url)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    IndexError::ProviderUnavailable(format!(
                        "local provider unreachable at {}: {}",
                        self.url, e
                    ))
                })?;

            if !response.status().is_success() {
                tracing::debug!("local provider returned {}", response.status());
                out.push(None);
                continue;
            }

            match response.json::<LocalResponse>().await {
                Ok(parsed) => out.push(Some(parsed.embedding)),
                Err(e) => {
                    tracing::debug!("local provider returned malformed payload: {}", e);
                    out.push(None);
                }
            }
        }
        Ok(out)
    }
}
