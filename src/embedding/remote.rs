//! Primary tier: hosted inference endpoint.
//!
//! `POST <url>` with `Authorization: Bearer <token>` and body
//! `{"text": [...]}`. A successful response looks like
//! `{"success": true, "result": {"shape": [n, d], "data": [[...], ...]}}`;
//! `data` may also be a flat array of `n * d` floats.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::EmbeddingProvider;
use crate::error::{IndexError, Result};

pub struct RemoteProvider {
    url: String,
    token: String,
    model: Option<String>,
    client: reqwest::Client,
}

impl RemoteProvider {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            token: token.into(),
            model,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    fn name(&self) -> &str {
        "remote"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        let mut body = serde_json::json!({ "text": texts });
        if let Some(model) = &self.model {
            body["model"] = Value::String(model.clone());
        }

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::ProviderUnavailable(format!("remote request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IndexError::ProviderUnavailable(format!(
                "remote provider returned {}: {}",
                status, text
            )));
        }

        let json: Value = response.json().await.map_err(|e| {
            IndexError::ProviderUnavailable(format!("remote response is not JSON: {}", e))
        })?;
        let vectors = parse_remote_response(&json, texts.len())?;
        Ok(vectors.into_iter().map(Some).collect())
    }
}

pub(crate) fn parse_remote_response(json: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let malformed = |msg: &str| IndexError::ProviderUnavailable(format!("malformed remote response: {}", msg));

    if json.get("success").and_then(Value::as_bool) != Some(true) {
        let errors = json.get("errors").map(|e| e.to_string()).unwrap_or_default();
        return Err(IndexError::ProviderUnavailable(format!(
            "remote provider reported failure {}",
            errors
        )));
    }

    let result = json.get("result").ok_or_else(|| malformed("missing result"))?;
    let data = result
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing result.data"))?;

    let vectors: Vec<Vec<f32>> = if data.first().map(Value::is_array).unwrap_or(false) {
        data.iter()
            .map(|row| {
                row.as_array()
                    .ok_or_else(|| malformed("mixed row types in result.data"))
                    .and_then(|values| floats(values).ok_or_else(|| malformed("non-numeric value")))
            })
            .collect::<Result<_>>()?
    } else {
        let flat = floats(data).ok_or_else(|| malformed("non-numeric value"))?;
        let dims = result
            .get("shape")
            .and_then(Value::as_array)
            .and_then(|s| s.get(1))
            .and_then(Value::as_u64)
            .map(|d| d as usize)
            .unwrap_or(if expected > 0 { flat.len() / expected } else { 0 });
        if dims == 0 || flat.len() % dims != 0 {
            return Err(malformed("flat data does not match shape"));
        }
        flat.chunks(dims).map(<[f32]>::to_vec).collect()
    };

    if vectors.len() != expected {
        return Err(malformed(&format!(
            "expected {} vectors, got {}",
            expected,
            vectors.len()
        )));
    }
    Ok(vectors)
}

fn floats(values: &[Value]) -> Option<Vec<f32>> {
    values.iter().map(|v| v.as_f64().map(|f| f as f32)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_data() {
        let json = serde_json::json!({
            "success": true,
            "result": { "shape": [2, 3], "data": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]] }
        });
        let vectors = parse_remote_response(&json, 2).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![0.4, 0.5, 0.6]);
    }

    #[test]
    fn test_parse_flat_data_with_shape() {
        let json = serde_json::json!({
            "success": true,
            "result": { "shape": [2, 2], "data": [1.0, 2.0, 3.0, 4.0] }
        });
        let vectors = parse_remote_response(&json, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_parse_success_false() {
        let json = serde_json::json!({ "success": false, "errors": [{"message": "quota"}] });
        assert!(matches!(
            parse_remote_response(&json, 1),
            Err(IndexError::ProviderUnavailable(_))
        ));
    }

    #[test]
    fn test_parse_count_mismatch() {
        let json = serde_json::json!({
            "success": true,
            "result": { "shape": [1, 2], "data": [[1.0, 2.0]] }
        });
        assert!(parse_remote_response(&json, 2).is_err());
    }

    #[test]
    fn test_parse_non_numeric() {
        let json = serde_json::json!({
            "success": true,
            "result": { "shape": [1, 2], "data": [["a", 2.0]] }
        });
        assert!(parse_remote_response(&json, 1).is_err());
    }
}
