//! Column encodings shared by the SQL backends.
//!
//! Embeddings and list columns are stored as JSON text. Decoding is
//! strict: anything that does not parse back into the declared shape is
//! reported as corruption rather than silently defaulted.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::StoreError;

use super::StoreResult;

pub(crate) fn encode_embedding(vector: &[f32]) -> String {
    // serde_json cannot write NaN/inf; callers only store finite vectors.
    serde_json::to_string(vector).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn decode_embedding(
    chunk_id: &str,
    raw: &str,
    pinned: Option<usize>,
) -> StoreResult<Vec<f32>> {
    let what = || format!("embedding of chunk {}", chunk_id);
    let vector: Vec<f32> = serde_json::from_str(raw).map_err(|e| StoreError::corruption(what(), e))?;
    if vector.is_empty() {
        return Err(StoreError::corruption(what(), "vector is empty"));
    }
    if let Some(expected) = pinned {
        if vector.len() != expected {
            return Err(StoreError::corruption(
                what(),
                format!("length {} does not match pinned dimension {}", vector.len(), expected),
            ));
        }
    }
    Ok(vector)
}

pub(crate) fn encode_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

/// NULL and empty text decode to an empty list.
pub(crate) fn decode_list(chunk_id: &str, column: &str, raw: Option<&str>) -> StoreResult<Vec<String>> {
    match raw {
        None => Ok(Vec::new()),
        Some(s) if s.trim().is_empty() => Ok(Vec::new()),
        Some(s) => serde_json::from_str(s)
            .map_err(|e| StoreError::corruption(format!("{} of chunk {}", column, chunk_id), e)),
    }
}

pub(crate) fn decode_metadata(chunk_id: &str, raw: Option<&str>) -> StoreResult<Value> {
    match raw {
        None => Ok(Value::Object(Default::default())),
        Some(s) if s.trim().is_empty() => Ok(Value::Object(Default::default())),
        Some(s) => serde_json::from_str(s)
            .map_err(|e| StoreError::corruption(format!("metadata of chunk {}", chunk_id), e)),
    }
}

pub(crate) fn parse_dims(raw: &str) -> StoreResult<usize> {
    match raw.trim().parse::<usize>() {
        Ok(d) if d > 0 => Ok(d),
        _ => Err(StoreError::corruption(
            "index settings",
            format!("invalid embedding dimension {:?}", raw),
        )),
    }
}

/// `index-backup-<UTC timestamp>.<ext>` inside `dir`, never an existing file.
pub(crate) fn backup_path(dir: &Path, ext: &str) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
    let mut candidate = dir.join(format!("index-backup-{}.{}", stamp, ext));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("index-backup-{}-{}.{}", stamp, n, ext));
        n += 1;
    }
    candidate
}
