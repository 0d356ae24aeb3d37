//! Deterministic offline embedding.
//!
//! Derives a unit-length vector from SHA-256 digests of the text. The
//! result carries no semantic meaning; it only keeps the pipeline moving
//! when every real provider is unreachable.

use sha2::{Digest, Sha256};

pub const PLACEHOLDER_PROVIDER: &str = "placeholder";

pub fn placeholder_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut values = Vec::with_capacity(dims);
    let mut block: u64 = 0;
    while values.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(block.to_le_bytes());
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        for word in digest.chunks_exact(4) {
            if values.len() == dims {
                break;
            }
            let raw = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            values.push((raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32);
        }
        block += 1;
    }

    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut values {
            *v /= norm;
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_and_norm() {
        let v = placeholder_vector("fn main() {}", 384);
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_deterministic_and_text_dependent() {
        assert_eq!(placeholder_vector("a", 16), placeholder_vector("a", 16));
        assert_ne!(placeholder_vector("a", 16), placeholder_vector("b", 16));
    }

    #[test]
    fn test_odd_dimension() {
        assert_eq!(placeholder_vector("x", 5).len(), 5);
        assert!(placeholder_vector("x", 0).is_empty());
    }
}
