//! SHA-256 content hashing for change detection and chunk identity.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{IndexError, Result};

/// Hex SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Content-addressed chunk id.
///
/// Location is folded into the digest so identical blocks in different
/// files or at different lines never share an id. Fields are
/// length-prefixed, which keeps `("a:b", "c")` and `("a", "b:c")` apart.
pub fn chunk_checksum(file_path: &str, content: &str, start_line: i64, end_line: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update((file_path.len() as u64).to_le_bytes());
    hasher.update(file_path.as_bytes());
    hasher.update(start_line.to_le_bytes());
    hasher.update(end_line.to_le_bytes());
    hasher.update((content.len() as u64).to_le_bytes());
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Read a file and hash its raw bytes.
pub async fn file_checksum(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| IndexError::Checksum {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(checksum(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_vector() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_checksum_deterministic() {
        let data = b"fn main() {\n    println!(\"hi\");\n}\n";
        assert_eq!(checksum(data), checksum(data));
    }

    #[test]
    fn test_checksum_one_byte_difference() {
        assert_ne!(checksum(b"let x = 1;"), checksum(b"let x = 2;"));
        assert_ne!(checksum(b""), checksum(b" "));
    }

    #[test]
    fn test_chunk_checksum_folds_location() {
        let body = "fn a() {}";
        let base = chunk_checksum("src/a.rs", body, 1, 1);
        assert_eq!(base, chunk_checksum("src/a.rs", body, 1, 1));
        assert_ne!(base, chunk_checksum("src/b.rs", body, 1, 1));
        assert_ne!(base, chunk_checksum("src/a.rs", body, 2, 2));
        assert_ne!(base, chunk_checksum("src/a.rs", "fn b() {}", 1, 1));
    }

    #[test]
    fn test_chunk_checksum_field_boundaries() {
        assert_ne!(
            chunk_checksum("a:b", "c", 1, 1),
            chunk_checksum("a", "b:c", 1, 1)
        );
    }

    #[tokio::test]
    async fn test_file_checksum_matches_bytes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        std::fs::write(&path, "hello").unwrap();
        assert_eq!(file_checksum(&path).await.unwrap(), checksum(b"hello"));
    }

    #[tokio::test]
    async fn test_file_checksum_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = file_checksum(&tmp.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, IndexError::Checksum { .. }));
    }
}
