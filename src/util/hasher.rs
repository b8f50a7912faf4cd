//! Streaming SHA-256 content hashing (§4.2 "Hash + Merkle").
//!
//! Unlike the non-cryptographic hash an internal dedup index might use, the
//! Merkle leaves here are relied on for cross-replica integrity checks, so
//! the hash must be collision resistant.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::error::EngineError;

pub const CHUNK_SIZE: usize = 64 * 1024;

pub fn hash_buffer(buffer: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(buffer);
    hasher.finalize().into()
}

pub fn hash_buffer_hex(buffer: &[u8]) -> String {
    hex::encode(hash_buffer(buffer))
}

/// Hash an async stream without buffering it entirely in memory.
pub async fn hash_stream<R>(mut reader: R) -> Result<[u8; 32], EngineError>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

pub async fn hash_file_contents(path: &Path) -> Result<[u8; 32], EngineError> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        EngineError::transient(format!("could not open {} for hashing: {e}", path.display()))
    })?;
    hash_stream(BufReader::new(file)).await
}

/// Hash CPU-bound content on a blocking worker thread, matching the
/// engine's policy of keeping the async executor free of heavy compute
/// (§5 "Hashing is CPU-bound and may execute on a worker pool").
pub async fn hash_buffer_blocking(buffer: Vec<u8>) -> Result<[u8; 32], EngineError> {
    tokio::task::spawn_blocking(move || hash_buffer(&buffer))
        .await
        .map_err(|e| EngineError::transient(format!("hashing task panicked: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_stream_matches_hash_buffer() {
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        let expected = hash_buffer(&data);
        let actual = hash_stream(std::io::Cursor::new(data)).await.unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_hash_buffer_is_deterministic() {
        let a = hash_buffer(b"hello");
        let b = hash_buffer(b"hello");
        assert_eq!(a, b);
        assert_ne!(a, hash_buffer(b"hellp"));
    }
}
