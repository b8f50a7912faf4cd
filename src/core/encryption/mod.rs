//! Encrypt/decrypt in-place (§6 "Exposed interface", `.db/encryption.pub`).
//!
//! Scope, and the Open Question it resolves (recorded in DESIGN.md): the
//! specification treats `.db/encryption.pub` as "presence indicates the
//! database is encrypted (opaque blob)" without specifying a cipher, key
//! management, or which bytes the blob holds. No asymmetric/KMS layer is
//! in scope here, so the marker stores the raw symmetric data key
//! directly — opaque to every caller except this module — and every blob
//! the files Merkle tree already tracks (assets, display/thumb
//! renditions, shard files) is the unit of encryption. Content hashing
//! stays over plaintext, so enabling or disabling encryption never moves
//! a file's Merkle leaf hash; only the bytes actually stored change.
//!
//! `chacha20poly1305` is not part of the teacher crate's own dependency
//! stack; it is grounded on `kanari-network-kanari-L2`, the one repo in
//! this retrieval pack with a real AEAD dependency.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use crate::constants::{DB_HIDDEN_DIR, ENCRYPTION_PUB_FILENAME};
use crate::core::files;
use crate::error::EngineError;
use crate::storage::Storage;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

pub fn encryption_marker_path() -> String {
    format!("{DB_HIDDEN_DIR}/{ENCRYPTION_PUB_FILENAME}")
}

pub async fn is_encrypted(storage: &dyn Storage) -> Result<bool, EngineError> {
    storage.file_exists(&encryption_marker_path()).await
}

fn fresh_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

fn cipher_for(key: &[u8]) -> Result<ChaCha20Poly1305, EngineError> {
    if key.len() != KEY_LEN {
        return Err(EngineError::integrity(format!(
            "encryption key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(ChaCha20Poly1305::new(Key::from_slice(key)))
}

fn encrypt_bytes(cipher: &ChaCha20Poly1305, plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| EngineError::integrity(format!("encryption failed: {e}")))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt_bytes(cipher: &ChaCha20Poly1305, blob: &[u8]) -> Result<Vec<u8>, EngineError> {
    if blob.len() < NONCE_LEN {
        return Err(EngineError::integrity("encrypted blob shorter than a nonce"));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| EngineError::integrity(format!("decryption failed: {e}")))
}

/// Generate a fresh data key, rewrite every file the files tree tracks as
/// `nonce || ciphertext`, and write the marker last so a reader never
/// observes the marker ahead of the ciphertext it implies.
pub async fn enable(storage: &dyn Storage) -> Result<(), EngineError> {
    if is_encrypted(storage).await? {
        return Err(EngineError::already_exists("database is already encrypted"));
    }
    let key = fresh_key();
    let cipher = cipher_for(&key)?;

    let tree = files::load_files_tree(storage).await?;
    for leaf in tree.iter_leaves() {
        let plaintext = storage.read(&leaf.name).await?;
        let ciphertext = encrypt_bytes(&cipher, &plaintext)?;
        storage.write(&leaf.name, &ciphertext).await?;
    }

    storage.write(&encryption_marker_path(), &key).await
}

/// Inverse of [`enable`]: decrypt every tracked file back to plaintext,
/// then remove the marker.
pub async fn disable(storage: &dyn Storage) -> Result<(), EngineError> {
    let key = storage.read(&encryption_marker_path()).await.map_err(|_| {
        EngineError::not_found("database is not encrypted")
    })?;
    let cipher = cipher_for(&key)?;

    let tree = files::load_files_tree(storage).await?;
    for leaf in tree.iter_leaves() {
        let ciphertext = storage.read(&leaf.name).await?;
        let plaintext = decrypt_bytes(&cipher, &ciphertext)?;
        storage.write(&leaf.name, &plaintext).await?;
    }

    storage.delete(&encryption_marker_path()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileLeaf, MerkleHash};
    use crate::storage::LocalStorage;
    use chrono::Utc;

    #[tokio::test]
    async fn test_enable_then_disable_roundtrips_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.write("asset/a", b"hello world").await.unwrap();
        let mut tree = files::load_files_tree(&storage).await.unwrap();
        tree.upsert_item(FileLeaf {
            name: "asset/a".to_string(),
            content_hash: MerkleHash::of(b"hello world"),
            size: 11,
            last_modified: Utc::now(),
        });
        files::save_files_tree(&storage, &mut tree).await.unwrap();

        assert!(!is_encrypted(&storage).await.unwrap());
        enable(&storage).await.unwrap();
        assert!(is_encrypted(&storage).await.unwrap());
        assert_ne!(storage.read("asset/a").await.unwrap(), b"hello world");

        disable(&storage).await.unwrap();
        assert!(!is_encrypted(&storage).await.unwrap());
        assert_eq!(storage.read("asset/a").await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_enable_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        enable(&storage).await.unwrap();
        let err = enable(&storage).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));
    }
}
