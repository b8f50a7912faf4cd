//! Errors for the mediagrove engine
//!
//! Enumeration for all errors that can occur across the storage and
//! reconciliation engine, mapped onto the error kinds fixed by the
//! specification (§7): `Transient`, `IntegrityError`, `NotLoaded`,
//! `NotFound`, `AlreadyExists`, `LockHeld`, `TypeMismatch`, `Fatal`.
//!

use derive_more::{Display, Error};
use std::io;

pub mod string_error;

pub use crate::error::string_error::StringError;

#[derive(Debug, Display, Error)]
pub enum EngineError {
    /// A transient I/O hiccup; the caller already retried up to the policy bound.
    Transient(StringError),

    /// A hash mismatch after copy/read, a torn Merkle file, or invalid shard bytes.
    IntegrityError(StringError),

    /// A sort index or other stateful component was queried before `build`/`load`.
    NotLoaded(StringError),

    /// A record, shard, collection, page, or file the caller named does not exist.
    NotFound(StringError),

    /// The caller asked to create something that already exists.
    AlreadyExists(StringError),

    /// Failed to acquire the write-lock within policy.
    LockHeld(StringError),

    /// A sort index's inferred `dataType` doesn't match a later value.
    TypeMismatch(StringError),

    /// Database-identity mismatch on replicate without `force`; unresolvable repair.
    Fatal(StringError),

    IO(io::Error),
    Json(serde_json::Error),
    MsgPackEncode(rmp_serde::encode::Error),
    MsgPackDecode(rmp_serde::decode::Error),
    Uuid(uuid::Error),
}

impl EngineError {
    pub fn transient(s: impl AsRef<str>) -> Self {
        EngineError::Transient(StringError::from(s.as_ref()))
    }

    pub fn integrity(s: impl AsRef<str>) -> Self {
        EngineError::IntegrityError(StringError::from(s.as_ref()))
    }

    pub fn not_loaded(s: impl AsRef<str>) -> Self {
        EngineError::NotLoaded(StringError::from(s.as_ref()))
    }

    pub fn not_found(s: impl AsRef<str>) -> Self {
        EngineError::NotFound(StringError::from(s.as_ref()))
    }

    pub fn already_exists(s: impl AsRef<str>) -> Self {
        EngineError::AlreadyExists(StringError::from(s.as_ref()))
    }

    pub fn lock_held(s: impl AsRef<str>) -> Self {
        EngineError::LockHeld(StringError::from(s.as_ref()))
    }

    pub fn type_mismatch(s: impl AsRef<str>) -> Self {
        EngineError::TypeMismatch(StringError::from(s.as_ref()))
    }

    pub fn fatal(s: impl AsRef<str>) -> Self {
        EngineError::Fatal(StringError::from(s.as_ref()))
    }

    pub fn basic_str(s: impl AsRef<str>) -> Self {
        EngineError::Fatal(StringError::from(s.as_ref()))
    }

    /// `Transient` errors are the only kind a caller should retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

impl From<io::Error> for EngineError {
    fn from(value: io::Error) -> Self {
        EngineError::IO(value)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        EngineError::Json(value)
    }
}

impl From<rmp_serde::encode::Error> for EngineError {
    fn from(value: rmp_serde::encode::Error) -> Self {
        EngineError::MsgPackEncode(value)
    }
}

impl From<rmp_serde::decode::Error> for EngineError {
    fn from(value: rmp_serde::decode::Error) -> Self {
        EngineError::MsgPackDecode(value)
    }
}

impl From<uuid::Error> for EngineError {
    fn from(value: uuid::Error) -> Self {
        EngineError::Uuid(value)
    }
}
