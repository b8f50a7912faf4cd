//! The dynamic value type stored in a [`Record`](super::record::Record)
//! field (§9 "Dynamic field types"). Records carry arbitrary user schemas,
//! so a field's value can't be a fixed Rust type — it's this small variant
//! instead, which the wire format (rmp-serde) maps onto directly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Date(DateTime<Utc>),
    Array(Vec<FieldValue>),
    Object(BTreeMap<String, FieldValue>),
}

/// The inferred type of a sort index over a field, chosen from the first
/// non-null value a `build()` pass observes (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    String,
    Number,
    Date,
}

impl FieldValue {
    /// The `DataType` bucket this value belongs to when used as a sort
    /// index key, or `None` for values that can't be indexed (`Null`,
    /// `Bool`, `Bytes`, `Array`, `Object`).
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            FieldValue::String(_) => Some(DataType::String),
            FieldValue::Int(_) | FieldValue::Float(_) => Some(DataType::Number),
            FieldValue::Date(_) => Some(DataType::Date),
            FieldValue::Null
            | FieldValue::Bool(_)
            | FieldValue::Bytes(_)
            | FieldValue::Array(_)
            | FieldValue::Object(_) => None,
        }
    }

    /// Ordering key within a single `DataType` bucket. Callers must only
    /// compare values that share a `data_type()`.
    pub fn sort_key(&self) -> SortKey<'_> {
        match self {
            FieldValue::String(s) => SortKey::Str(s),
            FieldValue::Int(i) => SortKey::Num(*i as f64),
            FieldValue::Float(f) => SortKey::Num(*f),
            FieldValue::Date(d) => SortKey::Num(d.timestamp_millis() as f64),
            _ => SortKey::Unorderable,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortKey<'a> {
    Str(&'a str),
    Num(f64),
    Unorderable,
}

impl<'a> PartialOrd for SortKey<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (SortKey::Str(a), SortKey::Str(b)) => a.partial_cmp(b),
            (SortKey::Num(a), SortKey::Num(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}
