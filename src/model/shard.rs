//! `Shard` — a fixed-capacity partition of a collection's records (§4.1,
//! §4.4). Serialized whole, as a single rmp-serde document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::record::Record;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shard {
    pub id: Uuid,
    pub records: BTreeMap<Uuid, Record>,
}

impl Shard {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            records: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
