//! Persisted metadata for one `SortIndex` (§4.3).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::model::field_value::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortIndexMeta {
    pub field_name: String,
    pub direction: SortDirection,
    pub data_type: DataType,
    pub root_page_id: Uuid,
    pub total_entries: u64,
    pub total_pages: u64,
}

impl SortIndexMeta {
    pub fn new(field_name: impl Into<String>, direction: SortDirection, data_type: DataType) -> Self {
        Self {
            field_name: field_name.into(),
            direction,
            data_type,
            root_page_id: Uuid::new_v4(),
            total_entries: 0,
            total_pages: 0,
        }
    }

    pub fn key(&self) -> (String, SortDirection) {
        (self.field_name.clone(), self.direction)
    }
}
