//! Record type for stored values.

use crate::error::Error;
use rkyv::{Archive, Deserialize, Serialize};

/// A stored row with lifecycle metadata.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Record {
    /// Entity type name.
    pub entity: String,

    /// Serialized entity data.
    pub data: Vec<u8>,

    /// Creation timestamp in microseconds since Unix epoch.
    pub created_at: u64,

    /// Masking timestamp. `None` for live rows.
    pub deleted_at: Option<u64>,

    /// Masking operation that set `deleted_at`.
    pub mask_batch: Option<u64>,
}

impl Record {
    /// Create a live record with the current timestamp.
    pub fn new(entity: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            entity: entity.into(),
            data,
            created_at: super::key::current_timestamp(),
            deleted_at: None,
            mask_batch: None,
        }
    }

    /// Check whether the row is masked.
    pub fn is_masked(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Mark the row as masked by operation `batch`.
    pub fn mask(&mut self, at: u64, batch: u64) {
        self.deleted_at = Some(at);
        self.mask_batch = Some(batch);
    }

    /// Clear the mask.
    pub fn restore(&mut self) {
        self.deleted_at = None;
        self.mask_batch = None;
    }

    /// Serialize the record to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
