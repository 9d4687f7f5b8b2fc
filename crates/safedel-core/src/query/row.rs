//! Decoded rows returned by the executor.

use std::collections::HashMap;

use safedel_proto::Value;

use super::value_codec::decode_entity;
use crate::error::Error;
use crate::storage::Record;

/// A decoded entity row.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    /// Entity type.
    pub entity: String,
    /// Identity.
    pub id: [u8; 16],
    /// Field values in stored order.
    pub fields: Vec<(String, Value)>,
    /// Creation time in microseconds.
    pub created_at: u64,
    /// Mask time in microseconds, if masked.
    pub deleted_at: Option<u64>,
    /// Rows loaded through `select_related` and `prefetch`, keyed by accessor.
    pub related: HashMap<String, Vec<EntityRow>>,
}

impl EntityRow {
    /// Decode a stored record.
    pub fn from_record(id: [u8; 16], record: &Record) -> Result<Self, Error> {
        Ok(Self {
            entity: record.entity.clone(),
            id,
            fields: decode_entity(&record.data)?,
            created_at: record.created_at,
            deleted_at: record.deleted_at,
            related: HashMap::new(),
        })
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == field).map(|(_, v)| v)
    }

    /// Set a field value, appending it if absent.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    /// Whether the row is masked.
    pub fn is_masked(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Rows loaded under an accessor.
    pub fn related(&self, accessor: &str) -> &[EntityRow] {
        self.related.get(accessor).map_or(&[], Vec::as_slice)
    }

    /// Identity as lowercase hex.
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}
