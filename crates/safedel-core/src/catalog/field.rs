//! Field definitions for entities.

use super::types::{FieldType, ScalarType};
use rkyv::{Archive, Deserialize, Serialize};
use safedel_proto::Value;

/// A field definition within an entity.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field data type.
    pub field_type: FieldType,
    /// Default value if not provided.
    pub default: Option<DefaultValue>,
    /// Whether the field value must be unique across live and masked rows.
    pub unique: bool,
}

/// Default value for a field.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum DefaultValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Fixed UUID (e.g. a sentinel row for set-default relations).
    Uuid([u8; 16]),
    /// Current timestamp (evaluated at write time).
    CurrentTimestamp,
}

impl DefaultValue {
    /// Materialize the default for a field of the given type.
    pub fn resolve(&self, scalar: ScalarType) -> Value {
        match self {
            DefaultValue::Null => Value::Null,
            DefaultValue::Bool(b) => Value::Bool(*b),
            DefaultValue::Int(i) if scalar == ScalarType::Int32 => Value::Int32(*i as i32),
            DefaultValue::Int(i) => Value::Int64(*i),
            DefaultValue::Float(f) => Value::Float64(*f),
            DefaultValue::String(s) => Value::String(s.clone()),
            DefaultValue::Uuid(id) => Value::Uuid(*id),
            DefaultValue::CurrentTimestamp => {
                Value::Timestamp(crate::storage::key::current_timestamp() as i64)
            }
        }
    }
}

impl FieldDef {
    /// Create a new required field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            default: None,
            unique: false,
        }
    }

    /// Create an optional scalar field.
    pub fn optional(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self::new(name, FieldType::OptionalScalar(scalar))
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Check if this field has a default value.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// The value written when the field is not supplied.
    ///
    /// Fields without a default fall back to null.
    pub fn default_value(&self) -> Value {
        self.default
            .as_ref()
            .map(|d| d.resolve(self.field_type.scalar_type()))
            .unwrap_or(Value::Null)
    }
}
