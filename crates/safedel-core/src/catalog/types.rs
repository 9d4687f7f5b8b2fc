//! Core type definitions for the catalog.

use rkyv::{Archive, Deserialize, Serialize};
use safedel_proto::Value;

/// Scalar data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 string.
    String,
    /// Binary data.
    Bytes,
    /// Timestamp (microseconds since Unix epoch).
    Timestamp,
    /// UUID (128-bit identifier).
    Uuid,
}

/// Field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum FieldType {
    /// A scalar value.
    Scalar(ScalarType),
    /// An optional scalar value (nullable).
    OptionalScalar(ScalarType),
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float64
        )
    }

    /// Check whether a runtime value fits this type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ScalarType::Bool, Value::Bool(_))
                | (ScalarType::Int32, Value::Int32(_))
                | (ScalarType::Int64, Value::Int64(_) | Value::Int32(_))
                | (ScalarType::Float64, Value::Float64(_))
                | (ScalarType::String, Value::String(_))
                | (ScalarType::Bytes, Value::Bytes(_))
                | (ScalarType::Timestamp, Value::Timestamp(_))
                | (ScalarType::Uuid, Value::Uuid(_))
        )
    }
}

impl FieldType {
    /// Create a scalar field type.
    pub fn scalar(scalar: ScalarType) -> Self {
        FieldType::Scalar(scalar)
    }

    /// Create an optional scalar field type.
    pub fn optional(scalar: ScalarType) -> Self {
        FieldType::OptionalScalar(scalar)
    }

    /// The underlying scalar type.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            FieldType::Scalar(s) | FieldType::OptionalScalar(s) => *s,
        }
    }

    /// Check if the field accepts null.
    pub fn is_nullable(&self) -> bool {
        matches!(self, FieldType::OptionalScalar(_))
    }

    /// Check whether a runtime value is valid for this field type.
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return self.is_nullable();
        }
        self.scalar_type().accepts(value)
    }
}
