//! Value codec for encoding/decoding entity data to/from bytes.
//!
//! Format:
//! - Field count (4 bytes, little-endian)
//! - For each field:
//!   - Field name length (2 bytes, little-endian)
//!   - Field name (UTF-8 bytes)
//!   - Value tag (1 byte)
//!   - Value data (fixed width, or 4-byte length prefix for strings and bytes)

use crate::error::Error;
use safedel_proto::Value;

/// Type tag for encoded values.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueTag {
    Null = 0,
    Bool = 1,
    Int32 = 2,
    Int64 = 3,
    Float64 = 5,
    String = 6,
    Bytes = 7,
    Uuid = 8,
    Timestamp = 9,
}

impl TryFrom<u8> for ValueTag {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ValueTag::Null),
            1 => Ok(ValueTag::Bool),
            2 => Ok(ValueTag::Int32),
            3 => Ok(ValueTag::Int64),
            5 => Ok(ValueTag::Float64),
            6 => Ok(ValueTag::String),
            7 => Ok(ValueTag::Bytes),
            8 => Ok(ValueTag::Uuid),
            9 => Ok(ValueTag::Timestamp),
            _ => Err(Error::InvalidData(format!("Unknown value tag: {}", value))),
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], Error> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::InvalidData(format!("Data too short for {}", what)))?;
        let slice = &self.data[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], Error> {
        let slice = self.take(N, what)?;
        slice
            .try_into()
            .map_err(|_| Error::InvalidData(format!("Data too short for {}", what)))
    }

    fn u8(&mut self, what: &str) -> Result<u8, Error> {
        Ok(self.array::<1>(what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.array(what)?))
    }

    fn u32(&mut self, what: &str) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.array(what)?))
    }

    fn name(&mut self) -> Result<&'a str, Error> {
        let len = self.u16("field name length")? as usize;
        let bytes = self.take(len, "field name")?;
        std::str::from_utf8(bytes)
            .map_err(|_| Error::InvalidData("Invalid UTF-8 in field name".into()))
    }

    fn value(&mut self) -> Result<Value, Error> {
        let value = match ValueTag::try_from(self.u8("value tag")?)? {
            ValueTag::Null => Value::Null,
            ValueTag::Bool => Value::Bool(self.u8("bool")? != 0),
            ValueTag::Int32 => Value::Int32(i32::from_le_bytes(self.array("i32")?)),
            ValueTag::Int64 => Value::Int64(i64::from_le_bytes(self.array("i64")?)),
            ValueTag::Float64 => Value::Float64(f64::from_le_bytes(self.array("f64")?)),
            ValueTag::Timestamp => Value::Timestamp(i64::from_le_bytes(self.array("timestamp")?)),
            ValueTag::Uuid => Value::Uuid(self.array("uuid")?),
            ValueTag::String => {
                let len = self.u32("string length")? as usize;
                let bytes = self.take(len, "string")?;
                Value::String(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|_| Error::InvalidData("Invalid UTF-8 in string".into()))?,
                )
            }
            ValueTag::Bytes => {
                let len = self.u32("bytes length")? as usize;
                Value::Bytes(self.take(len, "bytes")?.to_vec())
            }
        };
        Ok(value)
    }

    fn skip_value(&mut self) -> Result<(), Error> {
        let width = match ValueTag::try_from(self.u8("value tag")?)? {
            ValueTag::Null => 0,
            ValueTag::Bool => 1,
            ValueTag::Int32 => 4,
            ValueTag::Int64 | ValueTag::Float64 | ValueTag::Timestamp => 8,
            ValueTag::Uuid => 16,
            ValueTag::String | ValueTag::Bytes => self.u32("length")? as usize,
        };
        self.take(width, "value")?;
        Ok(())
    }
}

/// Encode a list of field name/value pairs to bytes.
pub fn encode_entity(fields: &[(String, Value)]) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(fields.len() as u32).to_le_bytes());

    for (name, value) in fields {
        let name_bytes = name.as_bytes();
        if name_bytes.len() > u16::MAX as usize {
            return Err(Error::InvalidData("Field name too long".into()));
        }
        buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(name_bytes);
        encode_value(&mut buf, value)?;
    }

    Ok(buf)
}

/// Decode bytes back to field name/value pairs.
pub fn decode_entity(data: &[u8]) -> Result<Vec<(String, Value)>, Error> {
    let mut reader = Reader::new(data);
    let count = reader.u32("field count")? as usize;

    let mut fields = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        let name = reader.name()?.to_string();
        fields.push((name, reader.value()?));
    }
    Ok(fields)
}

/// Get a single field value by name without decoding the others.
pub fn get_field(data: &[u8], field_name: &str) -> Result<Option<Value>, Error> {
    let mut reader = Reader::new(data);
    let count = reader.u32("field count")? as usize;

    for _ in 0..count {
        if reader.name()? == field_name {
            return reader.value().map(Some);
        }
        reader.skip_value()?;
    }
    Ok(None)
}

/// Encode a single value to the buffer.
pub(crate) fn encode_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), Error> {
    match value {
        Value::Null => buf.push(ValueTag::Null as u8),
        Value::Bool(b) => {
            buf.push(ValueTag::Bool as u8);
            buf.push(u8::from(*b));
        }
        Value::Int32(n) => {
            buf.push(ValueTag::Int32 as u8);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::Int64(n) => {
            buf.push(ValueTag::Int64 as u8);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::Float64(f) => {
            buf.push(ValueTag::Float64 as u8);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        Value::Timestamp(ts) => {
            buf.push(ValueTag::Timestamp as u8);
            buf.extend_from_slice(&ts.to_le_bytes());
        }
        Value::Uuid(uuid) => {
            buf.push(ValueTag::Uuid as u8);
            buf.extend_from_slice(uuid);
        }
        Value::String(s) => {
            buf.push(ValueTag::String as u8);
            push_len_prefixed(buf, s.as_bytes())?;
        }
        Value::Bytes(b) => {
            buf.push(ValueTag::Bytes as u8);
            push_len_prefixed(buf, b)?;
        }
    }
    Ok(())
}

fn push_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), Error> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::InvalidData("Value too long".into()))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}
