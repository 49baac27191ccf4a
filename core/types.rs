/* Record Format:
Documentation: https://sqlite.org/fileformat2.html#serialtype

A record in sqlite is how the database stores data in B-Trees
A record is made of two parts - header and body
Header store column type information in following format:

┌────┬────┬────┬────┬────┬────┬────┬────┬────┬────
│ HS │ S1 │ S2 │ S3 │ S4 │ ... │ SN │ V1 │ V2 │ ...
└────┴────┴────┴────┴────┴────┴────┴────┴────┴────
│<──── Header ──────────────>│<──── Body ────────>

Where:
HS = Header Size (varint, includes itself)
S1 = Serial Type for column 1 (varint)
S2 = Serial Type for column 2 (varint)
S3 = Serial Type for column 3 (varint)

Records recovered from freed pages are frequently damaged, so decoding here
never panics: a header that cannot be right is an error, a body that runs off
the end of the buffer is cut short and flagged.
*/
use std::fmt;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

use crate::storage::sqlite3_ondisk::decode_varint;
use crate::storage::text::TextEncoding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialType(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialTypeKind {
    Null,       // 0
    I8,         // 1
    I16,        // 2
    I24,        // 3
    I32,        // 4
    I48,        // 5
    I64,        // 6
    F64,        // 7
    ConstInt0,  // 8
    ConstInt1,  // 9
    Blob,       // >=12 and even
    Text,       // >=13 and odd
}

impl SerialType {
    #[inline(always)]
    pub fn u64_is_valid_serial_type(n: u64) -> bool {
        n != 10 && n != 11
    }

    pub fn new(n: u64) -> Option<Self> {
        Self::u64_is_valid_serial_type(n).then_some(Self(n))
    }

    pub fn blob(size: u64) -> Self {
        Self(12 + size * 2)
    }

    pub fn text(size: u64) -> Self {
        Self(13 + size * 2)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn kind(&self) -> SerialTypeKind {
        match self.0 {
            0 => SerialTypeKind::Null,
            1 => SerialTypeKind::I8,
            2 => SerialTypeKind::I16,
            3 => SerialTypeKind::I24,
            4 => SerialTypeKind::I32,
            5 => SerialTypeKind::I48,
            6 => SerialTypeKind::I64,
            7 => SerialTypeKind::F64,
            8 => SerialTypeKind::ConstInt0,
            9 => SerialTypeKind::ConstInt1,
            n if n % 2 == 0 => SerialTypeKind::Blob,
            _ => SerialTypeKind::Text,
        }
    }

    pub fn size(&self) -> usize {
        match self.kind() {
            SerialTypeKind::Null => 0,
            SerialTypeKind::I8 => 1,
            SerialTypeKind::I16 => 2,
            SerialTypeKind::I24 => 3,
            SerialTypeKind::I32 => 4,
            SerialTypeKind::I48 => 6,
            SerialTypeKind::I64 => 8,
            SerialTypeKind::F64 => 8,
            SerialTypeKind::ConstInt0 => 0,
            SerialTypeKind::ConstInt1 => 0,
            SerialTypeKind::Blob => ((self.0 - 12) / 2) as usize,
            SerialTypeKind::Text => ((self.0 - 13) / 2) as usize,
        }
    }
}

/// A loosely typed column value, as stored or as returned by the engine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// A record body decoded from raw payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub header_size: usize,
    pub values: Vec<Value>,
    /// At least one value ran past the end of the available bytes.
    pub truncated: bool,
}

/// Decodes a record (header of serial types, then the body).
///
/// Returns `None` when the header itself is implausible: a header size of
/// zero or larger than the payload, a reserved serial type, or a serial type
/// varint that overruns the header.
pub fn decode_record(payload: &[u8], encoding: TextEncoding) -> Option<DecodedRecord> {
    let (header_size, n) = decode_varint(payload, 0);
    let header_size = usize::try_from(header_size).ok()?;
    if n == 0 || header_size < n || header_size > payload.len() {
        return None;
    }

    let mut serial_types = Vec::new();
    let mut pos = n;
    while pos < header_size {
        let (raw, consumed) = decode_varint(payload, pos);
        if consumed == 0 || pos + consumed > header_size {
            return None;
        }
        serial_types.push(SerialType::new(raw)?);
        pos += consumed;
    }
    if serial_types.is_empty() {
        return None;
    }

    let mut values = Vec::with_capacity(serial_types.len());
    let mut truncated = false;
    let mut body = header_size;
    for serial_type in serial_types {
        let size = serial_type.size();
        let end = body.saturating_add(size);
        if end > payload.len() {
            truncated = true;
            let partial = &payload[body.min(payload.len())..];
            match serial_type.kind() {
                SerialTypeKind::Text => values.push(Value::Text(encoding.decode_lossy(partial))),
                SerialTypeKind::Blob => values.push(Value::Blob(partial.to_vec())),
                _ => values.push(Value::Null),
            }
            break;
        }
        values.push(decode_value(serial_type, &payload[body..end], encoding));
        body = end;
    }

    Some(DecodedRecord {
        header_size,
        values,
        truncated,
    })
}

fn decode_value(serial_type: SerialType, bytes: &[u8], encoding: TextEncoding) -> Value {
    match serial_type.kind() {
        SerialTypeKind::Null => Value::Null,
        SerialTypeKind::ConstInt0 => Value::Integer(0),
        SerialTypeKind::ConstInt1 => Value::Integer(1),
        SerialTypeKind::I8
        | SerialTypeKind::I16
        | SerialTypeKind::I24
        | SerialTypeKind::I32
        | SerialTypeKind::I48
        | SerialTypeKind::I64 => Value::Integer(read_signed_be(bytes)),
        SerialTypeKind::F64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Value::Real(f64::from_be_bytes(raw))
        }
        SerialTypeKind::Text => Value::Text(encoding.decode_lossy(bytes)),
        SerialTypeKind::Blob => Value::Blob(bytes.to_vec()),
    }
}

// Sign-extends a 1..=8 byte big-endian two's complement integer.
fn read_signed_be(bytes: &[u8]) -> i64 {
    let mut value: i64 = if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        -1
    } else {
        0
    };
    for &b in bytes {
        value = (value << 8) | i64::from(b);
    }
    value
}
