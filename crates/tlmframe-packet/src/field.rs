use std::fmt;

use serde::{Deserialize, Serialize};

/// Data types a field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Int,
    Uint,
    Float,
    String,
    Block,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int => "INT",
            DataType::Uint => "UINT",
            DataType::Float => "FLOAT",
            DataType::String => "STRING",
            DataType::Block => "BLOCK",
        };
        f.write_str(name)
    }
}

/// Byte order of multi-byte fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// What to do when a written value does not fit its field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Overflow {
    /// Reject the value.
    #[default]
    Error,
    /// Reject the value unless it fits the field's unsigned hex range
    /// (intentional fill patterns like 0xFF on an 8-bit INT).
    ErrorAllowHex,
    /// Mask the value to the field width.
    Truncate,
    /// Clamp the value to the representable range, preserving sign.
    Saturate,
}

/// Position, width, and encoding of one field inside a byte buffer.
///
/// `bit_offset` may be negative to address from the end of the buffer.
/// `bit_size` may be zero or negative for STRING/BLOCK fields to mean
/// "consume from the offset to the end of the buffer" (a negative size
/// excludes that many trailing bits).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub bit_offset: i32,
    pub bit_size: i32,
    pub data_type: DataType,
    #[serde(default)]
    pub endianness: Endianness,
    #[serde(default)]
    pub overflow: Overflow,
    /// For array fields: number of consecutive elements of `bit_size` each.
    /// Negative means "as many whole elements as fit in the rest of the buffer".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_element_count: Option<i32>,
}

impl FieldSpec {
    /// A big-endian unsigned integer field with default overflow handling.
    pub fn uint(bit_offset: i32, bit_size: i32) -> Self {
        Self {
            bit_offset,
            bit_size,
            data_type: DataType::Uint,
            endianness: Endianness::Big,
            overflow: Overflow::Error,
            array_element_count: None,
        }
    }

    /// A big-endian signed integer field with default overflow handling.
    pub fn int(bit_offset: i32, bit_size: i32) -> Self {
        Self {
            data_type: DataType::Int,
            ..Self::uint(bit_offset, bit_size)
        }
    }

    /// A raw byte field.
    pub fn block(bit_offset: i32, bit_size: i32) -> Self {
        Self {
            data_type: DataType::Block,
            ..Self::uint(bit_offset, bit_size)
        }
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn with_overflow(mut self, overflow: Overflow) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_array_element_count(mut self, count: i32) -> Self {
        self.array_element_count = Some(count);
        self
    }
}

/// A value read from or written into a packet buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    /// Text read from a STRING field (NUL-terminated on read).
    Text(String),
    /// Raw bytes from a BLOCK field, or a STRING field that was not valid UTF-8.
    Bytes(Vec<u8>),
    /// Elements of an array field, in buffer order.
    Array(Vec<Value>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            Value::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) if *v <= i64::MAX as u64 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}
