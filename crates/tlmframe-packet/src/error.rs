use crate::field::DataType;

/// Errors that can occur reading or writing packet fields.
#[derive(Debug, thiserror::Error)]
pub enum AccessorError {
    /// The buffer is too short to contain the requested field.
    #[error("{buffer_len} byte buffer insufficient to {op} {data_type} at bit_offset {bit_offset} with bit_size {bit_size}")]
    BufferInsufficient {
        op: &'static str,
        buffer_len: usize,
        data_type: DataType,
        bit_offset: i32,
        bit_size: i32,
    },

    /// The field requires byte alignment but its offset is mid-byte.
    #[error("bit_offset {bit_offset} is not byte aligned for data_type {data_type}")]
    NotByteAligned { bit_offset: i32, data_type: DataType },

    /// Float fields only support IEEE single and double widths.
    #[error("bit_size is {bit_size} but must be 32 or 64 for data_type FLOAT")]
    InvalidFloatSize { bit_size: i32 },

    /// Only STRING and BLOCK fields may declare non-positive sizes.
    #[error("bit_size {bit_size} must be positive for data_type {data_type}")]
    NonPositiveBitSize { bit_size: i32, data_type: DataType },

    /// Consume-to-end sizing cannot be anchored from the end of the buffer.
    #[error("negative or zero bit_size ({bit_size}) cannot be given with negative bit_offset ({bit_offset})")]
    NegativeSizeNegativeOffset { bit_size: i32, bit_offset: i32 },

    /// A little-endian bitfield must not reach in front of the buffer.
    #[error("LITTLE_ENDIAN bitfield with bit_offset {bit_offset} and bit_size {bit_size} is invalid")]
    InvalidLittleEndianBitfield { bit_offset: i32, bit_size: i32 },

    /// The value does not fit the field under the configured overflow policy.
    #[error("value of {value} invalid for {bit_size}-bit {data_type}")]
    Overflow {
        value: String,
        bit_size: i32,
        data_type: DataType,
    },

    /// A STRING/BLOCK value is longer than its fixed-size field.
    #[error("value of {value_len} bytes does not fit into {field_len} bytes for data_type {data_type}")]
    ValueTooLong {
        value_len: usize,
        field_len: usize,
        data_type: DataType,
    },

    /// The supplied value's type does not match the field's data type.
    #[error("value {value} cannot be written to a {data_type} field")]
    TypeMismatch { value: String, data_type: DataType },

    /// An array write was given the wrong number of elements.
    #[error("array value has {value_len} elements but field expects {expected}")]
    ArrayLengthMismatch { value_len: usize, expected: usize },

    /// Array element widths must divide the space they fill evenly.
    #[error("buffer space of {available_bits} bits is not divisible by element bit_size {bit_size}")]
    UnevenArrayFill { available_bits: i64, bit_size: i32 },
}

/// Errors that can occur loading packet definitions.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Definition file could not be read.
    #[error("failed to load packet definitions: {0}")]
    LoadFailed(String),

    /// Definition file is not valid JSON or has the wrong shape.
    #[error("invalid packet definition JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A definition violates a structural invariant.
    #[error("invalid packet definition {target}/{packet}: {reason}")]
    InvalidDefinition {
        target: String,
        packet: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, AccessorError>;
