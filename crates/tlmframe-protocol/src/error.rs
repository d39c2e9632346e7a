use tlmframe_packet::AccessorError;

/// Hard errors raised by the framing protocols.
///
/// Insufficient data is never an error: protocols report it through
/// [`Outcome::Stop`](crate::Outcome::Stop) and the caller supplies more
/// bytes. Everything here is either a construction-time misconfiguration or
/// stream corruption.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A configured sync pattern has no bytes.
    #[error("sync pattern must not be empty")]
    EmptySyncPattern,

    /// Termination characters are required for terminator-based framing.
    #[error("termination characters must not be empty")]
    EmptyTermination,

    /// The length field does not fit inside the packet length it declares.
    #[error("calculated packet length of {packet_bits} bits < (offset:{bit_offset} + size:{bit_size})")]
    LengthFieldOutsidePacket {
        packet_bits: i64,
        bit_offset: u32,
        bit_size: u32,
    },

    /// A length field declared a value past the configured maximum.
    #[error("length value received larger than max_length: {length} > {max_length}")]
    LengthOverMax { length: u64, max_length: u64 },

    /// An outgoing packet's computed length exceeds the configured maximum.
    #[error("calculated length {length} larger than max_length {max_length}")]
    CalculatedLengthOverMax { length: i64, max_length: u64 },

    /// `bytes_per_count` scales the length field and cannot be zero.
    #[error("length_bytes_per_count must be at least 1")]
    ZeroBytesPerCount,

    /// Data could not be identified and the protocol is configured to treat
    /// that as fatal.
    #[error("unknown data received with unknown_raise enabled")]
    UnknownPacket,

    /// CRC engine widths are limited to whole power-of-two byte sizes.
    #[error("invalid CRC bit size {0}: must be 8, 16, 32, or 64")]
    InvalidCrcWidth(u32),

    /// The CRC field must start on a byte boundary.
    #[error("invalid CRC bit offset {0}: must be divisible by 8")]
    CrcOffsetNotByteAligned(i32),

    /// A target or packet name does not fit its 1-byte length prefix.
    #[error("name of {len} bytes does not fit a 1-byte length prefix")]
    NameTooLong { len: usize },

    /// Extra metadata on the wire is not valid JSON.
    #[error("invalid extra metadata: {0}")]
    InvalidMetadata(#[from] serde_json::Error),

    /// Outgoing payload contains the termination sequence, which would be
    /// ambiguous on the wire.
    #[error("packet data contains the termination sequence")]
    TerminationInPayload,

    /// A field read or write inside a protocol failed.
    #[error(transparent)]
    Accessor(#[from] AccessorError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
