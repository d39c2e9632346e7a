//! Frames packets using a length field at a fixed bit position in each
//! packet.

use bytes::BytesMut;
use serde_json::json;

use tlmframe_packet::{BinaryAccessor, Endianness, FieldSpec, Packet, Value};

use crate::burst::{burst_read_data, burst_write_data, BurstFramed, BurstFraming, Reduced};
use crate::error::{ProtocolError, Result};
use crate::protocol::{Extra, Outcome, ProtocolBase, ProtocolHandler};

/// Configuration of the length field and framing bounds.
#[derive(Debug, Clone)]
pub struct LengthConfig {
    /// Bit offset of the length field within the stream (before any leading
    /// bytes are discarded).
    pub bit_offset: u32,
    /// Bit size of the length field.
    pub bit_size: u32,
    /// Added to the scaled length value to produce the total packet length.
    /// If the field on the wire means "length - 1", this is 1.
    pub value_offset: i64,
    /// Bytes represented by each count of the length field (e.g. 2 for a
    /// field counted in 16-bit words).
    pub bytes_per_count: u32,
    pub endianness: Endianness,
    /// Maximum allowed value of the length field; exceeding it is a hard
    /// error guarding against runaway allocation from a corrupt stream.
    pub max_length: Option<u64>,
}

impl Default for LengthConfig {
    fn default() -> Self {
        Self {
            bit_offset: 0,
            bit_size: 16,
            value_offset: 0,
            bytes_per_count: 1,
            endianness: Endianness::Big,
            max_length: None,
        }
    }
}

/// Delineates packets with a length field readable at any bit offset.
#[derive(Debug)]
pub struct LengthProtocol {
    framing: BurstFraming,
    config: LengthConfig,
    /// Bytes that must be buffered before the length field can be read.
    length_bytes_needed: usize,
}

impl LengthProtocol {
    pub fn new(
        config: LengthConfig,
        discard_leading_bytes: usize,
        sync_pattern: Option<Vec<u8>>,
        fill_length_and_sync_pattern: bool,
        allow_empty_data: Option<bool>,
    ) -> Result<Self> {
        if config.bytes_per_count == 0 {
            return Err(ProtocolError::ZeroBytesPerCount);
        }

        // Bytes required to contain the entire length field. Little-endian
        // bitfields anchor on the byte holding the most significant bit.
        let length_bytes_needed = if config.endianness == Endianness::Big
            || config.bit_offset % 8 == 0
        {
            let mut bits_needed = config.bit_offset + config.bit_size;
            if bits_needed % 8 != 0 {
                bits_needed += 8;
            }
            ((bits_needed - 1) / 8 + 1) as usize
        } else {
            (config.bit_offset / 8 + 1) as usize
        };

        Ok(Self {
            framing: BurstFraming::new(
                discard_leading_bytes,
                sync_pattern,
                fill_length_and_sync_pattern,
                allow_empty_data,
            )?,
            config,
            length_bytes_needed,
        })
    }

    fn length_field(&self, bit_offset: i32) -> FieldSpec {
        FieldSpec::uint(bit_offset, self.config.bit_size as i32)
            .with_endianness(self.config.endianness)
    }

    /// Length-field value for an outgoing packet of `buffer_length` total
    /// bytes (including any bytes prepended on write).
    fn calculate_length(&self, buffer_length: usize) -> Result<i64> {
        let length =
            buffer_length as i64 / i64::from(self.config.bytes_per_count) - self.config.value_offset;
        if let Some(max) = self.config.max_length {
            if length > max as i64 {
                return Err(ProtocolError::CalculatedLengthOverMax {
                    length,
                    max_length: max,
                });
            }
        }
        Ok(length)
    }
}

impl BurstFramed for LengthProtocol {
    fn framing(&mut self) -> &mut BurstFraming {
        &mut self.framing
    }

    fn framing_ref(&self) -> &BurstFraming {
        &self.framing
    }

    fn reduce_to_single_packet(&mut self) -> Result<Reduced> {
        if self.framing.data.len() < self.length_bytes_needed {
            return Ok(Reduced::Stop);
        }

        let field = self.length_field(self.config.bit_offset as i32);
        let length = BinaryAccessor::read(&self.framing.data, &field)?
            .as_u64()
            .unwrap_or(0);
        if let Some(max) = self.config.max_length {
            if length > max {
                return Err(ProtocolError::LengthOverMax {
                    length,
                    max_length: max,
                });
            }
        }

        let packet_length =
            length as i64 * i64::from(self.config.bytes_per_count) + self.config.value_offset;
        // The length field itself must fit inside the length it declares,
        // otherwise the framing would overlap the next packet.
        if packet_length * 8 < i64::from(self.config.bit_offset + self.config.bit_size) {
            return Err(ProtocolError::LengthFieldOutsidePacket {
                packet_bits: packet_length * 8,
                bit_offset: self.config.bit_offset,
                bit_size: self.config.bit_size,
            });
        }

        if (self.framing.data.len() as i64) < packet_length {
            return Ok(Reduced::Stop);
        }

        let packet_data = self.framing.data.split_to(packet_length as usize);
        Ok(Reduced::Packet(packet_data, self.framing.extra.clone()))
    }
}

impl ProtocolHandler for LengthProtocol {
    fn read_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        burst_read_data(self, data, extra)
    }

    fn write_packet(&mut self, mut packet: Packet) -> Result<Outcome<Packet>> {
        if self.framing.fill_fields {
            let discard_bits = self.framing.discard_leading_bytes as u32 * 8;
            // A length field at or past the discarded prefix lies inside the
            // packet buffer itself.
            if self.config.bit_offset >= discard_bits {
                let length = self
                    .calculate_length(packet.buffer.len() + self.framing.discard_leading_bytes)?;
                let field = self.length_field((self.config.bit_offset - discard_bits) as i32);
                packet.write(&field, &Value::Int(length))?;
            }
            // Sync handling matches the burst write path.
            if self.framing.sync_pattern.is_some() && self.framing.discard_leading_bytes == 0 {
                self.framing.fill_sync_pattern(&mut packet.buffer)?;
            }
        }
        Ok(Outcome::Ready(packet))
    }

    fn write_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        let mut data = burst_write_data(&self.framing, data)?;
        if self.framing.fill_fields {
            let discard_bits = self.framing.discard_leading_bytes as u32 * 8;
            // A length field before the discarded prefix is outside the
            // packet and can only be filled once the prefix exists.
            if self.config.bit_offset < discard_bits {
                let length = self.calculate_length(data.len())?;
                let field = self.length_field(self.config.bit_offset as i32);
                BinaryAccessor::write(&mut data, &field, &Value::Int(length))?;
            }
        }
        Ok(Outcome::Ready((data, extra)))
    }

    fn reset(&mut self) {
        self.framing.reset();
    }

    fn base(&self) -> &ProtocolBase {
        &self.framing.base
    }

    fn base_mut(&mut self) -> &mut ProtocolBase {
        &mut self.framing.base
    }

    fn name(&self) -> &'static str {
        "LengthProtocol"
    }

    fn details(&self) -> Extra {
        let mut details = self.framing.details();
        details["length_bit_offset"] = json!(self.config.bit_offset);
        details["length_bit_size"] = json!(self.config.bit_size);
        details["length_value_offset"] = json!(self.config.value_offset);
        details["length_bytes_per_count"] = json!(self.config.bytes_per_count);
        details["length_bytes_needed"] = json!(self.length_bytes_needed);
        details["max_length"] = json!(self.config.max_length);
        details
    }
}
