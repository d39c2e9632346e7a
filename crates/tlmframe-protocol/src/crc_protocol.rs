//! Verifies and strips a CRC on read; computes and inserts one on write.
//!
//! This is an independent wrapper stage, not a framing strategy: it holds no
//! stream buffer and passes partial data judgments to its neighbors.

use bytes::{BufMut, BytesMut};
use serde_json::json;

use tlmframe_packet::{BinaryAccessor, Endianness, FieldSpec, Packet, Value};
use tracing::error;

use crate::crc::Crc;
use crate::error::{ProtocolError, Result};
use crate::protocol::{Extra, Outcome, ProtocolBase, ProtocolHandler};

/// How to handle a CRC mismatch on incoming data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadCrcStrategy {
    /// Log the mismatch and pass the (corrupted) data through. Detection
    /// only.
    Error,
    /// Log the mismatch and tear down the connection.
    Disconnect,
}

/// Names a packet item that receives the computed CRC on write.
#[derive(Debug, Clone)]
pub struct CrcWriteItem {
    pub name: String,
    pub field: FieldSpec,
}

/// Configuration of the CRC field location and verification policy.
#[derive(Debug, Clone)]
pub struct CrcConfig {
    /// Item inside outgoing packets to fill with the CRC. `None` appends
    /// the CRC to the outgoing byte stream instead.
    pub write_item: Option<CrcWriteItem>,
    /// Remove the CRC bytes from incoming payloads before later stages.
    pub strip_crc: bool,
    pub bad_strategy: BadCrcStrategy,
    /// Bit offset of the CRC in incoming data; negative counts from the
    /// end (e.g. -32 = trailing 32-bit CRC).
    pub bit_offset: i32,
    pub bit_size: u32,
    pub endianness: Endianness,
}

impl Default for CrcConfig {
    fn default() -> Self {
        Self {
            write_item: None,
            strip_crc: false,
            bad_strategy: BadCrcStrategy::Error,
            bit_offset: -32,
            bit_size: 32,
            endianness: Endianness::Big,
        }
    }
}

/// CRC verification/insertion stage.
#[derive(Debug)]
pub struct CrcProtocol {
    base: ProtocolBase,
    config: CrcConfig,
    crc: Crc,
}

impl CrcProtocol {
    pub fn new(config: CrcConfig, crc: Crc, allow_empty_data: Option<bool>) -> Result<Self> {
        if config.bit_offset % 8 != 0 {
            return Err(ProtocolError::CrcOffsetNotByteAligned(config.bit_offset));
        }
        if crc.bit_size() != config.bit_size {
            return Err(ProtocolError::InvalidCrcWidth(config.bit_size));
        }
        Ok(Self {
            base: ProtocolBase::new(allow_empty_data),
            config,
            crc,
        })
    }

    /// Construct with the default CRC parameters for the configured width.
    pub fn with_default_crc(config: CrcConfig, allow_empty_data: Option<bool>) -> Result<Self> {
        let crc = Crc::with_params(config.bit_size, None, None, None, None)?;
        Self::new(config, crc, allow_empty_data)
    }

    fn crc_field(&self) -> FieldSpec {
        FieldSpec::uint(self.config.bit_offset, self.config.bit_size as i32)
            .with_endianness(self.config.endianness)
    }

    /// Byte offset of the CRC within a buffer of `len` bytes.
    fn crc_byte_offset(&self, len: usize) -> usize {
        let bit_offset = if self.config.bit_offset < 0 {
            len as i64 * 8 + i64::from(self.config.bit_offset)
        } else {
            i64::from(self.config.bit_offset)
        };
        (bit_offset / 8).max(0) as usize
    }
}

impl ProtocolHandler for CrcProtocol {
    fn read_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        if data.is_empty() {
            return Ok(self.base.empty_response(extra));
        }

        let found = BinaryAccessor::read(&data, &self.crc_field())?
            .as_u64()
            .unwrap_or(0);
        let crc_offset = self.crc_byte_offset(data.len());
        let calculated = self.crc.calc(&data[..crc_offset.min(data.len())]);

        if calculated != found {
            error!(
                calculated = format_args!("0x{calculated:X}"),
                found = format_args!("0x{found:X}"),
                "invalid CRC detected"
            );
            if self.config.bad_strategy == BadCrcStrategy::Disconnect {
                return Ok(Outcome::Disconnect);
            }
        }

        if self.config.strip_crc {
            let crc_bytes = self.config.bit_size as usize / 8;
            let mut stripped = BytesMut::with_capacity(data.len() - crc_bytes.min(data.len()));
            stripped.extend_from_slice(&data[..crc_offset.min(data.len())]);
            let end = crc_offset + crc_bytes;
            if end < data.len() {
                stripped.extend_from_slice(&data[end..]);
            }
            return Ok(Outcome::Ready((stripped, extra)));
        }

        Ok(Outcome::Ready((data, extra)))
    }

    fn write_packet(&mut self, mut packet: Packet) -> Result<Outcome<Packet>> {
        // Item-based fill: compute over the bytes before the item and write
        // into the packet's own buffer.
        if let Some(item) = &self.config.write_item {
            let end = self.crc_byte_offset_for(&item.field, packet.buffer.len());
            let crc = self.crc.calc(&packet.buffer[..end.min(packet.buffer.len())]);
            packet.write(&item.field, &Value::Uint(crc))?;
        }
        Ok(Outcome::Ready(packet))
    }

    fn write_data(
        &mut self,
        mut data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        if self.config.write_item.is_none() {
            let crc = self.crc.calc(&data);
            let crc_bytes = self.config.bit_size as usize / 8;
            data.put_bytes(0, crc_bytes);
            let field = FieldSpec::uint(
                -(self.config.bit_size as i32),
                self.config.bit_size as i32,
            )
            .with_endianness(self.config.endianness);
            BinaryAccessor::write(&mut data, &field, &Value::Uint(crc))?;
        }
        Ok(Outcome::Ready((data, extra)))
    }

    fn reset(&mut self) {}

    fn base(&self) -> &ProtocolBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProtocolBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "CrcProtocol"
    }

    fn details(&self) -> Extra {
        json!({
            "write_item_name": self.config.write_item.as_ref().map(|item| item.name.clone()),
            "strip_crc": self.config.strip_crc,
            "bad_strategy": match self.config.bad_strategy {
                BadCrcStrategy::Error => "ERROR",
                BadCrcStrategy::Disconnect => "DISCONNECT",
            },
            "bit_offset": self.config.bit_offset,
            "bit_size": self.config.bit_size,
        })
    }
}

impl CrcProtocol {
    fn crc_byte_offset_for(&self, field: &FieldSpec, len: usize) -> usize {
        let bit_offset = if field.bit_offset < 0 {
            len as i64 * 8 + i64::from(field.bit_offset)
        } else {
            i64::from(field.bit_offset)
        };
        (bit_offset / 8).max(0) as usize
    }
}
