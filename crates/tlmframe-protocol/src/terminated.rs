//! Frames packets on a multi-byte terminator sequence.

use bytes::{Buf, BytesMut};
use serde_json::json;

use tlmframe_packet::Packet;

use crate::burst::{burst_read_data, burst_write_data, BurstFramed, BurstFraming, Reduced};
use crate::error::{ProtocolError, Result};
use crate::protocol::{Extra, Outcome, ProtocolBase, ProtocolHandler};

/// Terminator-delimited framing: emit bytes up through (optionally
/// excluding) the terminator, retain the remainder.
#[derive(Debug)]
pub struct TerminatedProtocol {
    framing: BurstFraming,
    write_termination: Vec<u8>,
    read_termination: Vec<u8>,
    strip_termination: bool,
}

impl TerminatedProtocol {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        write_termination: Vec<u8>,
        read_termination: Vec<u8>,
        strip_termination: bool,
        discard_leading_bytes: usize,
        sync_pattern: Option<Vec<u8>>,
        fill_fields: bool,
        allow_empty_data: Option<bool>,
    ) -> Result<Self> {
        if read_termination.is_empty() {
            return Err(ProtocolError::EmptyTermination);
        }
        Ok(Self {
            framing: BurstFraming::new(
                discard_leading_bytes,
                sync_pattern,
                fill_fields,
                allow_empty_data,
            )?,
            write_termination,
            read_termination,
            strip_termination,
        })
    }
}

/// First index of `needle` within `haystack`, searching from `from`.
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < from + needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

impl BurstFramed for TerminatedProtocol {
    fn framing(&mut self) -> &mut BurstFraming {
        &mut self.framing
    }

    fn framing_ref(&self) -> &BurstFraming {
        &self.framing
    }

    fn reduce_to_single_packet(&mut self) -> Result<Reduced> {
        if self.framing.data.is_empty() {
            return Ok(Reduced::Stop);
        }
        let Some(index) = find_subsequence(&self.framing.data, &self.read_termination, 0) else {
            return Ok(Reduced::Stop);
        };

        let packet_data = if self.strip_termination {
            let data = self.framing.data.split_to(index);
            self.framing.data.advance(self.read_termination.len());
            data
        } else {
            self.framing.data.split_to(index + self.read_termination.len())
        };
        Ok(Reduced::Packet(packet_data, self.framing.extra.clone()))
    }
}

impl ProtocolHandler for TerminatedProtocol {
    fn read_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        burst_read_data(self, data, extra)
    }

    fn write_packet(&mut self, mut packet: Packet) -> Result<Outcome<Packet>> {
        if self.framing.fill_fields
            && self.framing.sync_pattern.is_some()
            && self.framing.discard_leading_bytes == 0
        {
            self.framing.fill_sync_pattern(&mut packet.buffer)?;
        }
        Ok(Outcome::Ready(packet))
    }

    fn write_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        let mut data = burst_write_data(&self.framing, data)?;
        // A payload containing the terminator would frame ambiguously.
        if find_subsequence(&data, &self.write_termination, 0).is_some() {
            return Err(ProtocolError::TerminationInPayload);
        }
        data.extend_from_slice(&self.write_termination);
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
        "TerminatedProtocol"
    }

    fn details(&self) -> Extra {
        let mut details = self.framing.details();
        details["write_termination"] = json!(crate::burst::hex_string(&self.write_termination));
        details["read_termination"] = json!(crate::burst::hex_string(&self.read_termination));
        details["strip_termination"] = json!(self.strip_termination);
        details
    }
}
