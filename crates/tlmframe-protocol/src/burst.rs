//! Base framing strategy: deliver all currently available bytes as one
//! packet, optionally after locating and discarding a sync pattern.
//!
//! The sync search and the shared read-side driver live in
//! [`BurstFraming`], which the other framing protocols embed by value and
//! drive through [`BurstFramed`].

use bytes::{Buf, BytesMut};
use serde_json::json;
use tracing::error;

use tlmframe_packet::{BinaryAccessor, FieldSpec, Packet, Value};

use crate::error::{ProtocolError, Result};
use crate::protocol::{Extra, Outcome, ProtocolBase, ProtocolHandler};

/// Sync search progress for the accumulated stream buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Searching,
    Found,
}

/// Result of one framing attempt against the accumulated buffer.
#[derive(Debug)]
pub enum Reduced {
    /// One delineated packet buffer plus optional out-of-band metadata.
    Packet(BytesMut, Option<Extra>),
    /// Not enough buffered bytes; wait for more.
    Stop,
    /// Tear down the connection.
    Disconnect,
    /// Restart the sync search before trying again.
    Resync,
}

/// Stream accumulation and sync-pattern state shared by the burst-style
/// framing protocols.
#[derive(Debug)]
pub struct BurstFraming {
    pub base: ProtocolBase,
    pub data: BytesMut,
    pub extra: Option<Extra>,
    pub discard_leading_bytes: usize,
    pub sync_pattern: Option<Vec<u8>>,
    pub fill_fields: bool,
    pub sync_state: SyncState,
}

impl BurstFraming {
    pub fn new(
        discard_leading_bytes: usize,
        sync_pattern: Option<Vec<u8>>,
        fill_fields: bool,
        allow_empty_data: Option<bool>,
    ) -> Result<Self> {
        if let Some(pattern) = &sync_pattern {
            if pattern.is_empty() {
                return Err(ProtocolError::EmptySyncPattern);
            }
        }
        Ok(Self {
            base: ProtocolBase::new(allow_empty_data),
            data: BytesMut::new(),
            extra: None,
            discard_leading_bytes,
            sync_pattern,
            fill_fields,
            sync_state: SyncState::Searching,
        })
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.extra = None;
        self.sync_state = SyncState::Searching;
    }

    /// Locate the sync pattern in the accumulated buffer, discarding
    /// everything before it. Returns `true` when more data is needed to
    /// confirm or refute a match; never a false positive or negative.
    fn handle_sync_pattern(&mut self) -> bool {
        let Some(pattern) = self.sync_pattern.clone() else {
            return false;
        };
        if self.sync_state != SyncState::Searching {
            return false;
        }

        loop {
            if self.data.len() < pattern.len() {
                return true;
            }
            let Some(sync_index) = self.data.iter().position(|&b| b == pattern[0]) else {
                self.log_discard(self.data.len(), false);
                self.data.clear();
                return true;
            };
            if self.data.len() < sync_index + pattern.len() {
                return true;
            }
            if self.data[sync_index..sync_index + pattern.len()] == pattern[..] {
                if sync_index != 0 {
                    self.log_discard(sync_index, true);
                    self.data.advance(sync_index);
                }
                self.sync_state = SyncState::Found;
                return false;
            }
            // False start: drop through the suspect byte and keep looking.
            self.log_discard(sync_index + 1, false);
            self.data.advance(sync_index + 1);
        }
    }

    fn log_discard(&self, length: usize, found: bool) {
        let leading: Vec<String> = self
            .data
            .iter()
            .take(6)
            .map(|b| format!("0x{b:02X}"))
            .collect();
        error!(
            discarded = length,
            sync_found = found,
            starting = leading.join(" "),
            "sync {}found, discarding {} bytes of data",
            if found { "" } else { "not " },
            length
        );
    }

    /// Write the literal sync pattern at offset 0 of `buffer`.
    pub fn fill_sync_pattern(&self, buffer: &mut BytesMut) -> Result<()> {
        if let Some(pattern) = &self.sync_pattern {
            let field = FieldSpec::block(0, pattern.len() as i32 * 8);
            BinaryAccessor::write(buffer, &field, &Value::Bytes(pattern.clone()))?;
        }
        Ok(())
    }

    pub fn details(&self) -> Extra {
        json!({
            "discard_leading_bytes": self.discard_leading_bytes,
            "sync_pattern": self.sync_pattern.as_ref().map(hex_string),
            "fill_fields": self.fill_fields,
        })
    }
}

pub fn hex_string(bytes: &Vec<u8>) -> String {
    let mut out = String::from("0x");
    for byte in bytes {
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

/// A protocol built around [`BurstFraming`]: it supplies the per-strategy
/// framing step while the shared driver handles sync search, the empty-poll
/// contract, and leading-byte discard.
pub trait BurstFramed {
    fn framing(&mut self) -> &mut BurstFraming;

    fn framing_ref(&self) -> &BurstFraming;

    /// Attempt to frame one packet from the accumulated buffer.
    fn reduce_to_single_packet(&mut self) -> Result<Reduced>;
}

/// Shared read-side driver for the burst family.
///
/// On the first call of a poll cycle the chain is invoked with zero bytes;
/// protocols holding a fully-buffered packet may emit it, all others route
/// through the empty-input contract of their [`ProtocolBase`].
pub fn burst_read_data<P: BurstFramed>(
    protocol: &mut P,
    data: BytesMut,
    extra: Option<Extra>,
) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
    let empty_call = data.is_empty();
    {
        let framing = protocol.framing();
        framing.data.extend_from_slice(&data);
        // Maintain the extra from the previous read across empty polls.
        if !(empty_call && extra.is_none()) {
            framing.extra = extra.clone();
        }
    }

    loop {
        // An unresolved sync search means no packet is derivable at all, so
        // even a zero-byte poll cannot emit anything here.
        if protocol.framing().handle_sync_pattern() {
            if !empty_call {
                return Ok(Outcome::Stop);
            }
            return Ok(protocol.framing().base.empty_response(extra));
        }

        match protocol.reduce_to_single_packet()? {
            Reduced::Resync => {
                protocol.framing().sync_state = SyncState::Searching;
                if !empty_call {
                    continue;
                }
                return Ok(protocol.framing().base.empty_response(extra));
            }
            Reduced::Stop => {
                if empty_call {
                    return Ok(protocol.framing().base.empty_response(extra));
                }
                return Ok(Outcome::Stop);
            }
            Reduced::Disconnect => return Ok(Outcome::Disconnect),
            Reduced::Packet(mut packet_data, packet_extra) => {
                let framing = protocol.framing();
                framing.sync_state = SyncState::Searching;
                let discard = framing.discard_leading_bytes.min(packet_data.len());
                if discard > 0 {
                    packet_data.advance(discard);
                }
                return Ok(Outcome::Ready((packet_data, packet_extra)));
            }
        }
    }
}

/// Reads all currently available bytes as one packet.
#[derive(Debug)]
pub struct BurstProtocol {
    framing: BurstFraming,
}

impl BurstProtocol {
    pub fn new(
        discard_leading_bytes: usize,
        sync_pattern: Option<Vec<u8>>,
        fill_fields: bool,
        allow_empty_data: Option<bool>,
    ) -> Result<Self> {
        Ok(Self {
            framing: BurstFraming::new(
                discard_leading_bytes,
                sync_pattern,
                fill_fields,
                allow_empty_data,
            )?,
        })
    }
}

impl Default for BurstProtocol {
    fn default() -> Self {
        Self {
            framing: BurstFraming {
                base: ProtocolBase::new(None),
                data: BytesMut::new(),
                extra: None,
                discard_leading_bytes: 0,
                sync_pattern: None,
                fill_fields: false,
                sync_state: SyncState::Searching,
            },
        }
    }
}

impl BurstFramed for BurstProtocol {
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
        let packet_data = self.framing.data.split();
        Ok(Reduced::Packet(packet_data, self.framing.extra.clone()))
    }
}

impl ProtocolHandler for BurstProtocol {
    fn read_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        burst_read_data(self, data, extra)
    }

    fn write_packet(&mut self, mut packet: Packet) -> Result<Outcome<Packet>> {
        // When the sync pattern is part of the packet (nothing discarded on
        // read) it must be filled into the packet buffer itself.
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
        Ok(Outcome::Ready((
            burst_write_data(&self.framing, data)?,
            extra,
        )))
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
        "BurstProtocol"
    }

    fn details(&self) -> Extra {
        self.framing.details()
    }
}

/// Shared write-side handling for the burst family: bytes discarded during
/// read are not part of the packet, so they are prepended here, and the
/// sync pattern is written over them.
pub fn burst_write_data(framing: &BurstFraming, data: BytesMut) -> Result<BytesMut> {
    if framing.fill_fields && framing.discard_leading_bytes > 0 {
        let mut out = BytesMut::with_capacity(framing.discard_leading_bytes + data.len());
        out.resize(framing.discard_leading_bytes, 0);
        out.extend_from_slice(&data);
        framing.fill_sync_pattern(&mut out)?;
        return Ok(out);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(protocol: &mut BurstProtocol, bytes: &[u8]) -> Outcome<(BytesMut, Option<Extra>)> {
        protocol
            .read_data(BytesMut::from(bytes), None)
            .expect("read_data failed")
    }

    #[test]
    fn emits_all_available_bytes() {
        let mut protocol = BurstProtocol::default();
        let (data, _) = read(&mut protocol, b"\x01\x02\x03").unwrap_ready();
        assert_eq!(data.as_ref(), b"\x01\x02\x03");
    }

    #[test]
    fn empty_input_stops_when_last_in_chain() {
        let mut protocol = BurstProtocol::default();
        protocol.base_mut().last_in_chain = true;
        assert_eq!(read(&mut protocol, b""), Outcome::Stop);
    }

    #[test]
    fn empty_input_passes_through_when_not_last() {
        let mut protocol = BurstProtocol::default();
        let (data, _) = read(&mut protocol, b"").unwrap_ready();
        assert!(data.is_empty());
    }

    #[test]
    fn discards_garbage_before_sync_pattern() {
        let mut protocol =
            BurstProtocol::new(0, Some(vec![0x1A, 0xCF]), false, None).unwrap();
        let (data, _) = read(&mut protocol, b"\x00\x55\x1A\xCF\x07\x08").unwrap_ready();
        assert_eq!(data.as_ref(), b"\x1A\xCF\x07\x08");
    }

    #[test]
    fn recovers_from_false_positive_sync_start() {
        let mut protocol =
            BurstProtocol::new(0, Some(vec![0x1A, 0xCF]), false, None).unwrap();
        // 0x1A 0x00 is a false start; the real pattern follows.
        let (data, _) = read(&mut protocol, b"\x1A\x00\x1A\xCF\x09").unwrap_ready();
        assert_eq!(data.as_ref(), b"\x1A\xCF\x09");
    }

    #[test]
    fn waits_for_enough_bytes_to_judge_sync() {
        let mut protocol =
            BurstProtocol::new(0, Some(vec![0x1A, 0xCF]), false, None).unwrap();
        assert_eq!(read(&mut protocol, b"\x1A"), Outcome::Stop);
        // The partial match is still pending, not discarded.
        let (data, _) = read(&mut protocol, b"\xCF\x42").unwrap_ready();
        assert_eq!(data.as_ref(), b"\x1A\xCF\x42");
    }

    #[test]
    fn no_sync_byte_discards_entire_buffer() {
        let mut protocol =
            BurstProtocol::new(0, Some(vec![0x1A, 0xCF]), false, None).unwrap();
        assert_eq!(read(&mut protocol, b"\x00\x01\x02"), Outcome::Stop);
        let (data, _) = read(&mut protocol, b"\x1A\xCF\x03").unwrap_ready();
        assert_eq!(data.as_ref(), b"\x1A\xCF\x03");
    }

    #[test]
    fn discard_leading_bytes_strips_prefix() {
        let mut protocol = BurstProtocol::new(2, Some(vec![0x1A, 0xCF]), false, None).unwrap();
        let (data, _) = read(&mut protocol, b"\x1A\xCF\x0A\x0B").unwrap_ready();
        assert_eq!(data.as_ref(), b"\x0A\x0B");
    }

    #[test]
    fn write_fills_sync_inside_packet() {
        let mut protocol = BurstProtocol::new(0, Some(vec![0x1A, 0xCF]), true, None).unwrap();
        let packet = Packet::from_buffer(BytesMut::from(&b"\x00\x00\x05\x06"[..]));
        let packet = protocol.write_packet(packet).unwrap().unwrap_ready();
        assert_eq!(packet.buffer.as_ref(), b"\x1A\xCF\x05\x06");
    }

    #[test]
    fn write_prepends_discarded_bytes_with_sync() {
        let mut protocol = BurstProtocol::new(2, Some(vec![0x1A, 0xCF]), true, None).unwrap();
        let (data, _) = protocol
            .write_data(BytesMut::from(&b"\x05\x06"[..]), None)
            .unwrap()
            .unwrap_ready();
        assert_eq!(data.as_ref(), b"\x1A\xCF\x05\x06");
    }

    #[test]
    fn write_without_fill_leaves_data_alone() {
        let mut protocol = BurstProtocol::new(2, Some(vec![0x1A, 0xCF]), false, None).unwrap();
        let (data, _) = protocol
            .write_data(BytesMut::from(&b"\x05\x06"[..]), None)
            .unwrap()
            .unwrap_ready();
        assert_eq!(data.as_ref(), b"\x05\x06");
    }

    #[test]
    fn reset_clears_buffer_and_state() {
        let mut protocol = BurstProtocol::new(0, Some(vec![0x1A, 0xCF]), false, None).unwrap();
        assert_eq!(read(&mut protocol, b"\x1A"), Outcome::Stop);
        protocol.reset();
        assert_eq!(protocol.framing_ref().data.len(), 0);
        assert_eq!(protocol.framing_ref().sync_state, SyncState::Searching);
    }

    #[test]
    fn empty_sync_pattern_is_a_config_error() {
        assert!(matches!(
            BurstProtocol::new(0, Some(vec![]), false, None),
            Err(ProtocolError::EmptySyncPattern)
        ));
    }

    #[test]
    fn one_byte_chunks_match_whole_stream() {
        let stream = b"\x00\x00\x1A\xCF\x01\x02";
        let mut whole = BurstProtocol::new(0, Some(vec![0x1A, 0xCF]), false, None).unwrap();
        let (expected, _) = read(&mut whole, stream).unwrap_ready();

        let mut chunked = BurstProtocol::new(0, Some(vec![0x1A, 0xCF]), false, None).unwrap();
        let mut emitted = Vec::new();
        for byte in stream {
            if let Outcome::Ready((data, _)) = read(&mut chunked, &[*byte]) {
                emitted.push(data);
            }
        }
        // Burst emits as soon as bytes follow the sync; concatenated output
        // must equal the single-shot packet.
        let combined: Vec<u8> = emitted.iter().flat_map(|d| d.to_vec()).collect();
        assert_eq!(combined, expected.to_vec());
    }
}
