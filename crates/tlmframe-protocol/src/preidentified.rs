//! Self-describing framing: each packet on the wire carries its own
//! identity, timestamp, and payload length.
//!
//! Wire layout (byte aligned, big-endian multi-byte integers):
//!
//! ```text
//! [sync_pattern?] [flags:1] [extra_len:4 + extra_json, if 0x40 set]
//! [time_sec:4] [time_usec:4] [target_len:1 + target_name]
//! [packet_len:1 + packet_name] [payload_len:4] [payload]
//! ```
//!
//! Flag 0x80 marks a stored packet, 0x40 marks extra metadata present.
//!
//! The read side is an explicit state machine so a packet spanning many
//! partial reads resumes where it left off instead of re-parsing from the
//! top; each state consumes one field and leaves earlier fields cached.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use serde_json::json;

use tlmframe_packet::Packet;

use crate::burst::{burst_read_data, BurstFramed, BurstFraming, Reduced};
use crate::error::{ProtocolError, Result};
use crate::protocol::{Extra, Outcome, ProtocolBase, ProtocolHandler};

const STORED_FLAG_MASK: u8 = 0x80;
const EXTRA_FLAG_MASK: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReductionState {
    Start,
    SyncRemoved,
    NeedExtra,
    FlagsRemoved,
    TimeRemoved,
    TargetNameRemoved,
    PacketNameRemoved,
}

/// Frames packets with the self-describing metadata layout.
#[derive(Debug)]
pub struct PreidentifiedProtocol {
    framing: BurstFraming,
    /// Bounds the declared payload length against runaway allocation from a
    /// corrupt stream.
    max_length: Option<u64>,
    state: ReductionState,

    // Sub-fields parsed so far for the in-progress packet.
    read_stored: bool,
    read_extra: Option<Extra>,
    read_received_time: Option<SystemTime>,
    read_target_name: Option<String>,
    read_packet_name: Option<String>,

    // Outbound attributes stashed by write_packet for write_data.
    write_stored: bool,
    write_extra: Option<Extra>,
    write_time: Option<SystemTime>,
    write_target_name: String,
    write_packet_name: String,
}

impl PreidentifiedProtocol {
    pub fn new(
        sync_pattern: Option<Vec<u8>>,
        max_length: Option<u64>,
        allow_empty_data: Option<bool>,
    ) -> Result<Self> {
        Ok(Self {
            framing: BurstFraming::new(0, sync_pattern, false, allow_empty_data)?,
            max_length,
            state: ReductionState::Start,
            read_stored: false,
            read_extra: None,
            read_received_time: None,
            read_target_name: None,
            read_packet_name: None,
            write_stored: false,
            write_extra: None,
            write_time: None,
            write_target_name: String::new(),
            write_packet_name: String::new(),
        })
    }

    /// Consume one `length_num_bytes`-prefixed field from the buffer.
    /// `Ok(None)` means more bytes are needed for this one field.
    fn take_length_prefixed(&mut self, length_num_bytes: usize) -> Result<Option<BytesMut>> {
        if self.framing.data.len() < length_num_bytes {
            return Ok(None);
        }
        let declared = match length_num_bytes {
            1 => u64::from(self.framing.data[0]),
            4 => u64::from(u32::from_be_bytes([
                self.framing.data[0],
                self.framing.data[1],
                self.framing.data[2],
                self.framing.data[3],
            ])),
            _ => unreachable!("length prefixes are 1 or 4 bytes"),
        };
        if length_num_bytes == 4 {
            if let Some(max) = self.max_length {
                if declared > max {
                    return Err(ProtocolError::LengthOverMax {
                        length: declared,
                        max_length: max,
                    });
                }
            }
        }

        let declared = declared as usize;
        if self.framing.data.len() < declared + length_num_bytes {
            return Ok(None);
        }
        self.framing.data.advance(length_num_bytes);
        Ok(Some(self.framing.data.split_to(declared)))
    }
}

impl BurstFramed for PreidentifiedProtocol {
    fn framing(&mut self) -> &mut BurstFraming {
        &mut self.framing
    }

    fn framing_ref(&self) -> &BurstFraming {
        &self.framing
    }

    fn reduce_to_single_packet(&mut self) -> Result<Reduced> {
        // The sync search already aligned the buffer on the pattern; this
        // state strips the pattern bytes themselves.
        if self.state == ReductionState::Start {
            if let Some(pattern) = &self.framing.sync_pattern {
                if self.framing.data.len() < pattern.len() {
                    return Ok(Reduced::Stop);
                }
                let skip = pattern.len();
                self.framing.data.advance(skip);
            }
            self.state = ReductionState::SyncRemoved;
        }

        if self.state == ReductionState::SyncRemoved {
            if self.framing.data.is_empty() {
                return Ok(Reduced::Stop);
            }
            let flags = self.framing.data[0];
            self.framing.data.advance(1);
            self.read_stored = flags & STORED_FLAG_MASK != 0;
            self.read_extra = None;
            self.state = if flags & EXTRA_FLAG_MASK != 0 {
                ReductionState::NeedExtra
            } else {
                ReductionState::FlagsRemoved
            };
        }

        if self.state == ReductionState::NeedExtra {
            let Some(extra_bytes) = self.take_length_prefixed(4)? else {
                return Ok(Reduced::Stop);
            };
            self.read_extra = Some(serde_json::from_slice(&extra_bytes)?);
            self.state = ReductionState::FlagsRemoved;
        }

        if self.state == ReductionState::FlagsRemoved {
            if self.framing.data.len() < 8 {
                return Ok(Reduced::Stop);
            }
            let seconds = u32::from_be_bytes([
                self.framing.data[0],
                self.framing.data[1],
                self.framing.data[2],
                self.framing.data[3],
            ]);
            let microseconds = u32::from_be_bytes([
                self.framing.data[4],
                self.framing.data[5],
                self.framing.data[6],
                self.framing.data[7],
            ]);
            self.read_received_time = Some(
                UNIX_EPOCH
                    + Duration::from_secs(u64::from(seconds))
                    + Duration::from_micros(u64::from(microseconds)),
            );
            self.framing.data.advance(8);
            self.state = ReductionState::TimeRemoved;
        }

        if self.state == ReductionState::TimeRemoved {
            let Some(name) = self.take_length_prefixed(1)? else {
                return Ok(Reduced::Stop);
            };
            self.read_target_name = Some(String::from_utf8_lossy(&name).into_owned());
            self.state = ReductionState::TargetNameRemoved;
        }

        if self.state == ReductionState::TargetNameRemoved {
            let Some(name) = self.take_length_prefixed(1)? else {
                return Ok(Reduced::Stop);
            };
            self.read_packet_name = Some(String::from_utf8_lossy(&name).into_owned());
            self.state = ReductionState::PacketNameRemoved;
        }

        if self.state == ReductionState::PacketNameRemoved {
            let Some(payload) = self.take_length_prefixed(4)? else {
                return Ok(Reduced::Stop);
            };
            self.state = ReductionState::Start;
            return Ok(Reduced::Packet(payload, self.read_extra.clone()));
        }

        unreachable!("preidentified reduction state machine fell through")
    }
}

impl ProtocolHandler for PreidentifiedProtocol {
    fn read_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        burst_read_data(self, data, extra)
    }

    fn read_packet(&mut self, mut packet: Packet) -> Result<Outcome<Packet>> {
        packet.received_time = self.read_received_time;
        packet.target_name = self.read_target_name.clone();
        packet.packet_name = self.read_packet_name.clone();
        packet.stored = self.read_stored;
        Ok(Outcome::Ready(packet))
    }

    fn write_packet(&mut self, packet: Packet) -> Result<Outcome<Packet>> {
        // Stamp wall-clock time when the packet carries none.
        self.write_time = Some(packet.received_time.unwrap_or_else(SystemTime::now));
        self.write_target_name = packet
            .target_name
            .clone()
            .unwrap_or_else(|| "UNKNOWN".to_string());
        self.write_packet_name = packet
            .packet_name
            .clone()
            .unwrap_or_else(|| "UNKNOWN".to_string());
        self.write_stored = packet.stored;
        self.write_extra = packet.extra.clone();
        Ok(Outcome::Ready(packet))
    }

    fn write_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        if self.write_target_name.len() > u8::MAX as usize {
            return Err(ProtocolError::NameTooLong {
                len: self.write_target_name.len(),
            });
        }
        if self.write_packet_name.len() > u8::MAX as usize {
            return Err(ProtocolError::NameTooLong {
                len: self.write_packet_name.len(),
            });
        }

        let mut flags = 0u8;
        if self.write_stored {
            flags |= STORED_FLAG_MASK;
        }
        let extra_json = match &self.write_extra {
            Some(value) => {
                flags |= EXTRA_FLAG_MASK;
                Some(serde_json::to_vec(value)?)
            }
            None => None,
        };

        let elapsed = self
            .write_time
            .unwrap_or(UNIX_EPOCH)
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);

        let mut out = BytesMut::new();
        if let Some(pattern) = &self.framing.sync_pattern {
            out.put_slice(pattern);
        }
        out.put_u8(flags);
        if let Some(extra_json) = extra_json {
            out.put_u32(extra_json.len() as u32);
            out.put_slice(&extra_json);
        }
        out.put_u32(elapsed.as_secs() as u32);
        out.put_u32(elapsed.subsec_micros());
        out.put_u8(self.write_target_name.len() as u8);
        out.put_slice(self.write_target_name.as_bytes());
        out.put_u8(self.write_packet_name.len() as u8);
        out.put_slice(self.write_packet_name.as_bytes());
        out.put_u32(data.len() as u32);
        out.put_slice(&data);

        Ok(Outcome::Ready((out, extra)))
    }

    fn reset(&mut self) {
        self.framing.reset();
        self.state = ReductionState::Start;
        self.read_stored = false;
        self.read_extra = None;
        self.read_received_time = None;
        self.read_target_name = None;
        self.read_packet_name = None;
    }

    fn base(&self) -> &ProtocolBase {
        &self.framing.base
    }

    fn base_mut(&mut self) -> &mut ProtocolBase {
        &mut self.framing.base
    }

    fn name(&self) -> &'static str {
        "PreidentifiedProtocol"
    }

    fn details(&self) -> Extra {
        let mut details = self.framing.details();
        details["max_length"] = json!(self.max_length);
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_packet(protocol: &mut PreidentifiedProtocol, packet: Packet) -> BytesMut {
        let packet = protocol.write_packet(packet).unwrap().unwrap_ready();
        let buffer = packet.buffer.clone();
        let (data, _) = protocol.write_data(buffer, None).unwrap().unwrap_ready();
        data
    }

    fn sample_packet(payload: &[u8]) -> Packet {
        let mut packet = Packet::from_buffer(BytesMut::from(payload));
        packet.target_name = Some("SAT".to_string());
        packet.packet_name = Some("HEALTH".to_string());
        packet.received_time = Some(UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_000));
        packet
    }

    #[test]
    fn wire_layout_is_exact() {
        let mut protocol = PreidentifiedProtocol::new(None, None, None).unwrap();
        let wire = wire_packet(&mut protocol, sample_packet(b"\x01\x02"));

        let mut expected = BytesMut::new();
        expected.put_u8(0); // flags
        expected.put_u32(1_700_000_000); // seconds
        expected.put_u32(123_456); // microseconds
        expected.put_u8(3);
        expected.put_slice(b"SAT");
        expected.put_u8(6);
        expected.put_slice(b"HEALTH");
        expected.put_u32(2);
        expected.put_slice(b"\x01\x02");
        assert_eq!(wire.as_ref(), expected.as_ref());
    }

    #[test]
    fn roundtrips_through_read() {
        let mut protocol = PreidentifiedProtocol::new(None, None, None).unwrap();
        let wire = wire_packet(&mut protocol, sample_packet(b"\xDE\xAD\xBE\xEF"));

        let (payload, _) = protocol.read_data(wire, None).unwrap().unwrap_ready();
        assert_eq!(payload.as_ref(), b"\xDE\xAD\xBE\xEF");

        let packet = protocol
            .read_packet(Packet::from_buffer(payload))
            .unwrap()
            .unwrap_ready();
        assert_eq!(packet.target_name.as_deref(), Some("SAT"));
        assert_eq!(packet.packet_name.as_deref(), Some("HEALTH"));
        assert_eq!(
            packet.received_time,
            Some(UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_000))
        );
        assert!(!packet.stored);
    }

    #[test]
    fn roundtrips_with_sync_pattern() {
        let mut protocol =
            PreidentifiedProtocol::new(Some(vec![0xDE, 0xAD, 0xBE, 0xEF]), None, None).unwrap();
        let wire = wire_packet(&mut protocol, sample_packet(b"\x42"));
        assert_eq!(&wire[..4], b"\xDE\xAD\xBE\xEF");

        let (payload, _) = protocol.read_data(wire, None).unwrap().unwrap_ready();
        assert_eq!(payload.as_ref(), b"\x42");
    }

    #[test]
    fn stored_flag_and_extra_roundtrip() {
        let mut protocol = PreidentifiedProtocol::new(None, None, None).unwrap();
        let mut packet = sample_packet(b"\x05");
        packet.stored = true;
        packet.extra = Some(json!({"vcid": 3}));
        let wire = wire_packet(&mut protocol, packet);
        assert_eq!(wire[0], STORED_FLAG_MASK | EXTRA_FLAG_MASK);

        let (payload, extra) = protocol.read_data(wire, None).unwrap().unwrap_ready();
        assert_eq!(payload.as_ref(), b"\x05");
        assert_eq!(extra, Some(json!({"vcid": 3})));

        let packet = protocol
            .read_packet(Packet::from_buffer(payload))
            .unwrap()
            .unwrap_ready();
        assert!(packet.stored);
    }

    #[test]
    fn one_byte_chunks_resume_mid_packet() {
        let mut writer = PreidentifiedProtocol::new(None, None, None).unwrap();
        let wire = wire_packet(&mut writer, sample_packet(b"\x11\x22\x33"));

        let mut reader = PreidentifiedProtocol::new(None, None, None).unwrap();
        let mut packets = Vec::new();
        for byte in wire.iter() {
            match reader.read_data(BytesMut::from(&[*byte][..]), None).unwrap() {
                Outcome::Ready((data, _)) => packets.push(data),
                Outcome::Stop => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].as_ref(), b"\x11\x22\x33");

        let packet = reader
            .read_packet(Packet::from_buffer(packets.remove(0)))
            .unwrap()
            .unwrap_ready();
        assert_eq!(packet.target_name.as_deref(), Some("SAT"));
    }

    #[test]
    fn two_packets_in_one_buffer() {
        let mut writer = PreidentifiedProtocol::new(None, None, None).unwrap();
        let mut wire = wire_packet(&mut writer, sample_packet(b"\x01"));
        wire.extend_from_slice(&wire_packet(&mut writer, sample_packet(b"\x02")));

        let mut reader = PreidentifiedProtocol::new(None, None, None).unwrap();
        let (first, _) = reader.read_data(wire, None).unwrap().unwrap_ready();
        assert_eq!(first.as_ref(), b"\x01");
        let (second, _) = reader.read_data(BytesMut::new(), None).unwrap().unwrap_ready();
        assert_eq!(second.as_ref(), b"\x02");
    }

    #[test]
    fn oversized_declared_payload_is_fatal() {
        let mut writer = PreidentifiedProtocol::new(None, None, None).unwrap();
        let wire = wire_packet(&mut writer, sample_packet(&[0u8; 64]));

        let mut reader = PreidentifiedProtocol::new(None, Some(16), None).unwrap();
        assert!(matches!(
            reader.read_data(wire, None),
            Err(ProtocolError::LengthOverMax { length: 64, .. })
        ));
    }

    #[test]
    fn write_stamps_time_when_packet_has_none() {
        let mut protocol = PreidentifiedProtocol::new(None, None, None).unwrap();
        let mut packet = Packet::from_buffer(BytesMut::from(&b"\x00"[..]));
        packet.target_name = Some("SAT".to_string());
        packet.packet_name = Some("PING".to_string());
        let before = SystemTime::now();
        let wire = wire_packet(&mut protocol, packet);

        let seconds = u32::from_be_bytes([wire[1], wire[2], wire[3], wire[4]]);
        let lower = before.duration_since(UNIX_EPOCH).unwrap().as_secs() as u32;
        assert!(seconds >= lower);
    }

    #[test]
    fn unnamed_packets_go_out_as_unknown() {
        let mut protocol = PreidentifiedProtocol::new(None, None, None).unwrap();
        let wire = wire_packet(&mut protocol, Packet::from_buffer(BytesMut::from(&b"\x00"[..])));
        // flags + time + "UNKNOWN" length byte
        assert_eq!(wire[9], 7);
        assert_eq!(&wire[10..17], b"UNKNOWN");
    }

    #[test]
    fn oversized_name_is_an_error() {
        let mut protocol = PreidentifiedProtocol::new(None, None, None).unwrap();
        let mut packet = Packet::from_buffer(BytesMut::new());
        packet.target_name = Some("X".repeat(300));
        packet.packet_name = Some("P".to_string());
        let packet = protocol.write_packet(packet).unwrap().unwrap_ready();
        assert!(matches!(
            protocol.write_data(packet.buffer, None),
            Err(ProtocolError::NameTooLong { .. })
        ));
    }
}
