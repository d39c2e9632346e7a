//! Frames packets by identifying their type first, then reading out that
//! type's entire defined length.
//!
//! "Fixed" length is fixed per packet type, not per protocol: the length to
//! extract is only known once the buffered bytes have been matched against
//! the identification index.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::BytesMut;
use serde_json::json;
use tracing::warn;

use tlmframe_packet::{IdentificationIndex, Packet, PacketDefinition};

use crate::burst::{burst_read_data, burst_write_data, BurstFramed, BurstFraming, Reduced};
use crate::error::{ProtocolError, Result};
use crate::protocol::{Extra, Outcome, ProtocolBase, ProtocolHandler};

/// Identity resolved during framing, applied to the packet object one call
/// later in `read_packet`.
#[derive(Debug, Clone)]
struct PendingIdentity {
    received_time: SystemTime,
    target_name: String,
    packet_name: String,
}

/// Configuration for identification-driven framing.
#[derive(Debug, Clone)]
pub struct FixedConfig {
    /// Minimum buffered bytes before identification is attempted.
    pub min_id_size: usize,
    /// Whether this connection carries telemetry (true) or commands.
    pub telemetry: bool,
    /// Treat unidentifiable data as a hard error instead of emitting it as
    /// one unidentified packet.
    pub unknown_raise: bool,
    /// Restrict and order the targets consulted during identification.
    /// `None` uses the index's build order.
    pub target_order: Option<Vec<String>>,
}

impl Default for FixedConfig {
    fn default() -> Self {
        Self {
            min_id_size: 1,
            telemetry: true,
            unknown_raise: false,
            target_order: None,
        }
    }
}

/// Delineates packets by identification against registered definitions.
#[derive(Debug)]
pub struct FixedProtocol {
    framing: BurstFraming,
    config: FixedConfig,
    index: Arc<IdentificationIndex>,
    pending: Option<PendingIdentity>,
}

impl FixedProtocol {
    pub fn new(
        config: FixedConfig,
        index: Arc<IdentificationIndex>,
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
            config,
            index,
            pending: None,
        })
    }

    fn identify(&self) -> Option<Arc<PacketDefinition>> {
        let discard = self.framing.discard_leading_bytes.min(self.framing.data.len());
        let view = &self.framing.data[discard..];
        match &self.config.target_order {
            Some(order) => order
                .iter()
                .find_map(|target| self.index.identify_target(target, view)),
            None => self.index.identify(view),
        }
    }

    /// Identify the buffered data and, once enough bytes exist for the
    /// matched definition, extract it. The resolved identity is stashed for
    /// the `read_packet` call that follows packet construction.
    fn identify_and_finish_packet(&mut self) -> Result<Reduced> {
        match self.identify() {
            Some(definition) => {
                let total = definition.defined_length + self.framing.discard_leading_bytes;
                if total > self.framing.data.len() {
                    // The match already succeeded; only the length check can
                    // still block extraction.
                    return Ok(Reduced::Stop);
                }

                // Identification happens one call ahead of packet-object
                // construction; a still-occupied stash means a packet was
                // identified before the previous one was finalized.
                debug_assert!(
                    self.pending.is_none(),
                    "packet identified before previous identity was applied"
                );
                self.pending = Some(PendingIdentity {
                    received_time: SystemTime::now(),
                    target_name: definition.target_name.clone(),
                    packet_name: definition.packet_name.clone(),
                });

                let packet_data = self.framing.data.split_to(total);
                Ok(Reduced::Packet(packet_data, self.framing.extra.clone()))
            }
            None => {
                if self.config.unknown_raise {
                    return Err(ProtocolError::UnknownPacket);
                }
                // Unknown data: emit everything buffered as one
                // unidentified packet, identity fields left empty.
                warn!(
                    bytes = self.framing.data.len(),
                    "unidentified data received, emitting as unknown packet"
                );
                self.pending = None;
                let packet_data = self.framing.data.split();
                Ok(Reduced::Packet(packet_data, self.framing.extra.clone()))
            }
        }
    }
}

impl BurstFramed for FixedProtocol {
    fn framing(&mut self) -> &mut BurstFraming {
        &mut self.framing
    }

    fn framing_ref(&self) -> &BurstFraming {
        &self.framing
    }

    fn reduce_to_single_packet(&mut self) -> Result<Reduced> {
        if self.framing.data.len() < self.config.min_id_size {
            return Ok(Reduced::Stop);
        }
        self.identify_and_finish_packet()
    }
}

impl ProtocolHandler for FixedProtocol {
    fn read_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        burst_read_data(self, data, extra)
    }

    fn read_packet(&mut self, mut packet: Packet) -> Result<Outcome<Packet>> {
        if let Some(identity) = self.pending.take() {
            packet.received_time = Some(identity.received_time);
            packet.target_name = Some(identity.target_name);
            packet.packet_name = Some(identity.packet_name);
        }
        Ok(Outcome::Ready(packet))
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
        Ok(Outcome::Ready((
            burst_write_data(&self.framing, data)?,
            extra,
        )))
    }

    fn reset(&mut self) {
        self.framing.reset();
        self.pending = None;
    }

    fn base(&self) -> &ProtocolBase {
        &self.framing.base
    }

    fn base_mut(&mut self) -> &mut ProtocolBase {
        &mut self.framing.base
    }

    fn name(&self) -> &'static str {
        "FixedProtocol"
    }

    fn details(&self) -> Extra {
        let mut details = self.framing.details();
        details["min_id_size"] = json!(self.config.min_id_size);
        details["telemetry"] = json!(self.config.telemetry);
        details["unknown_raise"] = json!(self.config.unknown_raise);
        details
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tlmframe_packet::{FieldSpec, ItemDef, Value};

    use super::*;

    fn index() -> Arc<IdentificationIndex> {
        let one = PacketDefinition::new(
            "SAT",
            "ONE",
            4,
            vec![ItemDef::new("ID", FieldSpec::uint(0, 8)).with_id_value(Value::Uint(0x01))],
        );
        let two = PacketDefinition::new(
            "SAT",
            "TWO",
            6,
            vec![ItemDef::new("ID", FieldSpec::uint(0, 8)).with_id_value(Value::Uint(0x02))],
        );
        Arc::new(IdentificationIndex::build(
            vec![one, two],
            &HashSet::new(),
        ))
    }

    fn protocol(config: FixedConfig) -> FixedProtocol {
        FixedProtocol::new(config, index(), 0, None, false, None).unwrap()
    }

    fn read(
        protocol: &mut FixedProtocol,
        bytes: &[u8],
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        protocol.read_data(BytesMut::from(bytes), None)
    }

    #[test]
    fn identifies_and_extracts_defined_length() {
        let mut protocol = protocol(FixedConfig::default());
        let (data, _) = read(&mut protocol, b"\x01\xAA\xBB\xCC\x99")
            .unwrap()
            .unwrap_ready();
        assert_eq!(data.as_ref(), b"\x01\xAA\xBB\xCC");

        let packet = Packet::from_buffer(data);
        let packet = protocol.read_packet(packet).unwrap().unwrap_ready();
        assert_eq!(packet.target_name.as_deref(), Some("SAT"));
        assert_eq!(packet.packet_name.as_deref(), Some("ONE"));
        assert!(packet.received_time.is_some());
    }

    #[test]
    fn lengths_vary_by_identified_type() {
        let mut protocol = protocol(FixedConfig::default());
        let (data, _) = read(&mut protocol, b"\x02\x01\x02\x03\x04\x05")
            .unwrap()
            .unwrap_ready();
        assert_eq!(data.len(), 6);
    }

    #[test]
    fn waits_for_min_id_size() {
        let mut protocol = protocol(FixedConfig {
            min_id_size: 2,
            ..FixedConfig::default()
        });
        assert_eq!(read(&mut protocol, b"\x01").unwrap(), Outcome::Stop);
        assert_eq!(read(&mut protocol, b"\xAA").unwrap(), Outcome::Stop);
        let (data, _) = read(&mut protocol, b"\xBB\xCC").unwrap().unwrap_ready();
        assert_eq!(data.as_ref(), b"\x01\xAA\xBB\xCC");
    }

    #[test]
    fn match_succeeds_then_waits_for_full_length() {
        let mut protocol = protocol(FixedConfig::default());
        // Identified as TWO (6 bytes) but only 3 buffered.
        assert_eq!(read(&mut protocol, b"\x02\x01\x02").unwrap(), Outcome::Stop);
        let (data, _) = read(&mut protocol, b"\x03\x04\x05").unwrap().unwrap_ready();
        assert_eq!(data.len(), 6);
    }

    #[test]
    fn unknown_data_emitted_unidentified() {
        let mut protocol = protocol(FixedConfig::default());
        let (data, _) = read(&mut protocol, b"\x7F\x01").unwrap().unwrap_ready();
        assert_eq!(data.as_ref(), b"\x7F\x01");

        let packet = Packet::from_buffer(data);
        let packet = protocol.read_packet(packet).unwrap().unwrap_ready();
        assert!(!packet.identified());
        assert!(packet.received_time.is_none());
    }

    #[test]
    fn unknown_raise_makes_unknown_data_fatal() {
        let mut protocol = protocol(FixedConfig {
            unknown_raise: true,
            ..FixedConfig::default()
        });
        assert!(matches!(
            read(&mut protocol, b"\x7F\x01"),
            Err(ProtocolError::UnknownPacket)
        ));
    }

    #[test]
    fn target_order_restricts_identification() {
        let mut protocol = protocol(FixedConfig {
            target_order: Some(vec!["OTHER".to_string()]),
            ..FixedConfig::default()
        });
        // SAT packets are not consulted, so the data goes out unknown.
        let (data, _) = read(&mut protocol, b"\x01\xAA\xBB\xCC").unwrap().unwrap_ready();
        assert_eq!(data.len(), 4);
        let packet = protocol
            .read_packet(Packet::from_buffer(data))
            .unwrap()
            .unwrap_ready();
        assert!(!packet.identified());
    }

    #[test]
    fn discard_leading_bytes_offsets_identification() {
        let mut protocol =
            FixedProtocol::new(FixedConfig::default(), index(), 2, None, false, None).unwrap();
        // Two header bytes are discarded; identification sees 0x01.
        let (data, _) = read(&mut protocol, b"\xDE\xAD\x01\xAA\xBB\xCC")
            .unwrap()
            .unwrap_ready();
        assert_eq!(data.as_ref(), b"\x01\xAA\xBB\xCC");
    }

    #[test]
    fn consecutive_packets_identify_independently() {
        let mut protocol = protocol(FixedConfig::default());
        let (first, _) = read(&mut protocol, b"\x01\xAA\xBB\xCC\x02\x01\x02\x03\x04\x05")
            .unwrap()
            .unwrap_ready();
        assert_eq!(first.as_ref(), b"\x01\xAA\xBB\xCC");
        let first_packet = protocol
            .read_packet(Packet::from_buffer(first))
            .unwrap()
            .unwrap_ready();
        assert_eq!(first_packet.packet_name.as_deref(), Some("ONE"));

        let (second, _) = read(&mut protocol, b"").unwrap().unwrap_ready();
        assert_eq!(second.len(), 6);
        let second_packet = protocol
            .read_packet(Packet::from_buffer(second))
            .unwrap()
            .unwrap_ready();
        assert_eq!(second_packet.packet_name.as_deref(), Some("TWO"));
    }

    #[test]
    fn reset_clears_pending_identity() {
        let mut protocol = protocol(FixedConfig::default());
        let _ = read(&mut protocol, b"\x01\xAA\xBB\xCC");
        protocol.reset();
        let packet = protocol
            .read_packet(Packet::from_buffer(BytesMut::new()))
            .unwrap()
            .unwrap_ready();
        assert!(!packet.identified());
    }
}
