use std::time::SystemTime;

use bytes::BytesMut;

use crate::accessor::BinaryAccessor;
use crate::error::Result;
use crate::field::{FieldSpec, Value};

/// A single packet moving through the system: an owned byte buffer plus the
/// identity and timing attributes stamped on it during framing.
///
/// A packet starts unidentified (no target or packet name); the framing
/// layer fills identity in as it is discovered.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub buffer: BytesMut,
    pub target_name: Option<String>,
    pub packet_name: Option<String>,
    pub received_time: Option<SystemTime>,
    /// Set when this packet was replayed from storage rather than received
    /// live.
    pub stored: bool,
    /// Out-of-band metadata carried alongside the buffer.
    pub extra: Option<serde_json::Value>,
}

impl Packet {
    /// An unidentified packet wrapping `buffer`.
    pub fn from_buffer(buffer: BytesMut) -> Self {
        Self {
            buffer,
            ..Self::default()
        }
    }

    pub fn identified(&self) -> bool {
        self.target_name.is_some() && self.packet_name.is_some()
    }

    /// Read a field from this packet's buffer.
    pub fn read(&self, field: &FieldSpec) -> Result<Value> {
        BinaryAccessor::read(&self.buffer, field)
    }

    /// Write a field into this packet's buffer.
    pub fn write(&mut self, field: &FieldSpec, value: &Value) -> Result<()> {
        BinaryAccessor::write(&mut self.buffer, field, value)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unidentified() {
        let packet = Packet::from_buffer(BytesMut::from(&b"\x01\x02"[..]));
        assert!(!packet.identified());
        assert_eq!(packet.len(), 2);
        assert!(!packet.stored);
    }

    #[test]
    fn field_access_goes_through_buffer() {
        let mut packet = Packet::from_buffer(BytesMut::from(&[0u8; 4][..]));
        let field = FieldSpec::uint(0, 32);
        packet.write(&field, &Value::Uint(99)).unwrap();
        assert_eq!(packet.read(&field).unwrap(), Value::Uint(99));
    }

    #[test]
    fn identified_after_both_names_set() {
        let mut packet = Packet::from_buffer(BytesMut::new());
        packet.target_name = Some("SAT".into());
        assert!(!packet.identified());
        packet.packet_name = Some("HEALTH".into());
        assert!(packet.identified());
    }
}
