use crate::accessor::BinaryAccessor;
use crate::field::{FieldSpec, Value};

/// A named field within a packet definition, optionally carrying the literal
/// value that identifies the packet type.
#[derive(Debug, Clone)]
pub struct ItemDef {
    pub name: String,
    pub field: FieldSpec,
    /// When set, this item is an identification field: a buffer only matches
    /// this definition if the value read at the item's position equals this.
    pub id_value: Option<Value>,
}

impl ItemDef {
    pub fn new(name: impl Into<String>, field: FieldSpec) -> Self {
        Self {
            name: name.into(),
            field,
            id_value: None,
        }
    }

    pub fn with_id_value(mut self, value: Value) -> Self {
        self.id_value = Some(value);
        self
    }
}

/// An immutable packet layout: a (target, packet) pair with an ordered set
/// of items and a fixed defined length in bytes.
///
/// Definitions are registered once at startup and shared read-only across
/// all connections.
#[derive(Debug, Clone)]
pub struct PacketDefinition {
    pub target_name: String,
    pub packet_name: String,
    /// Total length of this packet type in bytes.
    pub defined_length: usize,
    pub items: Vec<ItemDef>,
}

impl PacketDefinition {
    pub fn new(
        target_name: impl Into<String>,
        packet_name: impl Into<String>,
        defined_length: usize,
        items: Vec<ItemDef>,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            packet_name: packet_name.into(),
            defined_length,
            items,
        }
    }

    /// Identification items in bit-offset order.
    pub fn id_items(&self) -> Vec<&ItemDef> {
        let mut items: Vec<&ItemDef> = self
            .items
            .iter()
            .filter(|item| item.id_value.is_some())
            .collect();
        items.sort_by_key(|item| item.field.bit_offset);
        items
    }

    /// Look up an item by name.
    pub fn item(&self, name: &str) -> Option<&ItemDef> {
        self.items.iter().find(|item| item.name == name)
    }

    /// Whether `buffer` matches this definition's identification values.
    ///
    /// A definition with no identification items matches everything. A buffer
    /// too short to read an identification field fails the match rather than
    /// erroring, so short packets can still be identified by other
    /// definitions.
    pub fn identify(&self, buffer: &[u8]) -> bool {
        let id_items = self.id_items();
        if id_items.is_empty() {
            return true;
        }
        id_items.iter().all(|item| {
            match BinaryAccessor::read(buffer, &item.field) {
                Ok(value) => Some(&value) == item.id_value.as_ref(),
                Err(_) => false,
            }
        })
    }

    /// Values at each identification field position, in id-item order.
    /// Unreadable fields yield `None`.
    pub fn read_id_values(&self, buffer: &[u8]) -> Vec<Option<Value>> {
        self.id_items()
            .iter()
            .map(|item| BinaryAccessor::read(buffer, &item.field).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_id_definition() -> PacketDefinition {
        PacketDefinition::new(
            "SAT",
            "HEALTH",
            6,
            vec![
                ItemDef::new("APID", FieldSpec::uint(8, 8)).with_id_value(Value::Uint(0x20)),
                ItemDef::new("VERSION", FieldSpec::uint(0, 8)).with_id_value(Value::Uint(0x01)),
                ItemDef::new("COUNT", FieldSpec::uint(16, 16)),
            ],
        )
    }

    #[test]
    fn id_items_sorted_by_bit_offset() {
        let definition = two_id_definition();
        let names: Vec<&str> = definition
            .id_items()
            .iter()
            .map(|item| item.name.as_str())
            .collect();
        assert_eq!(names, vec!["VERSION", "APID"]);
    }

    #[test]
    fn identify_matches_only_on_all_id_values() {
        let definition = two_id_definition();
        assert!(definition.identify(b"\x01\x20\x00\x00\x00\x00"));
        assert!(!definition.identify(b"\x01\x21\x00\x00\x00\x00"));
        assert!(!definition.identify(b"\x02\x20\x00\x00\x00\x00"));
    }

    #[test]
    fn identify_tolerates_short_buffers() {
        let definition = two_id_definition();
        assert!(!definition.identify(b"\x01"));
        assert!(!definition.identify(b""));
    }

    #[test]
    fn no_id_items_matches_everything() {
        let definition = PacketDefinition::new("SAT", "RAW", 4, vec![]);
        assert!(definition.identify(b"\xDE\xAD"));
    }

    #[test]
    fn read_id_values_in_order() {
        let definition = two_id_definition();
        let values = definition.read_id_values(b"\x01\x20\x00\x00\x00\x00");
        assert_eq!(
            values,
            vec![Some(Value::Uint(0x01)), Some(Value::Uint(0x20))]
        );
    }

    #[test]
    fn read_id_values_short_buffer_yields_none() {
        let definition = two_id_definition();
        let values = definition.read_id_values(b"\x01");
        assert_eq!(values, vec![Some(Value::Uint(0x01)), None]);
    }

    #[test]
    fn item_lookup_by_name() {
        let definition = two_id_definition();
        assert!(definition.item("COUNT").is_some());
        assert!(definition.item("MISSING").is_none());
    }
}
