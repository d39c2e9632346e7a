//! Loads packet definitions from JSON registry files.
//!
//! The registry is the boundary to the configuration subsystem: definitions
//! are loaded once before any connection starts, and the framing engine only
//! consumes the finished [`IdentificationIndex`].

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::definition::{ItemDef, PacketDefinition};
use crate::error::RegistryError;
use crate::field::{DataType, Endianness, FieldSpec, Overflow, Value};
use crate::index::IdentificationIndex;

/// Registry files larger than this are rejected before parsing.
const MAX_REGISTRY_FILE_SIZE: u64 = 4 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct RegistryFile {
    targets: Vec<TargetConfig>,
}

#[derive(Debug, Deserialize)]
struct TargetConfig {
    name: String,
    #[serde(default)]
    unique_id_mode: bool,
    packets: Vec<PacketConfig>,
}

#[derive(Debug, Deserialize)]
struct PacketConfig {
    name: String,
    defined_length: usize,
    #[serde(default)]
    items: Vec<ItemConfig>,
}

#[derive(Debug, Deserialize)]
struct ItemConfig {
    name: String,
    #[serde(flatten)]
    field: FieldSpec,
    #[serde(default)]
    id_value: Option<serde_json::Value>,
}

/// Load a registry file and build the identification index from it.
pub fn load_registry(path: &Path) -> Result<IdentificationIndex, RegistryError> {
    let metadata = std::fs::metadata(path)
        .map_err(|err| RegistryError::LoadFailed(format!("{}: {err}", path.display())))?;
    if metadata.len() > MAX_REGISTRY_FILE_SIZE {
        return Err(RegistryError::LoadFailed(format!(
            "registry file too large ({} bytes): {}",
            metadata.len(),
            path.display()
        )));
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|err| RegistryError::LoadFailed(format!("{}: {err}", path.display())))?;
    registry_from_json(&contents)
}

/// Build the identification index from registry JSON.
pub fn registry_from_json(json: &str) -> Result<IdentificationIndex, RegistryError> {
    let file: RegistryFile = serde_json::from_str(json)?;

    let mut unique_id_targets = HashSet::new();
    let mut definitions = Vec::new();

    for target in file.targets {
        if target.unique_id_mode {
            unique_id_targets.insert(target.name.clone());
        }
        for packet in target.packets {
            if packet.defined_length == 0 {
                return Err(RegistryError::InvalidDefinition {
                    target: target.name.clone(),
                    packet: packet.name,
                    reason: "defined_length must be at least 1".into(),
                });
            }
            let mut items = Vec::with_capacity(packet.items.len());
            for item in packet.items {
                let id_value = match item.id_value {
                    Some(raw) => Some(convert_id_value(&raw, item.field.data_type).map_err(
                        |reason| RegistryError::InvalidDefinition {
                            target: target.name.clone(),
                            packet: packet.name.clone(),
                            reason: format!("item {}: {reason}", item.name),
                        },
                    )?),
                    None => None,
                };
                items.push(ItemDef {
                    name: item.name,
                    field: item.field,
                    id_value,
                });
            }
            definitions.push(PacketDefinition::new(
                target.name.clone(),
                packet.name,
                packet.defined_length,
                items,
            ));
        }
    }

    let target_count = definitions
        .iter()
        .map(|d| d.target_name.as_str())
        .collect::<HashSet<_>>()
        .len();
    info!(
        definitions = definitions.len(),
        targets = target_count,
        "packet registry loaded"
    );
    Ok(IdentificationIndex::build(definitions, &unique_id_targets))
}

/// Convert a JSON id value into the typed value the field will read back.
fn convert_id_value(raw: &serde_json::Value, data_type: DataType) -> Result<Value, String> {
    match data_type {
        DataType::Int => raw
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| format!("id_value {raw} is not a signed integer")),
        DataType::Uint => raw
            .as_u64()
            .map(Value::Uint)
            .ok_or_else(|| format!("id_value {raw} is not an unsigned integer")),
        DataType::Float => raw
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| format!("id_value {raw} is not a number")),
        DataType::String => raw
            .as_str()
            .map(|s| Value::Text(s.to_string()))
            .ok_or_else(|| format!("id_value {raw} is not a string")),
        DataType::Block => {
            let hex = raw
                .as_str()
                .ok_or_else(|| format!("id_value {raw} is not a hex string"))?;
            parse_hex_bytes(hex)
                .map(Value::Bytes)
                .ok_or_else(|| format!("id_value {hex:?} is not a hex byte string"))
        }
    }
}

/// Parse `"0xDEAD"`-style hex into bytes.
pub fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))?;
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
        .collect()
}
