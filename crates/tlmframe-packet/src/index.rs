use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::definition::PacketDefinition;
use crate::field::Value;

/// Maps observed identification-field values to registered packet
/// definitions.
///
/// Built once from all definitions of the configured targets, read-only
/// afterwards, and shared across connections. Each target resolves in one of
/// two modes:
///
/// - value-keyed (the default): a single hash lookup keyed on the bytes of
///   the values read at the target's identification-field positions, with a
///   reserved catchall entry used when no exact match exists;
/// - unique-id: an ordered linear scan calling each definition's own
///   identify predicate, for targets whose packets cannot be distinguished
///   by a simple value table.
#[derive(Debug, Default)]
pub struct IdentificationIndex {
    targets: Vec<TargetIndex>,
}

#[derive(Debug)]
struct TargetIndex {
    name: String,
    mode: TargetMode,
}

#[derive(Debug)]
enum TargetMode {
    ValueKeyed {
        /// Definition whose id-field positions are used for the lookup read.
        /// All value-keyed definitions of a target share those positions.
        probe: Arc<PacketDefinition>,
        by_key: HashMap<Vec<u8>, Arc<PacketDefinition>>,
        catchall: Option<Arc<PacketDefinition>>,
    },
    UniqueId {
        definitions: Vec<Arc<PacketDefinition>>,
    },
}

impl IdentificationIndex {
    /// Build an index from `definitions`, preserving the order in which
    /// targets first appear. Targets named in `unique_id_targets` use the
    /// linear-scan mode.
    pub fn build(
        definitions: Vec<PacketDefinition>,
        unique_id_targets: &HashSet<String>,
    ) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<Arc<PacketDefinition>>> = HashMap::new();
        for definition in definitions {
            let target = definition.target_name.clone();
            if !grouped.contains_key(&target) {
                order.push(target.clone());
            }
            grouped.entry(target).or_default().push(Arc::new(definition));
        }

        let targets = order
            .into_iter()
            .map(|name| {
                let definitions = grouped.remove(&name).unwrap_or_default();
                let mode = if unique_id_targets.contains(&name) {
                    TargetMode::UniqueId { definitions }
                } else {
                    build_value_keyed(definitions)
                };
                TargetIndex { name, mode }
            })
            .collect();

        Self { targets }
    }

    /// Names of the indexed targets in build order.
    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.name.as_str()).collect()
    }

    /// All indexed definitions, in target order.
    pub fn definitions(&self) -> Vec<Arc<PacketDefinition>> {
        let mut all = Vec::new();
        for target in &self.targets {
            match &target.mode {
                TargetMode::ValueKeyed {
                    by_key, catchall, ..
                } => {
                    let mut defs: Vec<_> = by_key.values().cloned().collect();
                    defs.sort_by(|a, b| a.packet_name.cmp(&b.packet_name));
                    all.extend(defs);
                    all.extend(catchall.iter().cloned());
                }
                TargetMode::UniqueId { definitions } => all.extend(definitions.iter().cloned()),
            }
        }
        all
    }

    /// Resolve `buffer` against every target in build order.
    pub fn identify(&self, buffer: &[u8]) -> Option<Arc<PacketDefinition>> {
        self.targets
            .iter()
            .find_map(|target| identify_in(&target.mode, buffer))
    }

    /// Resolve `buffer` against a single named target.
    pub fn identify_target(&self, target_name: &str, buffer: &[u8]) -> Option<Arc<PacketDefinition>> {
        self.targets
            .iter()
            .find(|target| target.name == target_name)
            .and_then(|target| identify_in(&target.mode, buffer))
    }
}

fn build_value_keyed(definitions: Vec<Arc<PacketDefinition>>) -> TargetMode {
    let mut by_key = HashMap::new();
    let mut catchall = None;
    let mut probe = None;

    for definition in definitions {
        let id_items = definition.id_items();
        if id_items.is_empty() {
            catchall = Some(definition);
            continue;
        }
        let key = encode_id_key(
            id_items
                .iter()
                .map(|item| item.id_value.clone())
                .collect::<Vec<_>>()
                .as_slice(),
        );
        if probe.is_none() {
            probe = Some(definition.clone());
        }
        by_key.insert(key, definition);
    }

    match probe.or_else(|| catchall.clone()) {
        Some(probe) => TargetMode::ValueKeyed {
            probe,
            by_key,
            catchall,
        },
        // Target with no definitions at all
        None => TargetMode::UniqueId {
            definitions: Vec::new(),
        },
    }
}

fn identify_in(mode: &TargetMode, buffer: &[u8]) -> Option<Arc<PacketDefinition>> {
    match mode {
        TargetMode::ValueKeyed {
            probe,
            by_key,
            catchall,
        } => {
            let key = encode_id_key(&probe.read_id_values(buffer));
            by_key.get(&key).or(catchall.as_ref()).cloned()
        }
        TargetMode::UniqueId { definitions } => definitions
            .iter()
            .find(|definition| definition.identify(buffer))
            .cloned(),
    }
}

/// Stable byte encoding of a sequence of id-field values, used as the hash
/// key for value-keyed lookup. Each value is tagged so differently-typed
/// values can never collide.
fn encode_id_key(values: &[Option<Value>]) -> Vec<u8> {
    let mut key = Vec::new();
    for value in values {
        encode_value(&mut key, value);
    }
    key
}

fn encode_value(key: &mut Vec<u8>, value: &Option<Value>) {
    match value {
        None => key.push(0),
        Some(Value::Int(v)) => {
            key.push(1);
            key.extend_from_slice(&v.to_be_bytes());
        }
        Some(Value::Uint(v)) => {
            key.push(2);
            key.extend_from_slice(&v.to_be_bytes());
        }
        Some(Value::Float(v)) => {
            key.push(3);
            key.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        Some(Value::Text(s)) => {
            key.push(4);
            key.extend_from_slice(&(s.len() as u32).to_be_bytes());
            key.extend_from_slice(s.as_bytes());
        }
        Some(Value::Bytes(b)) => {
            key.push(5);
            key.extend_from_slice(&(b.len() as u32).to_be_bytes());
            key.extend_from_slice(b);
        }
        Some(Value::Array(items)) => {
            key.push(6);
            key.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                encode_value(key, &Some(item.clone()));
            }
        }
    }
}
