//! Packet data model for the tlmframe engine.
//!
//! This crate holds everything the framing layer needs to know about
//! packets without touching a transport:
//! - [`BinaryAccessor`]: bit-precise reads and writes of typed fields
//! - [`FieldSpec`]/[`Value`]: field positions, encodings, and typed values
//! - [`PacketDefinition`]: immutable registered packet layouts
//! - [`IdentificationIndex`]: resolves raw buffers to definitions
//! - [`Packet`]: one delineated packet moving through a connection

pub mod accessor;
pub mod definition;
pub mod error;
pub mod field;
pub mod index;
pub mod packet;
pub mod registry;

pub use accessor::BinaryAccessor;
pub use definition::{ItemDef, PacketDefinition};
pub use error::{AccessorError, RegistryError, Result};
pub use field::{DataType, Endianness, FieldSpec, Overflow, Value};
pub use index::IdentificationIndex;
pub use packet::Packet;
pub use registry::{load_registry, parse_hex_bytes, registry_from_json};
