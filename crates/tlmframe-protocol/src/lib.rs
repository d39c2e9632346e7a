//! Stream framing protocols for the tlmframe engine.
//!
//! A connection's protocol chain turns an arbitrary byte stream into
//! discrete packet buffers (read direction) and packet buffers back into
//! wire bytes (write direction). Each stage owns its partial-read state and
//! composes with the others regardless of order:
//!
//! - [`BurstProtocol`]: all available bytes, optional sync-pattern recovery
//! - [`LengthProtocol`]: length-field framing at any bit position
//! - [`FixedProtocol`]: identification-driven per-type fixed lengths
//! - [`PreidentifiedProtocol`]: self-describing metadata framing
//! - [`CrcProtocol`]: CRC verify/strip on read, compute/insert on write
//! - [`TerminatedProtocol`]/[`SlipProtocol`]: terminator framing, RFC 1055
//!   escaping

pub mod burst;
pub mod crc;
pub mod crc_protocol;
pub mod error;
pub mod fixed;
pub mod length;
pub mod preidentified;
pub mod protocol;
pub mod slip;
pub mod terminated;

pub use burst::BurstProtocol;
pub use crc::Crc;
pub use crc_protocol::{BadCrcStrategy, CrcConfig, CrcProtocol, CrcWriteItem};
pub use error::{ProtocolError, Result};
pub use fixed::{FixedConfig, FixedProtocol};
pub use length::{LengthConfig, LengthProtocol};
pub use preidentified::PreidentifiedProtocol;
pub use protocol::{mark_chain_positions, Extra, Outcome, Protocol, ProtocolBase, ProtocolHandler};
pub use slip::{SlipConfig, SlipProtocol};
pub use terminated::TerminatedProtocol;
