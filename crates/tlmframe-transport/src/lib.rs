//! Transport boundary for tlmframe connections.
//!
//! Each connection presents a blocking byte stream to the framing chain;
//! the chain does not know which concrete transport supplies the bytes.
//! Reconnection policy, authentication, and transport configuration belong
//! to the layers around this crate.

pub mod error;
pub mod stream;

pub use error::{Result, TransportError};
pub use stream::RawStream;
