//! Connection plumbing for tlmframe: attaches protocol chains to a
//! transport stream and drives data through them.

pub mod error;
pub mod link;

pub use error::{LinkError, Result};
pub use link::{Link, LinkCancel, LinkWriterHandle};
