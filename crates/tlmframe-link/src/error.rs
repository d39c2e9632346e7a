use tlmframe_protocol::ProtocolError;
use tlmframe_transport::TransportError;

/// Errors raised while driving a connection's protocol chains.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The transport failed underneath the chain.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol raised a hard error (misconfiguration or stream
    /// corruption).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An I/O error occurred reading or writing the stream.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A write-side protocol requested disconnect; the link must be torn
    /// down by the caller.
    #[error("protocol requested disconnect during write")]
    DisconnectRequested,
}

pub type Result<T> = std::result::Result<T, LinkError>;
