//! # Transport Errors
//!
//! Error taxonomy shared by the framing layer, connections and the listener.
//!
//! Receive-side errors never leave the pump task: they are logged and turned into the
//! closed sentinel on the inbound queue. Send-side errors are returned to the caller.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Failure reported by a value codec while turning a value into bytes or back.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The value could not be represented by the codec
    #[error("encode failed: {0}")]
    Encode(String),

    /// The bytes could not be reconstructed into a value
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Transport layer errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// The peer closed its side while a frame was being read
    #[error("remote socket closed, local {local:?}, remote {peer:?}")]
    RemoteClosed {
        local: Option<SocketAddr>,
        peer: Option<SocketAddr>,
    },

    /// Payload bytes could not be decoded into a value
    #[error("decode failure: {0}")]
    Decode(#[source] CodecError),

    /// The value could not be encoded
    #[error("encode failure: {0}")]
    Encode(#[source] CodecError),

    /// Encoded payload does not fit in a frame
    #[error("frame too large: {len} bytes (max: {max} bytes)")]
    FrameTooLarge { len: usize, max: usize },

    /// The length prefix read from the wire is unusable
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The connection has already been torn down
    #[error("connection closed")]
    Closed,

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// OS-level socket failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Create a remote-closed error carrying both endpoints
    pub fn remote_closed(local: Option<SocketAddr>, peer: Option<SocketAddr>) -> Self {
        Self::RemoteClosed { local, peer }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error belongs to the I/O class (socket level, not codec level).
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Closed | Self::RemoteClosed { .. }
        )
    }

    /// Whether this error is a codec failure on either side.
    pub fn is_codec(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Encode(_))
    }
}

impl From<CodecError> for TransportError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Encode(_) => TransportError::Encode(e),
            CodecError::Decode(_) => TransportError::Decode(e),
        }
    }
}
