use crate::message::MessageKind;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame does not start with the `0x00` marker byte.
    #[error("invalid frame marker 0x{0:02x} (expected 0x00)")]
    InvalidMarker(u8),

    /// A length or kind varint ran past ten bytes or overflowed 64 bits.
    #[error("frame header varint overflow")]
    VarintOverflow,

    /// The frame carries a kind outside the message table.
    #[error("unknown message kind {0}")]
    UnknownKind(u64),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload bytes are not a valid encoding of the kind's schema.
    #[error("failed to decode {kind} payload: {source}")]
    Decode {
        kind: MessageKind,
        source: prost::DecodeError,
    },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True when the bytes on the wire were malformed, as opposed to the
    /// connection failing underneath the codec.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidMarker(_)
                | FrameError::VarintOverflow
                | FrameError::UnknownKind(_)
                | FrameError::PayloadTooLarge { .. }
                | FrameError::Decode { .. }
        )
    }

    /// True for read/write deadline expiry on a socket with timeouts set.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
        )
    }
}

impl From<espapi_transport::TransportError> for FrameError {
    fn from(err: espapi_transport::TransportError) -> Self {
        match err {
            espapi_transport::TransportError::Io(io) => FrameError::Io(io),
            espapi_transport::TransportError::Connect { source, .. }
            | espapi_transport::TransportError::Resolve { source, .. } => FrameError::Io(source),
            espapi_transport::TransportError::Shutdown => FrameError::ConnectionClosed,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
