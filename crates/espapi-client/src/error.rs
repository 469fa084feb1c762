use std::time::Duration;

use espapi_frame::{FrameError, MessageKind};

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Dialing or configuring the socket failed.
    #[error("transport error: {0}")]
    Transport(#[from] espapi_transport::TransportError),

    /// Writing a frame failed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The device sent bytes that are not a valid frame or payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection failed or was closed.
    #[error("connection error: {0}")]
    Connection(String),

    /// No matching message arrived before the deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The device rejected the password.
    #[error("authentication failed: invalid password")]
    Authentication,

    /// The requested entity does not exist on this device.
    #[error("not found: {0}")]
    NotFound(String),

    /// The entity does not declare the capability a command needs.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A newer waiter for the same kind took over this waiter's slot.
    #[error("wait for {0} cancelled by a newer waiter")]
    Cancelled(MessageKind),

    /// A waiter received a message of a different kind than it asked for.
    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        expected: MessageKind,
        got: MessageKind,
    },

    /// A camera frame could not be decoded.
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Why a connection stopped for good.
///
/// Stored once by the receive loop and handed out to every later caller, so
/// it has to be cheap to clone (unlike [`ClientError`], which carries I/O
/// errors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// The device sent malformed data.
    Protocol(String),
    /// The socket failed, hit EOF, or was closed by either side.
    Connection(String),
}

impl Terminal {
    pub(crate) fn from_frame(err: &FrameError) -> Self {
        if err.is_protocol() {
            Terminal::Protocol(err.to_string())
        } else {
            Terminal::Connection(err.to_string())
        }
    }

    pub(crate) fn closed() -> Self {
        Terminal::Connection("connection closed".to_string())
    }

    pub(crate) fn closed_by_device() -> Self {
        Terminal::Connection("closed by device".to_string())
    }
}

impl From<Terminal> for ClientError {
    fn from(terminal: Terminal) -> Self {
        match terminal {
            Terminal::Protocol(reason) => ClientError::Protocol(reason),
            Terminal::Connection(reason) => ClientError::Connection(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_protocol_errors_become_protocol_terminals() {
        let terminal = Terminal::from_frame(&FrameError::UnknownKind(99));
        assert!(matches!(terminal, Terminal::Protocol(_)));
        assert!(matches!(
            ClientError::from(terminal),
            ClientError::Protocol(reason) if reason.contains("99")
        ));
    }

    #[test]
    fn frame_io_errors_become_connection_terminals() {
        let terminal = Terminal::from_frame(&FrameError::ConnectionClosed);
        assert!(matches!(terminal, Terminal::Connection(_)));
    }

    #[test]
    fn cancelled_names_the_kind() {
        let err = ClientError::Cancelled(MessageKind::DeviceInfoResponse);
        assert_eq!(
            err.to_string(),
            "wait for DeviceInfoResponse(10) cancelled by a newer waiter"
        );
    }
}
