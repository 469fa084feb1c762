use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use espapi_transport::ApiStream;
use tracing::trace;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::Message;

/// Most frames are a few dozen bytes; camera chunks are the big ones.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Pulls whole frames off a byte stream.
///
/// Bytes already buffered survive a read error, so a reader on a socket with
/// a read timeout can be polled again after `WouldBlock`/`TimedOut` without
/// losing its place in the stream.
pub struct FrameReader<T> {
    inner: T,
    pending: BytesMut,
    max_payload: usize,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            pending: BytesMut::with_capacity(READ_CHUNK_SIZE),
            max_payload: config.max_payload_size,
        }
    }

    /// Block until one complete frame is buffered.
    ///
    /// EOF, whether between frames or in the middle of one, is
    /// `FrameError::ConnectionClosed`.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(frame) = decode_frame(&mut self.pending, self.max_payload)? {
                trace!(kind = %frame.kind, len = frame.payload.len(), "frame in");
                return Ok(frame);
            }

            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// [`read_frame`](Self::read_frame) plus payload decoding.
    pub fn read_message(&mut self) -> Result<Message> {
        self.read_frame()?.decode()
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

impl FrameReader<ApiStream> {
    /// Like [`with_config`](Self::with_config), also applying the configured
    /// read timeout to the socket.
    pub fn with_config_stream(inner: ApiStream, config: FrameConfig) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
