use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use espapi_transport::ApiStream;
use tracing::trace;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::{Message, MessageKind};

/// Encodes frames onto a byte stream, one `write_all` per frame.
///
/// Only `Interrupted` is retried. An expired write deadline surfaces as
/// `FrameError::Io` with `WouldBlock` or `TimedOut`; part of the frame may
/// already be on the wire by then, so the stream is unusable afterwards.
pub struct FrameWriter<T> {
    inner: T,
    scratch: BytesMut,
    max_payload: usize,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            scratch: BytesMut::new(),
            max_payload: config.max_payload_size,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.kind, &frame.payload)
    }

    /// Encode `message` and send it as one frame.
    pub fn write_message(&mut self, message: &Message) -> Result<()> {
        self.send(message.kind(), &message.encode_payload())
    }

    /// Frame an already encoded payload and write all of it.
    pub fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }

        self.scratch.clear();
        encode_frame(kind, payload, &mut self.scratch);

        let mut rest = &self.scratch[..];
        while !rest.is_empty() {
            match self.inner.write(rest) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => rest = &rest[n..],
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        self.flush()?;

        trace!(kind = %kind, len = payload.len(), "frame out");
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                other => return other.map_err(FrameError::Io),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Direct access to the stream, bypassing framing.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameWriter<ApiStream> {
    /// Like [`with_config`](Self::with_config), also applying the configured
    /// write timeout to the socket.
    pub fn with_config_stream(inner: ApiStream, config: FrameConfig) -> Result<Self> {
        inner.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
