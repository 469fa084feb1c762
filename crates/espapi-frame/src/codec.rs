use bytes::{Buf, Bytes, BytesMut};
use prost::encoding::{encode_varint, encoded_len_varint};

use crate::error::{FrameError, Result};
use crate::message::{Message, MessageKind};

/// Every frame starts with this byte.
pub const MARKER: u8 = 0x00;

/// Longest encoding of a `u64` varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A framed payload tagged with its message kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Schema of the payload.
    pub kind: MessageKind,
    /// The encoded payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Encode a message into a frame.
    pub fn from_message(message: &Message) -> Self {
        Self::new(message.kind(), message.encode_payload())
    }

    /// Decode the payload according to the frame's kind.
    pub fn decode(&self) -> Result<Message> {
        Message::decode_payload(self.kind, &self.payload)
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        header_len(self.kind, self.payload.len()) + self.payload.len()
    }
}

/// Size of the marker and both varints for a payload of `payload_len` bytes.
pub fn header_len(kind: MessageKind, payload_len: usize) -> usize {
    1 + encoded_len_varint(payload_len as u64) + encoded_len_varint(u64::from(kind))
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────┬──────────────┬──────────────┬────────────────┐
/// │ 0x00   │ Length       │ Kind         │ Payload        │
/// │ (1B)   │ (varint)     │ (varint)     │ (Length bytes) │
/// └────────┴──────────────┴──────────────┴────────────────┘
/// ```
pub fn encode_frame(kind: MessageKind, payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(header_len(kind, payload.len()) + payload.len());
    dst.extend_from_slice(&[MARKER]);
    encode_varint(payload.len() as u64, dst);
    encode_varint(u64::from(kind), dst);
    dst.extend_from_slice(payload);
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. Header errors are
/// reported as soon as the offending bytes are buffered, without waiting for
/// the payload.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(&marker) = src.first() else {
        return Ok(None);
    };
    if marker != MARKER {
        return Err(FrameError::InvalidMarker(marker));
    }

    let Some((payload_len, len_size)) = peek_varint(&src[1..])? else {
        return Ok(None);
    };
    let Some((kind_id, kind_size)) = peek_varint(&src[1 + len_size..])? else {
        return Ok(None);
    };

    let kind = MessageKind::try_from(kind_id)?;

    let payload_len = usize::try_from(payload_len).unwrap_or(usize::MAX);
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let header = 1 + len_size + kind_size;
    if src.len() < header + payload_len {
        return Ok(None); // Need more data
    }

    src.advance(header);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { kind, payload }))
}

/// Parse a varint at the start of `buf` without consuming it.
///
/// Returns the value and its encoded length, or `None` if `buf` ends first.
fn peek_varint(buf: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value = 0u64;
    for (index, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        if index == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(FrameError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << (7 * index);
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        return Err(FrameError::VarintOverflow);
    }
    Ok(None)
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
