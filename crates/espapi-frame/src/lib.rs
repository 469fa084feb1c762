//! Message framing and payload schemas for the ESPHome native API.
//!
//! Every message on the wire is framed as:
//! - A single `0x00` marker byte
//! - A varint payload length
//! - A varint message kind selecting the payload schema
//!
//! Payloads are protobuf messages. The kind table in [`message`] is closed:
//! receiving an unknown kind is a protocol error, and sending one cannot be
//! expressed at all.

pub mod codec;
pub mod error;
pub mod message;
pub mod proto;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, header_len, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, MARKER,
    MAX_VARINT_LEN,
};
pub use error::{FrameError, Result};
pub use message::{Message, MessageKind, Schema};
pub use reader::FrameReader;
pub use writer::FrameWriter;
