//! TCP transport for the ESPHome native API.
//!
//! Devices expose the API on a plain TCP port (6053 by default). This crate
//! dials that port and hands back an [`ApiStream`]; everything else in espapi
//! builds on top of it.
//!
//! Discovering devices is somebody else's job. A discovery service only has to
//! produce a [`DeviceAddress`], which knows how to turn itself into a dialable
//! `host:port` string.

pub mod address;
pub mod error;
pub mod stream;
pub mod tcp;

pub use address::{join_host_port, DeviceAddress, DEFAULT_PORT};
pub use error::{Result, TransportError};
pub use stream::ApiStream;
pub use tcp::TcpTransport;
