//! Client for the ESPHome native API.
//!
//! espapi talks to ESPHome devices over their plain TCP API: log in, list the
//! entities a device exposes, follow their state, send commands and pull
//! camera frames.
//!
//! # Crate Structure
//!
//! - [`transport`] — TCP dialing and the device address type
//! - [`frame`] — Varint framing and the payload schemas
//! - [`client`] — Connection engine, entity registry and commands
//!
//! ```no_run
//! use espapi::Client;
//!
//! let client = Client::connect("porch.local:6053", "secret")?;
//! let temperature = client.entities().sensor("temperature")?;
//! let _subscription = temperature.subscribe(|change| println!("{change:?}"));
//! # Ok::<(), espapi::ClientError>(())
//! ```

/// Re-export transport types.
pub mod transport {
    pub use espapi_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use espapi_frame::*;
}

/// Re-export client types.
pub mod client {
    pub use espapi_client::*;
}

pub use espapi_client::{Client, ClientConfig, ClientError, Entities, Entity, LogLevel};
pub use espapi_transport::{DeviceAddress, DEFAULT_PORT};
