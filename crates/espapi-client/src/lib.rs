//! Client engine for the ESPHome native API.
//!
//! [`Client`] is the "just works" layer: dial a device, log in, read the
//! entities it exposes, follow their state and send commands. Underneath,
//! [`Connection`] owns the socket and a background receive loop that answers
//! the device's keepalives, applies push updates and hands replies to
//! whoever is waiting for them.

pub mod camera;
pub mod client;
pub mod clock;
pub mod command;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod entity;
pub mod error;
pub mod kinds;
pub mod logs;
pub mod registry;
mod responder;
mod sync;

pub use camera::{CaptureState, FrameStream, Reassembler, STREAM_REQUEST_INTERVAL};
pub use client::{Client, DeviceInfo, ServerHello};
pub use clock::{Clock, FixedClock, SystemClock};
pub use command::LightCommand;
pub use config::{
    ClientConfig, DEFAULT_CLIENT_INFO, DEFAULT_CLOSE_TIMEOUT, DEFAULT_INBOUND_CAPACITY,
    DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT,
};
pub use connection::Connection;
pub use correlation::{Waiter, WaiterTable};
pub use entity::{Entity, EntityInfo, EntityKind, Subscription, FLOAT_EPSILON};
pub use error::{ClientError, Result};
pub use kinds::{
    BinarySensor, BinarySensorCapabilities, BinarySensorChange, BinarySensorState, Camera,
    CameraState, Climate, ClimateCapabilities, ClimateChange, ClimateState, Cover,
    CoverCapabilities, CoverChange, CoverState, Fan, FanCapabilities, FanChange, FanState, Light,
    LightCapabilities, LightChange, LightState, Sensor, SensorCapabilities, SensorChange,
    SensorState, Switch, SwitchCapabilities, SwitchChange, SwitchState, TextSensor,
    TextSensorCapabilities, TextSensorChange, TextSensorState,
};
pub use logs::{LogEntry, LogStream};
pub use registry::Entities;

pub use espapi_frame::proto::{
    ClimateAction, ClimateFanMode, ClimateMode, ClimateSwingMode, CoverOperation, FanSpeed,
    LegacyCoverState, LogLevel,
};
