//! Payload schemas.
//!
//! Every frame payload is a protobuf message. The field numbers below are the
//! device's wire contract and must not change; the kind each struct travels
//! under lives in [`crate::message`].

// ---- Enumerations ----------------------------------------------------------

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum LegacyCoverState {
    Open = 0,
    Closed = 1,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum CoverOperation {
    Idle = 0,
    IsOpening = 1,
    IsClosing = 2,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum LegacyCoverCommand {
    Open = 0,
    Close = 1,
    Stop = 2,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum FanSpeed {
    Low = 0,
    Medium = 1,
    High = 2,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum LogLevel {
    None = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Verbose = 5,
    VeryVerbose = 6,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ServiceArgType {
    Bool = 0,
    Int = 1,
    Float = 2,
    String = 3,
    BoolArray = 4,
    IntArray = 5,
    FloatArray = 6,
    StringArray = 7,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ClimateMode {
    Off = 0,
    Auto = 1,
    Cool = 2,
    Heat = 3,
    FanOnly = 4,
    Dry = 5,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ClimateFanMode {
    On = 0,
    Off = 1,
    Auto = 2,
    Low = 3,
    Medium = 4,
    High = 5,
    Middle = 6,
    Focus = 7,
    Diffuse = 8,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ClimateSwingMode {
    Off = 0,
    Both = 1,
    Vertical = 2,
    Horizontal = 3,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ClimateAction {
    Off = 0,
    Cooling = 2,
    Heating = 3,
}

// ---- Connection ------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    pub client_info: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HelloResponse {
    #[prost(uint32, tag = "1")]
    pub api_version_major: u32,
    #[prost(uint32, tag = "2")]
    pub api_version_minor: u32,
    #[prost(string, tag = "3")]
    pub server_info: String,
}

/// Carries the API password in plaintext; redacted in debug output.
#[derive(Clone, PartialEq, prost::Message)]
#[prost(skip_debug)]
pub struct ConnectRequest {
    #[prost(string, tag = "1")]
    pub password: String,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field(
                "password",
                &format_args!("<redacted:{} bytes>", self.password.len()),
            )
            .finish()
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectResponse {
    #[prost(bool, tag = "1")]
    pub invalid_password: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DisconnectRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DisconnectResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PingRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PingResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceInfoRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceInfoResponse {
    #[prost(bool, tag = "1")]
    pub uses_password: bool,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub mac_address: String,
    #[prost(string, tag = "4")]
    pub esphome_version: String,
    #[prost(string, tag = "5")]
    pub compilation_time: String,
    #[prost(string, tag = "6")]
    pub model: String,
    #[prost(bool, tag = "7")]
    pub has_deep_sleep: bool,
}

// ---- Entity enumeration ----------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesBinarySensorResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub device_class: String,
    #[prost(bool, tag = "6")]
    pub is_status_binary_sensor: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesCoverResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(bool, tag = "5")]
    pub assumed_state: bool,
    #[prost(bool, tag = "6")]
    pub supports_position: bool,
    #[prost(bool, tag = "7")]
    pub supports_tilt: bool,
    #[prost(string, tag = "8")]
    pub device_class: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesFanResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(bool, tag = "5")]
    pub supports_oscillation: bool,
    #[prost(bool, tag = "6")]
    pub supports_speed: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesLightResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(bool, tag = "5")]
    pub supports_brightness: bool,
    #[prost(bool, tag = "6")]
    pub supports_rgb: bool,
    #[prost(bool, tag = "7")]
    pub supports_white_value: bool,
    #[prost(bool, tag = "8")]
    pub supports_color_temperature: bool,
    #[prost(float, tag = "9")]
    pub min_mireds: f32,
    #[prost(float, tag = "10")]
    pub max_mireds: f32,
    #[prost(string, repeated, tag = "11")]
    pub effects: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesSensorResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub icon: String,
    #[prost(string, tag = "6")]
    pub unit_of_measurement: String,
    #[prost(int32, tag = "7")]
    pub accuracy_decimals: i32,
    #[prost(bool, tag = "8")]
    pub force_update: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesSwitchResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub icon: String,
    #[prost(bool, tag = "6")]
    pub assumed_state: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesTextSensorResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub icon: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesDoneResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesServicesArgument {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "ServiceArgType", tag = "2")]
    pub r#type: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesServicesResponse {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(message, repeated, tag = "3")]
    pub args: Vec<ListEntitiesServicesArgument>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesCameraResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListEntitiesClimateResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(bool, tag = "5")]
    pub supports_current_temperature: bool,
    #[prost(bool, tag = "6")]
    pub supports_two_point_target_temperature: bool,
    #[prost(enumeration = "ClimateMode", repeated, tag = "7")]
    pub supported_modes: Vec<i32>,
    #[prost(float, tag = "8")]
    pub visual_min_temperature: f32,
    #[prost(float, tag = "9")]
    pub visual_max_temperature: f32,
    #[prost(float, tag = "10")]
    pub visual_temperature_step: f32,
    #[prost(bool, tag = "11")]
    pub supports_away: bool,
    #[prost(bool, tag = "12")]
    pub supports_action: bool,
    #[prost(enumeration = "ClimateFanMode", repeated, tag = "13")]
    pub supported_fan_modes: Vec<i32>,
    #[prost(enumeration = "ClimateSwingMode", repeated, tag = "14")]
    pub supported_swing_modes: Vec<i32>,
}

// ---- State updates ---------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeStatesRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BinarySensorStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub state: bool,
    #[prost(bool, tag = "3")]
    pub missing_state: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CoverStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(enumeration = "LegacyCoverState", tag = "2")]
    pub legacy_state: i32,
    #[prost(float, tag = "3")]
    pub position: f32,
    #[prost(float, tag = "4")]
    pub tilt: f32,
    #[prost(enumeration = "CoverOperation", tag = "5")]
    pub current_operation: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FanStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub state: bool,
    #[prost(bool, tag = "3")]
    pub oscillating: bool,
    #[prost(enumeration = "FanSpeed", tag = "4")]
    pub speed: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LightStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub state: bool,
    #[prost(float, tag = "3")]
    pub brightness: f32,
    #[prost(float, tag = "4")]
    pub red: f32,
    #[prost(float, tag = "5")]
    pub green: f32,
    #[prost(float, tag = "6")]
    pub blue: f32,
    #[prost(float, tag = "7")]
    pub white: f32,
    #[prost(float, tag = "8")]
    pub color_temperature: f32,
    #[prost(string, tag = "9")]
    pub effect: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SensorStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(float, tag = "2")]
    pub state: f32,
    #[prost(bool, tag = "3")]
    pub missing_state: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SwitchStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub state: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TextSensorStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(string, tag = "2")]
    pub state: String,
    #[prost(bool, tag = "3")]
    pub missing_state: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClimateStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(enumeration = "ClimateMode", tag = "2")]
    pub mode: i32,
    #[prost(float, tag = "3")]
    pub current_temperature: f32,
    #[prost(float, tag = "4")]
    pub target_temperature: f32,
    #[prost(float, tag = "5")]
    pub target_temperature_low: f32,
    #[prost(float, tag = "6")]
    pub target_temperature_high: f32,
    #[prost(bool, tag = "7")]
    pub away: bool,
    #[prost(enumeration = "ClimateAction", tag = "8")]
    pub action: i32,
    #[prost(enumeration = "ClimateFanMode", tag = "9")]
    pub fan_mode: i32,
    #[prost(enumeration = "ClimateSwingMode", tag = "10")]
    pub swing_mode: i32,
}

// ---- Logs ------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeLogsRequest {
    #[prost(enumeration = "LogLevel", tag = "1")]
    pub level: i32,
    #[prost(bool, tag = "2")]
    pub dump_config: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeLogsResponse {
    #[prost(enumeration = "LogLevel", tag = "1")]
    pub level: i32,
    #[prost(string, tag = "2")]
    pub tag: String,
    #[prost(string, tag = "3")]
    pub message: String,
    #[prost(bool, tag = "4")]
    pub send_failed: bool,
}

// ---- Commands --------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct CoverCommandRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub has_legacy_command: bool,
    #[prost(enumeration = "LegacyCoverCommand", tag = "3")]
    pub legacy_command: i32,
    #[prost(bool, tag = "4")]
    pub has_position: bool,
    #[prost(float, tag = "5")]
    pub position: f32,
    #[prost(bool, tag = "6")]
    pub has_tilt: bool,
    #[prost(float, tag = "7")]
    pub tilt: f32,
    #[prost(bool, tag = "8")]
    pub stop: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FanCommandRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub has_state: bool,
    #[prost(bool, tag = "3")]
    pub state: bool,
    #[prost(bool, tag = "4")]
    pub has_speed: bool,
    #[prost(enumeration = "FanSpeed", tag = "5")]
    pub speed: i32,
    #[prost(bool, tag = "6")]
    pub has_oscillating: bool,
    #[prost(bool, tag = "7")]
    pub oscillating: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LightCommandRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub has_state: bool,
    #[prost(bool, tag = "3")]
    pub state: bool,
    #[prost(bool, tag = "4")]
    pub has_brightness: bool,
    #[prost(float, tag = "5")]
    pub brightness: f32,
    #[prost(bool, tag = "6")]
    pub has_rgb: bool,
    #[prost(float, tag = "7")]
    pub red: f32,
    #[prost(float, tag = "8")]
    pub green: f32,
    #[prost(float, tag = "9")]
    pub blue: f32,
    #[prost(bool, tag = "10")]
    pub has_white: bool,
    #[prost(float, tag = "11")]
    pub white: f32,
    #[prost(bool, tag = "12")]
    pub has_color_temperature: bool,
    #[prost(float, tag = "13")]
    pub color_temperature: f32,
    #[prost(bool, tag = "14")]
    pub has_transition_length: bool,
    #[prost(uint32, tag = "15")]
    pub transition_length: u32,
    #[prost(bool, tag = "16")]
    pub has_flash_length: bool,
    #[prost(uint32, tag = "17")]
    pub flash_length: u32,
    #[prost(bool, tag = "18")]
    pub has_effect: bool,
    #[prost(string, tag = "19")]
    pub effect: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SwitchCommandRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub state: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClimateCommandRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub has_mode: bool,
    #[prost(enumeration = "ClimateMode", tag = "3")]
    pub mode: i32,
    #[prost(bool, tag = "4")]
    pub has_target_temperature: bool,
    #[prost(float, tag = "5")]
    pub target_temperature: f32,
    #[prost(bool, tag = "6")]
    pub has_target_temperature_low: bool,
    #[prost(float, tag = "7")]
    pub target_temperature_low: f32,
    #[prost(bool, tag = "8")]
    pub has_target_temperature_high: bool,
    #[prost(float, tag = "9")]
    pub target_temperature_high: f32,
    #[prost(bool, tag = "10")]
    pub has_away: bool,
    #[prost(bool, tag = "11")]
    pub away: bool,
    #[prost(bool, tag = "12")]
    pub has_fan_mode: bool,
    #[prost(enumeration = "ClimateFanMode", tag = "13")]
    pub fan_mode: i32,
    #[prost(bool, tag = "14")]
    pub has_swing_mode: bool,
    #[prost(enumeration = "ClimateSwingMode", tag = "15")]
    pub swing_mode: i32,
}

// ---- Home Assistant bridging -----------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeHomeassistantServicesRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HomeassistantServiceMap {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HomeassistantServiceResponse {
    #[prost(string, tag = "1")]
    pub service: String,
    #[prost(message, repeated, tag = "2")]
    pub data: Vec<HomeassistantServiceMap>,
    #[prost(message, repeated, tag = "3")]
    pub data_template: Vec<HomeassistantServiceMap>,
    #[prost(message, repeated, tag = "4")]
    pub variables: Vec<HomeassistantServiceMap>,
    #[prost(bool, tag = "5")]
    pub is_event: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeHomeAssistantStatesRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeHomeAssistantStateResponse {
    #[prost(string, tag = "1")]
    pub entity_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HomeAssistantStateResponse {
    #[prost(string, tag = "1")]
    pub entity_id: String,
    #[prost(string, tag = "2")]
    pub state: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExecuteServiceArgument {
    #[prost(bool, tag = "1")]
    pub bool_: bool,
    #[prost(int32, tag = "2")]
    pub legacy_int: i32,
    #[prost(float, tag = "3")]
    pub float_: f32,
    #[prost(string, tag = "4")]
    pub string_: String,
    #[prost(sint32, tag = "5")]
    pub int_: i32,
    #[prost(bool, repeated, packed = "false", tag = "6")]
    pub bool_array: Vec<bool>,
    #[prost(sint32, repeated, packed = "false", tag = "7")]
    pub int_array: Vec<i32>,
    #[prost(float, repeated, packed = "false", tag = "8")]
    pub float_array: Vec<f32>,
    #[prost(string, repeated, tag = "9")]
    pub string_array: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExecuteServiceRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(message, repeated, tag = "2")]
    pub args: Vec<ExecuteServiceArgument>,
}

// ---- Time ------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetTimeRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetTimeResponse {
    #[prost(fixed32, tag = "1")]
    pub epoch_seconds: u32,
}

// ---- Camera ----------------------------------------------------------------

/// One chunk of a camera image. `done` marks the last chunk of a frame.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CameraImageResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub done: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CameraImageRequest {
    #[prost(bool, tag = "1")]
    pub single: bool,
    #[prost(bool, tag = "2")]
    pub stream: bool,
}
