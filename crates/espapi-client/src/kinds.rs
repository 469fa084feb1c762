//! The entity kinds a device can expose.
//!
//! Each kind is a marker type implementing [`EntityKind`], plus its
//! capabilities (from the enumeration description), its state (from push
//! updates) and the field changes subscribers receive.

use std::convert::Infallible;
use std::time::SystemTime;

use espapi_frame::proto::{
    self, ClimateAction, ClimateFanMode, ClimateMode, ClimateSwingMode, CoverOperation, FanSpeed,
    LegacyCoverState,
};
use serde::Serialize;

use crate::entity::{float_changed, EntityInfo, EntityKind};

macro_rules! info_from {
    ($($description:ty),+ $(,)?) => {
        $(
            impl From<&$description> for EntityInfo {
                fn from(description: &$description) -> Self {
                    EntityInfo {
                        key: description.key,
                        object_id: description.object_id.clone(),
                        unique_id: description.unique_id.clone(),
                        name: description.name.clone(),
                    }
                }
            }
        )+
    };
}

info_from!(
    proto::ListEntitiesBinarySensorResponse,
    proto::ListEntitiesCameraResponse,
    proto::ListEntitiesClimateResponse,
    proto::ListEntitiesCoverResponse,
    proto::ListEntitiesFanResponse,
    proto::ListEntitiesLightResponse,
    proto::ListEntitiesSensorResponse,
    proto::ListEntitiesSwitchResponse,
    proto::ListEntitiesTextSensorResponse,
);

fn decode_enum<E: TryFrom<i32> + Default>(raw: i32) -> E {
    E::try_from(raw).unwrap_or_default()
}

fn decode_enums<E: TryFrom<i32>>(raw: &[i32]) -> Vec<E> {
    raw.iter().filter_map(|value| E::try_from(*value).ok()).collect()
}

// ---- Binary sensor ---------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct BinarySensor;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BinarySensorCapabilities {
    pub device_class: String,
    pub is_status_binary_sensor: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BinarySensorState {
    pub on: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinarySensorChange {
    State(bool),
}

impl EntityKind for BinarySensor {
    type Capabilities = BinarySensorCapabilities;
    type State = BinarySensorState;
    type Change = BinarySensorChange;

    const LABEL: &'static str = "binary sensor";

    fn changes(old: &Self::State, new: &Self::State, all: bool) -> Vec<Self::Change> {
        let mut changes = Vec::new();
        if all || old.on != new.on {
            changes.push(BinarySensorChange::State(new.on));
        }
        changes
    }
}

impl From<&proto::ListEntitiesBinarySensorResponse> for BinarySensorCapabilities {
    fn from(description: &proto::ListEntitiesBinarySensorResponse) -> Self {
        Self {
            device_class: description.device_class.clone(),
            is_status_binary_sensor: description.is_status_binary_sensor,
        }
    }
}

impl From<&proto::BinarySensorStateResponse> for BinarySensorState {
    fn from(update: &proto::BinarySensorStateResponse) -> Self {
        Self { on: update.state }
    }
}

// ---- Camera ----------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Camera;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CameraState {
    /// When the last complete frame was assembled.
    pub last_frame: Option<SystemTime>,
}

impl EntityKind for Camera {
    type Capabilities = ();
    type State = CameraState;
    type Change = Infallible;

    const LABEL: &'static str = "camera";

    fn changes(_old: &Self::State, _new: &Self::State, _all: bool) -> Vec<Self::Change> {
        Vec::new()
    }
}

// ---- Climate ---------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Climate;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClimateCapabilities {
    pub supports_current_temperature: bool,
    pub supports_two_point_target_temperature: bool,
    pub supported_modes: Vec<ClimateMode>,
    pub visual_min_temperature: f32,
    pub visual_max_temperature: f32,
    pub visual_temperature_step: f32,
    pub supports_away: bool,
    pub supports_action: bool,
    pub supported_fan_modes: Vec<ClimateFanMode>,
    pub supported_swing_modes: Vec<ClimateSwingMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClimateState {
    pub mode: ClimateMode,
    pub current_temperature: f32,
    pub target_temperature: f32,
    pub target_temperature_low: f32,
    pub target_temperature_high: f32,
    pub away: bool,
    pub action: ClimateAction,
    pub fan_mode: ClimateFanMode,
    pub swing_mode: ClimateSwingMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClimateChange {
    Mode(ClimateMode),
    CurrentTemperature(f32),
    TargetTemperature(f32),
    TargetTemperatureRange { low: f32, high: f32 },
    Away(bool),
    Action(ClimateAction),
    FanMode(ClimateFanMode),
    SwingMode(ClimateSwingMode),
}

impl EntityKind for Climate {
    type Capabilities = ClimateCapabilities;
    type State = ClimateState;
    type Change = ClimateChange;

    const LABEL: &'static str = "climate";

    fn changes(old: &Self::State, new: &Self::State, all: bool) -> Vec<Self::Change> {
        let mut changes = Vec::new();
        if all || old.mode != new.mode {
            changes.push(ClimateChange::Mode(new.mode));
        }
        if all || float_changed(old.current_temperature, new.current_temperature) {
            changes.push(ClimateChange::CurrentTemperature(new.current_temperature));
        }
        if all || float_changed(old.target_temperature, new.target_temperature) {
            changes.push(ClimateChange::TargetTemperature(new.target_temperature));
        }
        if all
            || float_changed(old.target_temperature_low, new.target_temperature_low)
            || float_changed(old.target_temperature_high, new.target_temperature_high)
        {
            changes.push(ClimateChange::TargetTemperatureRange {
                low: new.target_temperature_low,
                high: new.target_temperature_high,
            });
        }
        if all || old.away != new.away {
            changes.push(ClimateChange::Away(new.away));
        }
        if all || old.action != new.action {
            changes.push(ClimateChange::Action(new.action));
        }
        if all || old.fan_mode != new.fan_mode {
            changes.push(ClimateChange::FanMode(new.fan_mode));
        }
        if all || old.swing_mode != new.swing_mode {
            changes.push(ClimateChange::SwingMode(new.swing_mode));
        }
        changes
    }
}

impl From<&proto::ListEntitiesClimateResponse> for ClimateCapabilities {
    fn from(description: &proto::ListEntitiesClimateResponse) -> Self {
        Self {
            supports_current_temperature: description.supports_current_temperature,
            supports_two_point_target_temperature: description
                .supports_two_point_target_temperature,
            supported_modes: decode_enums(&description.supported_modes),
            visual_min_temperature: description.visual_min_temperature,
            visual_max_temperature: description.visual_max_temperature,
            visual_temperature_step: description.visual_temperature_step,
            supports_away: description.supports_away,
            supports_action: description.supports_action,
            supported_fan_modes: decode_enums(&description.supported_fan_modes),
            supported_swing_modes: decode_enums(&description.supported_swing_modes),
        }
    }
}

impl From<&proto::ClimateStateResponse> for ClimateState {
    fn from(update: &proto::ClimateStateResponse) -> Self {
        Self {
            mode: decode_enum(update.mode),
            current_temperature: update.current_temperature,
            target_temperature: update.target_temperature,
            target_temperature_low: update.target_temperature_low,
            target_temperature_high: update.target_temperature_high,
            away: update.away,
            action: decode_enum(update.action),
            fan_mode: decode_enum(update.fan_mode),
            swing_mode: decode_enum(update.swing_mode),
        }
    }
}

// ---- Cover -----------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Cover;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverCapabilities {
    pub assumed_state: bool,
    pub supports_position: bool,
    pub supports_tilt: bool,
    pub device_class: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverState {
    pub legacy_state: LegacyCoverState,
    /// 0.0 is closed, 1.0 fully open.
    pub position: f32,
    pub tilt: f32,
    pub current_operation: CoverOperation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoverChange {
    LegacyState(LegacyCoverState),
    Position(f32),
    Tilt(f32),
    Operation(CoverOperation),
}

impl EntityKind for Cover {
    type Capabilities = CoverCapabilities;
    type State = CoverState;
    type Change = CoverChange;

    const LABEL: &'static str = "cover";

    fn changes(old: &Self::State, new: &Self::State, all: bool) -> Vec<Self::Change> {
        let mut changes = Vec::new();
        if all || old.legacy_state != new.legacy_state {
            changes.push(CoverChange::LegacyState(new.legacy_state));
        }
        if all || float_changed(old.position, new.position) {
            changes.push(CoverChange::Position(new.position));
        }
        if all || float_changed(old.tilt, new.tilt) {
            changes.push(CoverChange::Tilt(new.tilt));
        }
        if all || old.current_operation != new.current_operation {
            changes.push(CoverChange::Operation(new.current_operation));
        }
        changes
    }
}

impl From<&proto::ListEntitiesCoverResponse> for CoverCapabilities {
    fn from(description: &proto::ListEntitiesCoverResponse) -> Self {
        Self {
            assumed_state: description.assumed_state,
            supports_position: description.supports_position,
            supports_tilt: description.supports_tilt,
            device_class: description.device_class.clone(),
        }
    }
}

impl From<&proto::CoverStateResponse> for CoverState {
    fn from(update: &proto::CoverStateResponse) -> Self {
        Self {
            legacy_state: decode_enum(update.legacy_state),
            position: update.position,
            tilt: update.tilt,
            current_operation: decode_enum(update.current_operation),
        }
    }
}

// ---- Fan -------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Fan;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanCapabilities {
    pub supports_oscillation: bool,
    pub supports_speed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanState {
    pub on: bool,
    pub oscillating: bool,
    pub speed: FanSpeed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanChange {
    State(bool),
    Oscillating(bool),
    Speed(FanSpeed),
}

impl EntityKind for Fan {
    type Capabilities = FanCapabilities;
    type State = FanState;
    type Change = FanChange;

    const LABEL: &'static str = "fan";

    fn changes(old: &Self::State, new: &Self::State, all: bool) -> Vec<Self::Change> {
        let mut changes = Vec::new();
        if all || old.on != new.on {
            changes.push(FanChange::State(new.on));
        }
        if all || old.oscillating != new.oscillating {
            changes.push(FanChange::Oscillating(new.oscillating));
        }
        if all || old.speed != new.speed {
            changes.push(FanChange::Speed(new.speed));
        }
        changes
    }
}

impl From<&proto::ListEntitiesFanResponse> for FanCapabilities {
    fn from(description: &proto::ListEntitiesFanResponse) -> Self {
        Self {
            supports_oscillation: description.supports_oscillation,
            supports_speed: description.supports_speed,
        }
    }
}

impl From<&proto::FanStateResponse> for FanState {
    fn from(update: &proto::FanStateResponse) -> Self {
        Self {
            on: update.state,
            oscillating: update.oscillating,
            speed: decode_enum(update.speed),
        }
    }
}

// ---- Light -----------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Light;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LightCapabilities {
    pub supports_brightness: bool,
    pub supports_rgb: bool,
    pub supports_white_value: bool,
    pub supports_color_temperature: bool,
    pub min_mireds: f32,
    pub max_mireds: f32,
    pub effects: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LightState {
    pub on: bool,
    pub brightness: f32,
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub white: f32,
    pub color_temperature: f32,
    pub effect: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LightChange {
    State(bool),
    Brightness(f32),
    Color { red: f32, green: f32, blue: f32 },
    White(f32),
    ColorTemperature(f32),
    Effect(String),
}

impl EntityKind for Light {
    type Capabilities = LightCapabilities;
    type State = LightState;
    type Change = LightChange;

    const LABEL: &'static str = "light";

    fn changes(old: &Self::State, new: &Self::State, all: bool) -> Vec<Self::Change> {
        let mut changes = Vec::new();
        if all || old.on != new.on {
            changes.push(LightChange::State(new.on));
        }
        if all || float_changed(old.brightness, new.brightness) {
            changes.push(LightChange::Brightness(new.brightness));
        }
        if all
            || float_changed(old.red, new.red)
            || float_changed(old.green, new.green)
            || float_changed(old.blue, new.blue)
        {
            changes.push(LightChange::Color {
                red: new.red,
                green: new.green,
                blue: new.blue,
            });
        }
        if all || float_changed(old.white, new.white) {
            changes.push(LightChange::White(new.white));
        }
        if all || float_changed(old.color_temperature, new.color_temperature) {
            changes.push(LightChange::ColorTemperature(new.color_temperature));
        }
        if all || old.effect != new.effect {
            changes.push(LightChange::Effect(new.effect.clone()));
        }
        changes
    }
}

impl From<&proto::ListEntitiesLightResponse> for LightCapabilities {
    fn from(description: &proto::ListEntitiesLightResponse) -> Self {
        Self {
            supports_brightness: description.supports_brightness,
            supports_rgb: description.supports_rgb,
            supports_white_value: description.supports_white_value,
            supports_color_temperature: description.supports_color_temperature,
            min_mireds: description.min_mireds,
            max_mireds: description.max_mireds,
            effects: description.effects.clone(),
        }
    }
}

impl From<&proto::LightStateResponse> for LightState {
    fn from(update: &proto::LightStateResponse) -> Self {
        Self {
            on: update.state,
            brightness: update.brightness,
            red: update.red,
            green: update.green,
            blue: update.blue,
            white: update.white,
            color_temperature: update.color_temperature,
            effect: update.effect.clone(),
        }
    }
}

// ---- Sensor ----------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Sensor;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SensorCapabilities {
    pub icon: String,
    pub unit_of_measurement: String,
    pub accuracy_decimals: i32,
    pub force_update: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorState {
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorChange {
    Value(f32),
}

impl EntityKind for Sensor {
    type Capabilities = SensorCapabilities;
    type State = SensorState;
    type Change = SensorChange;

    const LABEL: &'static str = "sensor";

    fn changes(old: &Self::State, new: &Self::State, all: bool) -> Vec<Self::Change> {
        if all || float_changed(old.value, new.value) {
            vec![SensorChange::Value(new.value)]
        } else {
            Vec::new()
        }
    }
}

impl From<&proto::ListEntitiesSensorResponse> for SensorCapabilities {
    fn from(description: &proto::ListEntitiesSensorResponse) -> Self {
        Self {
            icon: description.icon.clone(),
            unit_of_measurement: description.unit_of_measurement.clone(),
            accuracy_decimals: description.accuracy_decimals,
            force_update: description.force_update,
        }
    }
}

impl From<&proto::SensorStateResponse> for SensorState {
    fn from(update: &proto::SensorStateResponse) -> Self {
        Self {
            value: update.state,
        }
    }
}

// ---- Switch ----------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Switch;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwitchCapabilities {
    pub icon: String,
    pub assumed_state: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwitchState {
    pub on: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchChange {
    State(bool),
}

impl EntityKind for Switch {
    type Capabilities = SwitchCapabilities;
    type State = SwitchState;
    type Change = SwitchChange;

    const LABEL: &'static str = "switch";

    fn changes(old: &Self::State, new: &Self::State, all: bool) -> Vec<Self::Change> {
        if all || old.on != new.on {
            vec![SwitchChange::State(new.on)]
        } else {
            Vec::new()
        }
    }
}

impl From<&proto::ListEntitiesSwitchResponse> for SwitchCapabilities {
    fn from(description: &proto::ListEntitiesSwitchResponse) -> Self {
        Self {
            icon: description.icon.clone(),
            assumed_state: description.assumed_state,
        }
    }
}

impl From<&proto::SwitchStateResponse> for SwitchState {
    fn from(update: &proto::SwitchStateResponse) -> Self {
        Self { on: update.state }
    }
}

// ---- Text sensor -----------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct TextSensor;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextSensorCapabilities {
    pub icon: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextSensorState {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSensorChange {
    Value(String),
}

impl EntityKind for TextSensor {
    type Capabilities = TextSensorCapabilities;
    type State = TextSensorState;
    type Change = TextSensorChange;

    const LABEL: &'static str = "text sensor";

    fn changes(old: &Self::State, new: &Self::State, all: bool) -> Vec<Self::Change> {
        if all || old.value != new.value {
            vec![TextSensorChange::Value(new.value.clone())]
        } else {
            Vec::new()
        }
    }
}

impl From<&proto::ListEntitiesTextSensorResponse> for TextSensorCapabilities {
    fn from(description: &proto::ListEntitiesTextSensorResponse) -> Self {
        Self {
            icon: description.icon.clone(),
        }
    }
}

impl From<&proto::TextSensorStateResponse> for TextSensorState {
    fn from(update: &proto::TextSensorStateResponse) -> Self {
        Self {
            value: update.state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_color_reports_as_one_change() {
        let old = LightState {
            on: true,
            red: 1.0,
            ..Default::default()
        };
        let new = LightState {
            on: true,
            red: 0.5,
            blue: 0.5,
            ..Default::default()
        };

        assert_eq!(
            Light::changes(&old, &new, false),
            vec![LightChange::Color {
                red: 0.5,
                green: 0.0,
                blue: 0.5
            }]
        );
    }

    #[test]
    fn all_reports_every_field() {
        let state = FanState::default();
        assert_eq!(Fan::changes(&state, &state, true).len(), 3);
        assert!(Fan::changes(&state, &state, false).is_empty());
        let climate = ClimateState::default();
        assert_eq!(Climate::changes(&climate, &climate, true).len(), 8);
    }

    #[test]
    fn unknown_enum_values_fall_back_to_default() {
        let update = proto::FanStateResponse {
            key: 1,
            state: true,
            oscillating: false,
            speed: 42,
        };
        assert_eq!(FanState::from(&update).speed, FanSpeed::Low);
    }

    #[test]
    fn climate_capabilities_skip_unknown_modes() {
        let description = proto::ListEntitiesClimateResponse {
            supported_modes: vec![0, 3, 99],
            ..Default::default()
        };
        let capabilities = ClimateCapabilities::from(&description);
        assert_eq!(
            capabilities.supported_modes,
            vec![ClimateMode::Off, ClimateMode::Heat]
        );
    }

    #[test]
    fn sensor_description_copies_icon_and_unit() {
        let description = proto::ListEntitiesSensorResponse {
            icon: "mdi:thermometer".into(),
            unit_of_measurement: "°C".into(),
            accuracy_decimals: 1,
            ..Default::default()
        };
        let capabilities = SensorCapabilities::from(&description);
        assert_eq!(capabilities.icon, "mdi:thermometer");
        assert_eq!(capabilities.unit_of_measurement, "°C");
    }

    #[test]
    fn cover_position_change_uses_epsilon() {
        let old = CoverState {
            position: 0.5,
            ..Default::default()
        };
        let nudged = CoverState {
            position: 0.5 + 1e-7,
            ..Default::default()
        };
        assert!(Cover::changes(&old, &nudged, false).is_empty());
    }
}
