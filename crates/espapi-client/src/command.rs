//! Commands for controllable entities.
//!
//! Every command starts from the entity's cached state, so fields the caller
//! does not touch are sent back unchanged. Commands are fire-and-forget: the
//! device confirms by pushing a state update.

use std::time::Duration;

use espapi_frame::proto::{
    self, ClimateFanMode, ClimateMode, ClimateSwingMode, FanSpeed, LegacyCoverCommand,
};
use tracing::debug;

use crate::entity::{Entity, EntityKind};
use crate::error::{ClientError, Result};
use crate::kinds::{Climate, Cover, Fan, Light, Switch};

fn unsupported<K: EntityKind>(entity: &Entity<K>, feature: &str) -> ClientError {
    ClientError::Unsupported(format!(
        "{} '{}' does not support {feature}",
        K::LABEL,
        entity.object_id()
    ))
}

fn require<K: EntityKind>(entity: &Entity<K>, supported: bool, feature: &str) -> Result<()> {
    if supported {
        Ok(())
    } else {
        Err(unsupported(entity, feature))
    }
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

// ---- Light -----------------------------------------------------------------

/// Builder for a light command. Obtain one with [`Entity::command`].
#[must_use = "a light command does nothing until sent"]
#[derive(Debug)]
pub struct LightCommand<'a> {
    light: &'a Entity<Light>,
    request: proto::LightCommandRequest,
    error: Option<ClientError>,
}

impl<'a> LightCommand<'a> {
    fn new(light: &'a Entity<Light>) -> Self {
        let capabilities = light.capabilities();
        let state = light.state();
        let request = proto::LightCommandRequest {
            key: light.key(),
            has_state: true,
            state: state.on,
            has_brightness: capabilities.supports_brightness,
            brightness: state.brightness,
            has_rgb: capabilities.supports_rgb,
            red: state.red,
            green: state.green,
            blue: state.blue,
            has_white: capabilities.supports_white_value,
            white: state.white,
            has_color_temperature: capabilities.supports_color_temperature,
            color_temperature: state.color_temperature,
            ..Default::default()
        };
        Self {
            light,
            request,
            error: None,
        }
    }

    fn check(&mut self, supported: bool, feature: &str) -> bool {
        if !supported && self.error.is_none() {
            self.error = Some(unsupported(self.light, feature));
        }
        supported
    }

    pub fn state(mut self, on: bool) -> Self {
        self.request.state = on;
        self
    }

    /// Brightness from 0.0 to 1.0.
    pub fn brightness(mut self, brightness: f32) -> Self {
        if self.check(self.light.capabilities().supports_brightness, "brightness") {
            self.request.brightness = brightness;
        }
        self
    }

    pub fn color(mut self, red: f32, green: f32, blue: f32) -> Self {
        if self.check(self.light.capabilities().supports_rgb, "rgb color") {
            self.request.red = red;
            self.request.green = green;
            self.request.blue = blue;
        }
        self
    }

    pub fn white(mut self, white: f32) -> Self {
        if self.check(self.light.capabilities().supports_white_value, "white value") {
            self.request.white = white;
        }
        self
    }

    /// Color temperature in mireds.
    pub fn color_temperature(mut self, mireds: f32) -> Self {
        let supported = self.light.capabilities().supports_color_temperature;
        if self.check(supported, "color temperature") {
            self.request.color_temperature = mireds;
        }
        self
    }

    pub fn effect(mut self, effect: impl Into<String>) -> Self {
        let effect = effect.into();
        let known = self
            .light
            .capabilities()
            .effects
            .iter()
            .any(|name| *name == effect);
        if self.check(known, &format!("effect '{effect}'")) {
            self.request.has_effect = true;
            self.request.effect = effect;
        }
        self
    }

    pub fn transition(mut self, length: Duration) -> Self {
        self.request.has_transition_length = true;
        self.request.transition_length = millis(length);
        self
    }

    pub fn flash(mut self, length: Duration) -> Self {
        self.request.has_flash_length = true;
        self.request.flash_length = millis(length);
        self
    }

    /// The request as it would go on the wire.
    pub fn build(self) -> Result<proto::LightCommandRequest> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.request),
        }
    }

    pub fn send(self) -> Result<()> {
        let light = self.light;
        let request = self.build()?;
        debug!(key = request.key, state = request.state, "light command");
        light.send(request)
    }
}

impl Entity<Light> {
    /// Start a command from the light's current state.
    pub fn command(&self) -> LightCommand<'_> {
        LightCommand::new(self)
    }

    pub fn set_state(&self, on: bool) -> Result<()> {
        self.command().state(on).send()
    }

    pub fn set_brightness(&self, brightness: f32) -> Result<()> {
        self.command().brightness(brightness).send()
    }

    pub fn set_color(&self, red: f32, green: f32, blue: f32) -> Result<()> {
        self.command().color(red, green, blue).send()
    }

    pub fn set_white(&self, white: f32) -> Result<()> {
        self.command().white(white).send()
    }

    pub fn set_color_temperature(&self, mireds: f32) -> Result<()> {
        self.command().color_temperature(mireds).send()
    }

    pub fn set_effect(&self, effect: impl Into<String>) -> Result<()> {
        self.command().effect(effect).send()
    }
}

// ---- Switch ----------------------------------------------------------------

impl Entity<Switch> {
    pub fn set_state(&self, on: bool) -> Result<()> {
        debug!(key = self.key(), on, "switch command");
        self.send(proto::SwitchCommandRequest {
            key: self.key(),
            state: on,
        })
    }
}

// ---- Fan -------------------------------------------------------------------

impl Entity<Fan> {
    fn fan_request(&self) -> proto::FanCommandRequest {
        let state = self.state();
        proto::FanCommandRequest {
            key: self.key(),
            has_state: true,
            state: state.on,
            ..Default::default()
        }
    }

    pub fn set_state(&self, on: bool) -> Result<()> {
        self.send(proto::FanCommandRequest {
            state: on,
            ..self.fan_request()
        })
    }

    pub fn set_speed(&self, speed: FanSpeed) -> Result<()> {
        self.send(self.speed_request(speed)?)
    }

    pub fn set_oscillating(&self, oscillating: bool) -> Result<()> {
        self.send(self.oscillation_request(oscillating)?)
    }

    pub(crate) fn speed_request(&self, speed: FanSpeed) -> Result<proto::FanCommandRequest> {
        require(self, self.capabilities().supports_speed, "speed")?;
        Ok(proto::FanCommandRequest {
            has_speed: true,
            speed: speed as i32,
            ..self.fan_request()
        })
    }

    pub(crate) fn oscillation_request(&self, oscillating: bool) -> Result<proto::FanCommandRequest> {
        require(self, self.capabilities().supports_oscillation, "oscillation")?;
        Ok(proto::FanCommandRequest {
            has_oscillating: true,
            oscillating,
            ..self.fan_request()
        })
    }
}

// ---- Cover -----------------------------------------------------------------

impl Entity<Cover> {
    pub(crate) fn open_request(&self) -> proto::CoverCommandRequest {
        self.travel_request(1.0, LegacyCoverCommand::Open)
    }

    pub(crate) fn close_request(&self) -> proto::CoverCommandRequest {
        self.travel_request(0.0, LegacyCoverCommand::Close)
    }

    fn travel_request(&self, position: f32, legacy: LegacyCoverCommand) -> proto::CoverCommandRequest {
        if self.capabilities().supports_position {
            proto::CoverCommandRequest {
                key: self.key(),
                has_position: true,
                position,
                ..Default::default()
            }
        } else {
            proto::CoverCommandRequest {
                key: self.key(),
                has_legacy_command: true,
                legacy_command: legacy as i32,
                ..Default::default()
            }
        }
    }

    pub(crate) fn stop_request(&self) -> proto::CoverCommandRequest {
        let legacy = !self.capabilities().supports_position;
        proto::CoverCommandRequest {
            key: self.key(),
            stop: true,
            has_legacy_command: legacy,
            legacy_command: if legacy {
                LegacyCoverCommand::Stop as i32
            } else {
                0
            },
            ..Default::default()
        }
    }

    pub fn open(&self) -> Result<()> {
        self.send(self.open_request())
    }

    pub fn close(&self) -> Result<()> {
        self.send(self.close_request())
    }

    pub fn stop(&self) -> Result<()> {
        self.send(self.stop_request())
    }

    /// Move to `position`, clamped to 0.0 (closed) through 1.0 (open).
    pub fn set_position(&self, position: f32) -> Result<()> {
        require(self, self.capabilities().supports_position, "position")?;
        self.send(proto::CoverCommandRequest {
            key: self.key(),
            has_position: true,
            position: position.clamp(0.0, 1.0),
            ..Default::default()
        })
    }

    /// Tilt to `tilt`, clamped to 0.0 through 1.0.
    pub fn set_tilt(&self, tilt: f32) -> Result<()> {
        require(self, self.capabilities().supports_tilt, "tilt")?;
        self.send(proto::CoverCommandRequest {
            key: self.key(),
            has_tilt: true,
            tilt: tilt.clamp(0.0, 1.0),
            ..Default::default()
        })
    }
}

// ---- Climate ---------------------------------------------------------------

impl Entity<Climate> {
    fn climate_request(&self) -> proto::ClimateCommandRequest {
        proto::ClimateCommandRequest {
            key: self.key(),
            ..Default::default()
        }
    }

    pub fn set_mode(&self, mode: ClimateMode) -> Result<()> {
        let supported = self.capabilities().supported_modes.contains(&mode);
        require(self, supported, &format!("mode {mode:?}"))?;
        self.send(proto::ClimateCommandRequest {
            has_mode: true,
            mode: mode as i32,
            ..self.climate_request()
        })
    }

    /// Single setpoint. Two-point devices take
    /// [`set_target_temperature_range`](Self::set_target_temperature_range).
    pub fn set_target_temperature(&self, temperature: f32) -> Result<()> {
        let single = !self.capabilities().supports_two_point_target_temperature;
        require(self, single, "a single target temperature")?;
        self.send(proto::ClimateCommandRequest {
            has_target_temperature: true,
            target_temperature: temperature,
            ..self.climate_request()
        })
    }

    pub fn set_target_temperature_range(&self, low: f32, high: f32) -> Result<()> {
        let two_point = self.capabilities().supports_two_point_target_temperature;
        require(self, two_point, "a target temperature range")?;
        self.send(proto::ClimateCommandRequest {
            has_target_temperature_low: true,
            target_temperature_low: low,
            has_target_temperature_high: true,
            target_temperature_high: high,
            ..self.climate_request()
        })
    }

    pub fn set_away(&self, away: bool) -> Result<()> {
        require(self, self.capabilities().supports_away, "away mode")?;
        self.send(proto::ClimateCommandRequest {
            has_away: true,
            away,
            ..self.climate_request()
        })
    }

    pub fn set_fan_mode(&self, fan_mode: ClimateFanMode) -> Result<()> {
        let supported = self.capabilities().supported_fan_modes.contains(&fan_mode);
        require(self, supported, &format!("fan mode {fan_mode:?}"))?;
        self.send(proto::ClimateCommandRequest {
            has_fan_mode: true,
            fan_mode: fan_mode as i32,
            ..self.climate_request()
        })
    }

    pub fn set_swing_mode(&self, swing_mode: ClimateSwingMode) -> Result<()> {
        let supported = self
            .capabilities()
            .supported_swing_modes
            .contains(&swing_mode);
        require(self, supported, &format!("swing mode {swing_mode:?}"))?;
        self.send(proto::ClimateCommandRequest {
            has_swing_mode: true,
            swing_mode: swing_mode as i32,
            ..self.climate_request()
        })
    }
}
