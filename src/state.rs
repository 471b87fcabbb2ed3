//! Canonical lantern configuration shared between controller and device
//!
//! One mutable `DeviceState` exists per session. Inbound protocol objects are
//! merged into it field-by-field; only keys from the canonical schema are
//! accepted, everything else is dropped so newer firmware can add fields
//! without breaking older controllers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// RGB triple as it appears on the wire: `[r, g, b]`, each 0-255
pub type Rgb = [u8; 3];

/// Animation mode the lantern is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightMode {
    Solid,
    Fade,
    Snake,
}

impl LightMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightMode::Solid => "solid",
            LightMode::Fade => "fade",
            LightMode::Snake => "snake",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "solid" => Some(LightMode::Solid),
            "fade" => Some(LightMode::Fade),
            "snake" => Some(LightMode::Snake),
            _ => None,
        }
    }
}

/// Coloring scheme for the snake animation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnakeColorMode {
    Single,
    Rainbow,
    Gradient,
}

impl SnakeColorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnakeColorMode::Single => "single",
            SnakeColorMode::Rainbow => "rainbow",
            SnakeColorMode::Gradient => "gradient",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(SnakeColorMode::Single),
            "rainbow" => Some(SnakeColorMode::Rainbow),
            "gradient" => Some(SnakeColorMode::Gradient),
            _ => None,
        }
    }
}

/// The lantern's animation configuration
///
/// The transient `save` flag is not part of this struct; it only exists on
/// outgoing payloads (see [`OutgoingState`]).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub mode: LightMode,

    pub solid_color: Rgb,
    /// Brightness 0-1
    pub solid_bright: f32,

    pub fade_color: Rgb,
    pub fade_color_2: Rgb,
    /// Blend between the two fade colors instead of dimming the first
    pub fade_use_2: bool,
    /// Brightness floor/ceiling of the fade cycle, min <= max, both 0-1
    pub fade_min: f32,
    pub fade_max: f32,
    pub fade_speed: f32,

    pub snake_color_mode: SnakeColorMode,
    pub snake_color_1: Rgb,
    pub snake_color_2: Rgb,
    /// Clockwise travel direction
    pub snake_cw: bool,
    pub snake_speed: f32,
}

impl Default for DeviceState {
    /// Factory defaults, matching what the firmware ships with
    fn default() -> Self {
        Self {
            mode: LightMode::Solid,
            solid_color: [255, 230, 0],
            solid_bright: 0.8,
            fade_color: [255, 200, 0],
            fade_color_2: [255, 220, 0],
            fade_use_2: true,
            fade_min: 0.1,
            fade_max: 0.9,
            fade_speed: 0.9,
            snake_color_mode: SnakeColorMode::Rainbow,
            snake_color_1: [255, 0, 0],
            snake_color_2: [0, 0, 255],
            snake_cw: true,
            snake_speed: 1.0,
        }
    }
}

impl DeviceState {
    /// Merge an inbound JSON object field-by-field
    ///
    /// Only keys from the canonical schema are applied. A value that does not
    /// deserialize to its field's type (wrong shape, channel out of 0-255,
    /// unknown enum string) is skipped without affecting sibling fields.
    /// Returns true when at least one field was accepted, so the caller knows
    /// to re-render.
    pub fn merge(&mut self, fields: &Map<String, Value>) -> bool {
        let mut changed = false;
        for (key, value) in fields {
            changed |= self.merge_field(key, value);
        }
        changed
    }

    fn merge_field(&mut self, key: &str, value: &Value) -> bool {
        match key {
            "mode" => assign(&mut self.mode, key, value),
            "solid_color" => assign(&mut self.solid_color, key, value),
            "solid_bright" => assign(&mut self.solid_bright, key, value),
            "fade_color" => assign(&mut self.fade_color, key, value),
            "fade_color_2" => assign(&mut self.fade_color_2, key, value),
            "fade_use_2" => assign(&mut self.fade_use_2, key, value),
            "fade_min" => assign(&mut self.fade_min, key, value),
            "fade_max" => assign(&mut self.fade_max, key, value),
            "fade_speed" => assign(&mut self.fade_speed, key, value),
            "snake_color_mode" => assign(&mut self.snake_color_mode, key, value),
            "snake_color_1" => assign(&mut self.snake_color_1, key, value),
            "snake_color_2" => assign(&mut self.snake_color_2, key, value),
            "snake_cw" => assign(&mut self.snake_cw, key, value),
            "snake_speed" => assign(&mut self.snake_speed, key, value),
            _ => false,
        }
    }

    /// Restore factory defaults
    pub fn reset(&mut self) {
        *self = DeviceState::default();
    }
}

fn assign<T: DeserializeOwned>(slot: &mut T, key: &str, value: &Value) -> bool {
    match serde_json::from_value(value.clone()) {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(e) => {
            debug!(key = %key, value = %value, error = %e, "Ignoring unmergeable field value");
            false
        }
    }
}

/// Outgoing wire payload: the full state plus the transient `save` flag
///
/// `save = true` asks the device to persist the state to flash; false applies
/// it to the LEDs only.
#[derive(Debug, Serialize)]
pub struct OutgoingState<'a> {
    #[serde(flatten)]
    pub state: &'a DeviceState,
    pub save: bool,
}

impl<'a> OutgoingState<'a> {
    pub fn new(state: &'a DeviceState, save: bool) -> Self {
        Self { state, save }
    }
}
