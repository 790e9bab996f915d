use serde::Serialize;
use serde_json::Value;

use crate::types::{Mode, Preset, Temperature};
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.nature.global";

pub const DEVICES_PATH: &str = "/1/devices";
pub const APPLIANCES_PATH: &str = "/1/appliances";

pub const RATE_LIMIT_REMAINING: &str = "x-rate-limit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-rate-limit-reset";

pub const POWER_OFF_BUTTON: &str = "power-off";

pub fn aircon_settings_path(appliance_id: &str) -> String {
    format!("/1/appliances/{appliance_id}/aircon_settings")
}

/// One fetch worth of loosely typed records, straight off the wire.
#[derive(Debug, Clone, Default)]
pub struct RawCatalog {
    pub devices: Vec<Value>,
    pub appliances: Vec<Value>,
}

/// Form body for `POST /1/appliances/{id}/aircon_settings`.
/// Unset fields are left untouched by the cloud.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AirconCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button: Option<String>,
}

impl AirconCommand {
    /// Mode and setpoint travel together; some units ignore a bare mode change.
    pub fn mode(mode: &Mode, target: Option<Temperature>) -> Self {
        if *mode == Mode::Off {
            return Self::power_off();
        }
        Self {
            operation_mode: Some(mode.as_remo_str().to_string()),
            temperature: target.map(|t| t.to_remo_string()),
            // an empty button powers the unit back on
            button: Some(String::new()),
            ..Default::default()
        }
    }

    pub fn temperature(target: Temperature) -> Self {
        Self {
            temperature: Some(target.to_remo_string()),
            ..Default::default()
        }
    }

    pub fn fan(volume: &str) -> Self {
        Self {
            air_volume: Some(volume.to_string()),
            ..Default::default()
        }
    }

    pub fn swing(direction: &str) -> Self {
        Self {
            air_direction: Some(direction.to_string()),
            ..Default::default()
        }
    }

    /// Presets are buttons; the cloud keeps the current mode and setpoint.
    pub fn preset(preset: Preset) -> Self {
        Self {
            button: Some(preset.as_remo_str().to_string()),
            ..Default::default()
        }
    }

    pub fn power_off() -> Self {
        Self {
            button: Some(POWER_OFF_BUTTON.to_string()),
            ..Default::default()
        }
    }

    pub fn action(&self) -> &'static str {
        if self.button.as_deref() == Some(POWER_OFF_BUTTON) {
            "power_off"
        } else if self.operation_mode.is_some() {
            "set_mode"
        } else if self.button.as_deref().is_some_and(|b| !b.is_empty()) {
            "set_preset_mode"
        } else if self.temperature.is_some() {
            "set_temperature"
        } else if self.air_volume.is_some() {
            "set_fan_mode"
        } else if self.air_direction.is_some() {
            "set_swing_mode"
        } else {
            "noop"
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Both list endpoints return a bare JSON array.
pub fn parse_list(body: &str) -> Result<Vec<Value>> {
    let parsed: Value =
        serde_json::from_str(body).map_err(|e| Error::Decode(e.to_string()))?;
    match parsed {
        Value::Array(items) => Ok(items),
        other => Err(Error::Decode(format!(
            "expected array, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
