use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::{POWER_OFF_BUTTON, RawCatalog};
use crate::types::*;
use crate::{Error, Result};

/// Output of one normalization pass over a raw catalog.
#[derive(Debug, Clone, Default)]
pub struct NormalizedCatalog {
    pub appliances: Vec<Appliance>,
    pub devices: Vec<Device>,
    /// Ids of records that were present but malformed. These are skipped for
    /// the cycle, not treated as removed.
    pub rejected_ids: HashSet<String>,
}

pub fn normalize_catalog(raw: &RawCatalog) -> NormalizedCatalog {
    let mut out = NormalizedCatalog::default();
    let mut seen = HashSet::new();

    for record in &raw.appliances {
        match normalize_appliance(record) {
            Ok(appliance) => {
                if seen.insert(appliance.id.clone()) {
                    out.appliances.push(appliance);
                } else {
                    warn!(id = %appliance.id, "duplicate appliance id in catalog, keeping first");
                }
            }
            Err(e) => {
                let id = record.get("id").and_then(|v| v.as_str());
                warn!(id = id.unwrap_or("?"), error = %e, "skipping appliance record");
                if let Some(id) = id {
                    out.rejected_ids.insert(id.to_string());
                }
            }
        }
    }

    seen.clear();
    for record in &raw.devices {
        match normalize_device(record) {
            Ok(device) => {
                if seen.insert(device.id.clone()) {
                    out.devices.push(device);
                }
            }
            Err(e) => warn!(error = %e, "skipping device record"),
        }
    }

    debug!(
        appliances = out.appliances.len(),
        devices = out.devices.len(),
        rejected = out.rejected_ids.len(),
        "catalog normalized"
    );
    out
}

pub fn normalize_appliance(raw: &Value) -> Result<Appliance> {
    let id = required_str(raw, "id")?;
    let type_str = raw
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Validation(format!("appliance {id}: missing type")))?;

    let kind = match type_str {
        "AC" => ApplianceKind::Aircon(normalize_aircon(id, raw)?),
        "IR" => ApplianceKind::Switch,
        "LIGHT" => ApplianceKind::Light,
        "TV" => ApplianceKind::Tv,
        "EL_SMART_METER" => ApplianceKind::SensorOnly(normalize_smart_meter(raw)),
        other => {
            return Err(Error::Validation(format!(
                "appliance {id}: unknown type {other:?}"
            )));
        }
    };

    Ok(Appliance {
        id: id.to_string(),
        nickname: raw
            .get("nickname")
            .and_then(|v| v.as_str())
            .unwrap_or(id)
            .to_string(),
        device_id: raw
            .pointer("/device/id")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        kind,
    })
}

fn normalize_aircon(id: &str, raw: &Value) -> Result<Aircon> {
    let modes_obj = match raw.pointer("/aircon/range/modes") {
        Some(Value::Object(m)) if !m.is_empty() => m,
        _ => {
            return Err(Error::Validation(format!(
                "appliance {id}: AC advertises no modes"
            )));
        }
    };

    let mut modes = BTreeMap::new();
    for (name, caps) in modes_obj {
        let mode = Mode::from_remo_str(name);
        if !mode.is_commandable() {
            debug!(id, mode = %name, "unrecognized mode kept as read-only");
        }
        if mode == Mode::Off {
            continue;
        }
        let temperatures: Vec<f64> = caps
            .get("temp")
            .and_then(|v| v.as_array())
            .map(|list| list.iter().filter_map(as_temperature).map(|t| t.celsius()).collect())
            .unwrap_or_default();
        modes.insert(
            mode,
            ModeCapabilities {
                temperatures: TemperatureSteps::new(temperatures),
                fan_modes: string_list(caps.get("vol")),
                swing_modes: string_list(caps.get("dir")),
            },
        );
    }
    if modes.is_empty() {
        return Err(Error::Validation(format!(
            "appliance {id}: AC advertises no modes"
        )));
    }

    let settings = raw.get("settings").unwrap_or(&Value::Null);
    let first_mode = modes.keys().next().cloned().unwrap_or(Mode::Cool);
    let mode = settings
        .get("mode")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(Mode::from_remo_str)
        .unwrap_or(first_mode);
    let button = settings.get("button").and_then(|v| v.as_str());
    let powered_off = settings.is_null() || button == Some(POWER_OFF_BUTTON);

    Ok(Aircon {
        modes,
        settings: AirconSettings {
            mode,
            target: settings.get("temp").and_then(as_temperature),
            fan: non_empty_str(settings.get("vol")),
            swing: non_empty_str(settings.get("dir")),
            preset: button.and_then(Preset::from_remo_str),
            powered_off,
            updated_at: settings.get("updated_at").and_then(as_timestamp),
        },
    })
}

fn normalize_smart_meter(raw: &Value) -> SmartMeter {
    let properties = raw
        .pointer("/smart_meter/echonetlite_properties")
        .and_then(|v| v.as_array())
        .map(|props| {
            props
                .iter()
                .filter_map(|p| {
                    let epc = u16::try_from(p.get("epc").and_then(|v| v.as_u64())?).ok()?;
                    let value = match p.get("val")? {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        _ => return None,
                    };
                    Some(EchonetProperty {
                        epc,
                        value,
                        updated_at: p.get("updated_at").and_then(as_timestamp),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    SmartMeter { properties }
}

pub fn normalize_device(raw: &Value) -> Result<Device> {
    let id = required_str(raw, "id")?;
    let events = raw.get("newest_events").unwrap_or(&Value::Null);
    Ok(Device {
        id: id.to_string(),
        name: raw
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(id)
            .to_string(),
        firmware_version: non_empty_str(raw.get("firmware_version")),
        updated_at: raw.get("updated_at").and_then(as_timestamp),
        rssi: raw.get("rssi").and_then(|v| v.as_f64()),
        temperature: sensor_event(events, "te"),
        humidity: sensor_event(events, "hu"),
        illuminance: sensor_event(events, "il"),
        motion: sensor_event(events, "mo"),
    })
}

fn sensor_event(events: &Value, key: &str) -> Option<SensorEvent> {
    let event = events.get(key)?;
    let value = match event.get("val")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some(SensorEvent {
        value,
        created_at: event.get("created_at").and_then(as_timestamp),
    })
}

fn required_str<'a>(raw: &'a Value, field: &str) -> Result<&'a str> {
    raw.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation(format!("missing {field}")))
}

fn as_temperature(v: &Value) -> Option<Temperature> {
    match v {
        Value::String(s) => Temperature::from_remo_str(s),
        Value::Number(n) => n.as_f64().map(Temperature::from_celsius),
        _ => None,
    }
}

fn as_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|s| s.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
