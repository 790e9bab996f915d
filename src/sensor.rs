use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::types::*;

pub const EPC_COEFFICIENT: u16 = 211;
pub const EPC_CUMULATIVE_NORMAL: u16 = 224;
pub const EPC_CUMULATIVE_UNIT: u16 = 225;
pub const EPC_INSTANTANEOUS_POWER: u16 = 231;

/// Multiplier used when the meter does not publish EPC 225.
const DEFAULT_UNIT_KWH: f64 = 0.001;

fn reading(
    source_id: &str,
    kind: SensorKind,
    value: SensorValue,
    timestamp: DateTime<Utc>,
) -> SensorReading {
    SensorReading {
        entity_key: format!("{source_id}_{}", kind.key()),
        source_id: source_id.to_string(),
        kind,
        value,
        unit: kind.unit(),
        timestamp,
    }
}

/// Readings for one hub. Environmental readings from a hub that has not
/// checked in within `stale_after` are withheld; health readings are not.
pub fn device_readings(
    device: &Device,
    now: DateTime<Utc>,
    stale_after: TimeDelta,
) -> Vec<SensorReading> {
    let mut out = Vec::new();
    let seen = device.updated_at.unwrap_or(now);

    if let Some(fw) = &device.firmware_version {
        out.push(reading(
            &device.id,
            SensorKind::FirmwareVersion,
            SensorValue::Text(fw.clone()),
            seen,
        ));
    }
    if let Some(updated) = device.updated_at {
        out.push(reading(
            &device.id,
            SensorKind::LastSeen,
            SensorValue::Text(updated.to_rfc3339()),
            updated,
        ));
    }
    if let Some(rssi) = device.rssi {
        out.push(reading(
            &device.id,
            SensorKind::SignalStrength,
            SensorValue::Number(rssi),
            seen,
        ));
    }

    if now.signed_duration_since(seen) > stale_after {
        debug!(device = %device.id, last_seen = %seen, "hub is stale, withholding sensor values");
        return out;
    }

    let events = [
        (SensorKind::Temperature, &device.temperature),
        (SensorKind::Humidity, &device.humidity),
        (SensorKind::Illuminance, &device.illuminance),
    ];
    for (kind, event) in events {
        if let Some(event) = event {
            out.push(reading(
                &device.id,
                kind,
                SensorValue::Number(event.value),
                event.created_at.unwrap_or(seen),
            ));
        }
    }
    // Motion's value is a constant; the event time is the reading.
    if let Some(event) = &device.motion {
        let at = event.created_at.unwrap_or(seen);
        out.push(reading(
            &device.id,
            SensorKind::Motion,
            SensorValue::Text(at.to_rfc3339()),
            at,
        ));
    }
    out
}

/// Power and energy readings from an ECHONET Lite smart meter.
pub fn meter_readings(
    appliance_id: &str,
    meter: &SmartMeter,
    now: DateTime<Utc>,
) -> Vec<SensorReading> {
    let mut out = Vec::new();

    if let Some(prop) = meter.property(EPC_INSTANTANEOUS_POWER) {
        match prop.value.trim().parse::<f64>() {
            Ok(watts) => out.push(reading(
                appliance_id,
                SensorKind::Power,
                SensorValue::Number(watts),
                prop.updated_at.unwrap_or(now),
            )),
            Err(_) => warn!(appliance = appliance_id, value = %prop.value, "unparseable instantaneous power"),
        }
    }

    if let Some(prop) = meter.property(EPC_CUMULATIVE_NORMAL) {
        let coefficient = meter
            .property(EPC_COEFFICIENT)
            .and_then(|p| p.value.trim().parse::<f64>().ok())
            .unwrap_or(1.0);
        let unit = meter
            .property(EPC_CUMULATIVE_UNIT)
            .and_then(|p| p.value.trim().parse::<u8>().ok())
            .and_then(cumulative_unit_kwh)
            .unwrap_or(DEFAULT_UNIT_KWH);
        match prop.value.trim().parse::<f64>() {
            Ok(raw) => out.push(reading(
                appliance_id,
                SensorKind::Energy,
                SensorValue::Number(raw * coefficient * unit),
                prop.updated_at.unwrap_or(now),
            )),
            Err(_) => warn!(appliance = appliance_id, value = %prop.value, "unparseable cumulative energy"),
        }
    }

    out
}

/// ECHONET Lite EPC 0xE1 unit codes, in kWh.
fn cumulative_unit_kwh(code: u8) -> Option<f64> {
    match code {
        0x00 => Some(1.0),
        0x01 => Some(0.1),
        0x02 => Some(0.01),
        0x03 => Some(0.001),
        0x04 => Some(0.0001),
        0x0A => Some(10.0),
        0x0B => Some(100.0),
        0x0C => Some(1000.0),
        0x0D => Some(10000.0),
        _ => None,
    }
}
