use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

const STEP_EPSILON: f64 = 1e-6;

/// Temperature in Celsius, the only unit the Remo cloud API speaks.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }

    /// Parse the string form used in `settings.temp` and `range.modes.*.temp`.
    /// Empty strings mean "no setpoint" and yield `None`.
    pub fn from_remo_str(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        s.parse::<f64>().ok().filter(|v| v.is_finite()).map(Self)
    }

    /// Whole degrees are sent without a fraction ("26"), halves as "26.5".
    pub fn to_remo_string(&self) -> String {
        if (self.0 - self.0.round()).abs() < STEP_EPSILON {
            format!("{:.0}", self.0)
        } else {
            format!("{:.1}", self.0)
        }
    }

    pub fn approx_eq(&self, other: f64) -> bool {
        (self.0 - other).abs() < STEP_EPSILON
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}\u{00b0}C", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mode {
    Auto,
    Cool,
    Warm,
    Dry,
    Blow,
    Off,
    /// A vendor mode this crate does not know. Visible, never commandable.
    Other(String),
}

impl Mode {
    pub fn as_remo_str(&self) -> &str {
        match self {
            Mode::Auto => "auto",
            Mode::Cool => "cool",
            Mode::Warm => "warm",
            Mode::Dry => "dry",
            Mode::Blow => "blow",
            Mode::Off => "power-off",
            Mode::Other(s) => s,
        }
    }

    pub fn from_remo_str(s: &str) -> Self {
        match s {
            "auto" => Mode::Auto,
            "cool" => Mode::Cool,
            "warm" => Mode::Warm,
            "dry" => Mode::Dry,
            "blow" => Mode::Blow,
            "power-off" => Mode::Off,
            other => Mode::Other(other.to_string()),
        }
    }

    pub fn is_commandable(&self) -> bool {
        !matches!(self, Mode::Other(_))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_remo_str())
    }
}

/// Aircon presets, sent and reported through the `button` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Preset {
    #[default]
    Normal,
    Eco,
    Comfort,
    Boost,
}

impl Preset {
    pub const ALL: [Preset; 4] = [Preset::Normal, Preset::Eco, Preset::Comfort, Preset::Boost];

    pub fn as_remo_str(&self) -> &'static str {
        match self {
            Preset::Normal => "normal",
            Preset::Eco => "eco",
            Preset::Comfort => "comfort",
            Preset::Boost => "boost",
        }
    }

    pub fn from_remo_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_remo_str() == s)
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_remo_str())
    }
}

/// The discrete setpoints a mode accepts, ascending and deduplicated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemperatureSteps(Vec<f64>);

impl TemperatureSteps {
    pub fn new(mut values: Vec<f64>) -> Self {
        values.retain(|v| v.is_finite());
        values.sort_by(f64::total_cmp);
        values.dedup_by(|a, b| (*a - *b).abs() < STEP_EPSILON);
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn min(&self) -> Option<f64> {
        self.0.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.0.last().copied()
    }

    pub fn contains(&self, t: Temperature) -> bool {
        self.0.iter().any(|v| t.approx_eq(*v))
    }

    /// Closest valid step. Ties go to the lower step.
    pub fn nearest(&self, value: f64) -> Option<Temperature> {
        let mut best: Option<(f64, f64)> = None;
        for &v in &self.0 {
            let dist = (v - value).abs();
            match best {
                Some((_, d)) if dist >= d - STEP_EPSILON => {}
                _ => best = Some((v, dist)),
            }
        }
        best.map(|(v, _)| Temperature(v))
    }

    pub fn midpoint(&self) -> Option<Temperature> {
        let (lo, hi) = (self.min()?, self.max()?);
        self.nearest((lo + hi) / 2.0)
    }

    /// Valid steps immediately below and above `value` (exclusive).
    pub fn neighbours(&self, value: f64) -> (Option<f64>, Option<f64>) {
        let lower = self
            .0
            .iter()
            .rev()
            .find(|v| **v < value - STEP_EPSILON)
            .copied();
        let upper = self.0.iter().find(|v| **v > value + STEP_EPSILON).copied();
        (lower, upper)
    }

    /// Smallest gap between adjacent steps (0.5 or 1.0 in practice).
    pub fn step(&self) -> Option<f64> {
        self.0
            .windows(2)
            .map(|w| w[1] - w[0])
            .min_by(f64::total_cmp)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModeCapabilities {
    pub temperatures: TemperatureSteps,
    pub fan_modes: Vec<String>,
    pub swing_modes: Vec<String>,
}

/// Settings as last reported by the cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct AirconSettings {
    /// Underlying operating mode, reported even while powered off.
    pub mode: Mode,
    pub target: Option<Temperature>,
    pub fan: Option<String>,
    pub swing: Option<String>,
    /// Set when the last pressed button was a preset.
    pub preset: Option<Preset>,
    pub powered_off: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aircon {
    pub modes: BTreeMap<Mode, ModeCapabilities>,
    pub settings: AirconSettings,
}

impl Aircon {
    pub fn capabilities(&self, mode: &Mode) -> Option<&ModeCapabilities> {
        self.modes.get(mode)
    }

    /// The mode the host should display: `Off` wins over the underlying mode.
    pub fn effective_mode(&self) -> Mode {
        if self.settings.powered_off {
            Mode::Off
        } else {
            self.settings.mode.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EchonetProperty {
    pub epc: u16,
    pub value: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmartMeter {
    pub properties: Vec<EchonetProperty>,
}

impl SmartMeter {
    pub fn property(&self, epc: u16) -> Option<&EchonetProperty> {
        self.properties.iter().find(|p| p.epc == epc)
    }
}

/// Closed set of appliance kinds the cloud can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplianceKind {
    Aircon(Aircon),
    Switch,
    Light,
    Tv,
    SensorOnly(SmartMeter),
}

impl ApplianceKind {
    pub fn name(&self) -> &'static str {
        match self {
            ApplianceKind::Aircon(_) => "aircon",
            ApplianceKind::Switch => "switch",
            ApplianceKind::Light => "light",
            ApplianceKind::Tv => "tv",
            ApplianceKind::SensorOnly(_) => "sensor",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Appliance {
    pub id: String,
    pub nickname: String,
    /// Hub that relays commands to this appliance (and measures the room).
    pub device_id: Option<String>,
    pub kind: ApplianceKind,
}

impl Appliance {
    pub fn aircon(&self) -> Option<&Aircon> {
        match &self.kind {
            ApplianceKind::Aircon(ac) => Some(ac),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
    pub value: f64,
    pub created_at: Option<DateTime<Utc>>,
}

/// A physical Remo hub.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub firmware_version: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub rssi: Option<f64>,
    pub temperature: Option<SensorEvent>,
    pub humidity: Option<SensorEvent>,
    pub illuminance: Option<SensorEvent>,
    pub motion: Option<SensorEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Humidity,
    Illuminance,
    Motion,
    Power,
    Energy,
    SignalStrength,
    FirmwareVersion,
    LastSeen,
}

impl SensorKind {
    pub fn key(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Illuminance => "illuminance",
            SensorKind::Motion => "motion",
            SensorKind::Power => "power",
            SensorKind::Energy => "energy",
            SensorKind::SignalStrength => "signal_strength",
            SensorKind::FirmwareVersion => "firmware_version",
            SensorKind::LastSeen => "last_seen",
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            SensorKind::Temperature => Some("\u{00b0}C"),
            SensorKind::Humidity => Some("%"),
            SensorKind::Illuminance => Some("lx"),
            SensorKind::Power => Some("W"),
            SensorKind::Energy => Some("kWh"),
            SensorKind::SignalStrength => Some("dBm"),
            SensorKind::Motion | SensorKind::FirmwareVersion | SensorKind::LastSeen => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Stable host key, `<source id>_<kind>`.
    pub entity_key: String,
    pub source_id: String,
    pub kind: SensorKind,
    pub value: SensorValue,
    pub unit: Option<&'static str>,
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    pub fn number(&self) -> Option<f64> {
        match self.value {
            SensorValue::Number(n) => Some(n),
            SensorValue::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClimateState {
    pub mode: Mode,
    pub target: Option<Temperature>,
    pub fan: Option<String>,
    pub swing: Option<String>,
    pub preset: Preset,
    pub measured: Option<Temperature>,
    pub available: bool,
}

/// What the host may command right now.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimateCapabilities {
    pub modes: Vec<Mode>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub temp_step: Option<f64>,
    pub fan_modes: Vec<String>,
    pub swing_modes: Vec<String>,
    pub presets: Vec<Preset>,
}

/// Events emitted by the hub when host-visible state changes.
#[derive(Debug, Clone)]
pub enum HubEvent {
    ApplianceAdded { id: String, kind: &'static str },
    ApplianceRemoved { id: String },
    ClimateChanged { id: String, state: ClimateState },
    AvailabilityChanged { id: String, available: bool },
    RefreshFailed { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    /// Another refresh was already in flight; this call did nothing.
    Coalesced,
}
