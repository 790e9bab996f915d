use tracing::{debug, trace};

use crate::memory::ModeMemory;
use crate::protocol::AirconCommand;
use crate::types::*;
use crate::{Error, Result};

/// Host-facing climate state for one air conditioner.
///
/// Commands are validated against the capabilities of the last refresh and
/// applied optimistically; the returned `AirconCommand` is what the caller
/// must dispatch. A later `refresh` replaces optimistic state with whatever
/// the cloud reports.
#[derive(Debug, Clone)]
pub struct ClimateAdapter {
    id: String,
    aircon: Option<Aircon>,
    memory: ModeMemory,
    state: ClimateState,
    last_active_mode: Option<Mode>,
}

impl ClimateAdapter {
    pub fn new(id: impl Into<String>, memory: ModeMemory) -> Self {
        Self {
            id: id.into(),
            aircon: None,
            memory,
            state: ClimateState {
                mode: Mode::Off,
                target: None,
                fan: None,
                swing: None,
                preset: Preset::Normal,
                measured: None,
                available: false,
            },
            last_active_mode: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &ClimateState {
        &self.state
    }

    pub fn memory(&self) -> &ModeMemory {
        &self.memory
    }

    pub fn is_available(&self) -> bool {
        self.state.available
    }

    pub fn refresh(&mut self, aircon: &Aircon, measured: Option<Temperature>) {
        let settings = &aircon.settings;
        let underlying = settings.mode.clone();

        if let Some(reported) = settings.target {
            self.memory.observe(&underlying, reported);
        }

        let effective = aircon.effective_mode();
        let target = match (&effective, aircon.capabilities(&underlying)) {
            (Mode::Off, _) => None,
            (_, Some(caps)) => self.memory.recall(&underlying, &caps.temperatures),
            // Reported but not advertised: nothing to snap to, show as reported.
            (_, None) => settings.target,
        };

        if effective != self.state.mode {
            debug!(id = %self.id, from = %self.state.mode, to = %effective, ?target, "mode changed");
        }

        if underlying.is_commandable() && (!settings.powered_off || self.last_active_mode.is_none()) {
            self.last_active_mode = Some(underlying);
        }

        self.state = ClimateState {
            mode: effective,
            target,
            fan: settings.fan.clone(),
            swing: settings.swing.clone(),
            preset: settings.preset.unwrap_or_default(),
            measured,
            available: true,
        };
        self.aircon = Some(aircon.clone());
    }

    /// Returns `true` if availability actually changed.
    pub fn mark_unavailable(&mut self) -> bool {
        let was = self.state.available;
        self.state.available = false;
        was
    }

    pub fn capabilities(&self) -> ClimateCapabilities {
        let mut caps = ClimateCapabilities {
            modes: vec![Mode::Off],
            min_temp: None,
            max_temp: None,
            temp_step: None,
            fan_modes: Vec::new(),
            swing_modes: Vec::new(),
            presets: Vec::new(),
        };
        let Some(ac) = &self.aircon else {
            return caps;
        };
        caps.modes
            .extend(ac.modes.keys().filter(|m| m.is_commandable()).cloned());
        caps.presets = Preset::ALL.to_vec();
        if let Some(current) = ac.capabilities(&self.state.mode) {
            caps.min_temp = current.temperatures.min();
            caps.max_temp = current.temperatures.max();
            caps.temp_step = current.temperatures.step();
            caps.fan_modes = current.fan_modes.clone();
            caps.swing_modes = current.swing_modes.clone();
        }
        caps
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<AirconCommand> {
        self.ensure_available()?;

        if mode == Mode::Off {
            if self.state.mode != Mode::Off && self.state.mode.is_commandable() {
                self.last_active_mode = Some(self.state.mode.clone());
            }
            self.state.mode = Mode::Off;
            self.state.target = None;
            return Ok(AirconCommand::power_off());
        }

        let caps = self
            .aircon
            .as_ref()
            .filter(|_| mode.is_commandable())
            .and_then(|ac| ac.capabilities(&mode))
            .ok_or_else(|| Error::UnsupportedMode {
                appliance_id: self.id.clone(),
                mode: mode.clone(),
            })?;

        let target = self.memory.recall(&mode, &caps.temperatures);
        let command = AirconCommand::mode(&mode, target);
        trace!(id = %self.id, %mode, ?target, "mode command prepared");

        self.state.mode = mode.clone();
        self.state.target = target;
        self.last_active_mode = Some(mode);
        Ok(command)
    }

    pub fn set_temperature(&mut self, value: f64) -> Result<AirconCommand> {
        self.ensure_available()?;
        let mode = self.state.mode.clone();
        let caps = self.commandable_caps(&mode)?;

        let requested = Temperature::from_celsius(value);
        if !caps.temperatures.contains(requested) {
            let (lower, upper) = caps.temperatures.neighbours(value);
            return Err(Error::OutOfRange {
                value,
                lower,
                upper,
            });
        }
        let target = caps.temperatures.nearest(value).unwrap_or(requested);

        self.memory.observe(&mode, target);
        self.state.target = Some(target);
        Ok(AirconCommand::temperature(target))
    }

    pub fn set_fan_mode(&mut self, fan: &str) -> Result<AirconCommand> {
        self.ensure_available()?;
        let mode = self.state.mode.clone();
        let supported = self
            .commandable_caps(&mode)
            .is_ok_and(|caps| caps.fan_modes.iter().any(|f| f == fan));
        if !supported {
            return Err(Error::UnsupportedFanOrSwing {
                setting: "fan mode",
                value: fan.to_string(),
            });
        }
        self.state.fan = Some(fan.to_string());
        Ok(AirconCommand::fan(fan))
    }

    pub fn set_swing_mode(&mut self, swing: &str) -> Result<AirconCommand> {
        self.ensure_available()?;
        let mode = self.state.mode.clone();
        let supported = self
            .commandable_caps(&mode)
            .is_ok_and(|caps| caps.swing_modes.iter().any(|s| s == swing));
        if !supported {
            return Err(Error::UnsupportedFanOrSwing {
                setting: "swing mode",
                value: swing.to_string(),
            });
        }
        self.state.swing = Some(swing.to_string());
        Ok(AirconCommand::swing(swing))
    }

    /// Presets only apply to a running unit.
    pub fn set_preset_mode(&mut self, preset: &str) -> Result<AirconCommand> {
        self.ensure_available()?;
        let mode = self.state.mode.clone();
        self.commandable_caps(&mode)?;
        let preset =
            Preset::from_remo_str(preset).ok_or_else(|| Error::UnsupportedPreset(preset.to_string()))?;
        trace!(id = %self.id, %preset, "preset command prepared");
        self.state.preset = preset;
        Ok(AirconCommand::preset(preset))
    }

    /// Mode to restore when powering on: the last one used, else cool, else
    /// whatever the unit advertises first.
    pub fn resume_mode(&self) -> Result<Mode> {
        self.ensure_available()?;
        let ac = self
            .aircon
            .as_ref()
            .ok_or_else(|| Error::Unavailable(self.id.clone()))?;
        let advertised = |m: &Mode| m.is_commandable() && ac.modes.contains_key(m);

        self.last_active_mode
            .iter()
            .chain(std::iter::once(&Mode::Cool))
            .chain(ac.modes.keys())
            .find(|m| advertised(*m))
            .cloned()
            .ok_or_else(|| Error::UnsupportedMode {
                appliance_id: self.id.clone(),
                mode: Mode::Cool,
            })
    }

    fn commandable_caps(&self, mode: &Mode) -> Result<&ModeCapabilities> {
        self.aircon
            .as_ref()
            .filter(|_| mode.is_commandable() && *mode != Mode::Off)
            .and_then(|ac| ac.capabilities(mode))
            .ok_or_else(|| Error::UnsupportedMode {
                appliance_id: self.id.clone(),
                mode: mode.clone(),
            })
    }

    fn ensure_available(&self) -> Result<()> {
        if self.state.available {
            Ok(())
        } else {
            Err(Error::Unavailable(self.id.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn range(lo: i32, hi: i32) -> TemperatureSteps {
        TemperatureSteps::new((lo..=hi).map(f64::from).collect())
    }

    fn caps(lo: i32, hi: i32) -> ModeCapabilities {
        ModeCapabilities {
            temperatures: range(lo, hi),
            fan_modes: vec!["auto".into(), "1".into(), "2".into()],
            swing_modes: vec!["auto".into(), "swing".into()],
        }
    }

    fn aircon(mode: Mode, target: Option<f64>) -> Aircon {
        let mut modes = BTreeMap::new();
        modes.insert(Mode::Cool, caps(20, 30));
        modes.insert(Mode::Warm, caps(16, 25));
        modes.insert(Mode::Blow, ModeCapabilities {
            temperatures: TemperatureSteps::default(),
            fan_modes: vec!["auto".into()],
            swing_modes: vec![],
        });
        modes.insert(Mode::Other("eco".into()), caps(24, 28));
        Aircon {
            modes,
            settings: AirconSettings {
                mode,
                target: target.map(Temperature::from_celsius),
                fan: Some("auto".into()),
                swing: Some("auto".into()),
                preset: None,
                powered_off: false,
                updated_at: None,
            },
        }
    }

    fn adapter_in_cool_26() -> ClimateAdapter {
        let mut adapter = ClimateAdapter::new("ac-1", ModeMemory::new());
        adapter.refresh(&aircon(Mode::Cool, Some(26.0)), Some(Temperature::from_celsius(27.5)));
        adapter
    }

    fn target(adapter: &ClimateAdapter) -> Option<f64> {
        adapter.state().target.map(|t| t.celsius())
    }

    #[test]
    fn new_adapter_is_unavailable() {
        let mut adapter = ClimateAdapter::new("ac-1", ModeMemory::new());
        assert!(!adapter.is_available());
        assert!(matches!(adapter.set_mode(Mode::Cool), Err(Error::Unavailable(_))));
    }

    #[test]
    fn refresh_adopts_record() {
        let adapter = adapter_in_cool_26();
        let state = adapter.state();
        assert_eq!(state.mode, Mode::Cool);
        assert_eq!(target(&adapter), Some(26.0));
        assert_eq!(state.measured, Some(Temperature::from_celsius(27.5)));
        assert_eq!(state.fan.as_deref(), Some("auto"));
        assert!(state.available);
    }

    #[test]
    fn mode_round_trip_restores_setpoints() {
        let mut adapter = adapter_in_cool_26();

        let cmd = adapter.set_mode(Mode::Warm).unwrap();
        assert_eq!(cmd.operation_mode.as_deref(), Some("warm"));
        assert_eq!(cmd.temperature.as_deref(), Some("20"));
        assert_eq!(target(&adapter), Some(20.0));
        assert_eq!(adapter.memory().get(&Mode::Warm), Some(Temperature::from_celsius(20.0)));

        adapter.set_temperature(23.0).unwrap();
        assert_eq!(adapter.memory().get(&Mode::Warm), Some(Temperature::from_celsius(23.0)));

        let cmd = adapter.set_mode(Mode::Cool).unwrap();
        assert_eq!(cmd.temperature.as_deref(), Some("26"));
        assert_eq!(target(&adapter), Some(26.0));
    }

    #[test]
    fn refresh_mode_change_recalls_memory() {
        let mut adapter = adapter_in_cool_26();
        adapter.refresh(&aircon(Mode::Warm, Some(22.0)), None);
        assert_eq!(target(&adapter), Some(22.0));

        // cloud switched back without reporting a setpoint
        adapter.refresh(&aircon(Mode::Cool, None), None);
        assert_eq!(target(&adapter), Some(26.0));
    }

    #[test]
    fn out_of_range_leaves_state_untouched() {
        let mut adapter = adapter_in_cool_26();
        let before = adapter.state().clone();

        match adapter.set_temperature(31.0) {
            Err(Error::OutOfRange { lower, upper, .. }) => {
                assert_eq!(lower, Some(30.0));
                assert_eq!(upper, None);
            }
            other => panic!("expected OutOfRange, got {other:?}"),
        }
        match adapter.set_temperature(22.5) {
            Err(Error::OutOfRange { lower, upper, .. }) => {
                assert_eq!(lower, Some(22.0));
                assert_eq!(upper, Some(23.0));
            }
            other => panic!("expected OutOfRange, got {other:?}"),
        }
        assert_eq!(adapter.state(), &before);
        assert_eq!(adapter.memory().get(&Mode::Cool), Some(Temperature::from_celsius(26.0)));
    }

    #[test]
    fn unsupported_modes_are_rejected() {
        let mut adapter = adapter_in_cool_26();
        assert!(matches!(
            adapter.set_mode(Mode::Dry),
            Err(Error::UnsupportedMode { mode: Mode::Dry, .. })
        ));
        assert!(matches!(
            adapter.set_mode(Mode::Other("eco".into())),
            Err(Error::UnsupportedMode { .. })
        ));
        assert_eq!(adapter.state().mode, Mode::Cool);
    }

    #[test]
    fn unknown_reported_mode_is_read_only() {
        let mut adapter = ClimateAdapter::new("ac-1", ModeMemory::new());
        adapter.refresh(&aircon(Mode::Other("eco".into()), Some(25.0)), None);
        assert_eq!(adapter.state().mode, Mode::Other("eco".into()));
        assert_eq!(target(&adapter), Some(25.0));
        assert!(matches!(adapter.set_temperature(26.0), Err(Error::UnsupportedMode { .. })));
        assert!(!adapter.capabilities().modes.contains(&Mode::Other("eco".into())));
    }

    #[test]
    fn fan_and_swing_validated_against_current_mode() {
        let mut adapter = adapter_in_cool_26();
        let cmd = adapter.set_fan_mode("2").unwrap();
        assert_eq!(cmd.air_volume.as_deref(), Some("2"));
        assert_eq!(adapter.state().fan.as_deref(), Some("2"));

        assert!(matches!(
            adapter.set_fan_mode("turbo"),
            Err(Error::UnsupportedFanOrSwing { setting: "fan mode", .. })
        ));
        assert!(adapter.set_swing_mode("swing").is_ok());
        assert!(matches!(
            adapter.set_swing_mode("left"),
            Err(Error::UnsupportedFanOrSwing { setting: "swing mode", .. })
        ));
        assert_eq!(adapter.state().swing.as_deref(), Some("swing"));
    }

    #[test]
    fn blow_mode_has_no_setpoint() {
        let mut adapter = adapter_in_cool_26();
        let cmd = adapter.set_mode(Mode::Blow).unwrap();
        assert_eq!(cmd.temperature, None);
        assert_eq!(target(&adapter), None);
        assert!(matches!(
            adapter.set_temperature(24.0),
            Err(Error::OutOfRange { lower: None, upper: None, .. })
        ));
    }

    #[test]
    fn power_off_and_resume() {
        let mut adapter = adapter_in_cool_26();
        adapter.set_mode(Mode::Warm).unwrap();
        let cmd = adapter.set_mode(Mode::Off).unwrap();
        assert_eq!(cmd, AirconCommand::power_off());
        assert_eq!(adapter.state().mode, Mode::Off);
        assert_eq!(target(&adapter), None);
        assert!(matches!(adapter.set_temperature(22.0), Err(Error::UnsupportedMode { .. })));
        assert!(matches!(adapter.set_fan_mode("auto"), Err(Error::UnsupportedFanOrSwing { .. })));
        assert_eq!(adapter.resume_mode().unwrap(), Mode::Warm);
    }

    #[test]
    fn powered_off_record_still_feeds_memory() {
        let mut adapter = ClimateAdapter::new("ac-1", ModeMemory::new());
        let mut ac = aircon(Mode::Warm, Some(21.0));
        ac.settings.powered_off = true;
        adapter.refresh(&ac, None);

        assert_eq!(adapter.state().mode, Mode::Off);
        assert_eq!(adapter.memory().get(&Mode::Warm), Some(Temperature::from_celsius(21.0)));
        assert_eq!(adapter.resume_mode().unwrap(), Mode::Warm);
    }

    #[test]
    fn unavailable_rejects_commands_until_refresh() {
        let mut adapter = adapter_in_cool_26();
        assert!(adapter.mark_unavailable());
        assert!(!adapter.mark_unavailable());
        assert!(matches!(adapter.set_temperature(24.0), Err(Error::Unavailable(_))));
        assert!(matches!(adapter.set_fan_mode("auto"), Err(Error::Unavailable(_))));

        adapter.refresh(&aircon(Mode::Cool, Some(24.0)), None);
        assert!(adapter.is_available());
        assert!(adapter.set_temperature(25.0).is_ok());
    }

    #[test]
    fn capabilities_follow_current_mode() {
        let mut adapter = adapter_in_cool_26();
        let caps = adapter.capabilities();
        assert_eq!(caps.modes, vec![Mode::Off, Mode::Cool, Mode::Warm, Mode::Blow]);
        assert_eq!(caps.min_temp, Some(20.0));
        assert_eq!(caps.max_temp, Some(30.0));
        assert_eq!(caps.temp_step, Some(1.0));

        adapter.set_mode(Mode::Warm).unwrap();
        let caps = adapter.capabilities();
        assert_eq!(caps.min_temp, Some(16.0));
        assert_eq!(caps.max_temp, Some(25.0));
    }

    #[test]
    fn unadvertised_reported_mode_keeps_reported_target() {
        let mut adapter = ClimateAdapter::new("ac-1", ModeMemory::new());
        adapter.refresh(&aircon(Mode::Dry, Some(24.0)), None);
        assert_eq!(adapter.state().mode, Mode::Dry);
        assert_eq!(target(&adapter), Some(24.0));
        assert_eq!(adapter.capabilities().min_temp, None);
    }

    #[test]
    fn preset_is_sent_as_button() {
        let mut adapter = adapter_in_cool_26();
        assert_eq!(adapter.state().preset, Preset::Normal);
        assert_eq!(adapter.capabilities().presets, Preset::ALL.to_vec());

        let cmd = adapter.set_preset_mode("eco").unwrap();
        assert_eq!(cmd.button.as_deref(), Some("eco"));
        assert_eq!(cmd.operation_mode, None);
        assert_eq!(cmd.action(), "set_preset_mode");
        assert_eq!(adapter.state().preset, Preset::Eco);
        assert_eq!(adapter.state().mode, Mode::Cool);

        assert!(matches!(
            adapter.set_preset_mode("turbo"),
            Err(Error::UnsupportedPreset(ref p)) if p == "turbo"
        ));
        assert_eq!(adapter.state().preset, Preset::Eco);
    }

    #[test]
    fn refresh_reports_preset_and_off_rejects_it() {
        let mut adapter = ClimateAdapter::new("ac-1", ModeMemory::new());
        assert!(adapter.capabilities().presets.is_empty());
        let mut ac = aircon(Mode::Cool, Some(26.0));
        ac.settings.preset = Some(Preset::Boost);
        adapter.refresh(&ac, None);
        assert_eq!(adapter.state().preset, Preset::Boost);

        adapter.refresh(&aircon(Mode::Cool, Some(26.0)), None);
        assert_eq!(adapter.state().preset, Preset::Normal);

        adapter.set_mode(Mode::Off).unwrap();
        assert!(matches!(adapter.set_preset_mode("eco"), Err(Error::UnsupportedMode { .. })));
    }
}
