use std::collections::HashMap;

use tracing::debug;

use crate::types::{Mode, Temperature, TemperatureSteps};

/// Last known target temperature per operating mode for one appliance.
///
/// An entry appears only once a temperature has been observed or commanded
/// for that mode, and survives any number of mode switches. `recall` never
/// hands out a value outside the steps it is given.
#[derive(Debug, Clone, Default)]
pub struct ModeMemory {
    entries: HashMap<Mode, Temperature>,
    defaults: HashMap<Mode, Temperature>,
}

impl ModeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preferred setpoints for modes with no history yet. Still clamped to
    /// whatever the appliance advertises.
    pub fn with_defaults(defaults: HashMap<Mode, Temperature>) -> Self {
        Self {
            entries: HashMap::new(),
            defaults,
        }
    }

    pub fn observe(&mut self, mode: &Mode, temperature: Temperature) {
        if *mode == Mode::Off {
            return;
        }
        self.entries.insert(mode.clone(), temperature);
    }

    pub fn get(&self, mode: &Mode) -> Option<Temperature> {
        self.entries.get(mode).copied()
    }

    pub fn recall(&mut self, mode: &Mode, steps: &TemperatureSteps) -> Option<Temperature> {
        if steps.is_empty() || *mode == Mode::Off {
            return None;
        }

        let value = match self.entries.get(mode) {
            Some(t) if steps.contains(*t) => return Some(*t),
            Some(t) => {
                let clamped = steps.nearest(t.celsius())?;
                debug!(%mode, remembered = %t, clamped = %clamped, "remembered setpoint no longer valid");
                clamped
            }
            None => self
                .defaults
                .get(mode)
                .and_then(|d| steps.nearest(d.celsius()))
                .or_else(|| steps.midpoint())?,
        };

        self.observe(mode, value);
        Some(value)
    }

    pub fn forget(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
