use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::climate::ClimateAdapter;
use crate::client::{RemoApi, RemoClient, RemoClientBuilder};
use crate::config::HubConfig;
use crate::memory::ModeMemory;
use crate::normalize::normalize_catalog;
use crate::protocol::{AirconCommand, RawCatalog};
use crate::sensor::{device_readings, meter_readings};
use crate::types::*;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&HubEvent) + Send + Sync>;

pub struct RemoHubBuilder<A> {
    api: A,
    poll_interval: Duration,
    stale_after: TimeDelta,
    default_targets: HashMap<Mode, Temperature>,
    event_callbacks: Vec<EventCallback>,
}

impl<A: RemoApi> RemoHubBuilder<A> {
    pub fn new(api: A) -> Self {
        let defaults = HubConfig::default();
        Self {
            api,
            poll_interval: defaults.poll_interval(),
            stale_after: defaults.stale_after(),
            default_targets: HashMap::new(),
            event_callbacks: Vec::new(),
        }
    }

    /// Takes polling, staleness and default setpoints from `config`.
    pub fn config(mut self, config: &HubConfig) -> Self {
        self.poll_interval = config.poll_interval();
        self.stale_after = config.stale_after();
        self.default_targets = config.default_targets();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn stale_after(mut self, stale_after: TimeDelta) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn default_temperature(mut self, mode: Mode, celsius: f64) -> Self {
        self.default_targets
            .insert(mode, Temperature::from_celsius(celsius));
        self
    }

    pub fn on_event(mut self, f: impl Fn(&HubEvent) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn build(self) -> Result<RemoHub<A>> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".into()));
        }
        Ok(RemoHub {
            inner: Arc::new(Inner {
                api: self.api,
                poll_interval: self.poll_interval,
                stale_after: self.stale_after,
                default_targets: self.default_targets,
                refresh_lock: tokio::sync::Mutex::new(()),
                state: RwLock::new(HubState::default()),
                event_callbacks: self.event_callbacks,
            }),
        })
    }
}

#[derive(Default)]
struct HubState {
    appliances: Vec<Appliance>,
    devices: Vec<Device>,
    climates: HashMap<String, Arc<Mutex<ClimateAdapter>>>,
    readings: HashMap<String, Vec<SensorReading>>,
    last_refresh: Option<DateTime<Utc>>,
}

struct Inner<A> {
    api: A,
    poll_interval: Duration,
    stale_after: TimeDelta,
    default_targets: HashMap<Mode, Temperature>,
    refresh_lock: tokio::sync::Mutex<()>,
    state: RwLock<HubState>,
    event_callbacks: Vec<EventCallback>,
}

/// Polling coordinator for one Nature Remo account.
///
/// A refresh fetches the whole catalog once and fans it out to every climate
/// adapter and sensor under a single write lock, so readers see either the
/// previous catalog or the new one. Concurrent refreshes coalesce. Commands
/// on different appliances only contend on the shared read lock and never
/// hold it across a network call.
pub struct RemoHub<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for RemoHub<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl RemoHub<RemoClient> {
    pub fn from_config(config: &HubConfig) -> Result<Self> {
        config.validate()?;
        let client = RemoClientBuilder::from_config(config).build()?;
        RemoHubBuilder::new(client).config(config).build()
    }
}

impl<A: RemoApi> RemoHub<A> {
    pub fn builder(api: A) -> RemoHubBuilder<A> {
        RemoHubBuilder::new(api)
    }

    pub fn api(&self) -> &A {
        &self.inner.api
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let Ok(_guard) = self.inner.refresh_lock.try_lock() else {
            debug!("refresh already in flight, coalescing");
            return Ok(RefreshOutcome::Coalesced);
        };

        match self.inner.api.fetch_catalog().await {
            Ok(raw) => {
                let events = self.apply_catalog(&raw);
                self.emit(&events);
                Ok(RefreshOutcome::Updated)
            }
            Err(e) => {
                warn!(error = %e, "catalog fetch failed");
                let mut events = self.mark_all_unavailable();
                events.push(HubEvent::RefreshFailed {
                    error: e.to_string(),
                });
                self.emit(&events);
                Err(e)
            }
        }
    }

    fn apply_catalog(&self, raw: &RawCatalog) -> Vec<HubEvent> {
        let catalog = normalize_catalog(raw);
        let now = Utc::now();
        let stale_after = self.inner.stale_after;

        let mut readings = HashMap::new();
        for device in &catalog.devices {
            readings.insert(device.id.clone(), device_readings(device, now, stale_after));
        }
        for appliance in &catalog.appliances {
            if let ApplianceKind::SensorOnly(meter) = &appliance.kind {
                readings.insert(appliance.id.clone(), meter_readings(&appliance.id, meter, now));
            }
        }

        let room_temperature = |device_id: &Option<String>| {
            let device = catalog
                .devices
                .iter()
                .find(|d| Some(&d.id) == device_id.as_ref())?;
            let seen = device.updated_at.unwrap_or(now);
            if now.signed_duration_since(seen) > stale_after {
                return None;
            }
            device
                .temperature
                .as_ref()
                .map(|e| Temperature::from_celsius(e.value))
        };

        let mut events = Vec::new();
        let mut state = write(&self.inner.state);

        let previous: HashSet<&str> = state.appliances.iter().map(|a| a.id.as_str()).collect();
        for appliance in &catalog.appliances {
            if !previous.contains(appliance.id.as_str()) {
                info!(id = %appliance.id, kind = appliance.kind.name(), nickname = %appliance.nickname, "appliance added");
                events.push(HubEvent::ApplianceAdded {
                    id: appliance.id.clone(),
                    kind: appliance.kind.name(),
                });
            }
        }
        let current: HashSet<&str> = catalog.appliances.iter().map(|a| a.id.as_str()).collect();
        for id in &previous {
            if !current.contains(id) && !catalog.rejected_ids.contains(*id) {
                info!(id = *id, "appliance removed");
                events.push(HubEvent::ApplianceRemoved { id: id.to_string() });
            }
        }

        let mut present = HashSet::new();
        for appliance in &catalog.appliances {
            let Some(aircon) = appliance.aircon() else {
                continue;
            };
            present.insert(appliance.id.clone());
            let adapter = state
                .climates
                .entry(appliance.id.clone())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(ClimateAdapter::new(
                        appliance.id.clone(),
                        ModeMemory::with_defaults(self.inner.default_targets.clone()),
                    )))
                });
            let mut adapter = lock(adapter);
            let before = adapter.state().clone();
            adapter.refresh(aircon, room_temperature(&appliance.device_id));
            if !before.available {
                events.push(HubEvent::AvailabilityChanged {
                    id: appliance.id.clone(),
                    available: true,
                });
            }
            if *adapter.state() != before {
                events.push(HubEvent::ClimateChanged {
                    id: appliance.id.clone(),
                    state: adapter.state().clone(),
                });
            }
        }

        // Removed appliances are dropped with their memory; malformed ones
        // stay, unavailable, until a valid record comes back.
        state.climates.retain(|id, adapter| {
            if present.contains(id) {
                return true;
            }
            if lock(adapter).mark_unavailable() {
                events.push(HubEvent::AvailabilityChanged {
                    id: id.clone(),
                    available: false,
                });
            }
            catalog.rejected_ids.contains(id)
        });

        // Malformed records keep their last good version for this cycle.
        let mut appliances = catalog.appliances;
        appliances.extend(
            state
                .appliances
                .iter()
                .filter(|a| catalog.rejected_ids.contains(&a.id))
                .cloned(),
        );
        state.appliances = appliances;
        state.devices = catalog.devices;
        state.readings = readings;
        state.last_refresh = Some(now);
        trace!(events = events.len(), "catalog applied");
        events
    }

    fn mark_all_unavailable(&self) -> Vec<HubEvent> {
        let state = read(&self.inner.state);
        state
            .climates
            .iter()
            .filter(|(_, adapter)| lock(adapter).mark_unavailable())
            .map(|(id, _)| HubEvent::AvailabilityChanged {
                id: id.clone(),
                available: false,
            })
            .collect()
    }

    pub fn climate_state(&self, appliance_id: &str) -> Result<ClimateState> {
        self.with_adapter(appliance_id, |a| Ok(a.state().clone()))
    }

    pub fn climate_capabilities(&self, appliance_id: &str) -> Result<ClimateCapabilities> {
        self.with_adapter(appliance_id, |a| Ok(a.capabilities()))
    }

    pub async fn set_mode(&self, appliance_id: &str, mode: Mode) -> Result<()> {
        let command = self.prepare(appliance_id, |a| a.set_mode(mode))?;
        self.dispatch(appliance_id, command).await
    }

    pub async fn set_temperature(&self, appliance_id: &str, celsius: f64) -> Result<()> {
        let command = self.prepare(appliance_id, |a| a.set_temperature(celsius))?;
        self.dispatch(appliance_id, command).await
    }

    pub async fn set_fan_mode(&self, appliance_id: &str, fan: &str) -> Result<()> {
        let command = self.prepare(appliance_id, |a| a.set_fan_mode(fan))?;
        self.dispatch(appliance_id, command).await
    }

    pub async fn set_swing_mode(&self, appliance_id: &str, swing: &str) -> Result<()> {
        let command = self.prepare(appliance_id, |a| a.set_swing_mode(swing))?;
        self.dispatch(appliance_id, command).await
    }

    pub async fn set_preset_mode(&self, appliance_id: &str, preset: &str) -> Result<()> {
        let command = self.prepare(appliance_id, |a| a.set_preset_mode(preset))?;
        self.dispatch(appliance_id, command).await
    }

    /// Powers on in the last used mode.
    pub async fn turn_on(&self, appliance_id: &str) -> Result<()> {
        let mode = self.with_adapter(appliance_id, |a| a.resume_mode())?;
        self.set_mode(appliance_id, mode).await
    }

    pub async fn turn_off(&self, appliance_id: &str) -> Result<()> {
        self.set_mode(appliance_id, Mode::Off).await
    }

    /// Readings for a hub or a smart meter. For any other appliance the
    /// readings of the hub it is paired with.
    pub fn sensor_readings(&self, id: &str) -> Vec<SensorReading> {
        let state = read(&self.inner.state);
        if let Some(readings) = state.readings.get(id) {
            return readings.clone();
        }
        state
            .appliances
            .iter()
            .find(|a| a.id == id)
            .and_then(|a| a.device_id.as_ref())
            .and_then(|device_id| state.readings.get(device_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn appliances(&self) -> Vec<Appliance> {
        read(&self.inner.state).appliances.clone()
    }

    pub fn appliance(&self, id: &str) -> Option<Appliance> {
        read(&self.inner.state)
            .appliances
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    pub fn devices(&self) -> Vec<Device> {
        read(&self.inner.state).devices.clone()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        read(&self.inner.state).last_refresh
    }

    /// Refreshes immediately and then every poll interval until the handle
    /// is stopped or dropped. Failed polls are retried on the next tick.
    pub fn start_polling(&self) -> PollHandle {
        let hub = self.clone();
        let interval = self.inner.poll_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match hub.refresh().await {
                    Ok(RefreshOutcome::Updated) => trace!("poll complete"),
                    Ok(RefreshOutcome::Coalesced) => debug!("poll skipped, refresh in flight"),
                    Err(e) => debug!(error = %e, "poll failed, retrying next interval"),
                }
            }
        });
        info!(interval_secs = interval.as_secs(), "polling started");
        PollHandle { task }
    }

    fn with_adapter<T>(
        &self,
        appliance_id: &str,
        f: impl FnOnce(&mut ClimateAdapter) -> Result<T>,
    ) -> Result<T> {
        let state = read(&self.inner.state);
        let adapter = state
            .climates
            .get(appliance_id)
            .ok_or_else(|| Error::UnknownAppliance(appliance_id.to_string()))?;
        let mut adapter = lock(adapter);
        f(&mut *adapter)
    }

    fn prepare(
        &self,
        appliance_id: &str,
        f: impl FnOnce(&mut ClimateAdapter) -> Result<AirconCommand>,
    ) -> Result<AirconCommand> {
        let (command, changed) = self.with_adapter(appliance_id, |a| {
            let before = a.state().clone();
            let command = f(&mut *a)?;
            let changed = (*a.state() != before).then(|| a.state().clone());
            Ok((command, changed))
        })?;
        if let Some(state) = changed {
            self.emit(&[HubEvent::ClimateChanged {
                id: appliance_id.to_string(),
                state,
            }]);
        }
        Ok(command)
    }

    async fn dispatch(&self, appliance_id: &str, command: AirconCommand) -> Result<()> {
        match self.inner.api.send_command(appliance_id, &command).await {
            Ok(()) => {
                debug!(appliance = appliance_id, action = command.action(), "command accepted");
                Ok(())
            }
            Err(e) => {
                warn!(appliance = appliance_id, action = command.action(), error = %e, "command failed");
                let changed = self
                    .with_adapter(appliance_id, |a| Ok(a.mark_unavailable()))
                    .unwrap_or(false);
                if changed {
                    self.emit(&[HubEvent::AvailabilityChanged {
                        id: appliance_id.to_string(),
                        available: false,
                    }]);
                }
                Err(e)
            }
        }
    }

    fn emit(&self, events: &[HubEvent]) {
        for event in events {
            for cb in &self.inner.event_callbacks {
                cb(event);
            }
        }
    }
}

/// Background polling task. Dropping the handle stops polling.
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
        debug!("polling stopped");
    }
}

fn lock(m: &Mutex<ClimateAdapter>) -> MutexGuard<'_, ClimateAdapter> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
