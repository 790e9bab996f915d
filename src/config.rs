use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;
use tracing::warn;

use crate::logger::MessageLogMode;
use crate::protocol::DEFAULT_BASE_URL;
use crate::types::{Mode, Temperature};
use crate::{Error, Result};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STALE_AFTER_SECS: u64 = 3600;

/// The cloud allows 30 requests per 5 minutes and a refresh costs two.
pub const MIN_SAFE_POLL_INTERVAL_SECS: u64 = 20;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Opaque bearer token, passed through untouched.
    pub access_token: String,
    pub base_url: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Hubs silent for longer than this stop reporting sensor values.
    pub stale_after_secs: u64,
    /// Preferred setpoint per mode name (`cool = 28`) for modes with no history.
    pub default_temperatures: BTreeMap<String, f64>,
    pub message_log: Option<MessageLogConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageLogConfig {
    pub path: String,
    #[serde(default)]
    pub diffed: bool,
}

impl MessageLogConfig {
    pub fn mode(&self) -> MessageLogMode {
        if self.diffed {
            MessageLogMode::Diffed
        } else {
            MessageLogMode::Full
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            default_temperatures: BTreeMap::new(),
            message_log: None,
        }
    }
}

impl fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubConfig")
            .field("access_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("stale_after_secs", &self.stale_after_secs)
            .field("default_temperatures", &self.default_temperatures)
            .field("message_log", &self.message_log)
            .finish()
    }
}

impl HubConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: HubConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".into()));
        }
        if self.poll_interval_secs < MIN_SAFE_POLL_INTERVAL_SECS {
            warn!(
                interval = self.poll_interval_secs,
                minimum = MIN_SAFE_POLL_INTERVAL_SECS,
                "poll interval likely to exceed the cloud rate limit"
            );
        }
        for (name, value) in &self.default_temperatures {
            let mode = Mode::from_remo_str(name);
            if !mode.is_commandable() || mode == Mode::Off || !value.is_finite() {
                return Err(Error::Config(format!(
                    "invalid default temperature {name} = {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stale_after(&self) -> TimeDelta {
        i64::try_from(self.stale_after_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn default_targets(&self) -> HashMap<Mode, Temperature> {
        self.default_temperatures
            .iter()
            .map(|(name, t)| (Mode::from_remo_str(name), Temperature::from_celsius(*t)))
            .collect()
    }
}
