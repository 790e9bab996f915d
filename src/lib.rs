mod climate;
mod client;
mod config;
mod diff;
mod error;
mod hub;
mod logger;
mod memory;
mod normalize;
mod protocol;
mod sensor;
mod types;

pub use climate::ClimateAdapter;
pub use client::{RemoApi, RemoClient, RemoClientBuilder};
pub use config::{HubConfig, MessageLogConfig};
pub use error::{Error, Result};
pub use hub::{PollHandle, RemoHub, RemoHubBuilder};
pub use logger::MessageLogMode;
pub use memory::ModeMemory;
pub use normalize::{NormalizedCatalog, normalize_appliance, normalize_catalog};
pub use protocol::{AirconCommand, RawCatalog};
pub use sensor::{device_readings, meter_readings};
pub use types::*;
