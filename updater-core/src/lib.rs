//! Updater Core - Hardware-independent OTA update orchestration
//!
//! This crate contains the polling, descriptor scraping, version comparison and
//! staged update logic. Everything that touches the network, the filesystem or
//! the flash goes through the traits in [`platform`], so the whole update
//! sequence can be exercised on the host platform.

pub mod activity;
pub mod clock;
pub mod config;
pub mod extract;
pub mod http;
pub mod orchestrator;
pub mod platform;
pub mod poller;
pub mod staging;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

pub use activity::ActivityBlinker;
pub use clock::{SystemClock, UpdateClock};
pub use config::{IndicatorConfig, Timeouts, UpdaterConfig};
pub use orchestrator::{Phase, UpdateOrchestrator};
pub use platform::{
    Connection, FirmwareOutcome, FirmwareRequest, FirmwareUpdater, Indicator, MonotonicClock,
    NoIndicator, Platform, Storage, Transport,
};
pub use staging::StagingError;
pub use version::{UpdateStatus, VersionDescriptor};
