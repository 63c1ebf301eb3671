/// Configuration structures that can be tested independently
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default seconds between descriptor polls
pub const DEFAULT_POLL_INTERVAL_SECS: u32 = 120;
/// Deadline for establishing any connection
pub const CONNECT_TIMEOUT_MS: u32 = 5000;
/// Deadline for the first and every further chunk of a response
pub const RESPONSE_TIMEOUT_MS: u32 = 2000;
/// Connect attempts made within the connect deadline
pub const CONNECT_RETRIES: u8 = 3;
/// Largest descriptor body accepted
pub const MAX_DESCRIPTOR_BYTES: u64 = 8192;
/// Longest single descriptor line; a compact descriptor is one line
pub const MAX_DESCRIPTOR_LINE: usize = 4096;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    pub connect_ms: u32,
    pub response_ms: u32,
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(u64::from(self.connect_ms))
    }

    pub fn response(&self) -> Duration {
        Duration::from_millis(u64::from(self.response_ms))
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_ms: CONNECT_TIMEOUT_MS,
            response_ms: RESPONSE_TIMEOUT_MS,
        }
    }
}

/// Activity light wiring: which GPIO and which level means "on"
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndicatorConfig {
    pub pin: u8,
    pub active_high: bool,
}

impl IndicatorConfig {
    pub fn level(&self, on: bool) -> bool {
        on == self.active_high
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpdaterConfig {
    pub hostname: String,
    pub port: u16,
    /// Firmware image path; the descriptor lives at `<path>.version.json`
    pub resource_path: String,
    pub poll_interval_secs: u32,
    pub connect_retries: u8,
    pub timeouts: Timeouts,
    pub indicator: Option<IndicatorConfig>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: 80,
            resource_path: "/firmware.bin".to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            connect_retries: CONNECT_RETRIES,
            timeouts: Timeouts::default(),
            indicator: None,
        }
    }
}

impl UpdaterConfig {
    pub fn new(hostname: impl Into<String>, resource_path: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            resource_path: resource_path.into(),
            port,
            ..Default::default()
        }
    }

    pub fn descriptor_path(&self) -> String {
        format!("{}.version.json", self.resource_path)
    }

    /// Resolve a server-relative file path next to the firmware resource.
    ///
    /// `/esp32/app.bin` + `/index.html` gives `/esp32/index.html`.
    pub fn sibling_path(&self, file: &str) -> String {
        let dir = match self.resource_path.rfind('/') {
            Some(idx) => &self.resource_path[..idx],
            None => "",
        };
        format!("{}/{}", dir, file.trim_start_matches('/'))
    }

    pub fn is_configured(&self) -> bool {
        !self.hostname.is_empty() && !self.resource_path.is_empty()
    }
}
