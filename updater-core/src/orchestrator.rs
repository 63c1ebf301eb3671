/// Top-level update state machine
///
/// `Idle → Checking → StagingFiles → FlashingFirmware → Idle`. Every call
/// starts from `Idle` and ends there; nothing about a failed attempt is kept
/// except the candidate descriptor and the poll timer.
use core::fmt;

use crate::clock::UpdateClock;
use crate::config::{IndicatorConfig, UpdaterConfig};
use crate::platform::{
    FirmwareOutcome, FirmwareRequest, FirmwareUpdater, Indicator, MonotonicClock, Platform,
    Storage, Transport,
};
use crate::poller::VersionPoller;
use crate::staging::Stager;
use crate::version::{UpdateStatus, VersionDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Checking,
    StagingFiles,
    FlashingFirmware,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Checking => write!(f, "Checking"),
            Phase::StagingFiles => write!(f, "Staging files"),
            Phase::FlashingFirmware => write!(f, "Flashing firmware"),
        }
    }
}

impl From<FirmwareOutcome> for UpdateStatus {
    fn from(outcome: FirmwareOutcome) -> Self {
        match outcome {
            FirmwareOutcome::Failed => UpdateStatus::Failed,
            FirmwareOutcome::NoUpdates => UpdateStatus::NoUpdates,
            FirmwareOutcome::Ok => UpdateStatus::Ok,
        }
    }
}

pub struct UpdateOrchestrator<T, S, F, I, C> {
    config: UpdaterConfig,
    current: VersionDescriptor,
    poller: VersionPoller,
    clock: UpdateClock,
    phase: Phase,
    platform: Platform<T, S, F, I, C>,
}

impl<T, S, F, I, C> UpdateOrchestrator<T, S, F, I, C>
where
    T: Transport,
    S: Storage,
    F: FirmwareUpdater,
    I: Indicator,
    C: MonotonicClock,
{
    pub fn new(
        config: UpdaterConfig,
        current: VersionDescriptor,
        platform: Platform<T, S, F, I, C>,
    ) -> Self {
        log::info!(
            "OTA updater for {}:{}{} (running {})",
            config.hostname,
            config.port,
            config.resource_path,
            current
        );
        Self {
            config,
            current,
            poller: VersionPoller::new(),
            clock: UpdateClock::new(),
            phase: Phase::Idle,
            platform,
        }
    }

    pub fn set_current_version(&mut self, v1: u8, v2: u8, v3: u8, v4: u8) {
        self.current = VersionDescriptor::new(v1, v2, v3, v4);
    }

    pub fn set_indicator_pin(&mut self, pin: u8, active_high: bool) {
        self.config.indicator = Some(IndicatorConfig { pin, active_high });
        // park the pin in its inactive state
        self.platform.indicator.set_level(pin, !active_high);
    }

    pub fn current_version(&self) -> &VersionDescriptor {
        &self.current
    }

    pub fn candidate_version(&self) -> &VersionDescriptor {
        self.poller.candidate()
    }

    pub fn file_list(&self) -> &[String] {
        self.poller.files()
    }

    pub fn reformat_requested(&self) -> bool {
        self.poller.reformat_requested()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn platform(&self) -> &Platform<T, S, F, I, C> {
        &self.platform
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            log::debug!("OTA phase: {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Fetch the descriptor if `interval_secs` have passed since the last
    /// attempt, and return the candidate as it stands afterwards.
    pub fn poll(&mut self, interval_secs: u32) -> &VersionDescriptor {
        let now = self.platform.clock.now_ms();
        if self.clock.poll_if_due(now, interval_secs) {
            self.enter(Phase::Checking);
            self.poller
                .fetch(&mut self.platform.transport, &self.config, &self.current);
            self.enter(Phase::Idle);
        }
        self.poller.candidate()
    }

    /// Poll when due, then report whether the candidate is newer than what runs
    pub fn check_for_update(&mut self, interval_secs: u32) -> bool {
        let candidate = *self.poll(interval_secs);
        candidate > self.current
    }

    /// Stage every auxiliary file, then replace the firmware.
    ///
    /// Nothing happens, and no I/O is done, unless a newer candidate is known.
    pub fn run_update(&mut self) -> UpdateStatus {
        if !self.check_for_update(self.config.poll_interval_secs) {
            log::info!(
                "No update available (running {}, server {})",
                self.current,
                self.poller.candidate()
            );
            return UpdateStatus::NoUpdates;
        }

        log::info!(
            "Self update starting: {} -> {}",
            self.current,
            self.poller.candidate()
        );

        self.enter(Phase::StagingFiles);
        let staged = Stager {
            config: &self.config,
            transport: &mut self.platform.transport,
            storage: &mut self.platform.storage,
            indicator: &mut self.platform.indicator,
            clock: &self.platform.clock,
        }
        .stage_all(self.poller.files(), self.poller.reformat_requested());

        if let Err(e) = staged {
            log::error!("File staging failed, firmware left untouched: {}", e);
            self.enter(Phase::Idle);
            return UpdateStatus::StorageStagingFailure;
        }

        self.enter(Phase::FlashingFirmware);
        let request = FirmwareRequest {
            host: self.config.hostname.clone(),
            port: self.config.port,
            path: self.config.resource_path.clone(),
            indicator: self.config.indicator,
        };
        let outcome = self.platform.firmware.update(&request);
        self.enter(Phase::Idle);

        match outcome {
            FirmwareOutcome::Failed => log::error!("Firmware update failed"),
            FirmwareOutcome::NoUpdates => log::info!("Firmware server reported no update"),
            FirmwareOutcome::Ok => log::info!("Firmware update OK"),
        }
        outcome.into()
    }
}
