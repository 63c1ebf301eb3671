use anyhow::Result;
use std::time::Duration;

use log::info;
use updater_core::{
    FirmwareUpdater, Indicator, MonotonicClock, Storage, Transport, UpdateOrchestrator,
    UpdateStatus,
};

// Generate ESP-IDF app descriptor
#[cfg(target_os = "espidf")]
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod config;
mod indicator;
mod logging;
mod network;
mod ota;
mod storage;
mod version;

#[cfg(test)]
mod tests;

/// How often the loop wakes up; the poll interval itself comes from config
const LOOP_TICK: Duration = Duration::from_secs(1);

/// Poll every tick and run the update once one is available.
///
/// Returns after a firmware image was installed, leaving the restart to the caller.
fn update_loop<T, S, F, I, C>(
    ota: &mut UpdateOrchestrator<T, S, F, I, C>,
    mut keep_alive: impl FnMut() -> Result<()>,
) -> Result<()>
where
    T: Transport,
    S: Storage,
    F: FirmwareUpdater,
    I: Indicator,
    C: MonotonicClock,
{
    let interval = ota.config().poll_interval_secs;
    loop {
        if let Err(e) = keep_alive() {
            log::warn!("Network not ready: {:#}", e);
        } else if ota.check_for_update(interval) {
            match ota.run_update() {
                UpdateStatus::Ok => return Ok(()),
                status => log::warn!("Update attempt ended: {}", status),
            }
        }
        std::thread::sleep(LOOP_TICK);
    }
}

#[cfg(target_os = "espidf")]
fn main() -> Result<()> {
    use esp_idf_hal::prelude::Peripherals;
    use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};
    use updater_core::{Platform, SystemClock};

    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();
    logging::init_logger().map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;
    info!("ESP32 OTA updater {}", version::version_info());

    if let Err(e) = ota::confirm_running_slot() {
        log::warn!("Could not confirm running OTA slot: {:?}", e);
    }

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let mut store = config::ConfigStore::open(nvs.clone())?;
    let config = config::load_or_default(&mut store)?;
    logging::set_max_level_from_str(&config.log_level);

    let mut wifi = network::wifi::WifiManager::new(
        peripherals.modem,
        sys_loop,
        nvs,
        &config.wifi_ssid,
        &config.wifi_password,
    )?;
    wifi.connect()?;

    let updater = &config.updater;
    if !updater.is_configured() {
        anyhow::bail!("No update server configured, check ota_config.h");
    }

    let firmware = ota::EspHttpUpdater::new(
        indicator::GpioIndicator::new(),
        SystemClock::new(),
        ota::EspOtaSink::new()?,
    )
    .with_timeouts(updater.timeouts, updater.connect_retries);

    let mut orchestrator = UpdateOrchestrator::new(
        updater.clone(),
        version::current(),
        Platform {
            transport: network::TcpTransport::new(),
            storage: storage::FsStorage::mount_spiffs()?,
            firmware,
            indicator: indicator::GpioIndicator::new(),
            clock: SystemClock::new(),
        },
    );
    if let Some(led) = updater.indicator {
        orchestrator.set_indicator_pin(led.pin, led.active_high);
    }

    update_loop(&mut orchestrator, || wifi.ensure_connected())?;

    info!("Update done. Restarting...");
    std::thread::sleep(Duration::from_secs(1));
    esp_idf_hal::reset::restart();
}

/// Host build: same updater, with a local directory standing in for SPIFFS and
/// a file standing in for the OTA partition.
#[cfg(not(target_os = "espidf"))]
fn main() -> Result<()> {
    use updater_core::{Platform, SystemClock};

    logging::init_logger().map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;
    info!("OTA updater (host) {}", version::version_info());

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::CONFIG_FILE.to_string());
    let mut store = config::ConfigStore::open(&config_path)?;
    let config = config::load_or_default(&mut store)?;
    logging::set_max_level_from_str(&config.log_level);

    let updater = &config.updater;
    if !updater.is_configured() {
        anyhow::bail!("No update server configured in {}", config_path);
    }

    let firmware = ota::OtaManager::new(
        network::TcpTransport::new(),
        indicator::LogIndicator::new(),
        SystemClock::new(),
        ota::FileImageSink::new("firmware.bin"),
    )
    .with_timeouts(updater.timeouts, updater.connect_retries);

    let storage = storage::FsStorage::new(storage::SPIFFS_BASE_PATH.trim_start_matches('/'));
    info!("Staging files under {}", storage.root().display());

    let mut orchestrator = UpdateOrchestrator::new(
        updater.clone(),
        version::current(),
        Platform {
            transport: network::TcpTransport::new(),
            storage,
            firmware,
            indicator: indicator::LogIndicator::new(),
            clock: SystemClock::new(),
        },
    );
    if let Some(led) = updater.indicator {
        orchestrator.set_indicator_pin(led.pin, led.active_high);
    }

    update_loop(&mut orchestrator, || Ok(()))?;
    info!("Update done. Restart to run the new image");
    Ok(())
}
