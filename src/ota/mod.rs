// OTA (Over-The-Air) firmware replacement

pub mod manager;

#[cfg(target_os = "espidf")]
pub use manager::{EspHttpUpdater, EspOtaSink};
#[cfg(not(target_os = "espidf"))]
pub use manager::{FileImageSink, OtaManager};

/// Confirm the image we booted from so the bootloader does not roll it back
#[cfg(target_os = "espidf")]
pub fn confirm_running_slot() -> anyhow::Result<String> {
    let mut ota = esp_idf_svc::ota::EspOta::new()?;
    let running_slot = ota.get_running_slot()?;
    ota.mark_running_slot_valid()?;
    let slot = format!("{} ({:?})", running_slot.label, running_slot.state);
    log::info!("OTA slot: {}", slot);
    Ok(slot)
}
