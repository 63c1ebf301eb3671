use updater_core::Indicator;

#[cfg(target_os = "espidf")]
use esp_idf_hal::gpio::{AnyOutputPin, Level, Output, PinDriver};
#[cfg(target_os = "espidf")]
use esp_idf_sys::EspError;

/// Drives the activity LED through the GPIO number the update configuration names
#[cfg(target_os = "espidf")]
#[derive(Default)]
pub struct GpioIndicator {
    driver: Option<(u8, PinDriver<'static, AnyOutputPin, Output>)>,
}

#[cfg(target_os = "espidf")]
impl GpioIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    fn driver(&mut self, pin: u8) -> Result<&mut PinDriver<'static, AnyOutputPin, Output>, EspError> {
        if !matches!(self.driver, Some((current, _)) if current == pin) {
            // the pin number comes from configuration, not from `Peripherals`
            let gpio = unsafe { AnyOutputPin::new(i32::from(pin)) };
            self.driver = Some((pin, PinDriver::output(gpio)?));
        }
        match self.driver.as_mut() {
            Some((_, driver)) => Ok(driver),
            None => Err(EspError::from_infallible::<{ esp_idf_sys::ESP_ERR_INVALID_STATE }>()),
        }
    }
}

#[cfg(target_os = "espidf")]
impl Indicator for GpioIndicator {
    fn set_level(&mut self, pin: u8, high: bool) {
        let result = self
            .driver(pin)
            .and_then(|driver| driver.set_level(Level::from(high)));
        if let Err(e) = result {
            log::warn!("Indicator GPIO{} write failed: {}", pin, e);
        }
    }
}

/// Host stand-in that only traces level changes
#[derive(Debug, Default)]
pub struct LogIndicator {
    levels: Vec<(u8, bool)>,
}

impl LogIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, pin: u8) -> Option<bool> {
        self.levels.iter().find(|(p, _)| *p == pin).map(|(_, l)| *l)
    }
}

impl Indicator for LogIndicator {
    fn set_level(&mut self, pin: u8, high: bool) {
        log::trace!("Indicator GPIO{} -> {}", pin, if high { "high" } else { "low" });
        match self.levels.iter_mut().find(|(p, _)| *p == pin) {
            Some(entry) => entry.1 = high,
            None => self.levels.push((pin, high)),
        }
    }
}
