/// Transfer heartbeat on the indicator pin
use crate::config::IndicatorConfig;
use crate::platform::Indicator;

/// Half period of the blink, in elapsed milliseconds
pub const BLINK_PERIOD_MS: u32 = 64;

/// Toggles the indicator every [`BLINK_PERIOD_MS`] of elapsed time while bytes
/// flow, giving a 50% duty heartbeat. Only level changes reach the pin.
#[derive(Debug, Clone)]
pub struct ActivityBlinker {
    config: Option<IndicatorConfig>,
    started: u32,
    lit: Option<bool>,
}

impl ActivityBlinker {
    pub fn new(config: Option<IndicatorConfig>, now: u32) -> Self {
        Self {
            config,
            started: now,
            lit: None,
        }
    }

    pub fn tick<I: Indicator + ?Sized>(&mut self, now: u32, indicator: &mut I) {
        let elapsed = now.wrapping_sub(self.started);
        let on = (elapsed / BLINK_PERIOD_MS) % 2 == 0;
        self.drive(on, indicator);
    }

    /// Leave the indicator in its inactive state
    pub fn finish<I: Indicator + ?Sized>(&mut self, indicator: &mut I) {
        self.drive(false, indicator);
    }

    fn drive<I: Indicator + ?Sized>(&mut self, on: bool, indicator: &mut I) {
        let Some(config) = self.config else {
            return;
        };
        if self.lit == Some(on) {
            return;
        }
        indicator.set_level(config.pin, config.level(on));
        self.lit = Some(on);
    }
}
