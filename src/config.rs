use anyhow::Result;
use serde::{Deserialize, Serialize};
use updater_core::UpdaterConfig;

#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

#[cfg(target_os = "espidf")]
const CONFIG_NAMESPACE: &str = "updater";
#[cfg(target_os = "espidf")]
const CONFIG_KEY: &str = "config";

/// Host builds keep the configuration next to the binary
#[cfg(not(target_os = "espidf"))]
pub const CONFIG_FILE: &str = "updater.json";

const MAX_CONFIG_SIZE: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,

    pub log_level: String,

    // OTA settings
    pub updater: UpdaterConfig,
}

impl Default for Config {
    fn default() -> Self {
        // Compiled in by build.rs from ota_config.h, which should NOT be committed to git
        let wifi_ssid = env!("WIFI_SSID");
        let wifi_password = env!("WIFI_PASSWORD");
        let ota_host = env!("OTA_HOST");
        let ota_path = env!("OTA_PATH");

        let mut updater = UpdaterConfig::default();
        updater.hostname = ota_host.to_string();
        if !ota_path.is_empty() {
            updater.resource_path = ota_path.to_string();
        }

        Self {
            wifi_ssid: wifi_ssid.to_string(),
            wifi_password: wifi_password.to_string(),
            log_level: "info".to_string(),
            updater,
        }
    }
}

impl Config {
    /// Fill empty credentials and update server from the compiled defaults.
    /// Returns true when anything changed.
    fn merge_compiled_defaults(&mut self) -> bool {
        let defaults = Config::default();
        let mut changed = false;

        if self.wifi_ssid.is_empty() && !defaults.wifi_ssid.is_empty() {
            log::warn!("Stored WiFi credentials empty, using compiled defaults: SSID='{}'", defaults.wifi_ssid);
            self.wifi_ssid = defaults.wifi_ssid;
            self.wifi_password = defaults.wifi_password;
            changed = true;
        }
        if self.updater.hostname.is_empty() && !defaults.updater.hostname.is_empty() {
            log::warn!("Stored update server empty, using compiled default: {}", defaults.updater.hostname);
            self.updater.hostname = defaults.updater.hostname;
            self.updater.resource_path = defaults.updater.resource_path;
            changed = true;
        }
        changed
    }

    pub fn save(&self, store: &mut ConfigStore) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        if json.len() > MAX_CONFIG_SIZE {
            anyhow::bail!("Config is {} bytes, limit is {}", json.len(), MAX_CONFIG_SIZE);
        }
        store.write(&json)?;
        log::info!("Configuration saved");
        Ok(())
    }
}

pub fn load_or_default(store: &mut ConfigStore) -> Result<Config> {
    let loaded = store
        .read()
        .and_then(|data| match data {
            Some(bytes) => Ok(serde_json::from_slice::<Config>(&bytes)?),
            None => anyhow::bail!("Config not found"),
        });

    match loaded {
        Ok(mut config) => {
            log::info!("Loaded stored configuration");
            if config.merge_compiled_defaults() {
                if let Err(e) = config.save(store) {
                    log::warn!("Failed to save updated config: {:?}", e);
                }
            }
            Ok(config)
        }
        Err(e) => {
            log::warn!("Failed to load config: {:?}, using defaults", e);
            let config = Config::default();

            // Try to save default config for next time
            if let Err(save_err) = config.save(store) {
                log::warn!("Failed to save default config: {:?}", save_err);
            }

            Ok(config)
        }
    }
}

/// Where the JSON configuration blob lives
#[cfg(target_os = "espidf")]
pub struct ConfigStore {
    nvs: EspNvs<NvsDefault>,
}

#[cfg(target_os = "espidf")]
impl ConfigStore {
    pub fn open(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, CONFIG_NAMESPACE, true)?;
        Ok(Self { nvs })
    }

    fn read(&self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; MAX_CONFIG_SIZE];
        Ok(self.nvs.get_blob(CONFIG_KEY, &mut buf)?.map(|data| data.to_vec()))
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.nvs.set_blob(CONFIG_KEY, data)?;
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
pub struct ConfigStore {
    path: std::path::PathBuf,
}

#[cfg(not(target_os = "espidf"))]
impl ConfigStore {
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        Ok(Self { path: path.into() })
    }

    fn read(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}
