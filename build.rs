use std::fs;
use std::path::Path;

/// `#define` names read from `ota_config.h` and exported as compile-time env vars
const CONFIG_DEFINES: [&str; 4] = ["WIFI_SSID", "WIFI_PASSWORD", "OTA_HOST", "OTA_PATH"];

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }

    let config_path = "ota_config.h";
    println!("cargo:rerun-if-changed={}", config_path);

    let contents = if Path::new(config_path).exists() {
        fs::read_to_string(config_path)?
    } else {
        println!("cargo:warning=ota_config.h not found! Copy ota_config.h.example to ota_config.h and fill in your network and update server.");
        String::new()
    };

    for name in CONFIG_DEFINES {
        let value = contents
            .lines()
            .find(|l| l.contains(&format!("#define {}", name)))
            .and_then(|l| l.split('"').nth(1))
            .unwrap_or("");
        println!("cargo:rustc-env={}={}", name, value);
    }

    Ok(())
}
