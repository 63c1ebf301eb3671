// Centralized version information

use updater_core::VersionDescriptor;

// Cargo package version from Cargo.toml
pub const CARGO_VERSION: &str = env!("CARGO_PKG_VERSION");

const MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");
const MINOR: &str = env!("CARGO_PKG_VERSION_MINOR");
const PATCH: &str = env!("CARGO_PKG_VERSION_PATCH");

// The running firmware as the update server numbers it: major.minor.patch.0
pub fn current() -> VersionDescriptor {
    VersionDescriptor::new(component(MAJOR), component(MINOR), component(PATCH), 0)
}

// Components past 255 cannot be expressed on the wire, so they saturate
fn component(s: &str) -> u8 {
    s.parse::<u32>().map(|n| n.min(u8::MAX as u32) as u8).unwrap_or(0)
}

// Version info string for logging
pub fn version_info() -> String {
    format!("Firmware: {} (Cargo: {})", current(), CARGO_VERSION)
}
