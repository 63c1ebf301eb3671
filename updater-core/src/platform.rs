/// Collaborator seams between the update core and the device platform
use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use crate::config::IndicatorConfig;

/// An open byte stream to the update server. Dropping it closes it.
pub trait Connection: Read + Write {
    /// Bound every subsequent `read` by `timeout`.
    ///
    /// A read that hits the bound fails with `TimedOut` or `WouldBlock`.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

/// Opens connections to the update server
pub trait Transport {
    type Conn: Connection;

    /// Connect to `host:port`, giving up once `timeout` has passed
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> io::Result<Self::Conn>;
}

/// Local file storage that receives staged files
pub trait Storage {
    type File: Write;

    /// Erase the whole filesystem
    fn format(&mut self) -> io::Result<()>;

    /// Delete `path`. Deleting a file that does not exist is not an error.
    fn remove(&mut self, path: &str) -> io::Result<()>;

    /// Create `path` for writing, truncating any existing file
    fn create(&mut self, path: &str) -> io::Result<Self::File>;
}

/// What the firmware replacement collaborator reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareOutcome {
    Failed,
    NoUpdates,
    Ok,
}

/// Everything the firmware replacement collaborator needs to fetch an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareRequest {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub indicator: Option<IndicatorConfig>,
}

/// Downloads and flashes a firmware image
pub trait FirmwareUpdater {
    fn update(&mut self, request: &FirmwareRequest) -> FirmwareOutcome;
}

/// A digital output used as a transfer activity light
pub trait Indicator {
    fn set_level(&mut self, pin: u8, high: bool);
}

/// Wrapping millisecond tick counter
pub trait MonotonicClock {
    fn now_ms(&self) -> u32;
}

/// The device services the orchestrator drives, bundled so they travel together
pub struct Platform<T, S, F, I, C> {
    pub transport: T,
    pub storage: S,
    pub firmware: F,
    pub indicator: I,
    pub clock: C,
}

/// Connect with up to `attempts` tries, all within one overall `timeout`
pub fn connect_within<T: Transport + ?Sized>(
    transport: &mut T,
    host: &str,
    port: u16,
    timeout: Duration,
    attempts: u8,
) -> io::Result<T::Conn> {
    let deadline = Instant::now() + timeout;
    let mut last_err = io::Error::new(ErrorKind::TimedOut, "connect deadline exceeded");

    for attempt in 1..=attempts.max(1) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match transport.connect(host, port, remaining) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                log::debug!("Connect to {}:{} failed (attempt {}): {}", host, port, attempt, e);
                last_err = e;
            }
        }
    }

    Err(last_err)
}

/// Indicator that drives nothing, for boards without a spare LED
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIndicator;

impl Indicator for NoIndicator {
    fn set_level(&mut self, _pin: u8, _high: bool) {}
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Conn = T::Conn;

    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> io::Result<Self::Conn> {
        (**self).connect(host, port, timeout)
    }
}

impl<S: Storage + ?Sized> Storage for &mut S {
    type File = S::File;

    fn format(&mut self) -> io::Result<()> {
        (**self).format()
    }

    fn remove(&mut self, path: &str) -> io::Result<()> {
        (**self).remove(path)
    }

    fn create(&mut self, path: &str) -> io::Result<Self::File> {
        (**self).create(path)
    }
}

impl<I: Indicator + ?Sized> Indicator for &mut I {
    fn set_level(&mut self, pin: u8, high: bool) {
        (**self).set_level(pin, high)
    }
}

impl<C: MonotonicClock + ?Sized> MonotonicClock for &C {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}
