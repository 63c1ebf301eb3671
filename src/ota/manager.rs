// OTA Manager - downloads the firmware image and hands it to an image sink.
// The device goes through the ESP-IDF HTTP client, the host through a plain Transport.

use std::io::Write;

use anyhow::{bail, Context, Result};
use updater_core::{
    ActivityBlinker, FirmwareOutcome, FirmwareRequest, FirmwareUpdater, Indicator, MonotonicClock,
    Timeouts,
};

#[cfg(not(target_os = "espidf"))]
use std::{
    fs::{self, File},
    io::BufWriter,
    path::PathBuf,
};
#[cfg(not(target_os = "espidf"))]
use updater_core::http::{is_timeout, send_get, ResponseReader};
#[cfg(not(target_os = "espidf"))]
use updater_core::platform::connect_within;
#[cfg(not(target_os = "espidf"))]
use updater_core::{Connection, Transport};

/// Firmware should never be larger than the OTA slot
pub const MAX_IMAGE_SIZE: u64 = 4 * 1024 * 1024;

const CHUNK_SIZE: usize = 4096;

/// Where a downloaded image goes. Nothing is activated unless `fill` succeeds.
pub trait ImageSink {
    fn install<F>(&mut self, fill: F) -> Result<u64>
    where
        F: FnOnce(&mut dyn Write) -> Result<u64>;
}

/// Writes `<path>.part` and renames it over `path` once the image is complete
#[cfg(not(target_os = "espidf"))]
pub struct FileImageSink {
    path: PathBuf,
}

#[cfg(not(target_os = "espidf"))]
impl FileImageSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn partial_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".part");
        PathBuf::from(name)
    }
}

#[cfg(not(target_os = "espidf"))]
impl ImageSink for FileImageSink {
    fn install<F>(&mut self, fill: F) -> Result<u64>
    where
        F: FnOnce(&mut dyn Write) -> Result<u64>,
    {
        let partial = self.partial_path();
        let file = File::create(&partial)
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        let mut out = BufWriter::new(file);

        let written = fill(&mut out).and_then(|n| {
            out.flush()?;
            Ok(n)
        });
        drop(out);

        match written {
            Ok(n) => {
                fs::rename(&partial, &self.path)?;
                log::info!("Firmware image written to {}", self.path.display());
                Ok(n)
            }
            Err(e) => {
                let _ = fs::remove_file(&partial);
                Err(e)
            }
        }
    }
}

/// Writes the image into the next OTA partition and marks it for boot
#[cfg(target_os = "espidf")]
pub struct EspOtaSink {
    ota: esp_idf_svc::ota::EspOta,
}

#[cfg(target_os = "espidf")]
impl EspOtaSink {
    pub fn new() -> Result<Self> {
        Ok(Self {
            ota: esp_idf_svc::ota::EspOta::new()?,
        })
    }
}

#[cfg(target_os = "espidf")]
struct OtaWriter<'a>(esp_idf_svc::ota::EspOtaUpdate<'a>);

#[cfg(target_os = "espidf")]
impl Write for OtaWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .write(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
impl ImageSink for EspOtaSink {
    fn install<F>(&mut self, fill: F) -> Result<u64>
    where
        F: FnOnce(&mut dyn Write) -> Result<u64>,
    {
        let mut writer = OtaWriter(self.ota.initiate_update()?);
        match fill(&mut writer) {
            Ok(n) => {
                // validates the image and switches the boot partition
                writer.0.complete()?;
                Ok(n)
            }
            Err(e) => {
                if let Err(abort_err) = writer.0.abort() {
                    log::warn!("OTA abort failed: {}", abort_err);
                }
                Err(e)
            }
        }
    }
}

/// Replaces the firmware from `http://host:port/path` over a plain [`Transport`].
///
/// `304` means the server has nothing newer; `200` with a complete image
/// written to the sink means success; anything else fails.
#[cfg(not(target_os = "espidf"))]
pub struct OtaManager<T, I, C, K> {
    transport: T,
    indicator: I,
    clock: C,
    sink: K,
    timeouts: Timeouts,
    connect_retries: u8,
}

#[cfg(not(target_os = "espidf"))]
impl<T, I, C, K> OtaManager<T, I, C, K>
where
    T: Transport,
    I: Indicator,
    C: MonotonicClock,
    K: ImageSink,
{
    pub fn new(transport: T, indicator: I, clock: C, sink: K) -> Self {
        Self {
            transport,
            indicator,
            clock,
            sink,
            timeouts: Timeouts::default(),
            connect_retries: updater_core::config::CONNECT_RETRIES,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts, connect_retries: u8) -> Self {
        self.timeouts = timeouts;
        self.connect_retries = connect_retries;
        self
    }

    fn try_update(&mut self, request: &FirmwareRequest) -> Result<FirmwareOutcome> {
        log::info!(
            "Fetching firmware from http://{}:{}{}",
            request.host,
            request.port,
            request.path
        );

        let mut conn = connect_within(
            &mut self.transport,
            &request.host,
            request.port,
            self.timeouts.connect(),
            self.connect_retries,
        )
        .with_context(|| format!("Failed to connect to {}:{}", request.host, request.port))?;
        conn.set_read_timeout(self.timeouts.response())?;
        send_get(&mut conn, &request.host, request.port, &request.path)?;

        let mut reader = ResponseReader::new(conn);
        let head = reader.read_head().context("No response to firmware request")?;
        match head.status {
            304 => return Ok(FirmwareOutcome::NoUpdates),
            200 => {}
            other => bail!("Firmware request answered HTTP {}", other),
        }

        let expected = head.content_length;
        if let Some(len) = expected {
            if len == 0 || len > MAX_IMAGE_SIZE {
                bail!("Firmware size {} out of range", len);
            }
        }

        let mut blinker = ActivityBlinker::new(request.indicator, self.clock.now_ms());
        let indicator = &mut self.indicator;
        let clock = &self.clock;
        let written = self.sink.install(|out| {
            let read = |buf: &mut [u8]| match reader.read_body(buf) {
                Err(e) if is_timeout(&e) => bail!("Firmware stream stalled"),
                other => other.context("Firmware read failed"),
            };
            let result = copy_image(read, out, expected, |received| {
                log::debug!("OTA progress: {} bytes", received);
                blinker.tick(clock.now_ms(), &mut *indicator);
            });
            blinker.finish(&mut *indicator);
            result
        })?;

        log::info!("Firmware image complete: {} bytes", written);
        Ok(FirmwareOutcome::Ok)
    }
}

#[cfg(not(target_os = "espidf"))]
impl<T, I, C, K> FirmwareUpdater for OtaManager<T, I, C, K>
where
    T: Transport,
    I: Indicator,
    C: MonotonicClock,
    K: ImageSink,
{
    fn update(&mut self, request: &FirmwareRequest) -> FirmwareOutcome {
        match self.try_update(request) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Firmware update failed: {:#}", e);
                FirmwareOutcome::Failed
            }
        }
    }
}

/// Copy the image from `read` to `out`. With a known length every byte must
/// arrive; without one the image ends when `read` returns 0.
fn copy_image<R>(
    mut read: R,
    out: &mut dyn Write,
    expected: Option<u64>,
    mut progress: impl FnMut(u64),
) -> Result<u64>
where
    R: FnMut(&mut [u8]) -> Result<usize>,
{
    let mut buf = [0u8; CHUNK_SIZE];
    let mut received = 0u64;

    loop {
        if expected.is_some_and(|len| received >= len) {
            break;
        }
        let want = match expected {
            Some(len) => (len - received).min(CHUNK_SIZE as u64) as usize,
            None => CHUNK_SIZE,
        };
        let n = read(&mut buf[..want]).with_context(|| format!("after {} bytes", received))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        received += n as u64;
        if received > MAX_IMAGE_SIZE {
            bail!("Firmware larger than {} bytes", MAX_IMAGE_SIZE);
        }
        progress(received);
    }

    match expected {
        Some(len) if received < len => bail!("Firmware truncated: {} of {} bytes", received, len),
        _ if received == 0 => bail!("Firmware image is empty"),
        _ => Ok(received),
    }
}

/// How one device download attempt ended
#[cfg(target_os = "espidf")]
enum Attempt {
    /// The request never got an answer; another attempt may help
    Unreachable(anyhow::Error),
    Done(FirmwareOutcome),
}

/// Replaces the firmware through the ESP-IDF HTTP client, streaming the image
/// straight into the next OTA partition.
///
/// Same rules as the host path: `304` is NoUpdates, `200` with a complete
/// image is Ok, anything else fails. Requests that get no answer are retried
/// up to `connect_retries` times within the connect deadline.
#[cfg(target_os = "espidf")]
pub struct EspHttpUpdater<I, C> {
    indicator: I,
    clock: C,
    sink: EspOtaSink,
    timeouts: Timeouts,
    connect_retries: u8,
}

#[cfg(target_os = "espidf")]
impl<I, C> EspHttpUpdater<I, C>
where
    I: Indicator,
    C: MonotonicClock,
{
    pub fn new(indicator: I, clock: C, sink: EspOtaSink) -> Self {
        Self {
            indicator,
            clock,
            sink,
            timeouts: Timeouts::default(),
            connect_retries: updater_core::config::CONNECT_RETRIES,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts, connect_retries: u8) -> Self {
        self.timeouts = timeouts;
        self.connect_retries = connect_retries;
        self
    }

    fn try_update(&mut self, request: &FirmwareRequest) -> Result<FirmwareOutcome> {
        let url = format!("http://{}:{}{}", request.host, request.port, request.path);
        log::info!("Fetching firmware from {}", url);

        let deadline = std::time::Instant::now() + self.timeouts.connect();
        let mut attempt = 1;
        loop {
            match self.download(&url, request)? {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::Unreachable(e)
                    if attempt < self.connect_retries.max(1)
                        && std::time::Instant::now() < deadline =>
                {
                    log::debug!("Firmware request failed (attempt {}): {:#}", attempt, e);
                    attempt += 1;
                }
                Attempt::Unreachable(e) => {
                    return Err(e.context(format!("No answer from {}", url)));
                }
            }
        }
    }

    fn download(&mut self, url: &str, request: &FirmwareRequest) -> Result<Attempt> {
        use embedded_svc::http::client::Client;
        use embedded_svc::http::{Headers, Method, Status};
        use embedded_svc::io::Read;
        use esp_idf_svc::http::client::{Configuration as HttpConfig, EspHttpConnection};

        let config = HttpConfig {
            buffer_size: Some(CHUNK_SIZE),
            timeout: Some(self.timeouts.response()),
            ..Default::default()
        };
        let mut client = Client::wrap(EspHttpConnection::new(&config)?);
        let headers = [("Accept", "application/octet-stream")];
        let mut response = match client.request(Method::Get, url, &headers).and_then(|r| r.submit()) {
            Ok(response) => response,
            Err(e) => return Ok(Attempt::Unreachable(e.into())),
        };

        match response.status() {
            304 => return Ok(Attempt::Done(FirmwareOutcome::NoUpdates)),
            200 => {}
            other => bail!("Firmware request answered HTTP {}", other),
        }

        let expected = response.content_len();
        if let Some(len) = expected {
            if len == 0 || len > MAX_IMAGE_SIZE {
                bail!("Firmware size {} out of range", len);
            }
        }

        let mut blinker = ActivityBlinker::new(request.indicator, self.clock.now_ms());
        let indicator = &mut self.indicator;
        let clock = &self.clock;
        let written = self.sink.install(|out| {
            let read = |buf: &mut [u8]| {
                response
                    .read(buf)
                    .map_err(|e| anyhow::anyhow!("Firmware read failed: {}", e))
            };
            let result = copy_image(read, out, expected, |received| {
                log::debug!("OTA progress: {} bytes", received);
                blinker.tick(clock.now_ms(), &mut *indicator);
            });
            blinker.finish(&mut *indicator);
            result
        })?;

        log::info!("Firmware image complete: {} bytes", written);
        Ok(Attempt::Done(FirmwareOutcome::Ok))
    }
}

#[cfg(target_os = "espidf")]
impl<I, C> FirmwareUpdater for EspHttpUpdater<I, C>
where
    I: Indicator,
    C: MonotonicClock,
{
    fn update(&mut self, request: &FirmwareRequest) -> FirmwareOutcome {
        match self.try_update(request) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Firmware update failed: {:#}", e);
                FirmwareOutcome::Failed
            }
        }
    }
}
