/// Auxiliary file staging: download every listed file into local storage
/// before the firmware is touched.
///
/// All-or-nothing per attempt: the first file that fails aborts the phase.
/// Files already written stay written; nothing is retried or resumed.
use core::fmt;
use std::io::{self, Write};

use crate::activity::ActivityBlinker;
use crate::config::UpdaterConfig;
use crate::http::{is_timeout, send_get, ResponseReader};
use crate::platform::{connect_within, Connection, Indicator, MonotonicClock, Storage, Transport};

const COPY_BUFFER: usize = 1024;

#[derive(Debug)]
pub enum StagingError {
    Format(io::Error),
    Connect { path: String, source: io::Error },
    Request { path: String, source: io::Error },
    Status { path: String, status: u16 },
    MissingLength { path: String },
    Truncated { path: String, expected: u64, received: u64 },
    Storage { path: String, source: io::Error },
}

impl fmt::Display for StagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagingError::Format(e) => write!(f, "storage format failed: {}", e),
            StagingError::Connect { path, source } => {
                write!(f, "{}: connection failed: {}", path, source)
            }
            StagingError::Request { path, source } => write!(f, "{}: request failed: {}", path, source),
            StagingError::Status { path, status } => write!(f, "{}: server answered HTTP {}", path, status),
            StagingError::MissingLength { path } => write!(f, "{}: no Content-Length", path),
            StagingError::Truncated { path, expected, received } => {
                write!(f, "{}: got {} of {} bytes", path, received, expected)
            }
            StagingError::Storage { path, source } => write!(f, "{}: write failed: {}", path, source),
        }
    }
}

impl std::error::Error for StagingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StagingError::Format(e)
            | StagingError::Connect { source: e, .. }
            | StagingError::Request { source: e, .. }
            | StagingError::Storage { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

/// Borrowed view of the services one staging run needs
pub struct Stager<'a, T: ?Sized, S: ?Sized, I: ?Sized, C: ?Sized> {
    pub config: &'a UpdaterConfig,
    pub transport: &'a mut T,
    pub storage: &'a mut S,
    pub indicator: &'a mut I,
    pub clock: &'a C,
}

impl<'a, T, S, I, C> Stager<'a, T, S, I, C>
where
    T: Transport + ?Sized,
    S: Storage + ?Sized,
    I: Indicator + ?Sized,
    C: MonotonicClock + ?Sized,
{
    /// Stage `files` in order, formatting storage first when `reformat` is set.
    /// Returns the total number of bytes written.
    pub fn stage_all(&mut self, files: &[String], reformat: bool) -> Result<u64, StagingError> {
        if files.is_empty() {
            log::info!("No auxiliary files to stage");
            return Ok(0);
        }

        if reformat {
            log::warn!("Formatting storage before staging {} file(s)", files.len());
            self.storage.format().map_err(StagingError::Format)?;
        }

        let mut total = 0;
        for (index, file) in files.iter().enumerate() {
            log::info!("Staging [{}/{}] {}", index + 1, files.len(), file);
            let written = self.stage_one(file)?;
            log::info!("Staged {} ({} bytes)", file, written);
            total += written;
        }
        Ok(total)
    }

    /// Fetch one file over a fresh connection and replace the local copy
    pub fn stage_one(&mut self, file: &str) -> Result<u64, StagingError> {
        let remote = self.config.sibling_path(file);
        let timeouts = self.config.timeouts;

        let mut conn = connect_within(
            self.transport,
            &self.config.hostname,
            self.config.port,
            timeouts.connect(),
            self.config.connect_retries,
        )
        .map_err(|source| StagingError::Connect {
            path: remote.clone(),
            source,
        })?;

        let request_err = |source| StagingError::Request {
            path: remote.clone(),
            source,
        };
        conn.set_read_timeout(timeouts.response()).map_err(request_err)?;
        send_get(&mut conn, &self.config.hostname, self.config.port, &remote).map_err(request_err)?;

        let mut reader = ResponseReader::new(conn);
        let head = reader.read_head().map_err(request_err)?;
        if !head.is_ok() {
            return Err(StagingError::Status {
                path: remote,
                status: head.status,
            });
        }
        let expected = head
            .content_length
            .ok_or_else(|| StagingError::MissingLength { path: remote.clone() })?;

        let storage_err = |source| StagingError::Storage {
            path: file.to_string(),
            source,
        };
        self.storage.remove(file).map_err(storage_err)?;
        let mut out = self.storage.create(file).map_err(storage_err)?;

        let result = self.copy_body(&mut reader, &mut out, file, expected);
        drop(out);

        if result.is_err() {
            if let Err(e) = self.storage.remove(file) {
                log::warn!("Could not remove partial {}: {}", file, e);
            }
        }
        result
    }

    fn copy_body<Conn: Connection, W: Write>(
        &mut self,
        reader: &mut ResponseReader<Conn>,
        out: &mut W,
        file: &str,
        expected: u64,
    ) -> Result<u64, StagingError> {
        let mut blinker = ActivityBlinker::new(self.config.indicator, self.clock.now_ms());
        let mut buf = [0u8; COPY_BUFFER];
        let mut received = 0u64;

        let outcome = loop {
            if received >= expected {
                break out.flush().map_err(|source| StagingError::Storage {
                    path: file.to_string(),
                    source,
                });
            }

            let want = (expected - received).min(COPY_BUFFER as u64) as usize;
            let n = match reader.read_body(&mut buf[..want]) {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) if is_timeout(&e) => {
                    log::warn!("{}: stream stalled after {} bytes", file, received);
                    break Ok(());
                }
                Err(e) => {
                    log::warn!("{}: read failed after {} bytes: {}", file, received, e);
                    break Ok(());
                }
            };

            if let Err(source) = out.write_all(&buf[..n]) {
                break Err(StagingError::Storage {
                    path: file.to_string(),
                    source,
                });
            }
            received += n as u64;
            blinker.tick(self.clock.now_ms(), self.indicator);
        };

        blinker.finish(self.indicator);
        outcome?;

        if received < expected {
            return Err(StagingError::Truncated {
                path: file.to_string(),
                expected,
                received,
            });
        }
        Ok(received)
    }
}
