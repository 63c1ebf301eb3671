/// Descriptor fetch: one request for `<path>.version.json` per call
use std::io::ErrorKind;

use crate::config::{UpdaterConfig, MAX_DESCRIPTOR_BYTES, MAX_DESCRIPTOR_LINE};
use crate::extract::{find_field, parse_u8_lenient, split_array, unquote};
use crate::http::{send_get, ResponseReader};
use crate::platform::{connect_within, Connection, Transport};
use crate::version::{UpdateStatus, VersionDescriptor};

pub const VERSION_KEYS: [&str; 4] = ["v1", "v2", "v3", "v4"];
pub const FILES_KEY: &str = "SPIFFS_update_files";
pub const FORMAT_KEY: &str = "SPIFFS_format";

/// Fields seen in the current response, last occurrence winning
#[derive(Debug, Default, Clone, PartialEq)]
struct DescriptorScrape {
    versions: [Option<u8>; 4],
    files: Option<Vec<String>>,
    reformat: Option<bool>,
}

impl DescriptorScrape {
    fn scan_line(&mut self, line: &str) {
        for (slot, key) in self.versions.iter_mut().zip(VERSION_KEYS) {
            let raw = find_field(line, key);
            if !raw.trim().is_empty() {
                *slot = Some(parse_u8_lenient(unquote(raw.trim())));
            }
        }

        let files = find_field(line, FILES_KEY);
        if !files.is_empty() {
            self.files = Some(
                split_array(files)
                    .iter()
                    .map(|f| unquote(f).to_string())
                    .filter(|f| !f.is_empty())
                    .collect(),
            );
        }

        let format = find_field(line, FORMAT_KEY);
        if !format.is_empty() {
            self.reformat = Some(format.trim() == "1");
        }
    }

    /// Complete version, only if all four components were seen
    fn version(&self) -> Option<VersionDescriptor> {
        match self.versions {
            [Some(v1), Some(v2), Some(v3), Some(v4)] => Some(VersionDescriptor::new(v1, v2, v3, v4)),
            _ => None,
        }
    }
}

/// Owner of the candidate descriptor and what came with it.
///
/// The candidate only changes when a response carried all four version
/// components; any failed or partial poll leaves the previous candidate and
/// file list in place and only updates the candidate's status.
#[derive(Debug, Default, Clone)]
pub struct VersionPoller {
    candidate: VersionDescriptor,
    files: Vec<String>,
    reformat: bool,
}

impl VersionPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candidate(&self) -> &VersionDescriptor {
        &self.candidate
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn reformat_requested(&self) -> bool {
        self.reformat
    }

    /// Fetch and scrape the descriptor once. Returns the candidate's new status.
    pub fn fetch<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        config: &UpdaterConfig,
        current: &VersionDescriptor,
    ) -> UpdateStatus {
        let path = config.descriptor_path();
        log::info!(
            "Checking {}:{}{} for updates...",
            config.hostname,
            config.port,
            path
        );

        let conn = match connect_within(
            transport,
            &config.hostname,
            config.port,
            config.timeouts.connect(),
            config.connect_retries,
        ) {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("Connection to {} failed: {}", config.hostname, e);
                self.candidate.status = UpdateStatus::NoSuchSite;
                return self.candidate.status;
            }
        };

        self.candidate.status = self.read_descriptor(conn, config, &path, current);
        self.candidate.status
    }

    fn read_descriptor<C: Connection>(
        &mut self,
        mut conn: C,
        config: &UpdaterConfig,
        path: &str,
        current: &VersionDescriptor,
    ) -> UpdateStatus {
        if let Err(e) = conn.set_read_timeout(config.timeouts.response()) {
            log::warn!("Could not set read timeout: {}", e);
        }
        if let Err(e) = send_get(&mut conn, &config.hostname, config.port, path) {
            log::warn!("Descriptor request failed: {}", e);
            return UpdateStatus::InvalidResource;
        }

        let mut reader = ResponseReader::new(conn);
        let head = match reader.read_head() {
            Ok(head) => head,
            Err(e) => {
                if reader.bytes_received() == 0 {
                    log::warn!("No response from server: {}", e);
                } else {
                    log::warn!("Malformed response head: {}", e);
                }
                return UpdateStatus::InvalidResource;
            }
        };

        let mut status = if head.is_ok() {
            UpdateStatus::InvalidResource
        } else {
            log::warn!("Descriptor request answered HTTP {}", head.status);
            UpdateStatus::NoSuchSite
        };

        let mut scrape = DescriptorScrape::default();
        let read = reader.read_body_lines(
            head.content_length,
            MAX_DESCRIPTOR_BYTES,
            MAX_DESCRIPTOR_LINE,
            |line| {
                log::trace!("{}", line);
                scrape.scan_line(line);
            },
        );
        if let Err(e) = read {
            log::warn!("Descriptor body rejected: {}", e);
            return if e.kind() == ErrorKind::InvalidData {
                UpdateStatus::InvalidResource
            } else {
                status
            };
        }

        match scrape.version() {
            Some(mut version) => {
                version.status = if version > *current {
                    UpdateStatus::Ok
                } else {
                    UpdateStatus::NoUpdates
                };
                status = version.status;

                self.candidate = version;
                self.files = scrape.files.unwrap_or_default();
                self.reformat = scrape.reformat.unwrap_or(false);

                log::info!(
                    "Server version {} (running {}): {}, {} file(s), format: {}",
                    self.candidate,
                    current,
                    status,
                    self.files.len(),
                    self.reformat
                );
            }
            None => {
                log::warn!(
                    "Descriptor incomplete, keeping candidate {}",
                    self.candidate
                );
            }
        }

        status
    }
}
