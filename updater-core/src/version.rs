/// Version descriptor and update outcome kinds
use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome of a poll or an update attempt.
///
/// The same flat set is used as the status of a [`VersionDescriptor`] and as
/// the result of `run_update`. There are no nested causes; details go to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdateStatus {
    /// Firmware replacement failed, or the descriptor was never fetched
    #[default]
    Failed,
    NoUpdates,
    /// Update available (poll) or update applied (run)
    Ok,
    /// Server unreachable or answered with a non-success status
    NoSuchSite,
    /// Connected, but no usable response arrived
    InvalidResource,
    /// An auxiliary file could not be fully written to storage
    StorageStagingFailure,
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStatus::Failed => write!(f, "Failed"),
            UpdateStatus::NoUpdates => write!(f, "No updates"),
            UpdateStatus::Ok => write!(f, "Ok"),
            UpdateStatus::NoSuchSite => write!(f, "No such site"),
            UpdateStatus::InvalidResource => write!(f, "Invalid resource"),
            UpdateStatus::StorageStagingFailure => write!(f, "Storage staging failure"),
        }
    }
}

/// Four part firmware version plus the status of the poll that produced it.
///
/// Ordering and equality only look at the four components, compared as one
/// big-endian `u32` (first differing byte wins). The status is carried along.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VersionDescriptor {
    pub v1: u8,
    pub v2: u8,
    pub v3: u8,
    pub v4: u8,
    #[serde(default)]
    pub status: UpdateStatus,
}

impl VersionDescriptor {
    pub const fn new(v1: u8, v2: u8, v3: u8, v4: u8) -> Self {
        Self {
            v1,
            v2,
            v3,
            v4,
            status: UpdateStatus::Failed,
        }
    }

    pub fn bytes(&self) -> [u8; 4] {
        [self.v1, self.v2, self.v3, self.v4]
    }

    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.bytes())
    }

    pub fn from_u32(value: u32) -> Self {
        let [v1, v2, v3, v4] = value.to_be_bytes();
        Self::new(v1, v2, v3, v4)
    }

    /// Reset components and status to the zero state
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// True if the components are still all zero, i.e. nothing was ever committed
    pub fn is_unknown(&self) -> bool {
        self.as_u32() == 0
    }
}

impl PartialEq for VersionDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for VersionDescriptor {}

impl PartialOrd for VersionDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes().cmp(&other.bytes())
    }
}

impl fmt::Display for VersionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.v1, self.v2, self.v3, self.v4)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVersionError(String);

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid version string '{}', expected a.b.c.d", self.0)
    }
}

impl std::error::Error for ParseVersionError {}

impl FromStr for VersionDescriptor {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_string());
        let mut parts = s.trim().trim_start_matches('v').split('.');
        let mut bytes = [0u8; 4];
        for byte in &mut bytes {
            *byte = parts
                .next()
                .and_then(|p| p.parse::<u8>().ok())
                .ok_or_else(err)?;
        }
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Self::new(bytes[0], bytes[1], bytes[2], bytes[3]))
    }
}
