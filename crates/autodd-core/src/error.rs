//! Error types for the autodd core library

use crate::prepare::PrepareStep;
use autodd_detect::DetectError;
use thiserror::Error;

/// Main error type for autodd operations
#[derive(Error, Debug)]
pub enum Error {
    /// No device carries the requested identity
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// More than one device carries the requested WWID
    #[error("Ambiguous device: WWID {wwid} matches {}", paths.join(", "))]
    AmbiguousDevice {
        /// Requested WWID
        wwid: String,
        /// Every matching device path
        paths: Vec<String>,
    },

    /// Block devices could not be enumerated
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    /// A drive preparation step failed
    #[error("Prepare failed at {step} on {device} (WWID {wwid}): {reason}")]
    PrepareFailed {
        /// Step that failed
        step: PrepareStep,
        /// Device path at the time of failure
        device: String,
        /// Device WWID
        wwid: String,
        /// Underlying cause
        reason: String,
    },

    /// Boundary regions could not be overwritten
    #[error("Zeroize failed on {device}: {reason}")]
    ZeroizeFailed {
        /// Device (path and WWID)
        device: String,
        /// Underlying cause
        reason: String,
    },

    /// Pending writes could not be synced
    #[error("Cache flush failed: {0}")]
    CacheFlushFailed(String),

    /// The byte copy failed or was incomplete
    #[error("Copy {source_path} -> {destination} failed: {reason}")]
    CopyFailed {
        /// Copy source
        source_path: String,
        /// Copy destination
        destination: String,
        /// Underlying cause
        reason: String,
    },

    /// No block size candidate produced a measurement
    #[error("All {attempted} block size candidates failed on {destination}")]
    AllCandidatesFailed {
        /// Benchmark destination
        destination: String,
        /// Number of candidates tried
        attempted: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DetectError> for Error {
    fn from(err: DetectError) -> Self {
        match err {
            DetectError::DeviceNotFound(what) => Self::DeviceNotFound(what),
            DetectError::AmbiguousDevice { wwid, paths } => Self::AmbiguousDevice { wwid, paths },
            DetectError::MissingIdentity(path) => {
                Self::DeviceNotFound(format!("{path} has no WWID"))
            }
            err @ DetectError::NoStableLink(_) => Self::DeviceNotFound(err.to_string()),
            DetectError::Io(e) => Self::Io(e),
            other => Self::Enumeration(other.to_string()),
        }
    }
}

impl Error {
    /// Whether the error is about which physical device is meant
    #[must_use]
    pub const fn is_identity_error(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_) | Self::AmbiguousDevice { .. })
    }
}

/// Result type alias using the autodd error type
pub type Result<T> = std::result::Result<T, Error>;
