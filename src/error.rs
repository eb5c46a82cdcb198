//! Error types for stream reading and time alignment.
//!
//! All fallible operations in qsync return [`TelemetryError`]. Variants are
//! grouped by how the caller is expected to react to them.
//!
//! ## Error Categories
//!
//! - **Connection / I/O**: the socket could not be opened or a read failed
//! - **Framing**: the byte stream is corrupt or speaks another protocol version
//! - **Alignment**: two captures cannot be placed on a common time base
//! - **Configuration**: invalid parameters or unreadable configuration files
//!
//! ## Recovery and Retry
//!
//! Framing errors are fatal for the connection that produced them. Alignment
//! errors are fatal only for the capture window being aligned, so a repeating
//! capture loop can skip the cycle:
//!
//! ```rust
//! use qsync::TelemetryError;
//!
//! let error = TelemetryError::alignment("GPS times disagree");
//! assert!(error.is_alignment_failure());
//! assert!(!error.is_retryable());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for qsync operations.
pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Main error type for qsync operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    #[error("Failed to connect to acquisition device: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error while {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Framing error in {context}: {details}")]
    Framing { context: String, details: String },

    #[error("Packet header version mismatch: expected {expected}, found {found}")]
    Version { expected: u32, found: u32 },

    #[error("Unknown channel type tag {tag}")]
    UnknownChannelType { tag: u16 },

    #[error("Alignment impossible: {reason}")]
    Alignment { reason: String },

    #[error("GPS message could not be decoded: {details}")]
    Gps { details: String },

    #[error("Buffer operation failed: {context}")]
    Buffer { context: String },

    #[error("Invalid configuration: {details}")]
    Config { details: String },

    #[error("Device discovery failed: {reason}")]
    Discovery { reason: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl TelemetryError {
    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Retrying means opening a fresh connection; a corrupt stream is never
    /// resynchronized in place.
    pub fn is_retryable(&self) -> bool {
        match self {
            TelemetryError::Connection { .. } => true,
            TelemetryError::Io { .. } => true,
            TelemetryError::Timeout { .. } => true,
            TelemetryError::Discovery { .. } => true,
            TelemetryError::File { .. } => false,
            TelemetryError::Framing { .. } => false,
            TelemetryError::Version { .. } => false,
            TelemetryError::UnknownChannelType { .. } => false,
            TelemetryError::Alignment { .. } => false,
            TelemetryError::Gps { .. } => false,
            TelemetryError::Buffer { .. } => false,
            TelemetryError::Config { .. } => false,
        }
    }

    /// Returns whether this error aborts only the current alignment attempt.
    pub fn is_alignment_failure(&self) -> bool {
        matches!(self, TelemetryError::Alignment { .. })
    }

    /// Returns whether this error means the byte stream can no longer be trusted.
    pub fn is_framing_failure(&self) -> bool {
        matches!(
            self,
            TelemetryError::Framing { .. }
                | TelemetryError::Version { .. }
                | TelemetryError::UnknownChannelType { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            TelemetryError::Connection { .. } => vec![
                "Check the device is powered and reachable",
                "Verify the stream setup IP address and TCP port",
                "Ensure streaming is enabled on the device",
            ],
            TelemetryError::Io { .. } => {
                vec!["Reconnect to the device", "Check network cable and switch health"]
            }
            TelemetryError::File { .. } => vec![
                "Check file exists and is readable",
                "Check file permissions",
                "Ensure sufficient disk space",
            ],
            TelemetryError::Framing { .. } => vec![
                "Reconnect to start from a frame boundary",
                "Verify the device firmware speaks the expected protocol",
            ],
            TelemetryError::Version { .. } => vec![
                "Update device firmware to a compatible version",
                "Update library to a compatible version",
            ],
            TelemetryError::UnknownChannelType { .. } => vec![
                "Disable unsupported channel types on the device",
                "Update library to a version that knows this channel type",
            ],
            TelemetryError::Alignment { .. } => vec![
                "Skip this capture window and retry on the next cycle",
                "Check GPS antennas or the PTP grandmaster",
                "Verify the calibration pulse is wired to both systems",
            ],
            TelemetryError::Gps { .. } => {
                vec!["Check GPS fix quality", "Verify the receiver emits GGA sentences"]
            }
            TelemetryError::Buffer { .. } => {
                vec!["Restart the stream reader", "Check for a panicked consumer task"]
            }
            TelemetryError::Config { .. } => {
                vec!["Check configuration values", "Compare against the default configuration"]
            }
            TelemetryError::Discovery { .. } => vec![
                "Check the discovery helper executable path",
                "Ensure devices are on the same subnet",
            ],
            TelemetryError::Timeout { .. } => {
                vec!["Increase timeout duration", "Verify the device is responding"]
            }
        }
    }

    /// Copy of this error with the same variant and fields.
    ///
    /// I/O sources are rebuilt from their kind and message; a boxed
    /// connection source is folded into the reason.
    pub fn detached(&self) -> Self {
        let io_copy = |e: &std::io::Error| std::io::Error::new(e.kind(), e.to_string());
        match self {
            TelemetryError::Connection { reason, source } => TelemetryError::Connection {
                reason: match source {
                    Some(source) => format!("{}: {}", reason, source),
                    None => reason.clone(),
                },
                source: None,
            },
            TelemetryError::Io { context, source } => {
                TelemetryError::Io { context: context.clone(), source: io_copy(source) }
            }
            TelemetryError::File { path, source } => {
                TelemetryError::File { path: path.clone(), source: io_copy(source) }
            }
            TelemetryError::Framing { context, details } => {
                TelemetryError::Framing { context: context.clone(), details: details.clone() }
            }
            TelemetryError::Version { expected, found } => {
                TelemetryError::Version { expected: *expected, found: *found }
            }
            TelemetryError::UnknownChannelType { tag } => {
                TelemetryError::UnknownChannelType { tag: *tag }
            }
            TelemetryError::Alignment { reason } => {
                TelemetryError::Alignment { reason: reason.clone() }
            }
            TelemetryError::Gps { details } => TelemetryError::Gps { details: details.clone() },
            TelemetryError::Buffer { context } => {
                TelemetryError::Buffer { context: context.clone() }
            }
            TelemetryError::Config { details } => {
                TelemetryError::Config { details: details.clone() }
            }
            TelemetryError::Discovery { reason } => {
                TelemetryError::Discovery { reason: reason.clone() }
            }
            TelemetryError::Timeout { duration } => TelemetryError::Timeout { duration: *duration },
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        TelemetryError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        TelemetryError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TelemetryError::Io { context: context.into(), source }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        TelemetryError::File { path, source }
    }

    /// Helper constructor for framing errors.
    pub fn framing(context: impl Into<String>, details: impl Into<String>) -> Self {
        TelemetryError::Framing { context: context.into(), details: details.into() }
    }

    /// Helper constructor for alignment errors.
    pub fn alignment(reason: impl Into<String>) -> Self {
        TelemetryError::Alignment { reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        TelemetryError::Config { details: details.into() }
    }

    /// Helper constructor for poisoned or unusable buffers.
    pub fn buffer(context: impl Into<String>) -> Self {
        TelemetryError::Buffer { context: context.into() }
    }
}

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        TelemetryError::Io { context: "reading stream".to_string(), source: err }
    }
}
