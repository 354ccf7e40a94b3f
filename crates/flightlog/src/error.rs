//! Error types for flightlog.
//!
//! This module defines the crate-wide error type. Record-level decode
//! failures live in [`crate::codec::CodecError`] and are wrapped here when
//! they escape to a caller.

use std::path::PathBuf;
use thiserror::Error;

use crate::codec::CodecError;

/// The main error type for flightlog operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Handle Table Errors ===
    /// Every slot in the handle table is allocated.
    #[error("handle table exhausted: all {capacity} slots are allocated")]
    HandleExhausted {
        /// Number of slots in the table.
        capacity: usize,
    },

    /// The handle does not refer to a slot in the table.
    #[error("invalid handle {index}")]
    InvalidHandle {
        /// Index carried by the handle.
        index: usize,
    },

    /// The handle refers to a slot that is not currently allocated.
    #[error("handle {index} is not allocated")]
    HandleNotAllocated {
        /// Index carried by the handle.
        index: usize,
    },

    /// Direct reads and writes are refused on a handle in stream mode.
    #[error("handle {index} is in stream mode")]
    HandleStreaming {
        /// Index carried by the handle.
        index: usize,
    },

    /// The handle is already open in a mode that excludes the request.
    #[error("handle {index} is already open")]
    HandleBusy {
        /// Index carried by the handle.
        index: usize,
    },

    // === Device Errors ===
    /// A read, write, seek or sync against the device failed.
    #[error("device {operation} failed on '{name}': {source}")]
    DeviceIo {
        /// Logical file name of the handle.
        name: String,
        /// The operation that failed.
        operation: &'static str,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The device could not be mounted or prepared.
    #[error("failed to mount storage device: {message}")]
    MountFailure {
        /// Description of what went wrong.
        message: String,
    },

    /// The mediator worker is no longer running.
    #[error("storage mediator has stopped")]
    MediatorStopped,

    // === Record Errors ===
    /// A record could not be encoded or decoded.
    #[error("record error: {0}")]
    Codec(#[from] CodecError),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to open a log file for offline reading.
    #[error("cannot open log file {path}: {source}")]
    LogOpen {
        /// Path of the log file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for flightlog operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a device I/O error for the named handle.
    #[must_use]
    pub fn device_io(
        name: impl Into<String>,
        operation: &'static str,
        source: std::io::Error,
    ) -> Self {
        Self::DeviceIo {
            name: name.into(),
            operation,
            source,
        }
    }

    /// Create a mount failure error.
    #[must_use]
    pub fn mount_failure(message: impl Into<String>) -> Self {
        Self::MountFailure {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means the handle table is full.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::HandleExhausted { .. })
    }

    /// Check if this error came from the storage device.
    #[must_use]
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::DeviceIo { .. } | Self::MountFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RecordKind;

    #[test]
    fn test_handle_exhausted_display() {
        let err = Error::HandleExhausted { capacity: 8 };
        assert_eq!(
            err.to_string(),
            "handle table exhausted: all 8 slots are allocated"
        );
        assert!(err.is_exhausted());
        assert!(!err.is_device_error());
    }

    #[test]
    fn test_device_io_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "card removed");
        let err = Error::device_io("params.txt", "write", io_err);
        let msg = err.to_string();
        assert!(msg.contains("write"));
        assert!(msg.contains("params.txt"));
        assert!(msg.contains("card removed"));
        assert!(err.is_device_error());
    }

    #[test]
    fn test_mount_failure_display() {
        let err = Error::mount_failure("no card");
        assert_eq!(err.to_string(), "failed to mount storage device: no card");
        assert!(err.is_device_error());
    }

    #[test]
    fn test_handle_errors_display() {
        assert_eq!(
            Error::InvalidHandle { index: 42 }.to_string(),
            "invalid handle 42"
        );
        assert_eq!(
            Error::HandleNotAllocated { index: 3 }.to_string(),
            "handle 3 is not allocated"
        );
        assert_eq!(
            Error::HandleStreaming { index: 0 }.to_string(),
            "handle 0 is in stream mode"
        );
    }

    #[test]
    fn test_from_codec_error() {
        let err: Error = CodecError::ChecksumMismatch {
            kind: RecordKind::Measurement,
        }
        .into();
        assert!(matches!(err, Error::Codec(_)));
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_log_open_display() {
        let err = Error::LogOpen {
            path: PathBuf::from("/logs/042-AQL.LOG"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/logs/042-AQL.LOG"));
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "invalid interval".to_string(),
        };
        assert!(err.to_string().contains("invalid interval"));
    }
}
