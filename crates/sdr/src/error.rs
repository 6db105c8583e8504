// Copyright 2025-2026 CEMAXECUTER LLC

//! Error taxonomy and the libhackrf status-code table.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::TransceiverMode;

/// Errors raised by the HackRF control core.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input, rejected before any hardware call.
    #[error("invalid parameter '{name}': {reason}")]
    Parameter { name: &'static str, reason: String },

    /// No device matched at open time.
    #[error("{0}")]
    DeviceUnavailable(String),

    /// The driver returned an unexpected status. The device session has
    /// already been shut down and closed when this is returned.
    #[error("{message}")]
    Driver { code: i32, message: String },

    /// Operation not allowed in the current transceiver mode.
    #[error("cannot {operation} while {mode}")]
    State {
        operation: &'static str,
        mode: TransceiverMode,
    },

    /// Operation on a device session that has been closed.
    #[error("device session is closed")]
    Closed,

    /// A blocking wait expired before the session returned to idle.
    #[error("timed out after {0:?} waiting for the transceiver to go idle")]
    Timeout(Duration),

    /// Malformed configuration document.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Parameter {
            name,
            reason: reason.into(),
        }
    }

    /// Build a driver error from a raw status code.
    pub fn driver(code: i32) -> Self {
        Self::Driver {
            code,
            message: DriverStatus::from_code(code).to_string(),
        }
    }

    /// True when the session was torn down and the device must be reopened.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Driver { .. })
    }
}

/// Result type for HackRF operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Status codes returned by libhackrf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Success,
    True,
    InvalidParam,
    NotFound,
    Busy,
    NoMem,
    Libusb,
    Thread,
    StreamingThreadErr,
    StreamingStopped,
    StreamingExitCalled,
    UsbApiVersion,
    NotLastDevice,
    Other,
    Unknown(i32),
}

impl DriverStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::True,
            -2 => Self::InvalidParam,
            -5 => Self::NotFound,
            -6 => Self::Busy,
            -11 => Self::NoMem,
            -1000 => Self::Libusb,
            -1001 => Self::Thread,
            -1002 => Self::StreamingThreadErr,
            -1003 => Self::StreamingStopped,
            -1004 => Self::StreamingExitCalled,
            -1005 => Self::UsbApiVersion,
            -2000 => Self::NotLastDevice,
            -9999 => Self::Other,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match *self {
            Self::Success => 0,
            Self::True => 1,
            Self::InvalidParam => -2,
            Self::NotFound => -5,
            Self::Busy => -6,
            Self::NoMem => -11,
            Self::Libusb => -1000,
            Self::Thread => -1001,
            Self::StreamingThreadErr => -1002,
            Self::StreamingStopped => -1003,
            Self::StreamingExitCalled => -1004,
            Self::UsbApiVersion => -1005,
            Self::NotLastDevice => -2000,
            Self::Other => -9999,
            Self::Unknown(code) => code,
        }
    }

    /// Codes that mean the call went through. A streaming thread that exited
    /// because we asked it to is a normal end of a sweep or receive.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::True | Self::StreamingExitCalled)
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Success => "OK",
            Self::True => "True",
            Self::InvalidParam => "Invalid parameter (HACKRF_ERROR_INVALID_PARAM)",
            Self::NotFound => "USB device not found (HACKRF_ERROR_NOT_FOUND)",
            Self::Busy => "Device busy (HACKRF_ERROR_BUSY)",
            Self::NoMem => "Memory allocation failed in libhackrf (HACKRF_ERROR_NO_MEM)",
            Self::Libusb => "libusb error (HACKRF_ERROR_LIBUSB)",
            Self::Thread => "Error setting up transfer thread (HACKRF_ERROR_THREAD)",
            Self::StreamingThreadErr => {
                "Streaming thread could not start due to an error (HACKRF_ERROR_STREAMING_THREAD_ERR)"
            }
            Self::StreamingStopped => {
                "Streaming thread stopped due to an error (HACKRF_ERROR_STREAMING_STOPPED)"
            }
            Self::StreamingExitCalled => {
                "Streaming thread exited normally (HACKRF_ERROR_STREAMING_EXIT_CALLED)"
            }
            Self::UsbApiVersion => {
                "The installed firmware does not support this function (HACKRF_ERROR_USB_API_VERSION)"
            }
            Self::NotLastDevice => {
                "Can not exit library as one or more HackRFs still in use (HACKRF_ERROR_NOT_LAST_DEVICE)"
            }
            Self::Other => "Unspecified error (HACKRF_ERROR_OTHER)",
            Self::Unknown(code) => {
                return write!(f, "libhackrf returned unknown error code {}", code);
            }
        };
        f.write_str(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_codes() {
        for code in [0, 1, -1004] {
            assert!(DriverStatus::from_code(code).is_success(), "code {}", code);
        }
        for code in [-2, -5, -1000, -1003, -9999, 42] {
            assert!(!DriverStatus::from_code(code).is_success(), "code {}", code);
        }
    }

    #[test]
    fn test_code_table_is_reversible() {
        let codes = [
            0, 1, -2, -5, -6, -11, -1000, -1001, -1002, -1003, -1004, -1005, -2000, -9999, -7,
        ];
        for code in codes {
            assert_eq!(DriverStatus::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_unknown_code_message() {
        let err = Error::driver(-77);
        assert_eq!(err.to_string(), "libhackrf returned unknown error code -77");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_known_code_message() {
        let err = Error::driver(-6);
        assert_eq!(err.to_string(), "Device busy (HACKRF_ERROR_BUSY)");
    }

    #[test]
    fn test_state_error_message() {
        let err = Error::State {
            operation: "start transmitting",
            mode: TransceiverMode::Receiving,
        };
        assert_eq!(err.to_string(), "cannot start transmitting while receiving");
        assert!(!err.is_fatal());
    }
}
