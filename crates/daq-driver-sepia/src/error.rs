//! Error types for Sepia2 operations.
//!
//! Every fallible call in this crate returns [`SepiaError`]. Errors fall into
//! three classes (see [`ErrorClass`]): nonzero status codes from the
//! transport, codes the library itself cannot explain, and violations of the
//! caller contract that are detected before any hardware round trip.

use std::fmt;

use thiserror::Error;

use crate::transport::StatusCode;

/// Result type alias for Sepia2 operations.
pub type Result<T> = std::result::Result<T, SepiaError>;

/// Broad classification of a [`SepiaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The transport returned a nonzero status with a known meaning.
    Transport,
    /// The status code could not be interpreted by the library.
    Protocol,
    /// The caller asked for something the hardware cannot be asked.
    CallerContract,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Protocol => write!(f, "protocol"),
            Self::CallerContract => write!(f, "caller contract"),
        }
    }
}

/// Errors that can occur when working with a Sepia2 chassis.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SepiaError {
    /// USB device is opened by another process or blocked by the driver.
    #[error("Device {device} is busy during {operation} ({code}): {message}")]
    DeviceBusy {
        /// USB device index.
        device: i32,
        /// Library function that failed.
        operation: &'static str,
        /// Raw status code.
        code: StatusCode,
        /// Text reported by the library.
        message: String,
    },

    /// Nonzero status returned by a library function.
    #[error("Sepia2 error during {operation} on device {device} ({code}): {message}")]
    Library {
        /// USB device index.
        device: i32,
        /// Library function that failed.
        operation: &'static str,
        /// Raw status code.
        code: StatusCode,
        /// Text reported by the library.
        message: String,
    },

    /// Status code that the library reports as unknown, or that could not be
    /// decoded at all.
    #[error("Undecodable status {code} during {operation} on device {device}")]
    UndecodableStatus {
        /// USB device index.
        device: i32,
        /// Library function that failed.
        operation: &'static str,
        /// Raw status code.
        code: StatusCode,
    },

    /// Output channel index outside 0..=7.
    #[error("Invalid channel {channel}: chassis has 8 output channels")]
    InvalidChannel { channel: usize },

    /// Laser index outside the discovered laser list.
    #[error("No laser at index {index}: chassis has {count} lasers")]
    NoSuchLaser { index: usize, count: usize },

    /// Pulsed operation mode requested without a frequency.
    #[error("Operation mode {mode} requires a frequency")]
    MissingFrequency { mode: String },

    /// Operation not available on this module type.
    #[error("{operation} is not supported by {module} modules")]
    Unsupported {
        /// Module type tag.
        module: String,
        /// Library function that failed.
        operation: &'static str,
    },

    /// Argument rejected before reaching the transport.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Value outside a hardware-reported range.
    #[error("{parameter} {value} out of range [{min}, {max}]")]
    OutOfRange {
        /// Name of the checked parameter.
        parameter: &'static str,
        /// Rejected value.
        value: i64,
        /// Lowest accepted value.
        min: i64,
        /// Highest accepted value.
        max: i64,
    },
}

impl SepiaError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::DeviceBusy { .. } | Self::Library { .. } => ErrorClass::Transport,
            Self::UndecodableStatus { .. } => ErrorClass::Protocol,
            Self::InvalidChannel { .. }
            | Self::NoSuchLaser { .. }
            | Self::MissingFrequency { .. }
            | Self::Unsupported { .. }
            | Self::InvalidArgument { .. }
            | Self::OutOfRange { .. } => ErrorClass::CallerContract,
        }
    }

    /// Check if the device is busy or blocked.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::DeviceBusy { .. })
    }

    /// Raw status code, if this error came from the transport.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::DeviceBusy { code, .. }
            | Self::Library { code, .. }
            | Self::UndecodableStatus { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SepiaError::NoSuchLaser { index: 4, count: 2 };
        assert!(err.to_string().contains('4'));
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn test_classes() {
        let busy = SepiaError::DeviceBusy {
            device: 0,
            operation: "usb_open_device",
            code: StatusCode::DEVICE_BUSY,
            message: "busy".into(),
        };
        assert_eq!(busy.class(), ErrorClass::Transport);
        assert!(busy.is_busy());
        assert_eq!(busy.status_code(), Some(StatusCode::DEVICE_BUSY));

        let undecodable = SepiaError::UndecodableStatus {
            device: 0,
            operation: "fwr_get_version",
            code: StatusCode(-42),
        };
        assert_eq!(undecodable.class(), ErrorClass::Protocol);
        assert!(!undecodable.is_busy());

        let channel = SepiaError::InvalidChannel { channel: 9 };
        assert_eq!(channel.class(), ErrorClass::CallerContract);
        assert_eq!(channel.status_code(), None);
    }
}
