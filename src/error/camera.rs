use std::fmt;

use crate::error::ErrorCode;

/// Errors raised by the camera unit's GPIO line, FIFO control and log-tail
/// reconciliation.
///
/// Error code range: 31-40.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraError {
    /// The GPIO line for illumination could not be claimed.
    GpioUnavailable { pin: u8, reason: String },

    /// The control FIFO could not be opened for writing.
    FifoWriteFailed { path: String, reason: String },

    /// The recorder's log file could not be read.
    LogUnreadable { path: String, reason: String },

    /// `start_recording` was not echoed by "Capturing started" within the
    /// observation window (spec.md §4.4, fatal, process terminates).
    StartUnconfirmed,

    /// A boxed video file could not be moved into `data_path`.
    VideoMoveFailed { path: String, reason: String },
}

impl ErrorCode for CameraError {
    fn code(&self) -> i32 {
        match self {
            CameraError::GpioUnavailable { .. } => 31,
            CameraError::FifoWriteFailed { .. } => 32,
            CameraError::LogUnreadable { .. } => 33,
            CameraError::StartUnconfirmed => 34,
            CameraError::VideoMoveFailed { .. } => 35,
        }
    }

    fn message(&self) -> String {
        match self {
            CameraError::GpioUnavailable { pin, reason } => {
                format!("could not claim gpio pin {}: {}", pin, reason)
            }
            CameraError::FifoWriteFailed { path, reason } => {
                format!("failed to write control fifo '{}': {}", path, reason)
            }
            CameraError::LogUnreadable { path, reason } => {
                format!("failed to read schedule log '{}': {}", path, reason)
            }
            CameraError::StartUnconfirmed => {
                "recorder did not confirm 'Capturing started'".to_string()
            }
            CameraError::VideoMoveFailed { path, reason } => {
                format!("failed to move video '{}': {}", path, reason)
            }
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CameraError(code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for CameraError {}
