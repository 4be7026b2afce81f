use std::fmt;

use crate::error::ErrorCode;

/// Errors raised by the fusion supervisor and run scheduler.
///
/// Error code range: 41-50.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorError {
    /// A unit failed to start.
    UnitStartFailed { unit: String, reason: String },

    /// The event bus/CSV sink could not be opened.
    SinkUnavailable { reason: String },
}

impl ErrorCode for SupervisorError {
    fn code(&self) -> i32 {
        match self {
            SupervisorError::UnitStartFailed { .. } => 41,
            SupervisorError::SinkUnavailable { .. } => 43,
        }
    }

    fn message(&self) -> String {
        match self {
            SupervisorError::UnitStartFailed { unit, reason } => {
                format!("unit '{}' failed to start: {}", unit, reason)
            }
            SupervisorError::SinkUnavailable { reason } => {
                format!("event sink unavailable: {}", reason)
            }
        }
    }
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SupervisorError(code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for SupervisorError {}
