use std::fmt;

use crate::error::ErrorCode;

/// Errors raised by the audio unit's capture stream, FFT analysis and
/// rolling WAV writer.
///
/// Error code range: 11-20.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// No usable input device could be opened (no default device and no
    /// "mic"/"input"-named device present).
    NoInputDevice,

    /// `cpal` failed to open or configure the input stream.
    StreamOpenFailed { reason: String },

    /// The capture stream stopped producing frames and the USB power-cycle
    /// recovery attempt (spec.md §4.2 "Health") did not restore it.
    DeviceSilent { seconds_silent: u64 },

    /// The rolling WAV writer could not create or write its output file.
    WaveWriteFailed { path: String, reason: String },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::NoInputDevice => 11,
            AudioError::StreamOpenFailed { .. } => 12,
            AudioError::DeviceSilent { .. } => 13,
            AudioError::WaveWriteFailed { .. } => 14,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::NoInputDevice => "no input audio device available".to_string(),
            AudioError::StreamOpenFailed { reason } => {
                format!("failed to open audio input stream: {}", reason)
            }
            AudioError::DeviceSilent { seconds_silent } => {
                format!("audio device produced no frames for {}s", seconds_silent)
            }
            AudioError::WaveWriteFailed { path, reason } => {
                format!("failed to write wave file '{}': {}", path, reason)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioError(code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for AudioError {}
