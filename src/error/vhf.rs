use std::fmt;

use crate::error::ErrorCode;

/// Errors raised by the VHF unit's MQTT subscription and CBOR decoding.
///
/// Error code range: 21-30.
#[derive(Debug, Clone, PartialEq)]
pub enum VhfError {
    /// The MQTT client could not connect to the configured broker.
    BrokerConnectFailed { host: String, port: u16, reason: String },

    /// A matched-signal CBOR payload did not decode to the expected shape.
    MalformedSignal { reason: String },
}

impl ErrorCode for VhfError {
    fn code(&self) -> i32 {
        match self {
            VhfError::BrokerConnectFailed { .. } => 21,
            VhfError::MalformedSignal { .. } => 22,
        }
    }

    fn message(&self) -> String {
        match self {
            VhfError::BrokerConnectFailed { host, port, reason } => {
                format!("could not connect to mqtt broker {}:{}: {}", host, port, reason)
            }
            VhfError::MalformedSignal { reason } => {
                format!("malformed matched-signal cbor payload: {}", reason)
            }
        }
    }
}

impl fmt::Display for VhfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VhfError(code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for VhfError {}
