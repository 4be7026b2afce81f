use std::fmt;

use crate::error::ErrorCode;

/// Errors raised while reading and validating the INI configuration file.
///
/// Error code range: 1-10.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The configuration file could not be opened or read.
    FileUnreadable { path: String, reason: String },

    /// A required section (e.g. `[BatRack]`) is missing entirely.
    MissingSection { section: String },

    /// A required key is missing from a section.
    MissingKey { section: String, key: String },

    /// A key's value could not be parsed as the expected type.
    InvalidValue {
        section: String,
        key: String,
        value: String,
        expected: String,
    },

    /// A `run*` section is missing `start` or `stop`.
    InvalidRunWindow { section: String, reason: String },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::FileUnreadable { .. } => 1,
            ConfigError::MissingSection { .. } => 2,
            ConfigError::MissingKey { .. } => 3,
            ConfigError::InvalidValue { .. } => 4,
            ConfigError::InvalidRunWindow { .. } => 5,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::FileUnreadable { path, reason } => {
                format!("could not read config file '{}': {}", path, reason)
            }
            ConfigError::MissingSection { section } => {
                format!("missing required section [{}]", section)
            }
            ConfigError::MissingKey { section, key } => {
                format!("missing required key '{}' in [{}]", key, section)
            }
            ConfigError::InvalidValue {
                section,
                key,
                value,
                expected,
            } => format!(
                "invalid value for [{}].{} = '{}', expected {}",
                section, key, value, expected
            ),
            ConfigError::InvalidRunWindow { section, reason } => {
                format!("invalid run window [{}]: {}", section, reason)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigError(code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_message_names_section_and_key() {
        let err = ConfigError::MissingKey {
            section: "AudioAnalysisUnit".to_string(),
            key: "threshold_dbfs".to_string(),
        };
        assert!(err.message().contains("threshold_dbfs"));
        assert!(err.message().contains("AudioAnalysisUnit"));
    }

    #[test]
    fn codes_are_stable_per_variant() {
        assert_eq!(
            ConfigError::MissingSection {
                section: "x".into()
            }
            .code(),
            2
        );
        assert_eq!(
            ConfigError::InvalidValue {
                section: "x".into(),
                key: "y".into(),
                value: "z".into(),
                expected: "bool".into()
            }
            .code(),
            4
        );
    }
}
