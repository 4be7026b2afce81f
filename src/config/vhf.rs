use super::{optional, parse_num, required, Section};
use crate::error::ConfigError;

/// `[VHFAnalysisUnit]` (spec.md §4.3, §6).
#[derive(Debug, Clone, PartialEq)]
pub struct VhfUnitConfig {
    pub freq_bw_hz: u64,
    pub sig_freqs_mhz: Vec<f64>,
    pub sig_threshold_dbw: f64,
    pub sig_duration_threshold_s: f64,
    pub freq_active_window_s: f64,
    pub freq_active_var: f64,
    pub freq_active_count: usize,
    pub untrigger_duration_s: f64,
}

impl Default for VhfUnitConfig {
    fn default() -> Self {
        VhfUnitConfig {
            freq_bw_hz: 20_000,
            sig_freqs_mhz: Vec::new(),
            sig_threshold_dbw: -90.0,
            sig_duration_threshold_s: 0.04,
            freq_active_window_s: 600.0,
            freq_active_var: 2.0,
            freq_active_count: 5,
            untrigger_duration_s: 600.0,
        }
    }
}

fn parse_freq_list(section_name: &str, value: &str) -> Result<Vec<f64>, ConfigError> {
    let trimmed = value.trim().trim_start_matches('[').trim_end_matches(']');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split(',')
        .map(|part| {
            part.trim().parse::<f64>().map_err(|_| ConfigError::InvalidValue {
                section: section_name.to_string(),
                key: "sig_freqs_mhz".to_string(),
                value: value.to_string(),
                expected: "comma-separated list of MHz floats".to_string(),
            })
        })
        .collect()
}

impl VhfUnitConfig {
    const SECTION: &'static str = "VHFAnalysisUnit";

    pub(super) fn from_section(section: &Section) -> Result<Self, ConfigError> {
        let s = Self::SECTION;
        let defaults = Self::default();
        Ok(VhfUnitConfig {
            freq_bw_hz: parse_num(
                s,
                "freq_bw_hz",
                optional(section, "freq_bw_hz", &defaults.freq_bw_hz.to_string()),
                "integer",
            )?,
            sig_freqs_mhz: parse_freq_list(s, required(section, s, "sig_freqs_mhz")?)?,
            sig_threshold_dbw: parse_num(
                s,
                "sig_threshold_dbw",
                required(section, s, "sig_threshold_dbw")?,
                "number",
            )?,
            sig_duration_threshold_s: parse_num(
                s,
                "sig_duration_threshold_s",
                optional(section, "sig_duration_threshold_s", &defaults.sig_duration_threshold_s.to_string()),
                "number",
            )?,
            freq_active_window_s: parse_num(
                s,
                "freq_active_window_s",
                required(section, s, "freq_active_window_s")?,
                "number",
            )?,
            freq_active_var: parse_num(
                s,
                "freq_active_var",
                required(section, s, "freq_active_var")?,
                "number",
            )?,
            freq_active_count: parse_num(
                s,
                "freq_active_count",
                required(section, s, "freq_active_count")?,
                "integer",
            )?,
            untrigger_duration_s: parse_num(
                s,
                "untrigger_duration_s",
                required(section, s, "untrigger_duration_s")?,
                "number",
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracketed_frequency_list() {
        let freqs = parse_freq_list("VHFAnalysisUnit", "[150.100, 150.200, 150.300]").unwrap();
        assert_eq!(freqs, vec![150.100, 150.200, 150.300]);
    }

    #[test]
    fn rejects_non_numeric_frequency() {
        let err = parse_freq_list("VHFAnalysisUnit", "[abc]").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
