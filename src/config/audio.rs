use super::{optional, parse_num, required, Section};
use crate::error::ConfigError;

/// `[AudioAnalysisUnit]` (spec.md §4.2, §6).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioUnitConfig {
    pub threshold_dbfs: f64,
    pub highpass_hz: u32,
    pub lowpass_hz: u32,
    pub wave_export_len_s: f64,
    pub quiet_threshold_s: f64,
    pub noise_threshold_s: f64,
    pub sampling_rate: u32,
    pub input_block_duration: f64,
    /// Shell command run once after 2s with zero frames observed
    /// (spec.md §4.2 "Health"; `original_source/batrack/audio.py` hardcodes
    /// `sudo uhubctl -a cycle -p 3 -l 1-1`, promoted to a config field here
    /// so it isn't baked into the binary for a specific USB topology).
    pub usb_power_cycle_command: String,
}

impl Default for AudioUnitConfig {
    fn default() -> Self {
        AudioUnitConfig {
            threshold_dbfs: -40.0,
            highpass_hz: 15_000,
            lowpass_hz: 42_000,
            wave_export_len_s: 300.0,
            quiet_threshold_s: 0.5,
            noise_threshold_s: 0.1,
            sampling_rate: 250_000,
            input_block_duration: 0.05,
            usb_power_cycle_command: "sudo uhubctl -a cycle -p 3 -l 1-1".to_string(),
        }
    }
}

impl AudioUnitConfig {
    const SECTION: &'static str = "AudioAnalysisUnit";

    pub(super) fn from_section(section: &Section) -> Result<Self, ConfigError> {
        let s = Self::SECTION;
        let defaults = Self::default();
        Ok(AudioUnitConfig {
            threshold_dbfs: parse_num(s, "threshold_dbfs", required(section, s, "threshold_dbfs")?, "number")?,
            highpass_hz: parse_num(s, "highpass_hz", required(section, s, "highpass_hz")?, "integer")?,
            lowpass_hz: parse_num(
                s,
                "lowpass_hz",
                optional(section, "lowpass_hz", &defaults.lowpass_hz.to_string()),
                "integer",
            )?,
            wave_export_len_s: parse_num(
                s,
                "wave_export_len_s",
                required(section, s, "wave_export_len_s")?,
                "number",
            )?,
            quiet_threshold_s: parse_num(
                s,
                "quiet_threshold_s",
                required(section, s, "quiet_threshold_s")?,
                "number",
            )?,
            noise_threshold_s: parse_num(
                s,
                "noise_threshold_s",
                required(section, s, "noise_threshold_s")?,
                "number",
            )?,
            sampling_rate: parse_num(
                s,
                "sampling_rate",
                optional(section, "sampling_rate", &defaults.sampling_rate.to_string()),
                "integer",
            )?,
            input_block_duration: parse_num(
                s,
                "input_block_duration",
                optional(section, "input_block_duration", &defaults.input_block_duration.to_string()),
                "number",
            )?,
            usb_power_cycle_command: optional(
                section,
                "usb_power_cycle_command",
                &defaults.usb_power_cycle_command,
            )
            .to_string(),
        })
    }

    /// `noise_blocks_max` derived constant (spec.md §4.2).
    pub fn noise_blocks_max(&self) -> u64 {
        (self.noise_threshold_s / self.input_block_duration).floor() as u64
    }

    /// `quiet_blocks_max` derived constant (spec.md §4.2).
    pub fn quiet_blocks_max(&self) -> u64 {
        (self.quiet_threshold_s / self.input_block_duration).floor() as u64
    }

    /// `input_frames_per_block` derived constant (spec.md §4.2).
    pub fn input_frames_per_block(&self) -> usize {
        (self.sampling_rate as f64 * self.input_block_duration).round() as usize
    }

    /// `max_frames` derived constant (spec.md §4.2).
    pub fn max_frames(&self) -> u64 {
        (self.wave_export_len_s * self.sampling_rate as f64).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_constants_match_spec_formulas() {
        let cfg = AudioUnitConfig {
            noise_threshold_s: 0.1,
            quiet_threshold_s: 0.5,
            input_block_duration: 0.05,
            sampling_rate: 250_000,
            wave_export_len_s: 300.0,
            ..AudioUnitConfig::default()
        };
        assert_eq!(cfg.noise_blocks_max(), 2);
        assert_eq!(cfg.quiet_blocks_max(), 10);
        assert_eq!(cfg.input_frames_per_block(), 12_500);
        assert_eq!(cfg.max_frames(), 75_000_000);
    }
}
