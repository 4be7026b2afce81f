use super::{optional, parse_num, required, Section};
use crate::error::ConfigError;

/// `[CameraAnalysisUnit]` (spec.md §4.4, §6).
#[derive(Debug, Clone, PartialEq)]
pub struct CameraUnitConfig {
    pub light_pin: u8,
    pub html_folder: String,
    pub video_boxing_timeout_s: u64,
}

impl Default for CameraUnitConfig {
    fn default() -> Self {
        CameraUnitConfig {
            light_pin: 17,
            html_folder: "/var/www/html/".to_string(),
            video_boxing_timeout_s: 60,
        }
    }
}

impl CameraUnitConfig {
    const SECTION: &'static str = "CameraAnalysisUnit";

    pub(super) fn from_section(section: &Section) -> Result<Self, ConfigError> {
        let s = Self::SECTION;
        let defaults = Self::default();
        Ok(CameraUnitConfig {
            light_pin: parse_num(s, "light_pin", required(section, s, "light_pin")?, "integer")?,
            html_folder: optional(section, "html_folder", &defaults.html_folder).to_string(),
            video_boxing_timeout_s: parse_num(
                s,
                "video_boxing_timeout_s",
                optional(section, "video_boxing_timeout_s", &defaults.video_boxing_timeout_s.to_string()),
                "integer",
            )?,
        })
    }

    /// Number of trailing schedule-log lines tailed to confirm a start
    /// (spec.md §4.4). Fixed, matching `original_source/batrack/video.py`'s
    /// `self.number_of_lines_to_observe = 5`, which is not a constructor
    /// parameter there either.
    pub const NUMBER_OF_LINES_TO_OBSERVE: usize = 5;
}
