//! INI configuration ingestion (spec.md §6 "Configuration").
//!
//! Mirrors the shape of `original_source/batrack/__main__.py`'s `config`
//! dict, but each section is parsed into a strongly typed, validated struct
//! at startup: a missing or malformed field is a [`ConfigError`] here
//! instead of a `KeyError`/`ValueError` at some arbitrary point during a
//! run. [`parse_bool`] is the single place string-vs-bool config coercion
//! happens (spec.md §9 Design Notes); every typed field downstream of it is
//! a plain `bool`.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveTime;
use ini::Ini;

use crate::error::ConfigError;

mod audio;
mod camera;
mod vhf;

pub use audio::AudioUnitConfig;
pub use camera::CameraUnitConfig;
pub use vhf::VhfUnitConfig;

/// Section key/value pairs as a plain map, used both for the parsed
/// `[BatRack]` section and for merging a `[run*]` section over it.
type Section = HashMap<String, String>;

fn section_map(ini: &Ini, name: &str) -> Option<Section> {
    ini.section(Some(name))
        .map(|props| props.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
}

fn required<'a>(section: &'a Section, section_name: &str, key: &str) -> Result<&'a str, ConfigError> {
    section.get(key).map(String::as_str).ok_or_else(|| ConfigError::MissingKey {
        section: section_name.to_string(),
        key: key.to_string(),
    })
}

fn optional<'a>(section: &'a Section, key: &str, default: &'a str) -> &'a str {
    section.get(key).map(String::as_str).unwrap_or(default)
}

/// Apply `strtobool`-equivalent coercion to a config string value
/// (spec.md §9: "String boolean coercion ... apply a single parse-boolean
/// helper at config ingestion").
pub fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" | "t" => Ok(true),
        "0" | "false" | "no" | "off" | "n" | "f" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            expected: "boolean".to_string(),
        }),
    }
}

fn parse_num<T: std::str::FromStr>(
    section: &str,
    key: &str,
    value: &str,
    expected: &str,
) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    })
}

/// `[BatRack]` section (spec.md §6), plus the effective settings for one
/// `[run*]` window once merged over the base section.
#[derive(Debug, Clone, PartialEq)]
pub struct BatRackConfig {
    pub name: String,
    pub data_path: String,
    pub duty_cycle_s: u64,
    pub use_vhf: bool,
    pub use_audio: bool,
    pub use_camera: bool,
    pub use_timed_camera: bool,
    pub use_trigger_vhf: bool,
    pub use_trigger_audio: bool,
    pub use_trigger_camera: bool,
    pub always_on: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_keepalive: u16,
    pub logging_level: String,
}

impl BatRackConfig {
    const SECTION: &'static str = "BatRack";

    fn from_section(name: &str, section: &Section) -> Result<Self, ConfigError> {
        let s = Self::SECTION;
        Ok(BatRackConfig {
            name: name.to_string(),
            data_path: optional(section, "data_path", "data").to_string(),
            duty_cycle_s: parse_num(s, "duty_cycle_s", optional(section, "duty_cycle_s", "10"), "integer")?,
            use_vhf: parse_bool(s, "use_vhf", optional(section, "use_vhf", "true"))?,
            use_audio: parse_bool(s, "use_audio", optional(section, "use_audio", "true"))?,
            use_camera: parse_bool(s, "use_camera", optional(section, "use_camera", "true"))?,
            use_timed_camera: parse_bool(s, "use_timed_camera", optional(section, "use_timed_camera", "true"))?,
            use_trigger_vhf: parse_bool(s, "use_trigger_vhf", optional(section, "use_trigger_vhf", "true"))?,
            use_trigger_audio: parse_bool(s, "use_trigger_audio", optional(section, "use_trigger_audio", "true"))?,
            use_trigger_camera: parse_bool(s, "use_trigger_camera", optional(section, "use_trigger_camera", "true"))?,
            always_on: parse_bool(s, "always_on", optional(section, "always_on", "false"))?,
            mqtt_host: optional(section, "mqtt_host", "localhost").to_string(),
            mqtt_port: parse_num(s, "mqtt_port", optional(section, "mqtt_port", "1883"), "integer")?,
            mqtt_keepalive: parse_num(s, "mqtt_keepalive", optional(section, "mqtt_keepalive", "60"), "integer")?,
            logging_level: optional(section, "logging_level", "info").to_string(),
        })
    }

    /// Merge a `[run*]` section's keys over this base config, producing the
    /// effective config for that run window (python: `run_config =
    /// deepcopy(config["BatRack"]); run_config.update(config[k])`).
    fn merged_with(&self, name: &str, overrides: &Section) -> Result<Self, ConfigError> {
        let mut merged = section_from_batrack(self);
        for (k, v) in overrides {
            if k == "start" || k == "stop" {
                continue;
            }
            merged.insert(k.clone(), v.clone());
        }
        Self::from_section(name, &merged)
    }
}

fn section_from_batrack(c: &BatRackConfig) -> Section {
    let mut m = Section::new();
    m.insert("data_path".into(), c.data_path.clone());
    m.insert("duty_cycle_s".into(), c.duty_cycle_s.to_string());
    m.insert("use_vhf".into(), c.use_vhf.to_string());
    m.insert("use_audio".into(), c.use_audio.to_string());
    m.insert("use_camera".into(), c.use_camera.to_string());
    m.insert("use_timed_camera".into(), c.use_timed_camera.to_string());
    m.insert("use_trigger_vhf".into(), c.use_trigger_vhf.to_string());
    m.insert("use_trigger_audio".into(), c.use_trigger_audio.to_string());
    m.insert("use_trigger_camera".into(), c.use_trigger_camera.to_string());
    m.insert("always_on".into(), c.always_on.to_string());
    m.insert("mqtt_host".into(), c.mqtt_host.clone());
    m.insert("mqtt_port".into(), c.mqtt_port.to_string());
    m.insert("mqtt_keepalive".into(), c.mqtt_keepalive.to_string());
    m.insert("logging_level".into(), c.logging_level.clone());
    m
}

/// One `[run*]` section: a daily activation window plus the `BatRack`
/// settings in effect during it (spec.md §4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct RunWindowConfig {
    pub section_name: String,
    pub start: NaiveTime,
    pub stop: NaiveTime,
    pub batrack: BatRackConfig,
}

fn parse_time_of_day(section: &str, key: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(value.trim(), fmt) {
            return Ok(t);
        }
    }
    Err(ConfigError::InvalidRunWindow {
        section: section.to_string(),
        reason: format!("could not parse '{}.{}' = '{}' as HH:MM[:SS]", section, key, value),
    })
}

/// The full, validated configuration tree (spec.md §3 "AppConfig").
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub batrack: BatRackConfig,
    pub audio: AudioUnitConfig,
    pub vhf: VhfUnitConfig,
    pub camera: CameraUnitConfig,
    pub runs: Vec<RunWindowConfig>,
}

impl AppConfig {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let ini = Ini::load_from_file(path.as_ref()).map_err(|e| ConfigError::FileUnreadable {
            path: path_str,
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let batrack_section =
            section_map(ini, "BatRack").ok_or_else(|| ConfigError::MissingSection {
                section: "BatRack".to_string(),
            })?;
        let batrack = BatRackConfig::from_section("default", &batrack_section)?;

        let audio = section_map(ini, "AudioAnalysisUnit")
            .map(|s| AudioUnitConfig::from_section(&s))
            .transpose()?
            .unwrap_or_default();

        let vhf = section_map(ini, "VHFAnalysisUnit")
            .map(|s| VhfUnitConfig::from_section(&s))
            .transpose()?
            .unwrap_or_default();

        let camera = section_map(ini, "CameraAnalysisUnit")
            .map(|s| CameraUnitConfig::from_section(&s))
            .transpose()?
            .unwrap_or_default();

        let mut runs = Vec::new();
        for section_name in ini.sections().flatten() {
            if !section_name.starts_with("run") {
                continue;
            }
            let run_section = section_map(ini, section_name).unwrap_or_default();
            let start = parse_time_of_day(
                section_name,
                "start",
                required(&run_section, section_name, "start")?,
            )?;
            let stop = parse_time_of_day(
                section_name,
                "stop",
                required(&run_section, section_name, "stop")?,
            )?;
            let merged_batrack = batrack.merged_with(section_name, &run_section)?;
            runs.push(RunWindowConfig {
                section_name: section_name.to_string(),
                start,
                stop,
                batrack: merged_batrack,
            });
        }

        Ok(AppConfig { batrack, audio, vhf, camera, runs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_str(contents: &str) -> Result<AppConfig, ConfigError> {
        let ini = Ini::load_from_str(contents).expect("valid ini for test");
        AppConfig::from_ini(&ini)
    }

    #[test]
    fn minimal_batrack_section_uses_defaults() {
        let cfg = load_str("[BatRack]\n").unwrap();
        assert_eq!(cfg.batrack.duty_cycle_s, 10);
        assert!(cfg.batrack.use_audio);
        assert!(!cfg.batrack.always_on);
        assert!(cfg.runs.is_empty());
    }

    #[test]
    fn missing_batrack_section_is_an_error() {
        let err = load_str("[Other]\nkey=value\n").unwrap_err();
        assert_eq!(err, ConfigError::MissingSection { section: "BatRack".to_string() });
    }

    #[test]
    fn string_boolean_coercion_accepts_common_spellings() {
        let cfg = load_str("[BatRack]\nalways_on=Yes\nuse_camera=0\n").unwrap();
        assert!(cfg.batrack.always_on);
        assert!(!cfg.batrack.use_camera);
    }

    #[test]
    fn invalid_boolean_is_rejected_with_context() {
        let err = load_str("[BatRack]\nalways_on=maybe\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { section, key, .. } => {
                assert_eq!(section, "BatRack");
                assert_eq!(key, "always_on");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn run_section_overrides_batrack_and_parses_window() {
        let cfg = load_str(
            "[BatRack]\nduty_cycle_s=10\nuse_camera=true\n\n\
             [run_morning]\nstart=08:00\nstop=09:00\nduty_cycle_s=5\n",
        )
        .unwrap();
        assert_eq!(cfg.runs.len(), 1);
        let run = &cfg.runs[0];
        assert_eq!(run.start, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(run.stop, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(run.batrack.duty_cycle_s, 5);
        assert!(run.batrack.use_camera, "unrelated BatRack keys should survive the merge");
    }

    #[test]
    fn run_section_missing_start_is_an_error() {
        let err = load_str("[BatRack]\n\n[run_evening]\nstop=21:00\n").unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingKey { section: "run_evening".to_string(), key: "start".to_string() }
        );
    }
}
