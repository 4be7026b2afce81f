//! Pure parsing helpers for the external recorder's `scheduleLog.txt`
//! (spec.md §4.4), kept free of any I/O so they can be driven directly with
//! synthetic log lines in tests.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::error::CameraError;

pub fn contains_marker(lines: &[String], marker: &str) -> bool {
    lines.iter().any(|line| line.contains(marker))
}

/// Extracts the video path from a `"... Finished boxing <path> ..."` log
/// line (spec.md §4.4). `original_source/batrack/video.py` hardcodes the
/// path as `line.split()[4]`; this instead locates the `"boxing"` token and
/// takes whatever follows it, which is robust to the exact timestamp/prefix
/// format the external recorder happens to log with.
pub fn parse_boxing_path(line: &str) -> Option<PathBuf> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let boxing_idx = tokens.iter().position(|&t| t == "boxing")?;
    tokens.get(boxing_idx + 1).map(PathBuf::from)
}

/// Derives `<host>_<video_time>.<ext>` from a recorder video filename whose
/// stem encodes `..._YYYYMMDD_HHMMSS` (spec.md §4.4; e.g.
/// `vi_0281_20230515_151643.mp4`). The donor's Python comment documents this
/// exact example filename shape.
pub fn derive_target_filename(video_path: &Path, host: &str) -> Result<String, CameraError> {
    let stem = video_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CameraError::LogUnreadable {
            path: video_path.display().to_string(),
            reason: "video path has no file stem".to_string(),
        })?;
    let ext = video_path.extension().and_then(|s| s.to_str()).unwrap_or("");

    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 {
        return Err(CameraError::LogUnreadable {
            path: video_path.display().to_string(),
            reason: format!("filename '{}' does not match '..._YYYYMMDD_HHMMSS'", stem),
        });
    }
    let date_time_str = format!("{}_{}", parts[parts.len() - 2], parts[parts.len() - 1]);
    let video_time = NaiveDateTime::parse_from_str(&date_time_str, "%Y%m%d_%H%M%S").map_err(|e| {
        CameraError::LogUnreadable {
            path: video_path.display().to_string(),
            reason: format!("could not parse '{}' as YYYYMMDD_HHMMSS: {}", date_time_str, e),
        }
    })?;

    let time_str = video_time.format("%Y-%m-%dT%H_%M_%S");
    if ext.is_empty() {
        Ok(format!("{}_{}", host, time_str))
    } else {
        Ok(format!("{}_{}.{}", host, time_str, ext))
    }
}

/// Removes sibling thumbnail files matching `<video_path>.*.th.jpg`
/// (spec.md §4.4). Implemented as a directory scan rather than a glob
/// crate, since the pattern is a fixed prefix/suffix match.
pub fn remove_thumbnails(video_path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let parent = video_path.parent().unwrap_or_else(|| Path::new("."));
    let video_name = match video_path.file_name().and_then(|s| s.to_str()) {
        Some(name) => name.to_string(),
        None => return Ok(Vec::new()),
    };
    let prefix = format!("{}.", video_name);

    let mut removed = Vec::new();
    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(".th.jpg") {
            std::fs::remove_file(entry.path())?;
            removed.push(entry.path());
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_marker_finds_substring_in_any_line() {
        let lines = vec!["foo".to_string(), "Capturing started".to_string()];
        assert!(contains_marker(&lines, "Capturing started"));
        assert!(!contains_marker(&lines, "Capturing stopped"));
    }

    #[test]
    fn parse_boxing_path_extracts_token_after_boxing() {
        let line = "2023-05-15 15:16:43 Finished boxing /data/vi_0281_20230515_151643.mp4 ok";
        assert_eq!(
            parse_boxing_path(line),
            Some(PathBuf::from("/data/vi_0281_20230515_151643.mp4"))
        );
    }

    #[test]
    fn parse_boxing_path_returns_none_without_marker() {
        assert_eq!(parse_boxing_path("Capturing stopped"), None);
    }

    #[test]
    fn derive_target_filename_matches_spec_example() {
        let path = Path::new("/data/vi_0281_20230515_151643.mp4");
        let name = derive_target_filename(path, "teststation").unwrap();
        assert_eq!(name, "teststation_2023-05-15T15_16_43.mp4");
    }

    #[test]
    fn derive_target_filename_rejects_unparseable_stem() {
        let path = Path::new("/data/video.mp4");
        assert!(derive_target_filename(path, "teststation").is_err());
    }
}
