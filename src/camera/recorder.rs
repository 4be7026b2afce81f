//! The external recorder's control surface (spec.md §4.4, §9 Design Notes:
//! "abstract the recorder behind a narrow capability"). [`Recorder`] owns
//! the FIFO write and the log-tail confirmation logic; [`super::log_tail`]
//! holds the pure parsing it calls into.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

use crate::error::CameraError;

use super::log_tail::{contains_marker, derive_target_filename, parse_boxing_path, remove_thumbnails};

pub struct Recorder {
    html_folder: PathBuf,
    number_of_lines_to_observe: usize,
}

impl Recorder {
    pub fn new(html_folder: PathBuf, number_of_lines_to_observe: usize) -> Self {
        Recorder { html_folder, number_of_lines_to_observe }
    }

    fn fifo_path(&self) -> PathBuf {
        self.html_folder.join("FIFO1")
    }

    fn log_path(&self) -> PathBuf {
        self.html_folder.join("scheduleLog.txt")
    }

    /// Writes `"1"`/`"0"` to the control FIFO (spec.md §4.4). Opening a
    /// named pipe for writing blocks until a reader attaches, matching
    /// `original_source/batrack/video.py`'s plain `open(..., "w")`.
    pub fn command(&self, on: bool) -> Result<(), CameraError> {
        use std::io::Write;
        let path = self.fifo_path();
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).map_err(|e| {
            CameraError::FifoWriteFailed { path: path.display().to_string(), reason: e.to_string() }
        })?;
        file.write_all(if on { b"1" } else { b"0" }).map_err(|e| CameraError::FifoWriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn tail_lines(&self) -> Result<Vec<String>, CameraError> {
        let path = self.log_path();
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| CameraError::LogUnreadable { path: path.display().to_string(), reason: e.to_string() })?;
        let lines: Vec<String> = contents.lines().map(str::to_string).collect();
        let start = lines.len().saturating_sub(self.number_of_lines_to_observe);
        Ok(lines[start..].to_vec())
    }

    /// spec.md §4.4 start confirmation: 1s after `start_recording`, tail the
    /// last `number_of_lines_to_observe` log lines for `"Capturing
    /// started"`. Returns whether it was found; the caller terminates the
    /// process on `false` (fatal per spec.md §7 "peer unconfirmed").
    pub async fn await_start_confirmation(&self) -> bool {
        tokio::time::sleep(Duration::from_secs(1)).await;
        match self.tail_lines() {
            Ok(lines) => contains_marker(&lines, "Capturing started"),
            Err(e) => {
                warn!("camera: {}", e);
                false
            }
        }
    }

    /// spec.md §4.4 stop confirmation: follows new log lines for up to
    /// `timeout` watching for `"Capturing stopped"` and `"Finished boxing
    /// <path>"`. On the boxing line, moves the video into `data_path` and
    /// removes its thumbnails. Timeout without confirmation is logged and
    /// non-fatal (spec.md §7).
    pub async fn await_stop_confirmation(&self, timeout: Duration, host: &str, data_path: &Path) {
        let path = self.log_path();
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                warn!("camera: could not open schedule log '{}': {}", path.display(), e);
                return;
            }
        };
        if let Err(e) = file.seek(SeekFrom::End(0)).await {
            warn!("camera: could not seek schedule log '{}': {}", path.display(), e);
            return;
        }
        let mut reader = BufReader::new(file);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut stopped_confirmed = false;

        while tokio::time::Instant::now() < deadline {
            let mut line = String::new();
            let read = tokio::time::timeout(Duration::from_millis(200), reader.read_line(&mut line)).await;
            match read {
                Ok(Ok(0)) | Err(_) => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                Ok(Ok(_)) => {
                    let line = line.trim_end().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if line.contains("Capturing stopped") {
                        info!("confirmed capturing stopped");
                        stopped_confirmed = true;
                    }
                    if let Some(video_path) = parse_boxing_path(&line) {
                        if let Err(e) = Self::finish_boxing(&video_path, host, data_path) {
                            warn!("camera: {}", e);
                        }
                        return;
                    }
                }
                Ok(Err(e)) => {
                    warn!("camera: error reading schedule log '{}': {}", path.display(), e);
                    break;
                }
            }
        }

        if !stopped_confirmed {
            warn!("camera: 'Capturing stopped' not confirmed within {:?}, ignoring", timeout);
        }
    }

    fn finish_boxing(video_path: &Path, host: &str, data_path: &Path) -> Result<(), CameraError> {
        let target_name = derive_target_filename(video_path, host)?;
        let target_path = data_path.join(&target_name);
        std::fs::rename(video_path, &target_path).map_err(|e| CameraError::VideoMoveFailed {
            path: video_path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!("moved video {} -> {}", video_path.display(), target_path.display());

        match remove_thumbnails(video_path) {
            Ok(removed) if !removed.is_empty() => info!("removed {} thumbnail(s)", removed.len()),
            Ok(_) => {}
            Err(e) => warn!("camera: failed to remove thumbnails for {}: {}", video_path.display(), e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tail_lines_returns_only_the_trailing_window() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("scheduleLog.txt"), "a\nb\nc\nd\ne\nf\n").unwrap();
        let rec = Recorder::new(dir.path().to_path_buf(), 3);
        let lines = rec.tail_lines().unwrap();
        assert_eq!(lines, vec!["d".to_string(), "e".to_string(), "f".to_string()]);
    }

    #[tokio::test]
    async fn await_start_confirmation_finds_marker_in_tailed_lines() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("scheduleLog.txt"), "boot\nCapturing started\n").unwrap();
        let rec = Recorder::new(dir.path().to_path_buf(), 5);
        assert!(rec.await_start_confirmation().await);
    }

    #[tokio::test]
    async fn await_start_confirmation_is_false_without_marker() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("scheduleLog.txt"), "boot\nidle\n").unwrap();
        let rec = Recorder::new(dir.path().to_path_buf(), 5);
        assert!(!rec.await_start_confirmation().await);
    }

    #[test]
    fn finish_boxing_moves_video_and_removes_thumbnails() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let video = src_dir.path().join("vi_0281_20230515_151643.mp4");
        std::fs::write(&video, b"fake video").unwrap();
        let thumb = src_dir.path().join("vi_0281_20230515_151643.mp4.0.th.jpg");
        std::fs::write(&thumb, b"fake thumb").unwrap();

        Recorder::finish_boxing(&video, "teststation", dst_dir.path()).unwrap();

        assert!(!video.exists());
        assert!(!thumb.exists());
        assert!(dst_dir.path().join("teststation_2023-05-15T15_16_43.mp4").exists());
    }
}
