//! Background rolling WAV writer (spec.md §3 `WaveWriter`, §4.2
//! "Recording"). A single-producer/single-consumer handoff: the capture
//! callback (producer) enqueues blocks without blocking; this background
//! thread (consumer) owns the `hound` writer and performs all file I/O.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use hound::{WavSpec, WavWriter as HoundWriter};
use log::{info, warn};

use crate::error::AudioError;

/// How long the writer thread waits for a block before treating the FIFO
/// as starved and shutting itself down (spec.md §3 "WaveWriter" lifecycle).
const FIFO_STARVATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the background writer thread. Dropping the sender half (done
/// in `stop`) lets the thread drain whatever is left in the channel, then
/// exit and finalize its current file.
pub struct WaveWriter {
    sender: Option<mpsc::Sender<Vec<i16>>>,
    handle: Option<JoinHandle<()>>,
}

struct RollingFile {
    data_path: PathBuf,
    host: String,
    sampling_rate: u32,
    max_frames: u64,
    writer: HoundWriter<std::io::BufWriter<std::fs::File>>,
    frames_written: u64,
}

impl RollingFile {
    fn open(data_path: &Path, host: &str, sampling_rate: u32, max_frames: u64) -> Result<Self, AudioError> {
        let path = Self::next_path(data_path, host);
        info!("creating wav file '{}'", path.display());
        let spec = WavSpec {
            channels: 1,
            sample_rate: sampling_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = HoundWriter::create(&path, spec).map_err(|e| AudioError::WaveWriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(RollingFile {
            data_path: data_path.to_path_buf(),
            host: host.to_string(),
            sampling_rate,
            max_frames,
            writer,
            frames_written: 0,
        })
    }

    fn next_path(data_path: &Path, host: &str) -> PathBuf {
        let start_time_str = Local::now().format("%Y-%m-%dT%H_%M_%S").to_string();
        let base = data_path.join(format!("{}_{}.wav", host, start_time_str));
        if !base.exists() {
            return base;
        }
        // Two rollovers inside the same wall-clock second: disambiguate
        // rather than silently truncate the earlier file.
        let mut n = 1;
        loop {
            let candidate = data_path.join(format!("{}_{}_{}.wav", host, start_time_str, n));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Writes `block`, rolling to a fresh file first if it would otherwise
    /// exceed `max_frames` (spec.md: "rolls a new file without dropping
    /// samples").
    fn write(&mut self, block: &[i16]) -> Result<(), AudioError> {
        if self.frames_written + block.len() as u64 > self.max_frames {
            info!("wave reached maximum, starting new file...");
            self.roll()?;
        }
        for &sample in block {
            self.writer.write_sample(sample).map_err(|e| AudioError::WaveWriteFailed {
                path: "<current>".to_string(),
                reason: e.to_string(),
            })?;
        }
        self.frames_written += block.len() as u64;
        Ok(())
    }

    fn roll(&mut self) -> Result<(), AudioError> {
        *self = RollingFile::open(&self.data_path, &self.host, self.sampling_rate, self.max_frames)?;
        Ok(())
    }

    fn finalize(self) {
        if let Err(e) = self.writer.finalize() {
            warn!("failed to finalize wav file: {}", e);
        }
    }
}

impl WaveWriter {
    /// Spawns the writer thread and opens its first file.
    pub fn start(data_path: PathBuf, host: String, sampling_rate: u32, max_frames: u64) -> Self {
        let (sender, receiver) = mpsc::channel::<Vec<i16>>();

        let handle = thread::Builder::new()
            .name("batrackd-wave-writer".to_string())
            .spawn(move || {
                let mut file = match RollingFile::open(&data_path, &host, sampling_rate, max_frames) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("wave writer could not open initial file: {}", e);
                        return;
                    }
                };

                loop {
                    match receiver.recv_timeout(FIFO_STARVATION_TIMEOUT) {
                        Ok(block) => {
                            if let Err(e) = file.write(&block) {
                                warn!("wave writer dropped a block: {}", e);
                            }
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            warn!("wave writer fifo starved for {:?}, finalizing", FIFO_STARVATION_TIMEOUT);
                            break;
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }

                file.finalize();
            })
            .expect("failed to spawn wave writer thread");

        WaveWriter { sender: Some(sender), handle: Some(handle) }
    }

    /// Enqueues a block without blocking the caller (the capture callback).
    /// Silently drops the block if the writer has already stopped, mirroring
    /// the Python `self.__wavewriter.q.put(in_data)` call site,
    /// which never checks for writer liveness either.
    pub fn enqueue(&self, block: Vec<i16>) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(block);
        }
    }

    /// Drains and closes: drop the sender so the writer thread observes a
    /// disconnect, then join it.
    pub fn stop(mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WaveWriter {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_and_finalizes_a_wav_file() {
        let dir = tempdir().unwrap();
        let writer = WaveWriter::start(dir.path().to_path_buf(), "teststation".to_string(), 250_000, 1_000_000);
        writer.enqueue(vec![0i16; 100]);
        writer.enqueue(vec![1i16; 100]);
        writer.stop();

        let mut wav_files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|ext| ext == "wav").unwrap_or(false))
            .collect();
        assert_eq!(wav_files.len(), 1, "exactly one wav file should have been created");

        let reader = hound::WavReader::open(wav_files.remove(0).path()).unwrap();
        assert_eq!(reader.len(), 200, "both enqueued blocks should be present, lossless");
    }

    #[test]
    fn rolls_to_a_new_file_when_max_frames_exceeded() {
        let dir = tempdir().unwrap();
        // max_frames small enough that the second block forces a roll.
        let writer = WaveWriter::start(dir.path().to_path_buf(), "teststation".to_string(), 250_000, 150);
        writer.enqueue(vec![0i16; 100]);
        writer.enqueue(vec![1i16; 100]);
        writer.stop();

        let wav_files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|ext| ext == "wav").unwrap_or(false))
            .collect();
        assert_eq!(wav_files.len(), 2, "exceeding max_frames should roll to a second file");

        let total_frames: u32 = wav_files
            .iter()
            .map(|e| hound::WavReader::open(e.path()).unwrap().len())
            .sum();
        assert_eq!(total_frames, 200, "rollover must be lossless across files");
    }
}
