//! The audio analysis unit (spec.md §4.2): opens a mono int16 capture
//! stream, classifies each block through [`super::fft`] and
//! [`super::ping`], and manages a rolling [`super::wave_writer::WaveWriter`]
//! while recording.
//!
//! Adapted from the donor's `engine/backend/cpal.rs` (`CpalBackend`): a
//! dedicated thread owns the non-`Send` `cpal::Stream` for its entire
//! lifetime (this is also where spec.md §4.2's 2s health check lives, since
//! it has to run alongside the stream rather than be joined from outside
//! it), while a second thread drains [`super::buffer_pool`]'s lock-free
//! handoff and does the actual analysis. The capture callback itself only
//! ever touches atomics and lock-free queues, honoring spec.md §5's "must
//! not block inside the callback".

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use log::{info, warn};

use crate::config::AudioUnitConfig;
use crate::error::{AudioError, SupervisorError};
use crate::model::StatusMap;
use crate::unit::{AnalysisUnit, TriggerCallback, UnitCore};

use super::buffer_pool::{self, AnalysisChannels, CaptureChannels};
use super::fft::BlockAnalyzer;
use super::ping::PingCounters;
use super::wave_writer::WaveWriter;

/// spec.md §4.2 "Health": "every 2s the run loop observes `frame_count`".
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Depth of the pre-allocated block pool shared between the capture and
/// analysis threads. A handful of blocks is enough slack for the analysis
/// thread to fall slightly behind without the capture callback stalling.
const BUFFER_POOL_BLOCKS: usize = 8;

/// True if a device name matches spec.md §4.2's preferred-device rule.
/// Pulled out as a pure function so the matching rule is testable without
/// a real audio host.
fn is_preferred_device_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("mic") || lower.contains("input")
}

struct AudioShared {
    core: UnitCore,
    frame_count: AtomicU64,
    writer: Mutex<Option<WaveWriter>>,
}

pub struct AudioUnit {
    shared: Arc<AudioShared>,
    cfg: AudioUnitConfig,
    data_path: PathBuf,
    host: String,
    capture_thread: Mutex<Option<JoinHandle<()>>>,
    analysis_thread: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl AudioUnit {
    pub fn new(
        cfg: &AudioUnitConfig,
        data_path: PathBuf,
        host: String,
        use_trigger: bool,
        trigger_callback: TriggerCallback,
    ) -> Self {
        AudioUnit {
            shared: Arc::new(AudioShared {
                core: UnitCore::new("AudioAnalysisUnit", use_trigger, trigger_callback),
                frame_count: AtomicU64::new(0),
                writer: Mutex::new(None),
            }),
            cfg: cfg.clone(),
            data_path,
            host,
            capture_thread: Mutex::new(None),
            analysis_thread: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// First device whose name contains "mic" or "input" (spec.md §4.2
    /// "Device selection"), else the system default input device.
    fn select_device(host: &cpal::Host) -> Option<cpal::Device> {
        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name() {
                    if is_preferred_device_name(&name) {
                        return Some(device);
                    }
                }
            }
        }
        host.default_input_device()
    }

    fn run_usb_power_cycle(command: &str) {
        info!("audio: running usb power-cycle command: {}", command);
        match std::process::Command::new("sh").arg("-c").arg(command).status() {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("audio: usb power-cycle command exited with {}", status),
            Err(e) => warn!("audio: failed to run usb power-cycle command: {}", e),
        }
    }

    /// Owns the `cpal::Stream` for its entire lifetime: builds it, plays
    /// it, then blocks on the 2s health-check loop (spec.md §4.2 "Health")
    /// until told to shut down or until the device goes silent, at which
    /// point it exits; the supervisor's heartbeat observes `is_alive() ==
    /// false` and escalates (spec.md §4.2, §4.5).
    fn capture_thread_main(
        shared: Arc<AudioShared>,
        shutdown: Arc<AtomicBool>,
        mut channels: CaptureChannels,
        sampling_rate: u32,
        input_frames_per_block: usize,
        usb_power_cycle_command: String,
        ready_tx: mpsc::Sender<Result<(), SupervisorError>>,
    ) {
        let host = cpal::default_host();
        let device = match Self::select_device(&host) {
            Some(d) => d,
            None => {
                let _ = ready_tx.send(Err(SupervisorError::UnitStartFailed {
                    unit: "AudioAnalysisUnit".to_string(),
                    reason: AudioError::NoInputDevice.to_string(),
                }));
                return;
            }
        };
        if let Ok(name) = device.name() {
            info!("audio: selected input device '{}'", name);
        }

        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(sampling_rate),
            buffer_size: BufferSize::Fixed(input_frames_per_block as u32),
        };

        let shared_cb = Arc::clone(&shared);
        let err_fn = |err| warn!("audio: stream error: {}", err);

        let stream = match device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                shared_cb.frame_count.fetch_add(1, Ordering::Relaxed);

                let Ok(mut block) = channels.pool_consumer.pop() else {
                    // Pool exhausted: the analysis thread has fallen behind.
                    // Dropping this block is preferable to blocking the
                    // capture callback (spec.md §5).
                    return;
                };
                let n = data.len().min(block.len());
                block[..n].copy_from_slice(&data[..n]);
                for sample in &mut block[n..] {
                    *sample = 0;
                }

                if shared_cb.core.recording() {
                    if let Ok(guard) = shared_cb.writer.try_lock() {
                        if let Some(writer) = guard.as_ref() {
                            writer.enqueue(block.clone());
                        }
                    }
                }

                let _ = channels.data_producer.push(block);
            },
            err_fn,
            None,
        ) {
            Ok(s) => s,
            Err(e) => {
                let _ = ready_tx.send(Err(SupervisorError::UnitStartFailed {
                    unit: "AudioAnalysisUnit".to_string(),
                    reason: AudioError::StreamOpenFailed { reason: e.to_string() }.to_string(),
                }));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(SupervisorError::UnitStartFailed {
                unit: "AudioAnalysisUnit".to_string(),
                reason: AudioError::StreamOpenFailed { reason: e.to_string() }.to_string(),
            }));
            return;
        }

        let _ = ready_tx.send(Ok(()));

        while !shutdown.load(Ordering::Relaxed) {
            thread::sleep(HEALTH_CHECK_INTERVAL);
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            let frames = shared.frame_count.swap(0, Ordering::Relaxed);
            if frames == 0 {
                warn!(
                    "audio: {}, power-cycling usb",
                    AudioError::DeviceSilent { seconds_silent: HEALTH_CHECK_INTERVAL.as_secs() }
                );
                Self::run_usb_power_cycle(&usb_power_cycle_command);
                break;
            }
        }

        shared.core.set_alive(false);
        drop(stream);
    }

    fn analysis_thread_main(
        shared: Arc<AudioShared>,
        shutdown: Arc<AtomicBool>,
        mut channels: AnalysisChannels,
        cfg: AudioUnitConfig,
    ) {
        let mut analyzer = BlockAnalyzer::new(
            cfg.input_frames_per_block(),
            cfg.sampling_rate,
            cfg.highpass_hz,
            cfg.lowpass_hz,
        );
        let mut counters = PingCounters::default();
        let noise_blocks_max = cfg.noise_blocks_max();
        let quiet_blocks_max = cfg.quiet_blocks_max();

        while !shutdown.load(Ordering::Relaxed) {
            match channels.data_consumer.pop() {
                Ok(block) => {
                    let reading = analyzer.analyze(&block);
                    counters.step(
                        &shared.core,
                        reading.peak_db,
                        reading.peak_frequency_hz,
                        cfg.threshold_dbfs,
                        noise_blocks_max,
                        quiet_blocks_max,
                    );
                    let _ = channels.pool_producer.push(block);
                }
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        }
    }
}

impl AnalysisUnit for AudioUnit {
    fn name(&self) -> &'static str {
        self.shared.core.name()
    }

    fn use_trigger(&self) -> bool {
        self.shared.core.use_trigger()
    }

    fn start(&self) -> Result<(), SupervisorError> {
        self.shared.core.set_running(true);
        self.shutdown.store(false, Ordering::SeqCst);
        self.shared.frame_count.store(0, Ordering::SeqCst);

        let input_frames_per_block = self.cfg.input_frames_per_block();
        let (capture_channels, analysis_channels) =
            buffer_pool::build(BUFFER_POOL_BLOCKS, input_frames_per_block);

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), SupervisorError>>();
        let shared_capture = Arc::clone(&self.shared);
        let shutdown_capture = Arc::clone(&self.shutdown);
        let sampling_rate = self.cfg.sampling_rate;
        let usb_power_cycle_command = self.cfg.usb_power_cycle_command.clone();

        let capture_handle = thread::Builder::new()
            .name("batrackd-audio-capture".to_string())
            .spawn(move || {
                Self::capture_thread_main(
                    shared_capture,
                    shutdown_capture,
                    capture_channels,
                    sampling_rate,
                    input_frames_per_block,
                    usb_power_cycle_command,
                    ready_tx,
                );
            })
            .expect("failed to spawn audio capture thread");

        let start_result = ready_rx.recv_timeout(Duration::from_secs(5));
        match start_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.shared.core.set_running(false);
                let _ = capture_handle.join();
                return Err(e);
            }
            Err(_) => {
                self.shared.core.set_running(false);
                self.shutdown.store(true, Ordering::SeqCst);
                let _ = capture_handle.join();
                return Err(SupervisorError::UnitStartFailed {
                    unit: "AudioAnalysisUnit".to_string(),
                    reason: "timed out starting capture stream".to_string(),
                });
            }
        }

        *self.capture_thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(capture_handle);

        let shared_analysis = Arc::clone(&self.shared);
        let shutdown_analysis = Arc::clone(&self.shutdown);
        let analysis_cfg = self.cfg.clone();
        let analysis_handle = thread::Builder::new()
            .name("batrackd-audio-analysis".to_string())
            .spawn(move || {
                Self::analysis_thread_main(shared_analysis, shutdown_analysis, analysis_channels, analysis_cfg);
            })
            .expect("failed to spawn audio analysis thread");
        *self.analysis_thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(analysis_handle);

        self.shared.core.set_alive(true);
        Ok(())
    }

    fn stop(&self) {
        self.stop_recording();
        self.shared.core.set_running(false);
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.capture_thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.analysis_thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        self.shared.core.set_alive(false);
    }

    /// Opens a [`WaveWriter`] writing into `data_path` (spec.md §4.2
    /// "Recording"). The capture callback starts teeing blocks to it as
    /// soon as `recording()` observes true.
    fn start_recording(&self) {
        if self.shared.core.recording() {
            return;
        }
        let writer = WaveWriter::start(
            self.data_path.clone(),
            self.host.clone(),
            self.cfg.sampling_rate,
            self.cfg.max_frames(),
        );
        *self.shared.writer.lock().unwrap_or_else(|e| e.into_inner()) = Some(writer);
        self.shared.core.set_recording(true);
    }

    fn stop_recording(&self) {
        if !self.shared.core.recording() {
            return;
        }
        self.shared.core.set_recording(false);
        if let Some(writer) = self.shared.writer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            writer.stop();
        }
    }

    fn trigger(&self) -> bool {
        self.shared.core.trigger()
    }

    fn recording(&self) -> bool {
        self.shared.core.recording()
    }

    fn is_alive(&self) -> bool {
        self.shared.core.is_alive()
    }

    fn get_status(&self) -> StatusMap {
        self.shared.core.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferred_device_name_matches_mic_or_input_case_insensitively() {
        assert!(is_preferred_device_name("USB Microphone"));
        assert!(is_preferred_device_name("Line Input 1"));
        assert!(is_preferred_device_name("MIC array"));
        assert!(!is_preferred_device_name("HDMI Output"));
        assert!(!is_preferred_device_name("Built-in Speaker"));
    }

    #[test]
    fn new_unit_starts_idle_with_no_trigger_or_recording() {
        let cfg = AudioUnitConfig::default();
        let unit = AudioUnit::new(
            &cfg,
            std::path::PathBuf::from("/tmp"),
            "teststation".to_string(),
            true,
            Arc::new(|_n, v, _p| v),
        );
        assert!(!unit.trigger());
        assert!(!unit.recording());
        assert!(!unit.is_alive());
        assert_eq!(unit.name(), "AudioAnalysisUnit");
    }
}
