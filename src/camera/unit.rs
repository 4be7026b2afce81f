//! The camera analysis unit (spec.md §4.4): drives the illumination GPIO
//! line and the external recorder's FIFO, confirming both transitions by
//! tailing its schedule log. This unit never participates in trigger
//! fusion by signal content of its own: it only ever contributes the
//! `use_trigger_camera` configured bias, like the other units.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::config::CameraUnitConfig;
use crate::error::{CameraError, ErrorCode, SupervisorError};
use crate::model::StatusMap;
use crate::unit::{AnalysisUnit, TriggerCallback, UnitCore};

use super::gpio::GpioLine;
use super::recorder::Recorder;

/// State shared with the spawned confirmation tasks (see [`super::vhf::unit`]
/// for why this needs to be `Arc`-wrapped rather than borrowed).
struct CameraShared {
    core: UnitCore,
    gpio: Box<dyn GpioLine>,
    recorder: Recorder,
}

pub struct CameraUnit {
    shared: Arc<CameraShared>,
    data_path: PathBuf,
    host: String,
    video_boxing_timeout_s: u64,
    rt: tokio::runtime::Handle,
}

impl CameraUnit {
    pub fn new(
        cfg: &CameraUnitConfig,
        gpio: Box<dyn GpioLine>,
        data_path: PathBuf,
        host: String,
        use_trigger: bool,
        rt: tokio::runtime::Handle,
        trigger_callback: TriggerCallback,
    ) -> Self {
        let recorder =
            Recorder::new(PathBuf::from(&cfg.html_folder), CameraUnitConfig::NUMBER_OF_LINES_TO_OBSERVE);
        CameraUnit {
            shared: Arc::new(CameraShared {
                core: UnitCore::new("CameraAnalysisUnit", use_trigger, trigger_callback),
                gpio,
                recorder,
            }),
            data_path,
            host,
            video_boxing_timeout_s: cfg.video_boxing_timeout_s,
            rt,
        }
    }
}

impl AnalysisUnit for CameraUnit {
    fn name(&self) -> &'static str {
        self.shared.core.name()
    }

    fn use_trigger(&self) -> bool {
        self.shared.core.use_trigger()
    }

    /// The camera unit has no background run loop of its own (spec.md
    /// §4.4): it only reacts to `start_recording`/`stop_recording`. It is
    /// alive as soon as the GPIO line is claimed.
    fn start(&self) -> Result<(), SupervisorError> {
        self.shared.core.set_running(true);
        self.shared.core.set_alive(true);
        Ok(())
    }

    fn stop(&self) {
        self.stop_recording();
        self.shared.core.set_running(false);
        self.shared.core.set_alive(false);
    }

    /// Powers the illumination line, commands the recorder on, then waits
    /// 1s and tails the schedule log for `"Capturing started"`. An
    /// unconfirmed start is fatal (spec.md §4.4, §7): the external
    /// recorder is a hard dependency for this unit's entire purpose, so
    /// the process terminates rather than silently recording nothing.
    fn start_recording(&self) {
        if self.shared.core.recording() {
            return;
        }
        self.shared.gpio.set(true);
        if let Err(e) = self.shared.recorder.command(true) {
            let code = e.code();
            warn!("camera: {}", e);
            std::process::exit(code);
        }
        self.shared.core.set_recording(true);

        let shared = Arc::clone(&self.shared);
        self.rt.spawn(async move {
            if !shared.recorder.await_start_confirmation().await {
                warn!("camera: start not confirmed by recorder, exiting");
                std::process::exit(CameraError::StartUnconfirmed.code());
            }
        });
    }

    /// Commands the recorder off and powers down illumination immediately,
    /// then spawns a bounded wait for the stop+boxing confirmation that
    /// performs the video handoff into `data_path` (spec.md §4.4). Unlike
    /// start, a missed stop confirmation is logged and non-fatal: a video
    /// left unboxed does not compromise the next recording.
    fn stop_recording(&self) {
        if !self.shared.core.recording() {
            return;
        }
        if let Err(e) = self.shared.recorder.command(false) {
            warn!("camera: {}", e);
        }
        self.shared.gpio.set(false);
        self.shared.core.set_recording(false);

        let shared = Arc::clone(&self.shared);
        let data_path = self.data_path.clone();
        let host = self.host.clone();
        let timeout = Duration::from_secs(self.video_boxing_timeout_s);
        self.rt.spawn(async move {
            shared.recorder.await_stop_confirmation(timeout, &host, &data_path).await;
        });
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
    use crate::camera::gpio::FakeGpioLine;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn cfg(html_folder: &str) -> CameraUnitConfig {
        CameraUnitConfig { light_pin: 17, html_folder: html_folder.to_string(), video_boxing_timeout_s: 5 }
    }

    #[tokio::test]
    async fn start_recording_powers_gpio_and_writes_fifo_marker() {
        let dir = tempdir().unwrap();
        // A plain file stands in for the named pipe: `command()` only needs
        // something openable for writing.
        std::fs::write(dir.path().join("FIFO1"), "").unwrap();
        std::fs::write(dir.path().join("scheduleLog.txt"), "Capturing started\n").unwrap();

        let unit = CameraUnit::new(
            &cfg(dir.path().to_str().unwrap()),
            Box::new(FakeGpioLine::new()),
            dir.path().to_path_buf(),
            "teststation".to_string(),
            true,
            tokio::runtime::Handle::current(),
            Arc::new(|_n, v, _p| v),
        );
        unit.start().unwrap();
        unit.start_recording();
        assert!(unit.recording());

        let fifo_contents = std::fs::read_to_string(dir.path().join("FIFO1")).unwrap();
        assert_eq!(fifo_contents, "1");

        tokio::time::sleep(Duration::from_millis(1200)).await;
    }

    #[tokio::test]
    async fn start_recording_is_idempotent_when_already_recording() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("FIFO1"), "").unwrap();
        std::fs::write(dir.path().join("scheduleLog.txt"), "Capturing started\n").unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let gpio = Arc::new(FakeGpioLine::new());
        let gpio_clone = Arc::clone(&gpio);

        struct CountingGpio(Arc<FakeGpioLine>, Arc<AtomicU32>);
        impl GpioLine for CountingGpio {
            fn set(&self, on: bool) {
                self.1.fetch_add(1, Ordering::SeqCst);
                self.0.set(on);
            }
        }

        let unit = CameraUnit::new(
            &cfg(dir.path().to_str().unwrap()),
            Box::new(CountingGpio(gpio_clone, calls_clone)),
            dir.path().to_path_buf(),
            "teststation".to_string(),
            true,
            tokio::runtime::Handle::current(),
            Arc::new(|_n, v, _p| v),
        );
        unit.start().unwrap();
        unit.start_recording();
        unit.start_recording();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second call should be a no-op");
        assert!(gpio.is_on());

        tokio::time::sleep(Duration::from_millis(1200)).await;
    }

    #[tokio::test]
    async fn stop_recording_clears_recording_flag_and_powers_down_gpio() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("FIFO1"), "").unwrap();
        std::fs::write(dir.path().join("scheduleLog.txt"), "Capturing started\n").unwrap();

        let gpio = Arc::new(FakeGpioLine::new());
        gpio.set(true);

        struct SharedGpio(Arc<FakeGpioLine>);
        impl GpioLine for SharedGpio {
            fn set(&self, on: bool) {
                self.0.set(on);
            }
        }

        let unit = CameraUnit::new(
            &cfg(dir.path().to_str().unwrap()),
            Box::new(SharedGpio(Arc::clone(&gpio))),
            dir.path().to_path_buf(),
            "teststation".to_string(),
            true,
            tokio::runtime::Handle::current(),
            Arc::new(|_n, v, _p| v),
        );
        unit.start().unwrap();
        unit.start_recording();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        unit.stop_recording();

        assert!(!unit.recording());
        assert!(!gpio.is_on());
    }
}
