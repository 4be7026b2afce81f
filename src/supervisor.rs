//! The fusion supervisor (spec.md §2 C5, §4.5): aggregates per-unit
//! triggers into one system-wide `system_trigger`, drives the start/stop
//! fan-out across every enabled unit, and runs the heartbeat that escalates
//! a dead-but-should-be-running unit into a clean process shutdown.
//!
//! Mirrors `original_source/batrack/__main__.py`'s `BatRack` class, but
//! replaces its reflection-based `inspect.stack()` caller identification
//! (spec.md §9 Design Notes) with the source unit name passed explicitly
//! through [`crate::unit::TriggerCallback`]'s signature.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use log::{info, warn};

use crate::error::SupervisorError;
use crate::model::{ScalarValue, TriggerEvent, TriggerPayload};
use crate::sink::EventSink;
use crate::unit::{AnalysisUnit, TriggerCallback};

#[cfg(unix)]
fn self_interrupt() {
    // SAFETY: raising a signal the process already installs a handler for
    // (spec.md §4.6 "Signal handling") is always safe to call.
    unsafe {
        libc::raise(libc::SIGINT);
    }
}

#[cfg(not(unix))]
fn self_interrupt() {
    std::process::exit(1);
}

/// `SupervisorState` (spec.md §3): `always_on`, the enabled unit set, and
/// the derived `system_trigger`.
pub struct Supervisor {
    units: RwLock<Vec<Arc<dyn AnalysisUnit>>>,
    always_on: bool,
    system_trigger: Mutex<bool>,
    sink: Arc<EventSink>,
    duty_cycle_s: u64,
    heartbeat_shutdown: Arc<AtomicBool>,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(sink: Arc<EventSink>, always_on: bool, duty_cycle_s: u64) -> Arc<Self> {
        Arc::new(Supervisor {
            units: RwLock::new(Vec::new()),
            always_on,
            system_trigger: Mutex::new(false),
            sink,
            duty_cycle_s,
            heartbeat_shutdown: Arc::new(AtomicBool::new(false)),
            heartbeat_handle: Mutex::new(None),
        })
    }

    /// The single callback every constructed unit shares (spec.md §4.5):
    /// `trigger_callback` → `evaluate_triggers`. Held as a `Weak` so units
    /// never keep the supervisor alive past its own `Arc`.
    pub fn trigger_callback(self: &Arc<Self>) -> TriggerCallback {
        let weak = Arc::downgrade(self);
        Arc::new(move |unit_name: &str, value: bool, payload: TriggerPayload| {
            weak.upgrade()
                .map(|sup| sup.evaluate_triggers(unit_name, value, payload))
                .unwrap_or(value)
        })
    }

    /// Registers a constructed unit. Must happen before [`Supervisor::start`];
    /// units built with [`Supervisor::trigger_callback`] reference this
    /// supervisor, so construction order is: `new` → `trigger_callback` →
    /// build each unit → `add_unit` for each → `start`.
    pub fn add_unit(&self, unit: Arc<dyn AnalysisUnit>) {
        self.units.write().unwrap_or_else(|e| e.into_inner()).push(unit);
    }

    /// `evaluate_triggers` (spec.md §4.5): publish the edge, recompute the
    /// system trigger, and, if it changed, fan the new state out to every
    /// unit's `start_recording`/`stop_recording` before returning. The
    /// `system_trigger` mutex is held across the fan-out so concurrent
    /// edges from other units serialize behind it (spec.md §5 "Ordering
    /// guarantees").
    pub fn evaluate_triggers(&self, unit_name: &str, value: bool, payload: TriggerPayload) -> bool {
        let event = TriggerEvent {
            wall_time: Local::now(),
            source_unit: unit_name.to_string(),
            value,
            payload,
        };
        self.sink.publish(&event);

        let mut current = self.system_trigger.lock().unwrap_or_else(|e| e.into_inner());
        let units = self.units.read().unwrap_or_else(|e| e.into_inner());
        let new_trigger = self.always_on || units.iter().any(|u| u.use_trigger() && u.trigger());
        info!("trigger evaluation, current state: {}", new_trigger);

        if new_trigger != *current {
            *current = new_trigger;
            if new_trigger {
                info!("system triggered, starting recordings");
                for u in units.iter() {
                    u.start_recording();
                }
            } else {
                info!("system un-triggered, stopping recordings");
                for u in units.iter() {
                    u.stop_recording();
                }
            }
        }

        new_trigger
    }

    /// Starts every registered unit, performs the initial trigger
    /// evaluation (spec.md §8 scenario 5: with `always_on=true` this alone
    /// starts every unit recording even with no unit ever firing), and
    /// starts the heartbeat.
    pub fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        {
            let units = self.units.read().unwrap_or_else(|e| e.into_inner());
            for u in units.iter() {
                u.start().map_err(|e| SupervisorError::UnitStartFailed {
                    unit: u.name().to_string(),
                    reason: e.to_string(),
                })?;
            }
        }

        self.evaluate_triggers("BatRack", false, TriggerPayload::new());
        self.spawn_heartbeat();
        Ok(())
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let sup = Arc::clone(self);
        let shutdown = Arc::clone(&self.heartbeat_shutdown);
        let interval = Duration::from_secs(self.duty_cycle_s.max(1));

        let handle = thread::Builder::new()
            .name("batrackd-heartbeat".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    if sup.heartbeat_tick() {
                        break;
                    }
                }
            })
            .expect("failed to spawn heartbeat thread");

        *self.heartbeat_handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Logs every unit's status; if a unit reports `running=true` but
    /// `is_alive() == false`, raises SIGINT against this process (spec.md
    /// §4.5 "Heartbeat") and returns `true` so the caller stops ticking.
    fn heartbeat_tick(&self) -> bool {
        let units = self.units.read().unwrap_or_else(|e| e.into_inner());
        for u in units.iter() {
            let status = u.get_status();
            let status_str = status
                .iter()
                .map(|(k, v)| format!("{}: {}", k, if matches!(v, ScalarValue::Bool(true)) { "1" } else { "0" }))
                .collect::<Vec<_>>()
                .join(", ");
            info!("{}: {}", u.name(), status_str);

            let reports_running = matches!(status.get("running"), Some(ScalarValue::Bool(true)));
            if reports_running && !u.is_alive() {
                warn!("{} is not active, but should run; self-terminating", u.name());
                self_interrupt();
                return true;
            }
        }
        false
    }

    /// Stops the heartbeat, then every registered unit (spec.md §4.6
    /// `tear_down_supervisor`).
    pub fn stop(&self) {
        self.heartbeat_shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.heartbeat_handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }

        let units = self.units.read().unwrap_or_else(|e| e.into_inner());
        for u in units.iter() {
            u.stop();
        }
        info!("supervisor stopped");
    }

    pub fn system_trigger(&self) -> bool {
        *self.system_trigger.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatusMap;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering as AtomicOrdering;
    use tempfile::tempdir;

    struct FakeUnit {
        name: &'static str,
        use_trigger: bool,
        trigger: AtomicBool,
        recording: AtomicBool,
        alive: AtomicBool,
        running: AtomicBool,
        start_recording_calls: AtomicU32,
        stop_recording_calls: AtomicU32,
    }

    impl FakeUnit {
        fn new(name: &'static str, use_trigger: bool) -> Self {
            FakeUnit {
                name,
                use_trigger,
                trigger: AtomicBool::new(false),
                recording: AtomicBool::new(false),
                alive: AtomicBool::new(true),
                running: AtomicBool::new(true),
                start_recording_calls: AtomicU32::new(0),
                stop_recording_calls: AtomicU32::new(0),
            }
        }
    }

    impl AnalysisUnit for FakeUnit {
        fn name(&self) -> &'static str {
            self.name
        }
        fn use_trigger(&self) -> bool {
            self.use_trigger
        }
        fn start(&self) -> Result<(), SupervisorError> {
            self.running.store(true, AtomicOrdering::SeqCst);
            Ok(())
        }
        fn stop(&self) {
            self.running.store(false, AtomicOrdering::SeqCst);
        }
        fn start_recording(&self) {
            self.recording.store(true, AtomicOrdering::SeqCst);
            self.start_recording_calls.fetch_add(1, AtomicOrdering::SeqCst);
        }
        fn stop_recording(&self) {
            self.recording.store(false, AtomicOrdering::SeqCst);
            self.stop_recording_calls.fetch_add(1, AtomicOrdering::SeqCst);
        }
        fn trigger(&self) -> bool {
            self.trigger.load(AtomicOrdering::SeqCst)
        }
        fn recording(&self) -> bool {
            self.recording.load(AtomicOrdering::SeqCst)
        }
        fn is_alive(&self) -> bool {
            self.alive.load(AtomicOrdering::SeqCst)
        }
        fn get_status(&self) -> StatusMap {
            let mut m = StatusMap::new();
            m.insert("running".to_string(), self.running.load(AtomicOrdering::SeqCst).into());
            m.insert("alive".to_string(), self.alive.load(AtomicOrdering::SeqCst).into());
            m
        }
    }

    fn sink() -> Arc<EventSink> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.csv");
        // Leak the tempdir so the csv file outlives this helper; fine for
        // short-lived unit tests.
        std::mem::forget(dir);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let handle = rt.handle().clone();
        std::mem::forget(rt);
        Arc::new(EventSink::new(&path, "teststation", "localhost", 18830, 60, handle).unwrap())
    }

    #[test]
    fn fan_out_calls_start_recording_on_every_unit_on_rising_edge() {
        let sup = Supervisor::new(sink(), false, 10);
        let cb = sup.trigger_callback();
        let a = Arc::new(FakeUnit::new("A", true));
        let b = Arc::new(FakeUnit::new("B", true));
        sup.add_unit(a.clone());
        sup.add_unit(b.clone());
        let _ = cb;

        a.trigger.store(true, AtomicOrdering::SeqCst);
        let result = sup.evaluate_triggers("A", true, TriggerPayload::new());

        assert!(result);
        assert!(sup.system_trigger());
        assert_eq!(a.start_recording_calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(b.start_recording_calls.load(AtomicOrdering::SeqCst), 1, "every unit starts, not just the one that triggered");
    }

    #[test]
    fn falling_edge_stops_recording_on_every_unit_once_no_trigger_remains() {
        let sup = Supervisor::new(sink(), false, 10);
        let a = Arc::new(FakeUnit::new("A", true));
        sup.add_unit(a.clone());

        a.trigger.store(true, AtomicOrdering::SeqCst);
        sup.evaluate_triggers("A", true, TriggerPayload::new());
        assert!(sup.system_trigger());

        a.trigger.store(false, AtomicOrdering::SeqCst);
        let result = sup.evaluate_triggers("A", false, TriggerPayload::new());
        assert!(!result);
        assert_eq!(a.stop_recording_calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn always_on_keeps_system_triggered_regardless_of_unit_state() {
        let sup = Supervisor::new(sink(), true, 10);
        let a = Arc::new(FakeUnit::new("A", true));
        sup.add_unit(a.clone());

        let result = sup.evaluate_triggers("Camera", false, TriggerPayload::new());
        assert!(result, "always_on alone should drive system_trigger true");
        assert_eq!(a.start_recording_calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn a_unit_with_use_trigger_false_never_influences_system_trigger() {
        let sup = Supervisor::new(sink(), false, 10);
        let a = Arc::new(FakeUnit::new("A", false));
        sup.add_unit(a.clone());

        a.trigger.store(true, AtomicOrdering::SeqCst);
        let result = sup.evaluate_triggers("A", true, TriggerPayload::new());
        assert!(!result, "use_trigger=false unit must not contribute to fusion");
    }

    #[test]
    fn start_runs_initial_evaluation_and_starts_units_when_always_on() {
        let sup = Supervisor::new(sink(), true, 3600);
        let cb = sup.trigger_callback();
        let a = Arc::new(FakeUnit::new("A", true));
        sup.add_unit(a.clone());
        let _ = cb;

        sup.start().unwrap();
        assert!(sup.system_trigger());
        assert_eq!(a.start_recording_calls.load(AtomicOrdering::SeqCst), 1);
        sup.stop();
    }
}
