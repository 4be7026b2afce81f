//! The `AnalysisUnit` contract shared by the audio, VHF and camera units
//! (spec.md §4.1), plus [`UnitCore`], the piece of bookkeeping all three
//! concrete units embed so `set_trigger` has one implementation instead of
//! three copies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::info;

use crate::model::{StatusMap, TriggerPayload};

/// `trigger_callback(source_unit, value, payload) -> new_system_trigger`.
///
/// The supervisor is the only consumer; it is invoked synchronously on the
/// thread/task that detected the edge (spec.md §4.1, §5 "Ordering
/// guarantees"), never queued.
pub type TriggerCallback =
    std::sync::Arc<dyn Fn(&str, bool, TriggerPayload) -> bool + Send + Sync>;

/// Common lifecycle, trigger state and status reporting for the three
/// sensing units (spec.md §3 `AnalysisUnit`).
pub trait AnalysisUnit: Send + Sync {
    /// Stable unit name, used as the MQTT topic segment and CSV `unit`
    /// column (spec.md §6: `<host>/batrack/<UnitClassName>/<value>`).
    fn name(&self) -> &'static str;

    /// Whether this unit participates in system-trigger fusion
    /// (spec.md §3 `use_trigger`).
    fn use_trigger(&self) -> bool;

    /// Transition from constructed-idle to running.
    fn start(&self) -> Result<(), crate::error::SupervisorError>;

    /// Idempotent: ensures `recording = false`, then terminates.
    fn stop(&self);

    fn start_recording(&self);

    fn stop_recording(&self);

    fn trigger(&self) -> bool;

    fn recording(&self) -> bool;

    /// Whether the unit's run loop/thread is still alive. Diverges from
    /// `running` when the unit has self-terminated after an unrecoverable
    /// error (spec.md §4.2 audio health check; §4.4 camera unconfirmed
    /// start).
    fn is_alive(&self) -> bool;

    fn get_status(&self) -> StatusMap;
}

/// Shared trigger/recording/running bookkeeping embedded by every concrete
/// unit. Owns the single `set_trigger` path spec.md §4.1 requires: a value
/// change is applied under a lock, then the callback fires synchronously
/// with the lock already released (so the callback may itself call back
/// into this or another unit without deadlocking).
pub struct UnitCore {
    name: &'static str,
    use_trigger: bool,
    trigger: Mutex<bool>,
    recording: AtomicBool,
    running: AtomicBool,
    alive: AtomicBool,
    callback: TriggerCallback,
}

impl UnitCore {
    pub fn new(name: &'static str, use_trigger: bool, callback: TriggerCallback) -> Self {
        Self {
            name,
            use_trigger,
            trigger: Mutex::new(false),
            recording: AtomicBool::new(false),
            running: AtomicBool::new(false),
            alive: AtomicBool::new(false),
            callback,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn use_trigger(&self) -> bool {
        self.use_trigger
    }

    pub fn trigger(&self) -> bool {
        *self.trigger.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn set_recording(&self, value: bool) {
        self.recording.store(value, Ordering::SeqCst);
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
    }

    /// Whether the unit's run loop/task is still alive (spec.md §4.1
    /// `is_alive()`). Set by the concrete unit's run loop, not derived from
    /// `running`: a unit that self-terminated after an unrecoverable error
    /// has `running=true` (nobody called `stop()`) but `alive=false`.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn set_alive(&self, value: bool) {
        self.alive.store(value, Ordering::SeqCst);
    }

    /// `get_status()` base fields shared by all three units (spec.md §4.1;
    /// `original_source/batrack/sensors.py`'s `AbstractAnalysisUnit.get_status`).
    /// No concrete unit adds fields beyond these in the original either.
    pub fn status(&self) -> StatusMap {
        let mut map = StatusMap::new();
        map.insert("running".to_string(), self.running().into());
        map.insert("alive".to_string(), self.is_alive().into());
        map.insert("recording".to_string(), self.recording().into());
        map.insert("use_trigger".to_string(), self.use_trigger.into());
        map.insert("trigger".to_string(), self.trigger().into());
        map
    }

    /// `_set_trigger` from spec.md §4.1: if `value` differs from the
    /// current trigger, update then invoke the callback. No-op otherwise.
    pub fn set_trigger(&self, value: bool, payload: TriggerPayload) {
        let changed = {
            let mut guard = self.trigger.lock().unwrap_or_else(|e| e.into_inner());
            if *guard == value {
                false
            } else {
                *guard = value;
                true
            }
        };

        if changed {
            info!("{} trigger -> {}: {:?}", self.name, value, payload);
            (self.callback)(self.name, value, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn core() -> UnitCore {
        UnitCore::new("TestUnit", true, Arc::new(|_name, value, _payload| value))
    }

    #[test]
    fn status_reflects_running_alive_and_trigger() {
        let c = core();
        c.set_running(true);
        c.set_alive(true);
        c.set_trigger(true, TriggerPayload::new());

        let status = c.status();
        assert_eq!(status.get("running"), Some(&true.into()));
        assert_eq!(status.get("alive"), Some(&true.into()));
        assert_eq!(status.get("trigger"), Some(&true.into()));
        assert_eq!(status.get("use_trigger"), Some(&true.into()));
    }

    #[test]
    fn set_trigger_is_a_noop_when_value_is_unchanged() {
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let c = UnitCore::new(
            "TestUnit",
            true,
            Arc::new(move |_name, value, _payload| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                value
            }),
        );
        c.set_trigger(false, TriggerPayload::new());
        assert_eq!(calls.load(Ordering::SeqCst), 0, "false -> false is a no-op");
        c.set_trigger(true, TriggerPayload::new());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        c.set_trigger(true, TriggerPayload::new());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "true -> true is a no-op");
    }
}
