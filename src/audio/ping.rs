//! The ping-recognition state machine (spec.md §4.2 "Ping state machine",
//! §3 `PingCounters`). Kept as a pure, synchronous step function so the
//! scenarios in spec.md §8 can be driven with synthetic block sequences
//! instead of a real microphone.

use crate::model::TriggerPayload;
use crate::payload;
use crate::unit::UnitCore;

/// `noise_blocks`, `quiet_blocks`, `pings` (spec.md §3). Invariant: `noise_blocks`
/// and `quiet_blocks` are never simultaneously positive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PingCounters {
    pub noise_blocks: u64,
    pub quiet_blocks: u64,
    pub pings: u64,
}

/// Outcome of classifying one audio block, reported back to the caller so
/// it can decide whether to feed the block to the active `WaveWriter` (the
/// state machine itself never touches the writer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    Noisy,
    Quiet,
}

impl PingCounters {
    /// Runs one step of spec.md §4.2's ping state machine and reports the
    /// trigger transitions to `core` via `set_trigger`. `peak_db` and
    /// `peak_frequency_hz` come from the block's FFT analysis
    /// ([`super::fft`]).
    pub fn step(
        &mut self,
        core: &UnitCore,
        peak_db: f64,
        peak_frequency_hz: f64,
        threshold_dbfs: f64,
        noise_blocks_max: u64,
        quiet_blocks_max: u64,
    ) -> BlockClass {
        if peak_db > threshold_dbfs {
            self.quiet_blocks = 0;
            self.noise_blocks += 1;
            return BlockClass::Noisy;
        }

        // quiet block: ping recognition
        if (1..=noise_blocks_max).contains(&self.noise_blocks) {
            self.pings += 1;
        }

        if self.pings >= 1 && !core.trigger() {
            core.set_trigger(
                true,
                payload! {
                    "pings" => self.pings as i64,
                    "peak_frequency_hz" => peak_frequency_hz,
                },
            );
        }

        if self.quiet_blocks > quiet_blocks_max && core.trigger() {
            core.set_trigger(false, payload! { "quiet_blocks" => self.quiet_blocks as i64 });
            self.pings = 0;
        }

        self.noise_blocks = 0;
        self.quiet_blocks += 1;
        BlockClass::Quiet
    }
}

/// Builds the `{quiet_blocks}`-only payload shape used by a falling-edge
/// trigger, exposed for tests that want to assert on payload contents
/// without depending on [`PingCounters::step`]'s internals.
#[cfg(test)]
pub fn quiet_payload(quiet_blocks: u64) -> TriggerPayload {
    payload! { "quiet_blocks" => quiet_blocks as i64 }
}
