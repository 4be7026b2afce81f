//! The pure, synchronous half of the VHF variance+count rule (spec.md §4.3,
//! §3 `FrequencyBin`). Kept independent of the MQTT transport so the
//! scenarios in spec.md §8 can be driven with synthetic `MatchedSignal`
//! sequences, mirroring [`crate::audio::ping`]'s separation of the ping
//! state machine from the capture stream.

/// One monitored transmitter frequency's recent observations (spec.md §3
/// `FrequencyBin`): `(lower_hz, upper_hz, samples)`, `samples` ordered
/// strictly increasing in timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyBin {
    pub mhz: f64,
    pub lower_hz: f64,
    pub upper_hz: f64,
    pub samples: Vec<(f64, f64)>,
}

impl FrequencyBin {
    pub fn new(mhz: f64, bw_hz: f64) -> Self {
        let center_hz = mhz * 1_000_000.0;
        FrequencyBin {
            mhz,
            lower_hz: center_hz - bw_hz / 2.0,
            upper_hz: center_hz + bw_hz / 2.0,
            samples: Vec::new(),
        }
    }

    /// The half-open-ish `(lower, upper)` containment test from spec.md §4.3
    /// step 1 (strict inequalities, matching `original_source/batrack/vhf.py`'s
    /// `freq > lower and freq < upper`).
    pub fn contains(&self, frequency_hz: f64) -> bool {
        frequency_hz > self.lower_hz && frequency_hz < self.upper_hz
    }

    /// Unconditional window eviction (spec.md §4.3 step 4, §9 Design Notes:
    /// "ensure eviction is unconditional, including on below-threshold
    /// signals").
    pub fn evict_stale(&mut self, reference_ts: f64, window_s: f64) {
        let cutoff = reference_ts - window_s;
        self.samples.retain(|(ts, _)| *ts > cutoff);
    }
}

/// Population standard deviation, matching `numpy.std`'s default `ddof=0`
/// (`original_source/batrack/vhf.py`'s `np.std(...)`).
pub fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// A matched signal that survived the variance+count rule and should
/// trigger (spec.md §4.3 step 7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptedSignal {
    pub frequency_hz: f64,
    pub power_dbw: f64,
    pub count: usize,
}

/// The VHF unit's per-frequency bins plus the thresholds needed to evaluate
/// one incoming signal (spec.md §4.3 steps 1-7).
pub struct VhfEngine {
    bins: Vec<FrequencyBin>,
    sig_threshold_dbw: f64,
    freq_active_window_s: f64,
    freq_active_var: f64,
    freq_active_count: usize,
}

impl VhfEngine {
    pub fn new(
        monitored_mhz: &[f64],
        freq_bw_hz: f64,
        sig_threshold_dbw: f64,
        freq_active_window_s: f64,
        freq_active_var: f64,
        freq_active_count: usize,
    ) -> Self {
        VhfEngine {
            bins: monitored_mhz.iter().map(|&mhz| FrequencyBin::new(mhz, freq_bw_hz)).collect(),
            sig_threshold_dbw,
            freq_active_window_s,
            freq_active_var,
            freq_active_count,
        }
    }

    #[cfg(test)]
    pub fn bin(&self, mhz: f64) -> Option<&FrequencyBin> {
        self.bins.iter().find(|b| b.mhz == mhz)
    }

    /// Processes one matched signal following spec.md §4.3 steps 1-7 in
    /// order, returning `Some` iff the signal should set the unit's trigger
    /// true. Eviction (step 4) always runs, regardless of whether step 3
    /// drops the signal for being below threshold.
    pub fn ingest(&mut self, ts: f64, frequency_hz: f64, avg_power_dbw: f64) -> Option<AcceptedSignal> {
        let bin = self.bins.iter_mut().find(|b| b.contains(frequency_hz))?;

        bin.samples.push((ts, avg_power_dbw));
        let below_threshold = avg_power_dbw < self.sig_threshold_dbw;
        bin.evict_stale(ts, self.freq_active_window_s);

        if below_threshold {
            return None;
        }

        let count = bin.samples.len();
        let accept = if count < self.freq_active_count {
            true
        } else {
            let powers: Vec<f64> = bin.samples.iter().map(|(_, p)| *p).collect();
            stddev(&powers) >= self.freq_active_var
        };

        accept.then_some(AcceptedSignal { frequency_hz, power_dbw: avg_power_dbw, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> VhfEngine {
        // Scenario 3 (spec.md §8): freq_active_count=5, freq_active_var=2.0,
        // sig_freqs_mhz=[150.100].
        VhfEngine::new(&[150.100], 20_000.0, -90.0, 600.0, 2.0, 5)
    }

    #[test]
    fn signal_outside_any_bin_is_dropped() {
        let mut e = engine();
        assert_eq!(e.ingest(0.0, 160_100_000.0, -30.0), None);
    }

    #[test]
    fn below_threshold_signal_is_dropped_but_still_counted_for_variance() {
        let mut e = engine();
        let freq_hz = 150.100 * 1_000_000.0;
        assert_eq!(e.ingest(0.0, freq_hz, -95.0), None);
        assert_eq!(e.bin(150.100).unwrap().samples.len(), 1, "sample must still be appended");
    }

    /// Invariant (spec.md §8): `k < freq_active_count` recent samples and a
    /// new sample above threshold accepts regardless of variance.
    #[test]
    fn fewer_than_freq_active_count_samples_accepts_unconditionally() {
        let mut e = engine();
        let freq_hz = 150.100 * 1_000_000.0;
        for i in 0..4 {
            let accepted = e.ingest(i as f64, freq_hz, -30.0);
            assert!(accepted.is_some(), "sample {} should accept (rising edge)", i);
        }
    }

    /// Scenario 3 continued: a fifth identical-power signal has zero
    /// variance (< 2.0) and is dropped, trigger-wise.
    #[test]
    fn identical_power_signals_at_threshold_count_are_dropped_for_zero_variance() {
        let mut e = engine();
        let freq_hz = 150.100 * 1_000_000.0;
        for i in 0..4 {
            e.ingest(i as f64, freq_hz, -30.0);
        }
        let fifth = e.ingest(4.0, freq_hz, -30.0);
        assert_eq!(fifth, None, "zero variance across 5 samples must not accept");
    }

    #[test]
    fn sufficient_variance_above_count_threshold_accepts() {
        let mut e = engine();
        let freq_hz = 150.100 * 1_000_000.0;
        let powers = [-30.0, -25.0, -35.0, -20.0, -40.0];
        let mut last = None;
        for (i, p) in powers.iter().enumerate() {
            last = e.ingest(i as f64, freq_hz, *p);
        }
        assert!(last.is_some(), "high-variance powers should accept once count >= threshold");
    }

    #[test]
    fn stale_samples_are_evicted_unconditionally() {
        let mut e = engine();
        let freq_hz = 150.100 * 1_000_000.0;
        e.ingest(0.0, freq_hz, -95.0); // below threshold, still appended
        e.ingest(1000.0, freq_hz, -95.0); // 1000s later, window is 600s
        assert_eq!(e.bin(150.100).unwrap().samples.len(), 1, "first sample should have aged out");
    }

    #[test]
    fn stddev_matches_population_standard_deviation() {
        assert_eq!(stddev(&[]), 0.0);
        assert_eq!(stddev(&[5.0, 5.0, 5.0]), 0.0);
        let v = stddev(&[1.0, 2.0, 3.0, 4.0]);
        assert!((v - 1.1180339887498949).abs() < 1e-9);
    }
}
