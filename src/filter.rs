//! Speed-adaptive smoothing for noisy analog signals
//!
//! Implements a two-stage exponential low-pass filter whose cutoff frequency
//! follows the signal's own speed: slow motion is smoothed aggressively to
//! reject jitter, fast motion passes through with low added latency. One
//! instance per signal (stick axis, touch delta) - instances never share
//! state.

/// Tuning parameters for a [`MotionFilter`] instance.
#[derive(Clone, Copy, Debug)]
pub struct FilterParams {
    /// Cutoff frequency (Hz) applied when the signal is stationary.
    pub min_cutoff: f64,
    /// How strongly the cutoff grows with the smoothed derivative.
    pub speed_coefficient: f64,
    /// Fixed cutoff frequency (Hz) for the derivative stage.
    pub derivative_cutoff: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            min_cutoff: 1.0,
            speed_coefficient: 0.007,
            derivative_cutoff: 1.0,
        }
    }
}

/// Adaptive low-pass filter for a single scalar signal.
#[derive(Clone, Debug)]
pub struct MotionFilter {
    params: FilterParams,
    previous: Option<f64>,
    smoothed_derivative: f64,
}

impl MotionFilter {
    pub fn new(params: FilterParams) -> Self {
        Self {
            params,
            previous: None,
            smoothed_derivative: 0.0,
        }
    }

    /// Smoothing factor for one exponential stage at the given cutoff.
    fn alpha(cutoff: f64, dt: f64) -> f64 {
        let tau = 1.0 / (2.0 * std::f64::consts::PI * cutoff);
        1.0 / (1.0 + tau / dt)
    }

    /// Filters one sample. `dt` is the elapsed time since the previous sample
    /// in seconds; `dt <= 0` returns the input unchanged without touching
    /// internal state.
    pub fn filter(&mut self, value: f64, dt: f64) -> f64 {
        if dt <= 0.0 {
            return value;
        }

        let previous = match self.previous {
            Some(prev) => prev,
            None => {
                // First sample after creation or reset seeds the history.
                self.previous = Some(value);
                self.smoothed_derivative = 0.0;
                return value;
            }
        };

        // Derivative stage: estimate speed, then smooth it with a fixed cutoff.
        let raw_derivative = (value - previous) / dt;
        let d_alpha = Self::alpha(self.params.derivative_cutoff, dt);
        self.smoothed_derivative += d_alpha * (raw_derivative - self.smoothed_derivative);

        // Value stage: cutoff rises with apparent speed.
        let cutoff = self.params.min_cutoff
            + self.params.speed_coefficient * self.smoothed_derivative.abs();
        let alpha = Self::alpha(cutoff, dt);
        let filtered = previous + alpha * (value - previous);

        self.previous = Some(filtered);
        filtered
    }

    /// Clears all history. Must be called whenever sampling resumes after an
    /// idle gap (touch lift then new touch-down), otherwise the stale
    /// derivative estimate produces a spike on the first samples.
    pub fn reset(&mut self) {
        self.previous = None;
        self.smoothed_derivative = 0.0;
    }
}

impl Default for MotionFilter {
    fn default() -> Self {
        Self::new(FilterParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 1.0 / 120.0;

    #[test]
    fn constant_input_converges_to_input() {
        let mut filter = MotionFilter::default();
        let mut out = 0.0;
        for _ in 0..500 {
            out = filter.filter(1.0, DT);
        }
        assert!((out - 1.0).abs() < 1e-6, "converged to {out}");
    }

    #[test]
    fn first_sample_passes_through() {
        let mut filter = MotionFilter::default();
        assert_eq!(filter.filter(0.42, DT), 0.42);
    }

    #[test]
    fn non_positive_dt_is_identity_and_keeps_state() {
        let mut filter = MotionFilter::default();
        filter.filter(1.0, DT);
        let mid = filter.filter(2.0, DT);

        assert_eq!(filter.filter(100.0, 0.0), 100.0);
        assert_eq!(filter.filter(100.0, -1.0), 100.0);

        // State untouched: the next real sample continues from where we were.
        let next = filter.filter(2.0, DT);
        assert!(next > mid && next < 2.0);
    }

    #[test]
    fn faster_steps_pass_through_with_less_lag() {
        // A larger step produces a larger derivative, which raises the cutoff,
        // so the relative progress toward the target after one sample must be
        // monotonically larger.
        let mut relative_progress = Vec::new();
        for step in [0.1, 10.0, 1000.0] {
            let mut filter = MotionFilter::new(FilterParams {
                min_cutoff: 1.0,
                speed_coefficient: 0.1,
                derivative_cutoff: 1.0,
            });
            filter.filter(0.0, DT);
            let out = filter.filter(step, DT);
            relative_progress.push(out / step);
        }
        assert!(
            relative_progress[0] < relative_progress[1]
                && relative_progress[1] < relative_progress[2],
            "progress not monotonic in speed: {relative_progress:?}"
        );
    }

    #[test]
    fn reset_clears_derivative_history() {
        let mut filter = MotionFilter::default();
        filter.filter(0.0, DT);
        filter.filter(50.0, DT);
        filter.reset();

        // After reset the next sample seeds history again instead of reacting
        // to the old derivative.
        assert_eq!(filter.filter(3.0, DT), 3.0);
    }
}
