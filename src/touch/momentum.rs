//! Post-lift scroll continuation
//!
//! A qualifying two-finger lift seeds a velocity vector that decays
//! exponentially on every tick. Each tick emits a scroll delta proportional
//! to the current velocity times a velocity-interpolated boost factor.

use crate::config::Tunables;
use std::time::Instant;
use tracing::debug;

/// Result of advancing the momentum state by one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MomentumTick {
    /// Scroll delta to emit; another tick should be scheduled.
    Emit { dx: f64, dy: f64 },
    /// Velocity fell below the stop threshold (or the state was idle too
    /// long); no further ticks.
    Stopped,
}

#[derive(Debug)]
struct MomentumState {
    velocity: (f64, f64),
    last_tick: Instant,
}

/// Exponentially decaying fling state. Exists at most once; a new touch or
/// an engine reset destroys it.
#[derive(Debug, Default)]
pub struct Momentum {
    state: Option<MomentumState>,
}

impl Momentum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> bool {
        self.state.is_some()
    }

    pub fn start(&mut self, velocity: (f64, f64), now: Instant) {
        debug!(
            "Momentum started with velocity ({:.2}, {:.2})",
            velocity.0, velocity.1
        );
        self.state = Some(MomentumState {
            velocity,
            last_tick: now,
        });
    }

    pub fn stop(&mut self) {
        if self.state.take().is_some() {
            debug!("Momentum stopped");
        }
    }

    /// Advances by one tick at `now`, decaying the velocity and producing
    /// the scroll delta for the elapsed interval.
    pub fn tick(&mut self, tunables: &Tunables, now: Instant) -> MomentumTick {
        let Some(state) = self.state.as_mut() else {
            return MomentumTick::Stopped;
        };

        let dt = now.duration_since(state.last_tick);
        if dt > tunables.momentum_max_idle {
            debug!("Momentum idle for {:?}, stopping", dt);
            self.state = None;
            return MomentumTick::Stopped;
        }
        let dt = dt.as_secs_f64();
        state.last_tick = now;

        let factor = (-tunables.momentum_decay_rate * dt).exp();
        state.velocity.0 *= factor;
        state.velocity.1 *= factor;

        let speed = state.velocity.0.hypot(state.velocity.1);
        if speed < tunables.momentum_stop_velocity {
            self.state = None;
            return MomentumTick::Stopped;
        }

        let boost = tunables.momentum_boost_min
            + (tunables.momentum_boost_max - tunables.momentum_boost_min)
                * (speed / tunables.momentum_boost_max_velocity).min(1.0);
        let scale = tunables.pan_sensitivity * boost * dt;
        MomentumTick::Emit {
            dx: state.velocity.0 * scale,
            dy: state.velocity.1 * scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn velocity_decays_exponentially_per_tick() {
        let tunables = Tunables::default();
        let mut momentum = Momentum::new();
        let t0 = Instant::now();
        let dt = Duration::from_millis(8);
        let v0 = 2.0;

        momentum.start((v0, 0.0), t0);

        let mut now = t0;
        let ticks = 20;
        for _ in 0..ticks {
            now += dt;
            assert!(matches!(
                momentum.tick(&tunables, now),
                MomentumTick::Emit { .. }
            ));
        }

        // v(N) = v0 * exp(-r * N * dt)
        let expected =
            v0 * (-tunables.momentum_decay_rate * ticks as f64 * dt.as_secs_f64()).exp();
        let state = momentum.state.as_ref().expect("still active");
        assert!(
            (state.velocity.0 - expected).abs() < 1e-9,
            "velocity {} vs expected {}",
            state.velocity.0,
            expected
        );
    }

    #[test]
    fn stops_exactly_when_crossing_stop_velocity() {
        let tunables = Tunables::default();
        let mut momentum = Momentum::new();
        let t0 = Instant::now();
        let dt = Duration::from_millis(8);
        let v0 = 1.0;

        momentum.start((v0, 0.0), t0);

        let mut now = t0;
        let mut ticks = 0u32;
        loop {
            now += dt;
            ticks += 1;
            match momentum.tick(&tunables, now) {
                MomentumTick::Emit { .. } => assert!(ticks < 10_000, "never stopped"),
                MomentumTick::Stopped => break,
            }
        }

        let r = tunables.momentum_decay_rate;
        let step = dt.as_secs_f64();
        let at_stop = v0 * (-r * ticks as f64 * step).exp();
        let before_stop = v0 * (-r * (ticks - 1) as f64 * step).exp();
        assert!(at_stop < tunables.momentum_stop_velocity);
        assert!(before_stop >= tunables.momentum_stop_velocity);
        assert!(!momentum.active());
    }

    #[test]
    fn long_idle_gap_stops_without_emitting() {
        let tunables = Tunables::default();
        let mut momentum = Momentum::new();
        let t0 = Instant::now();
        momentum.start((5.0, 0.0), t0);

        let late = t0 + tunables.momentum_max_idle + Duration::from_millis(1);
        assert_eq!(momentum.tick(&tunables, late), MomentumTick::Stopped);
        assert!(!momentum.active());
    }

    #[test]
    fn boost_grows_with_velocity() {
        let tunables = Tunables::default();
        let t0 = Instant::now();
        let dt = Duration::from_millis(8);

        let delta_for = |v0: f64| {
            let mut momentum = Momentum::new();
            momentum.start((v0, 0.0), t0);
            match momentum.tick(&tunables, t0 + dt) {
                MomentumTick::Emit { dx, .. } => dx,
                MomentumTick::Stopped => panic!("stopped immediately"),
            }
        };

        // Per unit of velocity the fast fling must emit more than the slow
        // one, because the boost factor interpolates with speed.
        let slow = delta_for(0.5) / 0.5;
        let fast = delta_for(2.5) / 2.5;
        assert!(fast > slow, "boost not monotonic: {fast} <= {slow}");
    }
}
