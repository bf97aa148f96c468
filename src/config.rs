//! Engine tunables
//!
//! Every timing window and threshold the classification pipeline uses lives
//! in one struct, resolved once per profile load. Profiles may override any
//! subset; the engine itself only ever sees the resolved [`Tunables`].

use crate::filter::FilterParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Sequence windows outside this range are clamped at load time.
pub const SEQUENCE_WINDOW_MIN: Duration = Duration::from_millis(300);
pub const SEQUENCE_WINDOW_MAX: Duration = Duration::from_millis(3000);

/// Resolved timing windows and thresholds for one active profile.
#[derive(Clone, Debug)]
pub struct Tunables {
    // Button pipeline
    pub chord_window: Duration,
    pub double_tap_window: Duration,
    pub long_hold_threshold: Duration,
    pub repeat_interval: Duration,
    pub sequence_window: Duration,

    // Touchpad
    pub touch_settle_interval: Duration,
    pub tap_max_duration: Duration,
    pub tap_max_movement: f64,
    pub secondary_tap_max_movement: f64,
    pub two_finger_tap_center_max_movement: f64,
    pub long_tap_threshold: Duration,
    pub long_tap_max_movement: f64,
    pub tap_cooldown: Duration,
    pub two_finger_min_distance: f64,
    pub pinch_vs_pan_ratio: f64,
    pub pinch_deadzone: f64,
    pub pinch_step: f64,
    pub pinch_direction_lock: Duration,
    pub pan_sensitivity: f64,
    pub pan_min_movement: f64,
    pub pointer_sensitivity: f64,

    // Momentum
    pub momentum_start_velocity: f64,
    pub momentum_sustained_duration: Duration,
    pub momentum_release_window: Duration,
    pub momentum_decay_rate: f64,
    pub momentum_stop_velocity: f64,
    pub momentum_max_idle: Duration,
    pub momentum_boost_min: f64,
    pub momentum_boost_max: f64,
    pub momentum_boost_max_velocity: f64,

    // Continuous motion
    pub poll_interval: Duration,
    pub stick_pointer_speed: f64,
    pub stick_scroll_speed: f64,
    pub stick_direction_threshold: f32,
    pub stick_direction_repeat: Duration,
    pub joystick_deadzone: f32,

    // Filters
    pub pointer_filter: FilterParams,
    pub touch_filter: FilterParams,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            chord_window: Duration::from_millis(150),
            double_tap_window: Duration::from_millis(300),
            long_hold_threshold: Duration::from_millis(500),
            repeat_interval: Duration::from_millis(80),
            sequence_window: Duration::from_millis(800),

            touch_settle_interval: Duration::from_millis(150),
            tap_max_duration: Duration::from_millis(500),
            tap_max_movement: 0.05,
            secondary_tap_max_movement: 0.08,
            two_finger_tap_center_max_movement: 0.03,
            long_tap_threshold: Duration::from_millis(500),
            long_tap_max_movement: 0.03,
            tap_cooldown: Duration::from_millis(120),
            two_finger_min_distance: 0.05,
            pinch_vs_pan_ratio: 1.8,
            pinch_deadzone: 0.01,
            pinch_step: 0.05,
            pinch_direction_lock: Duration::from_millis(200),
            pan_sensitivity: 600.0,
            pan_min_movement: 0.002,
            pointer_sensitivity: 900.0,

            momentum_start_velocity: 0.8,
            momentum_sustained_duration: Duration::from_millis(80),
            momentum_release_window: Duration::from_millis(100),
            momentum_decay_rate: 3.0,
            momentum_stop_velocity: 0.05,
            momentum_max_idle: Duration::from_millis(1000),
            momentum_boost_min: 1.0,
            momentum_boost_max: 2.5,
            momentum_boost_max_velocity: 3.0,

            poll_interval: Duration::from_micros(8_333),
            stick_pointer_speed: 750.0,
            stick_scroll_speed: 40.0,
            stick_direction_threshold: 0.6,
            stick_direction_repeat: Duration::from_millis(250),
            joystick_deadzone: 0.05,

            pointer_filter: FilterParams {
                min_cutoff: 1.0,
                speed_coefficient: 0.007,
                derivative_cutoff: 1.0,
            },
            touch_filter: FilterParams {
                min_cutoff: 1.5,
                speed_coefficient: 0.01,
                derivative_cutoff: 1.0,
            },
        }
    }
}

impl Tunables {
    /// Applies a profile's partial overrides on top of the defaults.
    pub fn with_overrides(overrides: &TunableOverrides) -> Self {
        let mut resolved = Self::default();

        macro_rules! apply_ms {
            ($field:ident) => {
                if let Some(ms) = overrides.$field {
                    resolved.$field = Duration::from_millis(ms);
                }
            };
        }
        macro_rules! apply {
            ($field:ident) => {
                if let Some(value) = overrides.$field {
                    resolved.$field = value;
                }
            };
        }

        apply_ms!(chord_window);
        apply_ms!(double_tap_window);
        apply_ms!(long_hold_threshold);
        apply_ms!(repeat_interval);
        apply_ms!(touch_settle_interval);
        apply_ms!(tap_max_duration);
        apply_ms!(long_tap_threshold);
        apply_ms!(tap_cooldown);
        apply!(tap_max_movement);
        apply!(long_tap_max_movement);
        apply!(pinch_vs_pan_ratio);
        apply!(pan_sensitivity);
        apply!(pointer_sensitivity);
        apply!(momentum_decay_rate);
        apply!(momentum_stop_velocity);
        apply!(joystick_deadzone);

        if let Some(ms) = overrides.sequence_window {
            resolved.sequence_window = clamp_sequence_window(Duration::from_millis(ms));
        }

        resolved
    }
}

/// Per-profile partial override of the global defaults. All fields optional;
/// durations are given in milliseconds in the profile file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct TunableOverrides {
    pub chord_window: Option<u64>,
    pub double_tap_window: Option<u64>,
    pub long_hold_threshold: Option<u64>,
    pub repeat_interval: Option<u64>,
    pub sequence_window: Option<u64>,
    pub touch_settle_interval: Option<u64>,
    pub tap_max_duration: Option<u64>,
    pub tap_max_movement: Option<f64>,
    pub long_tap_threshold: Option<u64>,
    pub long_tap_max_movement: Option<f64>,
    pub tap_cooldown: Option<u64>,
    pub pinch_vs_pan_ratio: Option<f64>,
    pub pan_sensitivity: Option<f64>,
    pub pointer_sensitivity: Option<f64>,
    pub momentum_decay_rate: Option<f64>,
    pub momentum_stop_velocity: Option<f64>,
    pub joystick_deadzone: Option<f32>,
}

/// Clamps a configured sequence window into the supported range.
pub fn clamp_sequence_window(window: Duration) -> Duration {
    if window < SEQUENCE_WINDOW_MIN {
        warn!(
            "Sequence window {:?} below minimum, clamping to {:?}",
            window, SEQUENCE_WINDOW_MIN
        );
        SEQUENCE_WINDOW_MIN
    } else if window > SEQUENCE_WINDOW_MAX {
        warn!(
            "Sequence window {:?} above maximum, clamping to {:?}",
            window, SEQUENCE_WINDOW_MAX
        );
        SEQUENCE_WINDOW_MAX
    } else {
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let overrides = TunableOverrides {
            double_tap_window: Some(250),
            pointer_sensitivity: Some(500.0),
            ..Default::default()
        };
        let resolved = Tunables::with_overrides(&overrides);
        assert_eq!(resolved.double_tap_window, Duration::from_millis(250));
        assert_eq!(resolved.pointer_sensitivity, 500.0);
        // Untouched fields keep their defaults.
        assert_eq!(resolved.chord_window, Duration::from_millis(150));
    }

    #[test]
    fn sequence_window_is_clamped() {
        let overrides = TunableOverrides {
            sequence_window: Some(100),
            ..Default::default()
        };
        assert_eq!(
            Tunables::with_overrides(&overrides).sequence_window,
            SEQUENCE_WINDOW_MIN
        );

        let overrides = TunableOverrides {
            sequence_window: Some(10_000),
            ..Default::default()
        };
        assert_eq!(
            Tunables::with_overrides(&overrides).sequence_window,
            SEQUENCE_WINDOW_MAX
        );
    }
}
