//! Button classification state machine
//!
//! Per-button press/release handling: hold-style bindings, long-hold and
//! repeat timers, and double-tap pairing. The chord detector and sequence
//! matcher run in front of / beside this (see [`super::engine`]) and
//! communicate through the suppression flags on [`PressState`].

use crate::controller::event_collector::ButtonId;
use crate::engine::engine::InputEngine;
use crate::engine::timer::{TimerKey, TimerPurpose};
use crate::mapping::Action;
use crate::output::OutputCommand;
use std::time::{Duration, Instant};
use tracing::debug;

/// Mutable per-button record. One instance per [`ButtonId`], engine
/// lifetime; reset on profile switch or controller disconnect.
#[derive(Debug, Default)]
pub struct PressState {
    pub is_down: bool,
    pub pressed_at: Option<Instant>,
    pub long_hold_fired: bool,
    /// Release instant of the previous tap, pairing it with a follow-up
    /// press inside the double-tap window.
    pub pending_double_tap: Option<Instant>,
    pub active_hold: Option<Action>,
    /// Release dispatch consumed by a matched chord.
    pub chord_consumed: bool,
    /// Release dispatch consumed by a double-tap or a sequence match.
    pub suppress_dispatch: bool,
}

impl PressState {
    /// Reinitializes the record for a new physical press. The pending
    /// double-tap marker survives - it pairs this press with the previous
    /// release.
    pub fn begin_press(&mut self, now: Instant) {
        self.is_down = true;
        self.pressed_at = Some(now);
        self.long_hold_fired = false;
        self.active_hold = None;
        self.chord_consumed = false;
        self.suppress_dispatch = false;
    }
}

impl InputEngine {
    /// Press classification once activator, navigation intercept, chord and
    /// sequence stages have passed on the press.
    pub(crate) fn classify_press(&mut self, button: ButtonId, now: Instant) {
        let binding = self.resolved_binding(button);
        let double_tap_window = self.tunables.double_tap_window;
        let long_hold_threshold = self.tunables.long_hold_threshold;
        let default_repeat = self.tunables.repeat_interval;

        let state = self.press_states.entry(button).or_default();
        state.begin_press(now);

        let Some(binding) = binding else {
            debug!("Unmapped input: {:?} resolves to no action", button);
            return;
        };

        let paired = matches!(state.pending_double_tap, Some(previous)
            if now.duration_since(previous) <= double_tap_window);

        // Hold-style mapping: a pending double-tap beats starting the hold.
        if let Some(hold_action) = binding.hold {
            if paired && binding.double_tap.is_some() {
                state.pending_double_tap = None;
                state.suppress_dispatch = true;
                self.timers
                    .cancel(TimerKey::button(button, TimerPurpose::DoubleTap));
                let action = binding.double_tap.expect("checked above");
                debug!("Double-tap on hold-style button {:?}", button);
                self.out.send(OutputCommand::Execute(action));
                return;
            }
            state.active_hold = Some(hold_action.clone());
            self.out.send(OutputCommand::StartHold(hold_action));
            return;
        }

        // Second press inside the window fires the double-tap; this press
        // and its release dispatch nothing else.
        if let Some(action) = binding.double_tap {
            if paired {
                state.pending_double_tap = None;
                state.suppress_dispatch = true;
                self.timers
                    .cancel(TimerKey::button(button, TimerPurpose::DoubleTap));
                debug!("Double-tap on {:?}", button);
                self.out.send(OutputCommand::Execute(action));
                return;
            }
        }

        if binding.long_hold.is_some() {
            self.timers.schedule(
                TimerKey::button(button, TimerPurpose::LongHold),
                now + long_hold_threshold,
            );
        }
        if binding.repeat.is_some() {
            let interval = binding
                .repeat_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(default_repeat);
            self.timers
                .schedule(TimerKey::button(button, TimerPurpose::Repeat), now + interval);
        }
    }

    pub(crate) fn handle_button_release(&mut self, button: ButtonId, held: Duration, now: Instant) {
        // A release for a press still buffered in an open chord window is
        // recorded there and replayed when the window resolves.
        if self.chord.is_pending(button) {
            self.chord.on_release(button, now, held);
            return;
        }

        let activator_layer = self.profile.layer_activators.get(&button).cloned();
        let binding = self.resolved_binding(button);
        let double_tap_window = self.tunables.double_tap_window;

        let Some(state) = self.press_states.get_mut(&button) else {
            debug!("Release without matching press for {:?}, ignoring", button);
            return;
        };
        if !state.is_down {
            debug!("Release for idle button {:?}, ignoring", button);
            return;
        }
        debug!("Release {:?} after {:.0?}", button, held);
        state.is_down = false;
        state.pressed_at = None;

        self.timers
            .cancel(TimerKey::button(button, TimerPurpose::LongHold));
        self.timers
            .cancel(TimerKey::button(button, TimerPurpose::Repeat));

        // Activator release pops its layer by identity; nested layers keep
        // their order.
        if let Some(layer) = activator_layer {
            if !self.layer_stack.pop(&layer) {
                debug!("Activator release for inactive layer '{}'", layer);
            }
            return;
        }

        if state.chord_consumed {
            state.chord_consumed = false;
            return;
        }

        if let Some(action) = state.active_hold.take() {
            self.out.send(OutputCommand::StopHold(action));
            // Hold releases still arm the double-tap pairing marker.
            if binding.as_ref().map(|b| b.double_tap.is_some()).unwrap_or(false) {
                state.pending_double_tap = Some(now);
            }
            return;
        }

        if state.long_hold_fired {
            // Fired at the threshold already; one firing per press-hold.
            state.long_hold_fired = false;
            return;
        }

        if state.suppress_dispatch {
            state.suppress_dispatch = false;
            return;
        }

        let Some(binding) = binding else {
            return;
        };
        if binding.double_tap.is_some() {
            state.pending_double_tap = Some(now);
            self.timers.schedule(
                TimerKey::button(button, TimerPurpose::DoubleTap),
                now + double_tap_window,
            );
            return;
        }
        if let Some(action) = binding.press {
            self.out.send(OutputCommand::Execute(action));
        }
    }

    /// Long-hold threshold reached while the button is still down: the
    /// long-hold action fires now, release dispatch is skipped later.
    pub(crate) fn on_long_hold_timer(&mut self, button: ButtonId, _now: Instant) {
        let binding = self.resolved_binding(button);
        let Some(state) = self.press_states.get_mut(&button) else {
            return;
        };
        if !state.is_down || state.chord_consumed || state.suppress_dispatch || state.long_hold_fired
        {
            debug!("Dropping long-hold firing for {:?}, state changed", button);
            return;
        }
        // Re-resolve at fire time; the effective mapping may have changed.
        match binding.and_then(|binding| binding.long_hold) {
            Some(action) => {
                state.long_hold_fired = true;
                self.out.send(OutputCommand::Execute(action));
            }
            None => debug!(
                "Long-hold mapping for {:?} no longer resolves, dropped",
                button
            ),
        }
    }

    pub(crate) fn on_repeat_timer(&mut self, button: ButtonId, now: Instant) {
        let binding = self.resolved_binding(button);
        let default_interval = self.tunables.repeat_interval;
        let Some(state) = self.press_states.get(&button) else {
            return;
        };
        if !state.is_down || state.chord_consumed || state.suppress_dispatch {
            return;
        }
        let Some(binding) = binding else {
            return;
        };
        let Some(action) = binding.repeat else {
            return;
        };
        self.out.send(OutputCommand::Execute(action));
        let interval = binding
            .repeat_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(default_interval);
        self.timers
            .schedule(TimerKey::button(button, TimerPurpose::Repeat), now + interval);
    }

    /// Double-tap window elapsed without a second press: fall back to the
    /// single-press action.
    pub(crate) fn on_double_tap_timer(&mut self, button: ButtonId, _now: Instant) {
        let binding = self.resolved_binding(button);
        let Some(state) = self.press_states.get_mut(&button) else {
            return;
        };
        if state.pending_double_tap.take().is_none() {
            return;
        }
        if let Some(action) = binding.and_then(|binding| binding.press) {
            self.out.send(OutputCommand::Execute(action));
        }
    }
}
