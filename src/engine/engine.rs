//! Serial classification engine
//!
//! [`InputEngine`] owns every piece of classification state: the per-button
//! press table, the chord window, the sequence history, the layer stack,
//! the touch recognizer and the timer queue. It is purely synchronous - all
//! methods take explicit instants - so the driver task (see
//! [`super::engine_handle`]) stays a thin marshaling shell and tests can
//! replay event streams deterministically.
//!
//! Priority across the button pipeline, highest first: layer activator >
//! chord > sequence > double-tap > long-hold > single-press.

use crate::config::Tunables;
use crate::controller::event_collector::{ButtonId, RawInputEvent, TouchSlot};
use crate::engine::chord::{BufferedPress, ChordDetector, ChordPressOutcome};
use crate::engine::classifier::PressState;
use crate::engine::sequence::{SequenceAction, SequenceTracker};
use crate::engine::timer::{TimerKey, TimerPurpose, TimerQueue, TimerScope};
use crate::mapping::profile::{canonical_chord, Profile};
use crate::mapping::resolve::{effective_binding, LayerStack};
use crate::mapping::Binding;
use crate::output::{Dispatcher, OutputCommand};
use crate::touch::{TouchContext, TouchRecognizer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Routing gates published to the polling loop: while a two-finger gesture
/// or the command wheel is engaged, right-stick output is redirected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoutingState {
    pub gesture_active: bool,
    pub wheel_active: bool,
}

impl RoutingState {
    pub fn right_stick_captured(&self) -> bool {
        self.gesture_active || self.wheel_active
    }
}

/// Control-plane commands from external collaborators, marshaled into the
/// engine's serial context alongside the event stream.
#[derive(Debug)]
pub enum EngineCommand {
    /// Atomically swap the active profile snapshot.
    SetProfile(Arc<Profile>),
    /// Pre-filtered chord hint from the transport. Optional - the engine's
    /// own detector covers transports without one.
    ChordHint(Vec<ButtonId>),
    /// On-screen-keyboard navigation intercept (owned externally).
    SetNavIntercept(bool),
    /// Frontmost application identity, pass-through for app-scoped bindings.
    SetFrontmostApp(Option<String>),
    /// Command-wheel selection mode engaged/released.
    SetWheelActive(bool),
    /// Controller disconnect or explicit reset: drop all transient state.
    Reset,
}

/// The classification core. Owned by exactly one task; never locked.
pub struct InputEngine {
    pub(crate) profile: Arc<Profile>,
    pub(crate) tunables: Tunables,
    pub(crate) press_states: HashMap<ButtonId, PressState>,
    pub(crate) chord: ChordDetector,
    pub(crate) sequences: SequenceTracker,
    pub(crate) layer_stack: LayerStack,
    pub(crate) timers: TimerQueue,
    pub(crate) touch: TouchRecognizer,
    pub(crate) nav_intercept: bool,
    pub(crate) nav_tx: Option<mpsc::Sender<ButtonId>>,
    pub(crate) frontmost_app: Option<String>,
    pub(crate) wheel_active: bool,
    pub(crate) out: Dispatcher,
    pub(crate) routing: watch::Sender<RoutingState>,
}

impl InputEngine {
    pub fn new(
        profile: Arc<Profile>,
        out: Dispatcher,
        routing: watch::Sender<RoutingState>,
    ) -> Self {
        let tunables = Tunables::with_overrides(&profile.tunables);
        let touch = TouchRecognizer::new(&tunables);
        info!("Input engine created with profile '{}'", profile.name);
        Self {
            profile,
            tunables,
            press_states: HashMap::new(),
            chord: ChordDetector::new(),
            sequences: SequenceTracker::new(),
            layer_stack: LayerStack::new(),
            timers: TimerQueue::new(),
            touch,
            nav_intercept: false,
            nav_tx: None,
            frontmost_app: None,
            wheel_active: false,
            out,
            routing,
        }
    }

    /// Attaches the channel the navigation intercept routes button presses
    /// to while the on-screen keyboard owns the input.
    pub fn set_nav_channel(&mut self, sender: mpsc::Sender<ButtonId>) {
        self.nav_tx = Some(sender);
    }

    /// Feeds one normalized input event. Event timestamps drive all timing
    /// windows; timers due up to the event's instant fire first so ordering
    /// stays consistent.
    pub fn handle_event(&mut self, event: RawInputEvent) {
        match event {
            RawInputEvent::ButtonPressed { button, timestamp } => {
                self.run_timers(timestamp);
                self.handle_button_press(button, timestamp);
            }
            RawInputEvent::ButtonReleased {
                button,
                held,
                timestamp,
            } => {
                self.run_timers(timestamp);
                self.handle_button_release(button, held, timestamp);
            }
            RawInputEvent::TouchDown {
                slot,
                x,
                y,
                timestamp,
            } => {
                self.run_timers(timestamp);
                let mut ctx = TouchContext {
                    tunables: &self.tunables,
                    bindings: &self.profile.touch,
                    timers: &mut self.timers,
                    out: &self.out,
                };
                self.touch.touch_down(&mut ctx, slot, x, y, timestamp);
            }
            RawInputEvent::TouchMoved {
                slot,
                x,
                y,
                timestamp,
            } => {
                self.run_timers(timestamp);
                let mut ctx = TouchContext {
                    tunables: &self.tunables,
                    bindings: &self.profile.touch,
                    timers: &mut self.timers,
                    out: &self.out,
                };
                self.touch.touch_moved(&mut ctx, slot, x, y, timestamp);
            }
            RawInputEvent::TouchUp {
                slot,
                x,
                y,
                timestamp,
            } => {
                self.run_timers(timestamp);
                let mut ctx = TouchContext {
                    tunables: &self.tunables,
                    bindings: &self.profile.touch,
                    timers: &mut self.timers,
                    out: &self.out,
                };
                self.touch.touch_up(&mut ctx, slot, x, y, timestamp);
            }
            RawInputEvent::Disconnected => {
                info!("Controller disconnected, clearing engine state");
                self.reset();
            }
        }
        self.publish_routing();
    }

    pub fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SetProfile(profile) => self.set_profile(profile),
            EngineCommand::ChordHint(buttons) => self.handle_chord_hint(buttons),
            EngineCommand::SetNavIntercept(active) => {
                debug!("Navigation intercept: {}", active);
                self.nav_intercept = active;
            }
            EngineCommand::SetFrontmostApp(app) => {
                debug!("Frontmost app: {:?}", app);
                self.frontmost_app = app;
            }
            EngineCommand::SetWheelActive(active) => {
                debug!("Command wheel active: {}", active);
                self.wheel_active = active;
            }
            EngineCommand::Reset => self.reset(),
        }
        self.publish_routing();
    }

    /// Fires every timer due at `now`. Stale firings - scheduled before the
    /// last profile switch - are detected by their epoch and dropped.
    pub fn run_due_timers(&mut self, now: Instant) {
        self.run_timers(now);
        self.publish_routing();
    }

    /// Earliest pending deadline; the driver task sleeps until it.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub(crate) fn resolved_binding(&self, button: ButtonId) -> Option<Binding> {
        effective_binding(
            &self.profile,
            &self.layer_stack,
            self.frontmost_app.as_deref(),
            button,
        )
        .cloned()
    }

    fn run_timers(&mut self, now: Instant) {
        for fired in self.timers.pop_due(now) {
            if fired.epoch != self.timers.epoch() {
                debug!(
                    "Dropping stale timer firing {:?} (epoch {} != {})",
                    fired.key,
                    fired.epoch,
                    self.timers.epoch()
                );
                continue;
            }
            self.dispatch_timer(fired.key, now);
        }
    }

    fn dispatch_timer(&mut self, key: TimerKey, now: Instant) {
        match (key.scope, key.purpose) {
            (TimerScope::Button(button), TimerPurpose::LongHold) => {
                self.on_long_hold_timer(button, now)
            }
            (TimerScope::Button(button), TimerPurpose::Repeat) => self.on_repeat_timer(button, now),
            (TimerScope::Button(button), TimerPurpose::DoubleTap) => {
                self.on_double_tap_timer(button, now)
            }
            (TimerScope::Global, TimerPurpose::ChordWindow) => self.flush_chord_window(now),
            (TimerScope::Global, TimerPurpose::SequenceDefer) => {
                if let Some(index) = self.sequences.on_defer_expired(now) {
                    self.fire_sequence(index);
                }
            }
            (TimerScope::Global, TimerPurpose::MomentumTick) => {
                let mut ctx = TouchContext {
                    tunables: &self.tunables,
                    bindings: &self.profile.touch,
                    timers: &mut self.timers,
                    out: &self.out,
                };
                self.touch.on_momentum_tick(&mut ctx, now);
            }
            (TimerScope::Touch(slot), purpose) => {
                let mut ctx = TouchContext {
                    tunables: &self.tunables,
                    bindings: &self.profile.touch,
                    timers: &mut self.timers,
                    out: &self.out,
                };
                self.touch.on_timer(&mut ctx, purpose, slot, now);
            }
            (scope, purpose) => debug!("Unhandled timer {:?}/{:?}", scope, purpose),
        }
    }

    fn handle_button_press(&mut self, button: ButtonId, now: Instant) {
        if self
            .press_states
            .get(&button)
            .map(|state| state.is_down)
            .unwrap_or(false)
        {
            warn!("Duplicate press for {:?} while already held, ignoring", button);
            return;
        }

        // 1. Layer activators never reach resolution.
        if let Some(layer) = self.profile.layer_activators.get(&button).cloned() {
            let state = self.press_states.entry(button).or_default();
            state.begin_press(now);
            self.layer_stack.push(&layer);
            return;
        }

        // 2. On-screen-keyboard navigation owns the input while active.
        if self.nav_intercept {
            debug!("Navigation intercept consumes {:?}", button);
            let state = self.press_states.entry(button).or_default();
            state.begin_press(now);
            state.suppress_dispatch = true;
            if let Some(nav) = &self.nav_tx {
                let _ = nav.try_send(button);
            }
            return;
        }

        // 3. Chord-capable presses are buffered inside the window.
        if self.profile.is_chord_member(button) {
            match self.chord.on_press(&self.profile, button, now) {
                ChordPressOutcome::Opened => {
                    self.timers.schedule(
                        TimerKey::global(TimerPurpose::ChordWindow),
                        now + self.tunables.chord_window,
                    );
                    return;
                }
                ChordPressOutcome::Buffered => return,
                ChordPressOutcome::Matched { chord, presses } => {
                    self.timers.cancel(TimerKey::global(TimerPurpose::ChordWindow));
                    self.apply_chord_match(chord, presses);
                    return;
                }
            }
        }

        // 4. Sequence matching races the single-press classification.
        if self.observe_sequence(button, now) {
            let state = self.press_states.entry(button).or_default();
            state.begin_press(now);
            state.suppress_dispatch = true;
            return;
        }

        // 5./6. Normal classification.
        self.classify_press(button, now);
    }

    fn apply_chord_match(&mut self, chord: Vec<ButtonId>, presses: Vec<BufferedPress>) {
        let Some(action) = self
            .profile
            .chord_for(&chord)
            .map(|def| def.action.clone())
        else {
            debug!("Matched chord {:?} vanished from profile, dropping", chord);
            return;
        };
        info!("Chord {:?} matched", chord);
        self.out.send(OutputCommand::Execute(action));

        for press in presses {
            if press.released.is_none() && chord.contains(&press.button) {
                let state = self.press_states.entry(press.button).or_default();
                state.begin_press(press.pressed_at);
                state.chord_consumed = true;
            } else {
                // Early-released press that did not take part in the chord:
                // falls through as if no window existed.
                self.replay_buffered(press);
            }
        }
    }

    /// Chord window elapsed with no match: buffered presses fall through to
    /// normal classification in arrival order, with their original
    /// timestamps, and early releases are replayed.
    fn flush_chord_window(&mut self, _now: Instant) {
        let presses = self.chord.take_window();
        if presses.is_empty() {
            return;
        }
        debug!(
            "Chord window elapsed without match, flushing {} presses",
            presses.len()
        );
        for press in presses {
            self.replay_buffered(press);
        }
    }

    fn replay_buffered(&mut self, press: BufferedPress) {
        if self.observe_sequence(press.button, press.pressed_at) {
            let state = self.press_states.entry(press.button).or_default();
            state.begin_press(press.pressed_at);
            state.suppress_dispatch = true;
        } else {
            self.classify_press(press.button, press.pressed_at);
        }
        if let Some((released_at, held)) = press.released {
            self.handle_button_release(press.button, held, released_at);
        }
    }

    /// Returns true when the press completing a sequence must not be
    /// classified individually.
    fn observe_sequence(&mut self, button: ButtonId, now: Instant) -> bool {
        match self.sequences.observe(&self.profile, button, now) {
            Some(SequenceAction::Fire(index)) => {
                self.timers
                    .cancel(TimerKey::global(TimerPurpose::SequenceDefer));
                self.fire_sequence(index)
            }
            Some(SequenceAction::Defer { deadline, .. }) => {
                self.timers
                    .schedule(TimerKey::global(TimerPurpose::SequenceDefer), deadline);
                false
            }
            None => false,
        }
    }

    /// Dispatches a matched sequence. Returns true when individual press
    /// actions of the participating buttons are suppressed.
    fn fire_sequence(&mut self, index: usize) -> bool {
        let sequence = &self.profile.sequences[index];
        let action = sequence.action.clone();
        let co_fire = sequence.co_fire;
        let steps = sequence.steps.clone();

        info!("Sequence {:?} matched", steps);
        self.out.send(OutputCommand::Execute(action));

        if co_fire {
            return false;
        }
        for step in steps {
            self.timers
                .cancel(TimerKey::button(step, TimerPurpose::DoubleTap));
            self.timers
                .cancel(TimerKey::button(step, TimerPurpose::LongHold));
            self.timers
                .cancel(TimerKey::button(step, TimerPurpose::Repeat));
            if let Some(state) = self.press_states.get_mut(&step) {
                state.pending_double_tap = None;
                if state.is_down {
                    state.suppress_dispatch = true;
                }
            }
        }
        true
    }

    /// Transport-provided chord hint; the engine works identically without
    /// it through its own detector.
    fn handle_chord_hint(&mut self, buttons: Vec<ButtonId>) {
        let set = canonical_chord(buttons);
        let Some(action) = self.profile.chord_for(&set).map(|def| def.action.clone()) else {
            debug!("Chord hint {:?} matches no configured chord, ignoring", set);
            return;
        };
        info!("Chord hint {:?} accepted", set);
        self.out.send(OutputCommand::Execute(action));
        self.chord.clear();
        self.timers.cancel(TimerKey::global(TimerPurpose::ChordWindow));
        for button in set {
            self.timers
                .cancel(TimerKey::button(button, TimerPurpose::LongHold));
            self.timers
                .cancel(TimerKey::button(button, TimerPurpose::Repeat));
            if let Some(state) = self.press_states.get_mut(&button) {
                if state.is_down {
                    state.chord_consumed = true;
                }
            }
        }
    }

    /// Atomic profile swap: transient state clears, tunables re-resolve,
    /// in-flight timers from the old profile become stale via the epoch.
    fn set_profile(&mut self, profile: Arc<Profile>) {
        info!("Switching profile to '{}'", profile.name);
        self.stop_active_holds();
        self.profile = profile;
        self.tunables = Tunables::with_overrides(&self.profile.tunables);
        self.press_states.clear();
        self.chord.clear();
        self.sequences.clear();
        self.layer_stack.clear();
        self.touch = TouchRecognizer::new(&self.tunables);
        self.timers.bump_epoch();
    }

    fn reset(&mut self) {
        self.stop_active_holds();
        self.press_states.clear();
        self.chord.clear();
        self.sequences.clear();
        self.layer_stack.clear();
        self.touch.reset();
        self.timers.clear();
        self.timers.bump_epoch();
    }

    fn stop_active_holds(&mut self) {
        for state in self.press_states.values_mut() {
            if let Some(action) = state.active_hold.take() {
                self.out.send(OutputCommand::StopHold(action));
            }
        }
    }

    fn publish_routing(&mut self) {
        let state = RoutingState {
            gesture_active: self.touch.gesture_active(),
            wheel_active: self.wheel_active,
        };
        self.routing.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
    }
}
