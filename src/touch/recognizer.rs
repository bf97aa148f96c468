//! Touchpad gesture recognizer
//!
//! Classifies per-finger contact into tap / long-tap / two-finger tap, and
//! live two-finger motion into pan vs. pinch. Movement before the settle
//! interval is ignored entirely (absorbs tap-induced drift); single-finger
//! motion after settling is emitted as pointer motion through two motion
//! filter instances.

use crate::config::Tunables;
use crate::controller::event_collector::TouchSlot;
use crate::engine::timer::{TimerKey, TimerPurpose, TimerQueue};
use crate::filter::MotionFilter;
use crate::mapping::profile::TouchBindings;
use crate::mapping::Action;
use crate::output::{Dispatcher, OutputCommand};
use crate::touch::momentum::{Momentum, MomentumTick};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Blend factor for the running pan-velocity estimate.
const VELOCITY_BLEND: f64 = 0.3;

/// Nominal sample spacing used to seed filters on the first sample.
const NOMINAL_DT: f64 = 1.0 / 120.0;

/// Everything a recognizer call needs from the engine's serial context.
pub struct TouchContext<'a> {
    pub tunables: &'a Tunables,
    pub bindings: &'a TouchBindings,
    pub timers: &'a mut TimerQueue,
    pub out: &'a Dispatcher,
}

#[derive(Debug)]
struct TouchState {
    pos: (f64, f64),
    started_at: Instant,
    last_moved_at: Instant,
    /// Cumulative displacement since settling.
    displacement: f64,
    settled: bool,
    long_tap_fired: bool,
    tap_expired: bool,
}

#[derive(Debug)]
struct LiftRecord {
    slot: TouchSlot,
    duration: Duration,
    displacement: f64,
}

#[derive(Debug)]
struct GestureState {
    center_x: MotionFilter,
    center_y: MotionFilter,
    distance: MotionFilter,
    last_center: Option<(f64, f64)>,
    last_distance: Option<f64>,
    last_update: Option<Instant>,
    /// Cumulative smoothed center movement, for the two-finger tap check.
    center_travel: f64,
    pinch_accum: f64,
    locked_sign: f64,
    locked_until: Option<Instant>,
    pan_velocity: (f64, f64),
    above_since: Option<Instant>,
    last_qualified: Option<Instant>,
    first_lift: Option<LiftRecord>,
}

impl GestureState {
    fn new(tunables: &Tunables) -> Self {
        Self {
            center_x: MotionFilter::new(tunables.touch_filter),
            center_y: MotionFilter::new(tunables.touch_filter),
            distance: MotionFilter::new(tunables.touch_filter),
            last_center: None,
            last_distance: None,
            last_update: None,
            center_travel: 0.0,
            pinch_accum: 0.0,
            locked_sign: 0.0,
            locked_until: None,
            pan_velocity: (0.0, 0.0),
            above_since: None,
            last_qualified: None,
            first_lift: None,
        }
    }
}

/// Per-touch lifecycle plus two-finger aggregate; at most two concurrent
/// contacts. Owned by the engine's serial context.
pub struct TouchRecognizer {
    touches: [Option<TouchState>; 2],
    gesture: Option<GestureState>,
    momentum: Momentum,
    cooldown_until: Option<Instant>,
    pointer_x: MotionFilter,
    pointer_y: MotionFilter,
    last_pointer: Option<(f64, f64)>,
    last_pointer_at: Option<Instant>,
}

fn index(slot: TouchSlot) -> usize {
    match slot {
        TouchSlot::Primary => 0,
        TouchSlot::Secondary => 1,
    }
}

fn other(slot: TouchSlot) -> TouchSlot {
    match slot {
        TouchSlot::Primary => TouchSlot::Secondary,
        TouchSlot::Secondary => TouchSlot::Primary,
    }
}

impl TouchRecognizer {
    pub fn new(tunables: &Tunables) -> Self {
        Self {
            touches: [None, None],
            gesture: None,
            momentum: Momentum::new(),
            cooldown_until: None,
            pointer_x: MotionFilter::new(tunables.touch_filter),
            pointer_y: MotionFilter::new(tunables.touch_filter),
            last_pointer: None,
            last_pointer_at: None,
        }
    }

    /// Whether a two-finger gesture is currently engaged (routing gate for
    /// the right stick).
    pub fn gesture_active(&self) -> bool {
        self.touches[0].is_some() && self.touches[1].is_some()
    }

    pub fn touch_down(&mut self, ctx: &mut TouchContext<'_>, slot: TouchSlot, x: f64, y: f64, now: Instant) {
        // A fresh contact always ends any running fling.
        if self.momentum.active() {
            self.momentum.stop();
            ctx.timers
                .cancel(TimerKey::global(TimerPurpose::MomentumTick));
        }

        let i = index(slot);
        if self.touches[i].is_some() {
            warn!("Touch-down for already tracked slot {:?}, ignoring", slot);
            return;
        }
        self.touches[i] = Some(TouchState {
            pos: (x, y),
            started_at: now,
            last_moved_at: now,
            displacement: 0.0,
            settled: false,
            long_tap_fired: false,
            tap_expired: false,
        });
        debug!("Touch down on {:?} at ({:.3}, {:.3})", slot, x, y);

        let tunables = ctx.tunables;
        ctx.timers.schedule(
            TimerKey::touch(slot, TimerPurpose::TouchSettle),
            now + tunables.touch_settle_interval,
        );
        ctx.timers.schedule(
            TimerKey::touch(slot, TimerPurpose::TapMaxDuration),
            now + tunables.tap_max_duration,
        );
        ctx.timers.schedule(
            TimerKey::touch(slot, TimerPurpose::LongTap),
            now + tunables.long_tap_threshold,
        );

        if self.gesture_active() {
            debug!("Two-finger gesture started");
            self.gesture = Some(GestureState::new(ctx.tunables));
        } else {
            // Sampling resumes after an idle gap: stale filter history would
            // spike the derivative estimate.
            self.pointer_x.reset();
            self.pointer_y.reset();
            self.last_pointer = None;
            self.last_pointer_at = None;
        }
    }

    pub fn touch_moved(&mut self, ctx: &mut TouchContext<'_>, slot: TouchSlot, x: f64, y: f64, now: Instant) {
        let i = index(slot);
        {
            let Some(touch) = self.touches[i].as_mut() else {
                debug!("Touch-move for unknown slot {:?}, ignoring", slot);
                return;
            };
            touch.last_moved_at = now;
            if !touch.settled {
                // Pre-settle movement is ignored entirely.
                touch.pos = (x, y);
                return;
            }
            let delta = (x - touch.pos.0, y - touch.pos.1);
            touch.pos = (x, y);
            touch.displacement += delta.0.hypot(delta.1);
        }

        if self.gesture_active() {
            let both_settled = self
                .touches
                .iter()
                .all(|touch| touch.as_ref().map(|t| t.settled).unwrap_or(false));
            if both_settled {
                self.update_gesture(ctx, now);
            }
            return;
        }

        // Remnant of a two-finger episode: the remaining finger drives
        // nothing until it has re-settled and the episode is closed.
        if self.gesture.is_some() {
            return;
        }

        if let Some(until) = self.cooldown_until {
            if now < until {
                return;
            }
        }
        self.emit_pointer(ctx, x, y, now);
    }

    pub fn touch_up(&mut self, ctx: &mut TouchContext<'_>, slot: TouchSlot, _x: f64, _y: f64, now: Instant) {
        let i = index(slot);
        let Some(touch) = self.touches[i].take() else {
            debug!("Touch-up for unknown slot {:?}, ignoring", slot);
            return;
        };
        ctx.timers
            .cancel(TimerKey::touch(slot, TimerPurpose::TouchSettle));
        ctx.timers
            .cancel(TimerKey::touch(slot, TimerPurpose::TapMaxDuration));
        ctx.timers
            .cancel(TimerKey::touch(slot, TimerPurpose::LongTap));

        let duration = now.duration_since(touch.started_at);
        let other_slot = other(slot);
        let other_down = self.touches[index(other_slot)].is_some();

        if self.gesture.is_some() {
            if other_down {
                // First lift of the pair: remember it for the two-finger tap
                // check, let the remaining finger re-settle.
                if let Some(gesture) = self.gesture.as_mut() {
                    gesture.first_lift = Some(LiftRecord {
                        slot,
                        duration,
                        displacement: touch.displacement,
                    });
                }
                if let Some(remaining) = self.touches[index(other_slot)].as_mut() {
                    remaining.settled = false;
                    remaining.displacement = 0.0;
                }
                ctx.timers.schedule(
                    TimerKey::touch(other_slot, TimerPurpose::TouchSettle),
                    now + ctx.tunables.touch_settle_interval,
                );
                return;
            }

            // Final lift closes the two-finger episode.
            let gesture = self.gesture.take().expect("gesture is open");
            self.finish_two_finger(ctx, gesture, slot, duration, touch.displacement, now);
            return;
        }

        // Single-finger episode.
        if touch.long_tap_fired {
            return;
        }
        let tunables = ctx.tunables;
        if !touch.tap_expired
            && duration <= tunables.tap_max_duration
            && touch.displacement <= tunables.tap_max_movement
        {
            debug!("Tap on {:?} after {:.0?}", slot, duration);
            send_touch_action(ctx, "tap", &ctx.bindings.tap);
            self.start_cooldown(ctx, now);
        }
    }

    pub fn on_timer(
        &mut self,
        ctx: &mut TouchContext<'_>,
        purpose: TimerPurpose,
        slot: TouchSlot,
        now: Instant,
    ) {
        let i = index(slot);
        match purpose {
            TimerPurpose::TouchSettle => {
                if let Some(touch) = self.touches[i].as_mut() {
                    touch.settled = true;
                    touch.displacement = 0.0;
                    debug!("Touch {:?} settled", slot);
                }
            }
            TimerPurpose::TapMaxDuration => {
                if let Some(touch) = self.touches[i].as_mut() {
                    touch.tap_expired = true;
                }
            }
            TimerPurpose::LongTap => {
                let other_down = self.touches[index(other(slot))].is_some();
                let Some(touch) = self.touches[i].as_mut() else {
                    return;
                };
                // Long-tap fires at the threshold, not at lift; two-finger
                // contact is never a long-tap.
                if !other_down && touch.displacement <= ctx.tunables.long_tap_max_movement {
                    touch.long_tap_fired = true;
                    debug!("Long-tap on {:?}", slot);
                    send_touch_action(ctx, "long_tap", &ctx.bindings.long_tap);
                }
            }
            TimerPurpose::TapCooldown => {
                self.cooldown_until = None;
            }
            _ => debug!("Unexpected touch timer purpose {:?}", purpose),
        }
    }

    pub fn on_momentum_tick(&mut self, ctx: &mut TouchContext<'_>, now: Instant) {
        match self.momentum.tick(ctx.tunables, now) {
            MomentumTick::Emit { dx, dy } => {
                ctx.out.send(OutputCommand::Scroll {
                    dx,
                    dy,
                    momentum: true,
                });
                ctx.timers.schedule(
                    TimerKey::global(TimerPurpose::MomentumTick),
                    now + ctx.tunables.poll_interval,
                );
            }
            MomentumTick::Stopped => {}
        }
    }

    /// Drops every contact, the gesture aggregate and the momentum tail.
    pub fn reset(&mut self) {
        self.touches = [None, None];
        self.gesture = None;
        self.momentum.stop();
        self.cooldown_until = None;
        self.pointer_x.reset();
        self.pointer_y.reset();
        self.last_pointer = None;
        self.last_pointer_at = None;
    }

    fn start_cooldown(&mut self, ctx: &mut TouchContext<'_>, now: Instant) {
        self.cooldown_until = Some(now + ctx.tunables.tap_cooldown);
        ctx.timers.schedule(
            TimerKey::touch(TouchSlot::Primary, TimerPurpose::TapCooldown),
            now + ctx.tunables.tap_cooldown,
        );
    }

    fn emit_pointer(&mut self, ctx: &mut TouchContext<'_>, x: f64, y: f64, now: Instant) {
        let dt = self
            .last_pointer_at
            .map(|at| now.duration_since(at).as_secs_f64())
            .unwrap_or(NOMINAL_DT);
        let fx = self.pointer_x.filter(x, dt.max(f64::MIN_POSITIVE));
        let fy = self.pointer_y.filter(y, dt.max(f64::MIN_POSITIVE));

        if let Some((px, py)) = self.last_pointer {
            let dx = (fx - px) * ctx.tunables.pointer_sensitivity;
            let dy = (fy - py) * ctx.tunables.pointer_sensitivity;
            if dx != 0.0 || dy != 0.0 {
                ctx.out.send(OutputCommand::MoveCursor { dx, dy });
            }
        }
        self.last_pointer = Some((fx, fy));
        self.last_pointer_at = Some(now);
    }

    fn update_gesture(&mut self, ctx: &mut TouchContext<'_>, now: Instant) {
        let (p0, p1) = match (&self.touches[0], &self.touches[1]) {
            (Some(a), Some(b)) => (a.pos, b.pos),
            _ => return,
        };
        let Some(gesture) = self.gesture.as_mut() else {
            return;
        };
        let tunables = ctx.tunables;

        let raw_center = ((p0.0 + p1.0) / 2.0, (p0.1 + p1.1) / 2.0);
        let raw_distance = (p1.0 - p0.0).hypot(p1.1 - p0.1);

        let dt = gesture
            .last_update
            .map(|at| now.duration_since(at).as_secs_f64())
            .unwrap_or(NOMINAL_DT)
            .max(f64::MIN_POSITIVE);
        gesture.last_update = Some(now);

        let center = (
            gesture.center_x.filter(raw_center.0, dt),
            gesture.center_y.filter(raw_center.1, dt),
        );
        let distance = gesture.distance.filter(raw_distance, dt);

        let (Some(prev_center), Some(prev_distance)) = (gesture.last_center, gesture.last_distance)
        else {
            gesture.last_center = Some(center);
            gesture.last_distance = Some(distance);
            return;
        };
        gesture.last_center = Some(center);
        gesture.last_distance = Some(distance);

        let pan = (center.0 - prev_center.0, center.1 - prev_center.1);
        let pan_magnitude = pan.0.hypot(pan.1);
        let pinch = distance - prev_distance;
        gesture.center_travel += pan_magnitude;

        // Running velocity estimate for momentum qualification.
        let raw_velocity = (pan.0 / dt, pan.1 / dt);
        gesture.pan_velocity.0 += VELOCITY_BLEND * (raw_velocity.0 - gesture.pan_velocity.0);
        gesture.pan_velocity.1 += VELOCITY_BLEND * (raw_velocity.1 - gesture.pan_velocity.1);
        let speed = gesture.pan_velocity.0.hypot(gesture.pan_velocity.1);
        if speed >= tunables.momentum_start_velocity {
            let since = *gesture.above_since.get_or_insert(now);
            if now.duration_since(since) >= tunables.momentum_sustained_duration {
                gesture.last_qualified = Some(now);
            }
        } else {
            gesture.above_since = None;
        }

        if distance < tunables.two_finger_min_distance {
            return;
        }

        let pinch_dominates =
            pinch.abs() / (pan_magnitude + f64::EPSILON) >= tunables.pinch_vs_pan_ratio;
        if pinch_dominates {
            let sign = if pinch > 0.0 { 1.0 } else { -1.0 };
            if let Some(until) = gesture.locked_until {
                if now < until && sign != gesture.locked_sign {
                    // Snap-back suppression right after a direction change.
                    debug!("Pinch sample against locked direction, ignored");
                    return;
                }
            }
            gesture.pinch_accum += pinch;
            if gesture.pinch_accum.abs() < tunables.pinch_deadzone {
                return;
            }

            let step = tunables.pinch_step;
            while gesture.pinch_accum >= step {
                gesture.pinch_accum -= step;
                if gesture.locked_sign != 1.0 {
                    gesture.locked_until = Some(now + tunables.pinch_direction_lock);
                }
                gesture.locked_sign = 1.0;
                send_touch_action(ctx, "zoom_in", &ctx.bindings.zoom_in);
            }
            while gesture.pinch_accum <= -step {
                gesture.pinch_accum += step;
                if gesture.locked_sign != -1.0 {
                    gesture.locked_until = Some(now + tunables.pinch_direction_lock);
                }
                gesture.locked_sign = -1.0;
                send_touch_action(ctx, "zoom_out", &ctx.bindings.zoom_out);
            }
        } else {
            if pan_magnitude < tunables.pan_min_movement {
                return;
            }
            ctx.out.send(OutputCommand::Scroll {
                dx: pan.0 * tunables.pan_sensitivity,
                dy: pan.1 * tunables.pan_sensitivity,
                momentum: false,
            });
        }
    }

    fn finish_two_finger(
        &mut self,
        ctx: &mut TouchContext<'_>,
        gesture: GestureState,
        slot: TouchSlot,
        duration: Duration,
        displacement: f64,
        now: Instant,
    ) {
        let tunables = ctx.tunables;

        let movement_limit = |slot: TouchSlot| match slot {
            TouchSlot::Primary => tunables.tap_max_movement,
            // Secondary finger gets the looser threshold.
            TouchSlot::Secondary => tunables.secondary_tap_max_movement,
        };

        let second_ok =
            duration <= tunables.tap_max_duration && displacement <= movement_limit(slot);
        let first_ok = gesture.first_lift.as_ref().map(|first| {
            first.duration <= tunables.tap_max_duration
                && first.displacement <= movement_limit(first.slot)
        });
        let center_ok = gesture.center_travel <= tunables.two_finger_tap_center_max_movement;

        if first_ok == Some(true) && second_ok && center_ok {
            debug!("Two-finger tap");
            send_touch_action(ctx, "two_finger_tap", &ctx.bindings.two_finger_tap);
            self.start_cooldown(ctx, now);
            return;
        }

        // Momentum: pan velocity above the start threshold, sustained, and
        // the lift close enough to the last qualifying sample.
        let speed = gesture.pan_velocity.0.hypot(gesture.pan_velocity.1);
        let recently_qualified = gesture
            .last_qualified
            .map(|at| now.duration_since(at) <= tunables.momentum_release_window)
            .unwrap_or(false);
        if recently_qualified && speed >= tunables.momentum_start_velocity {
            self.momentum.start(gesture.pan_velocity, now);
            ctx.timers.schedule(
                TimerKey::global(TimerPurpose::MomentumTick),
                now + tunables.poll_interval,
            );
        }
    }
}

fn send_touch_action(ctx: &TouchContext<'_>, name: &str, action: &Option<Action>) {
    match action {
        Some(action) => ctx.out.send(OutputCommand::Execute(action.clone())),
        None => debug!("No touch binding for {}", name),
    }
}
