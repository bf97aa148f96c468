//! Input classification engine
//!
//! Turns the raw button/touch stream into exactly one semantic action per
//! physical gesture, with strict timing windows and deterministic priority.
//!
//! # Architecture
//!
//! ```text
//!                    ┌► Chord Detector ──┐
//! RawInputEvent ─────┤                   ├──► Button Classifier ─► Output
//!                    └► Sequence Matcher ┘          │
//!                                                   ▼
//! Touch events ─────► Gesture Recognizer ─► Motion Filter ─► Output
//! ```
//!
//! Everything runs inside one serial task ([`engine_handle`]); waiting is
//! expressed exclusively through the timer registry ([`timer`]), which makes
//! every timing window deterministic and replayable in tests.

pub mod chord;
pub mod classifier;
pub mod engine;
pub mod engine_handle;
pub mod sequence;
pub mod timer;

// Re-exports für einfacheren Zugriff
pub use engine::{EngineCommand, InputEngine, RoutingState};
pub use engine_handle::EngineHandle;

#[cfg(test)]
mod tests {
    use super::engine::{EngineCommand, InputEngine, RoutingState};
    use crate::controller::event_collector::{ButtonId, RawInputEvent, TouchSlot};
    use crate::mapping::profile::{
        canonical_chord, Binding, ChordDef, Layer, Profile, SequenceDef, TouchBindings,
    };
    use crate::mapping::Action;
    use crate::output::{Dispatcher, OutputCommand};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::{mpsc, watch};

    fn key(name: &str) -> Action {
        Action::Key {
            key: name.to_string(),
            modifiers: Vec::new(),
        }
    }

    fn press_binding(name: &str) -> Binding {
        Binding {
            press: Some(key(name)),
            ..Default::default()
        }
    }

    /// Profile used across the pipeline tests. DPad buttons are left
    /// unmapped on purpose so sequence tests produce clean output.
    fn test_profile() -> Profile {
        let mut base = HashMap::new();
        base.insert(ButtonId::Y, press_binding("y-press"));
        base.insert(ButtonId::A, press_binding("a-press"));
        base.insert(
            ButtonId::B,
            Binding {
                press: Some(key("b-press")),
                long_hold: Some(key("b-long")),
                ..Default::default()
            },
        );
        base.insert(
            ButtonId::X,
            Binding {
                press: Some(key("x-press")),
                double_tap: Some(key("x-double")),
                ..Default::default()
            },
        );
        base.insert(
            ButtonId::RightBumper,
            Binding {
                hold: Some(key("rb-hold")),
                double_tap: Some(key("rb-double")),
                ..Default::default()
            },
        );
        base.insert(ButtonId::DPadUp, press_binding("up-base"));
        base.insert(
            ButtonId::Select,
            Binding {
                repeat: Some(key("select-repeat")),
                repeat_interval_ms: Some(100),
                ..Default::default()
            },
        );

        let mut nav = HashMap::new();
        nav.insert(ButtonId::DPadUp, press_binding("up-nav"));
        let mut sym = HashMap::new();
        sym.insert(ButtonId::DPadUp, press_binding("up-sym"));

        let mut layer_activators = HashMap::new();
        layer_activators.insert(ButtonId::LeftBumper, "nav".to_string());
        layer_activators.insert(ButtonId::RightStick, "sym".to_string());

        let mut sequences = vec![
            SequenceDef {
                steps: vec![ButtonId::DPadDown, ButtonId::DPadDown, ButtonId::A],
                window: Duration::from_millis(800),
                action: key("seq-dda"),
                co_fire: false,
            },
            SequenceDef {
                steps: vec![ButtonId::DPadUp, ButtonId::X],
                window: Duration::from_millis(800),
                action: key("seq-ux"),
                co_fire: false,
            },
        ];
        sequences.sort_by_key(|sequence| std::cmp::Reverse(sequence.steps.len()));

        Profile {
            name: "engine-test".to_string(),
            base,
            layers: vec![
                Layer {
                    name: "nav".to_string(),
                    bindings: nav,
                },
                Layer {
                    name: "sym".to_string(),
                    bindings: sym,
                },
            ],
            layer_activators,
            chords: vec![ChordDef {
                buttons: canonical_chord(vec![ButtonId::A, ButtonId::B]),
                action: key("chord-ab"),
            }],
            sequences,
            app_overrides: HashMap::new(),
            touch: TouchBindings {
                tap: Some(key("tap-act")),
                long_tap: Some(key("longtap-act")),
                two_finger_tap: Some(key("twotap-act")),
                zoom_in: Some(key("zoom-in")),
                zoom_out: Some(key("zoom-out")),
            },
            left_stick: Default::default(),
            right_stick: Default::default(),
            tunables: Default::default(),
        }
    }

    struct Harness {
        engine: InputEngine,
        receiver: mpsc::Receiver<OutputCommand>,
        routing: watch::Receiver<RoutingState>,
        t0: Instant,
    }

    impl Harness {
        fn new(profile: Profile) -> Self {
            let (sender, receiver) = mpsc::channel(512);
            let (routing_tx, routing) = watch::channel(RoutingState::default());
            let engine = InputEngine::new(Arc::new(profile), Dispatcher::new(sender), routing_tx);
            Self {
                engine,
                receiver,
                routing,
                t0: Instant::now(),
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.t0 + Duration::from_millis(ms)
        }

        fn press(&mut self, button: ButtonId, ms: u64) {
            self.engine.handle_event(RawInputEvent::ButtonPressed {
                button,
                timestamp: self.at(ms),
            });
        }

        fn release(&mut self, button: ButtonId, ms: u64, held_ms: u64) {
            self.engine.handle_event(RawInputEvent::ButtonReleased {
                button,
                held: Duration::from_millis(held_ms),
                timestamp: self.at(ms),
            });
        }

        fn tap(&mut self, button: ButtonId, ms: u64, held_ms: u64) {
            self.press(button, ms);
            self.release(button, ms + held_ms, held_ms);
        }

        fn touch_down(&mut self, slot: TouchSlot, x: f64, y: f64, ms: u64) {
            self.engine.handle_event(RawInputEvent::TouchDown {
                slot,
                x,
                y,
                timestamp: self.at(ms),
            });
        }

        fn touch_move(&mut self, slot: TouchSlot, x: f64, y: f64, ms: u64) {
            self.engine.handle_event(RawInputEvent::TouchMoved {
                slot,
                x,
                y,
                timestamp: self.at(ms),
            });
        }

        fn touch_up(&mut self, slot: TouchSlot, x: f64, y: f64, ms: u64) {
            self.engine.handle_event(RawInputEvent::TouchUp {
                slot,
                x,
                y,
                timestamp: self.at(ms),
            });
        }

        /// Fires all timers with deadlines up to `ms`, in order.
        fn run_until(&mut self, ms: u64) {
            let target = self.at(ms);
            while let Some(deadline) = self.engine.next_deadline() {
                if deadline > target {
                    break;
                }
                self.engine.run_due_timers(deadline);
            }
        }

        fn drain(&mut self) -> Vec<OutputCommand> {
            let mut commands = Vec::new();
            while let Ok(command) = self.receiver.try_recv() {
                commands.push(command);
            }
            commands
        }

        /// Key names of Execute commands, ignoring motion output.
        fn executed(&mut self) -> Vec<String> {
            self.drain()
                .into_iter()
                .filter_map(|command| match command {
                    OutputCommand::Execute(Action::Key { key, .. }) => Some(key),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn single_press_yields_exactly_one_dispatch() {
        let mut harness = Harness::new(test_profile());
        harness.tap(ButtonId::Y, 0, 50);
        harness.run_until(2_000);
        assert_eq!(harness.executed(), vec!["y-press"]);
    }

    #[test]
    fn long_hold_fires_exactly_once() {
        let mut harness = Harness::new(test_profile());
        harness.press(ButtonId::B, 0);
        harness.run_until(600);
        assert_eq!(harness.executed(), vec!["b-long"]);

        // Much later release produces no additional dispatch.
        harness.release(ButtonId::B, 3_000, 3_000);
        harness.run_until(5_000);
        assert_eq!(harness.executed(), Vec::<String>::new());
    }

    #[test]
    fn quick_release_beats_long_hold() {
        let mut harness = Harness::new(test_profile());
        harness.tap(ButtonId::B, 0, 100);
        harness.run_until(2_000);
        assert_eq!(harness.executed(), vec!["b-press"]);
    }

    #[test]
    fn double_tap_yields_one_dispatch_and_no_singles() {
        let mut harness = Harness::new(test_profile());
        harness.tap(ButtonId::X, 0, 40);
        harness.tap(ButtonId::X, 100, 40);
        harness.run_until(2_000);
        assert_eq!(harness.executed(), vec!["x-double"]);
    }

    #[test]
    fn lone_tap_falls_back_to_single_press_after_window() {
        let mut harness = Harness::new(test_profile());
        harness.tap(ButtonId::X, 0, 40);
        assert_eq!(harness.executed(), Vec::<String>::new());

        harness.run_until(2_000);
        assert_eq!(harness.executed(), vec!["x-press"]);
    }

    #[test]
    fn chord_fires_once_with_no_individual_dispatches() {
        let mut harness = Harness::new(test_profile());
        harness.press(ButtonId::A, 0);
        harness.press(ButtonId::B, 100);
        harness.release(ButtonId::A, 200, 200);
        harness.release(ButtonId::B, 220, 120);
        harness.run_until(2_000);
        assert_eq!(harness.executed(), vec!["chord-ab"]);
    }

    #[test]
    fn chord_window_expiry_falls_through_to_single_press() {
        let mut harness = Harness::new(test_profile());
        harness.tap(ButtonId::A, 0, 30);
        // Nothing before the window resolves.
        assert_eq!(harness.executed(), Vec::<String>::new());

        harness.run_until(2_000);
        assert_eq!(harness.executed(), vec!["a-press"]);
    }

    #[test]
    fn sequence_fires_and_immediately_rearms() {
        let mut harness = Harness::new(test_profile());
        for round in 0..2u64 {
            let base = round * 1_000;
            harness.tap(ButtonId::DPadDown, base, 30);
            harness.tap(ButtonId::DPadDown, base + 150, 30);
            harness.tap(ButtonId::A, base + 300, 30);
            harness.run_until(base + 900);
            assert_eq!(harness.executed(), vec!["seq-dda"], "round {round}");
        }
    }

    #[test]
    fn sequence_suppresses_completing_press() {
        let mut harness = Harness::new(test_profile());
        harness.tap(ButtonId::DPadUp, 0, 30);
        harness.tap(ButtonId::X, 100, 30);
        harness.run_until(2_000);
        // Only the sequence action: no x-press, no x-double fallback, and
        // the DPadUp single press fired before the match completed.
        assert_eq!(harness.executed(), vec!["up-base", "seq-ux"]);
    }

    #[test]
    fn repeat_fires_while_held_and_stops_on_release() {
        let mut harness = Harness::new(test_profile());
        harness.press(ButtonId::Select, 0);
        harness.run_until(350);
        assert_eq!(
            harness.executed(),
            vec!["select-repeat", "select-repeat", "select-repeat"]
        );

        harness.release(ButtonId::Select, 380, 380);
        harness.run_until(2_000);
        assert_eq!(harness.executed(), Vec::<String>::new());
    }

    #[test]
    fn nested_layers_pop_by_identity() {
        let mut harness = Harness::new(test_profile());

        harness.press(ButtonId::LeftBumper, 0); // push nav
        harness.press(ButtonId::RightStick, 50); // push sym
        harness.tap(ButtonId::DPadUp, 100, 30);
        harness.run_until(400);
        assert_eq!(harness.executed(), vec!["up-sym"]);

        // Releasing nav's activator first must leave sym active.
        harness.release(ButtonId::LeftBumper, 500, 500);
        harness.tap(ButtonId::DPadUp, 600, 30);
        harness.run_until(900);
        assert_eq!(harness.executed(), vec!["up-sym"]);

        harness.release(ButtonId::RightStick, 1_000, 950);
        harness.tap(ButtonId::DPadUp, 1_100, 30);
        harness.run_until(1_400);
        assert_eq!(harness.executed(), vec!["up-base"]);
    }

    #[test]
    fn hold_style_binding_emits_start_and_stop() {
        let mut harness = Harness::new(test_profile());
        harness.press(ButtonId::RightBumper, 0);
        harness.release(ButtonId::RightBumper, 400, 400);
        let commands = harness.drain();
        assert_eq!(
            commands,
            vec![
                OutputCommand::StartHold(key("rb-hold")),
                OutputCommand::StopHold(key("rb-hold")),
            ]
        );
    }

    #[test]
    fn hold_style_double_tap_beats_second_hold() {
        let mut harness = Harness::new(test_profile());
        harness.tap(ButtonId::RightBumper, 0, 50);
        harness.press(ButtonId::RightBumper, 150);
        harness.release(ButtonId::RightBumper, 200, 50);
        harness.run_until(2_000);

        let commands = harness.drain();
        assert_eq!(
            commands,
            vec![
                OutputCommand::StartHold(key("rb-hold")),
                OutputCommand::StopHold(key("rb-hold")),
                OutputCommand::Execute(key("rb-double")),
            ]
        );
    }

    #[test]
    fn malformed_events_are_ignored() {
        let mut harness = Harness::new(test_profile());

        // Release without press.
        harness.release(ButtonId::Y, 0, 10);
        assert_eq!(harness.executed(), Vec::<String>::new());

        // Duplicate press while held.
        harness.press(ButtonId::Y, 100);
        harness.press(ButtonId::Y, 120);
        harness.release(ButtonId::Y, 200, 100);
        harness.run_until(2_000);
        assert_eq!(harness.executed(), vec!["y-press"]);
    }

    #[test]
    fn profile_switch_drops_stale_long_hold_timer() {
        let mut harness = Harness::new(test_profile());
        harness.press(ButtonId::B, 0);

        harness
            .engine
            .handle_command(EngineCommand::SetProfile(Arc::new(test_profile())));
        harness.run_until(2_000);
        assert_eq!(harness.executed(), Vec::<String>::new());
    }

    #[test]
    fn unmapped_press_produces_no_dispatch() {
        let mut harness = Harness::new(test_profile());
        harness.tap(ButtonId::Guide, 0, 40);
        harness.run_until(2_000);
        assert_eq!(harness.executed(), Vec::<String>::new());
    }

    #[test]
    fn chord_hint_is_accepted_and_suppresses_releases() {
        let mut harness = Harness::new(test_profile());
        harness
            .engine
            .handle_command(EngineCommand::ChordHint(vec![ButtonId::B, ButtonId::A]));
        harness.run_until(2_000);
        assert_eq!(harness.executed(), vec!["chord-ab"]);
    }

    #[test]
    fn touch_tap_dispatches_tap_action() {
        let mut harness = Harness::new(test_profile());
        harness.touch_down(TouchSlot::Primary, 0.5, 0.5, 0);
        harness.touch_up(TouchSlot::Primary, 0.5, 0.5, 80);
        harness.run_until(2_000);
        assert_eq!(harness.executed(), vec!["tap-act"]);
    }

    #[test]
    fn long_tap_fires_at_threshold_not_at_lift() {
        let mut harness = Harness::new(test_profile());
        harness.touch_down(TouchSlot::Primary, 0.5, 0.5, 0);
        harness.run_until(520);
        assert_eq!(harness.executed(), vec!["longtap-act"]);

        harness.touch_up(TouchSlot::Primary, 0.5, 0.5, 700);
        harness.run_until(2_000);
        assert_eq!(harness.executed(), Vec::<String>::new());
    }

    #[test]
    fn two_finger_tap_dispatches_once() {
        let mut harness = Harness::new(test_profile());
        harness.touch_down(TouchSlot::Primary, 0.4, 0.5, 0);
        harness.touch_down(TouchSlot::Secondary, 0.6, 0.5, 15);
        harness.touch_up(TouchSlot::Primary, 0.4, 0.5, 90);
        harness.touch_up(TouchSlot::Secondary, 0.6, 0.5, 100);
        harness.run_until(2_000);
        assert_eq!(harness.executed(), vec!["twotap-act"]);
    }

    #[test]
    fn two_finger_drag_emits_pan_scroll() {
        let mut harness = Harness::new(test_profile());
        harness.touch_down(TouchSlot::Primary, 0.40, 0.40, 0);
        harness.touch_down(TouchSlot::Secondary, 0.60, 0.40, 5);
        // Let both settle first.
        harness.run_until(200);

        let mut ms = 200;
        for step in 1..=25u32 {
            let dy = 0.40 + step as f64 * 0.01;
            ms += 8;
            harness.touch_move(TouchSlot::Primary, 0.40, dy, ms);
            harness.touch_move(TouchSlot::Secondary, 0.60, dy, ms);
        }

        let commands = harness.drain();
        let pans: Vec<&OutputCommand> = commands
            .iter()
            .filter(|command| {
                matches!(command, OutputCommand::Scroll { momentum: false, .. })
            })
            .collect();
        assert!(!pans.is_empty(), "expected pan scrolls, got {commands:?}");
        // Equal-distance drag must never classify as pinch.
        assert!(commands.iter().all(|command| !matches!(
            command,
            OutputCommand::Execute(Action::Key { key, .. }) if key.starts_with("zoom")
        )));
    }

    #[test]
    fn spreading_fingers_emit_zoom_steps() {
        let mut harness = Harness::new(test_profile());
        harness.touch_down(TouchSlot::Primary, 0.45, 0.50, 0);
        harness.touch_down(TouchSlot::Secondary, 0.55, 0.50, 5);
        harness.run_until(200);

        let mut ms = 200;
        for step in 1..=30u32 {
            let spread = step as f64 * 0.01;
            ms += 8;
            harness.touch_move(TouchSlot::Primary, 0.45 - spread, 0.50, ms);
            harness.touch_move(TouchSlot::Secondary, 0.55 + spread, 0.50, ms);
        }

        let commands = harness.drain();
        let zoom_ins = commands
            .iter()
            .filter(|command| {
                matches!(command, OutputCommand::Execute(Action::Key { key, .. }) if key.as_str() == "zoom-in")
            })
            .count();
        assert!(zoom_ins >= 1, "expected zoom-in steps, got {commands:?}");
        assert!(commands
            .iter()
            .all(|command| !matches!(command, OutputCommand::Scroll { .. })));
    }

    #[test]
    fn fast_pan_lift_starts_momentum_that_decays_to_zero() {
        let mut harness = Harness::new(test_profile());
        harness.touch_down(TouchSlot::Primary, 0.40, 0.10, 0);
        harness.touch_down(TouchSlot::Secondary, 0.60, 0.10, 5);
        harness.run_until(200);

        // ~2.5 units/s downward pan, sustained well past the qualification
        // window.
        let mut ms = 200;
        for step in 1..=40u32 {
            let dy = 0.10 + step as f64 * 0.02;
            ms += 8;
            harness.touch_move(TouchSlot::Primary, 0.40, dy, ms);
            harness.touch_move(TouchSlot::Secondary, 0.60, dy, ms);
        }
        harness.touch_up(TouchSlot::Primary, 0.40, 0.90, ms + 5);
        harness.touch_up(TouchSlot::Secondary, 0.60, 0.90, ms + 10);
        harness.drain();

        // Momentum ticks run until the velocity decays below the stop
        // threshold.
        harness.run_until(ms as u64 + 5_000);
        let commands = harness.drain();
        let momentum_scrolls = commands
            .iter()
            .filter(|command| matches!(command, OutputCommand::Scroll { momentum: true, .. }))
            .count();
        assert!(momentum_scrolls > 3, "expected momentum ticks, got {commands:?}");
        // And it must eventually stop: no timer left pending.
        assert!(harness.engine.next_deadline().is_none());
    }

    #[test]
    fn routing_reports_two_finger_gesture() {
        let mut harness = Harness::new(test_profile());
        assert!(!harness.routing.borrow().gesture_active);

        harness.touch_down(TouchSlot::Primary, 0.4, 0.5, 0);
        harness.touch_down(TouchSlot::Secondary, 0.6, 0.5, 10);
        assert!(harness.routing.borrow().gesture_active);

        harness.touch_up(TouchSlot::Primary, 0.4, 0.5, 50);
        harness.touch_up(TouchSlot::Secondary, 0.6, 0.5, 60);
        assert!(!harness.routing.borrow().gesture_active);
    }

    #[test]
    fn disconnect_clears_all_transient_state() {
        let mut harness = Harness::new(test_profile());
        harness.press(ButtonId::B, 0);
        harness.press(ButtonId::LeftBumper, 10);
        harness.touch_down(TouchSlot::Primary, 0.5, 0.5, 20);

        harness.engine.handle_event(RawInputEvent::Disconnected);
        harness.run_until(5_000);
        assert_eq!(harness.executed(), Vec::<String>::new());
        assert!(harness.engine.next_deadline().is_none());

        // Fresh presses classify normally afterwards.
        harness.tap(ButtonId::Y, 6_000, 40);
        harness.run_until(8_000);
        assert_eq!(harness.executed(), vec!["y-press"]);
    }
}
