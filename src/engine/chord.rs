//! Chord detection window
//!
//! Sits in front of the button classifier: presses of chord-capable buttons
//! are buffered inside a short window starting at the first such press. A
//! press whose combined buffered set matches a configured chord fires the
//! chord immediately; if the window elapses without a full match the
//! buffered presses (and any releases that arrived meanwhile) fall through
//! to normal classification with their original timestamps, so nothing is
//! delayed beyond the window.

use crate::controller::event_collector::ButtonId;
use crate::mapping::profile::{canonical_chord, Profile};
use std::time::{Duration, Instant};
use tracing::debug;

/// A press held back by the open window. `released` records an early
/// release so the flush can replay it after classification.
#[derive(Clone, Debug)]
pub struct BufferedPress {
    pub button: ButtonId,
    pub pressed_at: Instant,
    pub released: Option<(Instant, Duration)>,
}

/// Outcome of feeding a chord-capable press into the detector.
#[derive(Clone, Debug)]
pub enum ChordPressOutcome {
    /// First press opened a window; the caller schedules the window timer.
    Opened,
    /// Press joined an open window without completing a chord.
    Buffered,
    /// The buffered set matches a configured chord. `chord` is the
    /// canonical button set, `presses` the consumed window content.
    Matched {
        chord: Vec<ButtonId>,
        presses: Vec<BufferedPress>,
    },
}

#[derive(Debug, Default)]
pub struct ChordDetector {
    window: Option<Vec<BufferedPress>>,
}

impl ChordDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.window.is_some()
    }

    /// Whether `button` has a press buffered in the open window that has
    /// not been released yet.
    pub fn is_pending(&self, button: ButtonId) -> bool {
        self.window
            .as_ref()
            .map(|presses| {
                presses
                    .iter()
                    .any(|press| press.button == button && press.released.is_none())
            })
            .unwrap_or(false)
    }

    /// Feeds a chord-capable press. On a match the window is consumed; the
    /// caller dispatches the chord and marks the members chord-consumed.
    pub fn on_press(
        &mut self,
        profile: &Profile,
        button: ButtonId,
        now: Instant,
    ) -> ChordPressOutcome {
        let press = BufferedPress {
            button,
            pressed_at: now,
            released: None,
        };

        match self.window.as_mut() {
            None => {
                debug!("Chord window opened by {:?}", button);
                self.window = Some(vec![press]);
                ChordPressOutcome::Opened
            }
            Some(presses) => {
                presses.push(press);
                // Only buttons still physically down can complete a chord;
                // early-released presses fall through at flush time.
                let candidate = canonical_chord(
                    presses
                        .iter()
                        .filter(|press| press.released.is_none())
                        .map(|press| press.button)
                        .collect(),
                );
                if candidate.len() >= 2 && profile.chord_for(&candidate).is_some() {
                    debug!("Chord matched: {:?}", candidate);
                    let presses = self.window.take().expect("window is open");
                    ChordPressOutcome::Matched {
                        chord: candidate,
                        presses,
                    }
                } else {
                    ChordPressOutcome::Buffered
                }
            }
        }
    }

    /// Records a release for a buffered press so the flush can replay it.
    /// Returns false when the button has no unreleased buffered press.
    pub fn on_release(&mut self, button: ButtonId, now: Instant, held: Duration) -> bool {
        let Some(presses) = self.window.as_mut() else {
            return false;
        };
        for press in presses.iter_mut().rev() {
            if press.button == button && press.released.is_none() {
                press.released = Some((now, held));
                return true;
            }
        }
        false
    }

    /// Closes the window and hands back the buffered presses in arrival
    /// order for fall-through classification.
    pub fn take_window(&mut self) -> Vec<BufferedPress> {
        self.window.take().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.window = None;
    }
}
