//! Ordered press-sequence matching
//!
//! Keeps a bounded history of recent presses and matches it against the
//! profile's sequences, longest step count first (declaration order breaks
//! ties). A match that is also the prefix of a longer, still-completable
//! sequence is deferred until the longer one either completes or its window
//! expires; the engine drives the expiry through the timer registry.

use crate::controller::event_collector::ButtonId;
use crate::mapping::profile::Profile;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::debug;

/// One entry of the press history.
#[derive(Clone, Copy, Debug)]
pub struct PressEvent {
    pub button: ButtonId,
    pub timestamp: Instant,
}

/// What the engine has to do after feeding a press into the tracker.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SequenceAction {
    /// Fire the sequence at this index in `profile.sequences`.
    Fire(usize),
    /// A shorter sequence matched but a longer one can still complete;
    /// schedule a deferral timer for `deadline`.
    Defer { index: usize, deadline: Instant },
}

#[derive(Clone, Copy, Debug)]
struct DeferredMatch {
    index: usize,
    deadline: Instant,
}

#[derive(Debug, Default)]
pub struct SequenceTracker {
    history: VecDeque<PressEvent>,
    deferred: Option<DeferredMatch>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a press, prunes stale history and attempts matches. At most
    /// one action is returned per press.
    pub fn observe(
        &mut self,
        profile: &Profile,
        button: ButtonId,
        now: Instant,
    ) -> Option<SequenceAction> {
        let capacity = profile.longest_sequence_len();
        if capacity == 0 {
            return None;
        }

        self.history.push_back(PressEvent {
            button,
            timestamp: now,
        });
        while self.history.len() > capacity {
            self.history.pop_front();
        }
        self.prune(profile, now);

        if let Some(index) = self.best_match(profile) {
            let matched_len = profile.sequences[index].steps.len();
            if let Some(deadline) = self.completable_longer(profile, matched_len, now) {
                debug!(
                    "Sequence match deferred (index {}), longer candidate open until {:?}",
                    index, deadline
                );
                self.deferred = Some(DeferredMatch { index, deadline });
                return Some(SequenceAction::Defer { index, deadline });
            }
            debug!("Sequence matched (index {})", index);
            self.history.clear();
            self.deferred = None;
            return Some(SequenceAction::Fire(index));
        }

        // No match for the extended history. If a deferred match was waiting
        // on a longer candidate, fire it as soon as that candidate can no
        // longer continue.
        if let Some(deferred) = self.deferred {
            let matched_len = profile.sequences[deferred.index].steps.len();
            if self.completable_longer(profile, matched_len, now).is_none() {
                debug!("Deferred sequence fired (index {})", deferred.index);
                self.history.clear();
                self.deferred = None;
                return Some(SequenceAction::Fire(deferred.index));
            }
        }

        None
    }

    /// Resolves a deferral whose window timer expired. Returns the sequence
    /// to fire if the deferred match is still standing.
    pub fn on_defer_expired(&mut self, now: Instant) -> Option<usize> {
        let deferred = self.deferred?;
        if now < deferred.deadline {
            return None;
        }
        self.deferred = None;
        self.history.clear();
        debug!(
            "Deferred sequence fired on window expiry (index {})",
            deferred.index
        );
        Some(deferred.index)
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.deferred = None;
    }

    fn prune(&mut self, profile: &Profile, now: Instant) {
        let horizon = profile.longest_sequence_window();
        while let Some(front) = self.history.front() {
            if now.duration_since(front.timestamp) > horizon {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// First sequence (longest first, declaration order on ties) whose steps
    /// equal the history suffix within its own time window.
    fn best_match(&self, profile: &Profile) -> Option<usize> {
        for (index, sequence) in profile.sequences.iter().enumerate() {
            let len = sequence.steps.len();
            if len > self.history.len() {
                continue;
            }
            let offset = self.history.len() - len;
            let buttons_match = sequence
                .steps
                .iter()
                .enumerate()
                .all(|(i, step)| self.history[offset + i].button == *step);
            if !buttons_match {
                continue;
            }
            let first = self.history[offset].timestamp;
            let last = self.history[self.history.len() - 1].timestamp;
            if last.duration_since(first) <= sequence.window {
                return Some(index);
            }
        }
        None
    }

    /// Latest expiry among longer sequences that the current history tail
    /// is still a proper prefix of. None when no longer sequence can
    /// complete any more.
    fn completable_longer(
        &self,
        profile: &Profile,
        min_len_exclusive: usize,
        now: Instant,
    ) -> Option<Instant> {
        let mut latest: Option<Instant> = None;
        for sequence in &profile.sequences {
            let len = sequence.steps.len();
            if len <= min_len_exclusive {
                continue;
            }
            let max_prefix = (len - 1).min(self.history.len());
            for m in (min_len_exclusive.max(1)..=max_prefix).rev() {
                let offset = self.history.len() - m;
                let matches = sequence
                    .steps
                    .iter()
                    .take(m)
                    .enumerate()
                    .all(|(i, step)| self.history[offset + i].button == *step);
                if !matches {
                    continue;
                }
                let expiry = self.history[offset].timestamp + sequence.window;
                if expiry > now {
                    latest = Some(match latest {
                        Some(current) => current.max(expiry),
                        None => expiry,
                    });
                }
                break;
            }
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::profile::SequenceDef;
    use crate::mapping::Action;
    use std::time::Duration;

    fn key(name: &str) -> Action {
        Action::Key {
            key: name.to_string(),
            modifiers: Vec::new(),
        }
    }

    fn sequence(steps: Vec<ButtonId>, window_ms: u64) -> SequenceDef {
        SequenceDef {
            steps,
            window: Duration::from_millis(window_ms),
            action: key("f1"),
            co_fire: false,
        }
    }

    fn profile_with(sequences: Vec<SequenceDef>) -> Profile {
        let mut profile = Profile::default_profile();
        profile.sequences = sequences;
        profile
            .sequences
            .sort_by_key(|sequence| std::cmp::Reverse(sequence.steps.len()));
        profile
    }

    #[test]
    fn basic_sequence_fires_within_window() {
        let profile = profile_with(vec![sequence(
            vec![ButtonId::DPadDown, ButtonId::DPadDown, ButtonId::A],
            800,
        )]);
        let mut tracker = SequenceTracker::new();
        let t0 = Instant::now();

        assert_eq!(tracker.observe(&profile, ButtonId::DPadDown, t0), None);
        assert_eq!(
            tracker.observe(&profile, ButtonId::DPadDown, t0 + Duration::from_millis(200)),
            None
        );
        assert_eq!(
            tracker.observe(&profile, ButtonId::A, t0 + Duration::from_millis(500)),
            Some(SequenceAction::Fire(0))
        );
    }

    #[test]
    fn history_clears_on_match_so_repeat_fires_again() {
        let profile = profile_with(vec![sequence(
            vec![ButtonId::DPadDown, ButtonId::DPadDown, ButtonId::A],
            800,
        )]);
        let mut tracker = SequenceTracker::new();
        let mut t = Instant::now();

        for _ in 0..2 {
            assert_eq!(tracker.observe(&profile, ButtonId::DPadDown, t), None);
            t += Duration::from_millis(100);
            assert_eq!(tracker.observe(&profile, ButtonId::DPadDown, t), None);
            t += Duration::from_millis(100);
            assert_eq!(
                tracker.observe(&profile, ButtonId::A, t),
                Some(SequenceAction::Fire(0))
            );
            t += Duration::from_millis(100);
        }
    }

    #[test]
    fn window_expiry_prevents_match() {
        let profile = profile_with(vec![sequence(vec![ButtonId::A, ButtonId::B], 300)]);
        let mut tracker = SequenceTracker::new();
        let t0 = Instant::now();

        tracker.observe(&profile, ButtonId::A, t0);
        assert_eq!(
            tracker.observe(&profile, ButtonId::B, t0 + Duration::from_millis(400)),
            None
        );
    }

    #[test]
    fn longer_sequence_wins_over_its_prefix() {
        let profile = profile_with(vec![
            sequence(vec![ButtonId::A, ButtonId::B], 800),
            sequence(vec![ButtonId::A, ButtonId::B, ButtonId::X], 800),
        ]);
        // After sorting: index 0 = [A, B, X], index 1 = [A, B].
        let mut tracker = SequenceTracker::new();
        let t0 = Instant::now();

        assert_eq!(tracker.observe(&profile, ButtonId::A, t0), None);

        // [A, B] matches but [A, B, X] is still completable: deferred.
        let action = tracker
            .observe(&profile, ButtonId::B, t0 + Duration::from_millis(100))
            .unwrap();
        assert!(matches!(action, SequenceAction::Defer { index: 1, .. }));

        // X completes the longer sequence; only it fires.
        assert_eq!(
            tracker.observe(&profile, ButtonId::X, t0 + Duration::from_millis(200)),
            Some(SequenceAction::Fire(0))
        );
    }

    #[test]
    fn deferred_prefix_fires_when_longer_candidate_breaks() {
        let profile = profile_with(vec![
            sequence(vec![ButtonId::A, ButtonId::B], 800),
            sequence(vec![ButtonId::A, ButtonId::B, ButtonId::X], 800),
        ]);
        let mut tracker = SequenceTracker::new();
        let t0 = Instant::now();

        tracker.observe(&profile, ButtonId::A, t0);
        let action = tracker
            .observe(&profile, ButtonId::B, t0 + Duration::from_millis(100))
            .unwrap();
        assert!(matches!(action, SequenceAction::Defer { .. }));

        // Y breaks [A, B, X]; the deferred [A, B] fires now.
        assert_eq!(
            tracker.observe(&profile, ButtonId::Y, t0 + Duration::from_millis(200)),
            Some(SequenceAction::Fire(1))
        );
    }

    #[test]
    fn deferred_prefix_fires_on_window_expiry() {
        let profile = profile_with(vec![
            sequence(vec![ButtonId::A, ButtonId::B], 800),
            sequence(vec![ButtonId::A, ButtonId::B, ButtonId::X], 800),
        ]);
        let mut tracker = SequenceTracker::new();
        let t0 = Instant::now();

        tracker.observe(&profile, ButtonId::A, t0);
        let Some(SequenceAction::Defer { deadline, .. }) =
            tracker.observe(&profile, ButtonId::B, t0 + Duration::from_millis(100))
        else {
            panic!("expected deferral");
        };
        assert_eq!(deadline, t0 + Duration::from_millis(800));

        // Before the deadline nothing fires; at the deadline the short one does.
        assert_eq!(tracker.on_defer_expired(t0 + Duration::from_millis(700)), None);
        assert_eq!(tracker.on_defer_expired(deadline), Some(1));
        // History cleared by the deferred fire.
        assert_eq!(tracker.observe(&profile, ButtonId::B, deadline), None);
    }
}
