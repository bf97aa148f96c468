//! Cancellable timer registry for the classification engine
//!
//! All waiting in the engine is expressed as deadlines in this queue; the
//! engine task sleeps until [`TimerQueue::next_deadline`] and then drains
//! [`TimerQueue::pop_due`] inside its own serial context, so firings never
//! run concurrently with classifier mutation. Cancellation is lazy: a
//! generation counter per key marks the single live entry, superseded heap
//! entries are skipped on pop. Every entry carries the engine epoch from its
//! schedule time so firings that outlive a profile switch can be detected
//! and dropped.

use crate::controller::event_collector::{ButtonId, TouchSlot};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;
use tracing::trace;

/// What a timer is for; together with the scope it forms the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    LongHold,
    Repeat,
    DoubleTap,
    ChordWindow,
    SequenceDefer,
    TouchSettle,
    TapMaxDuration,
    LongTap,
    TapCooldown,
    MomentumTick,
}

/// What a timer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerScope {
    Button(ButtonId),
    Touch(TouchSlot),
    Global,
}

/// Registry key: (owner, purpose). Rescheduling the same key replaces any
/// pending firing atomically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub scope: TimerScope,
    pub purpose: TimerPurpose,
}

impl TimerKey {
    pub fn button(button: ButtonId, purpose: TimerPurpose) -> Self {
        Self {
            scope: TimerScope::Button(button),
            purpose,
        }
    }

    pub fn touch(slot: TouchSlot, purpose: TimerPurpose) -> Self {
        Self {
            scope: TimerScope::Touch(slot),
            purpose,
        }
    }

    pub fn global(purpose: TimerPurpose) -> Self {
        Self {
            scope: TimerScope::Global,
            purpose,
        }
    }
}

/// A timer that came due, with the epoch it was scheduled under.
#[derive(Clone, Copy, Debug)]
pub struct FiredTimer {
    pub key: TimerKey,
    pub epoch: u64,
}

#[derive(Debug)]
struct HeapEntry {
    deadline: Instant,
    generation: u64,
    epoch: u64,
    key: TimerKey,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.generation.cmp(&other.generation))
    }
}

/// One-shot timer queue keyed by (scope, purpose).
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    live: HashMap<TimerKey, u64>,
    next_generation: u64,
    epoch: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch; bumped on profile switch so in-flight timers from the
    /// previous profile identify themselves as stale when they fire.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn bump_epoch(&mut self) {
        self.epoch += 1;
        trace!("Timer epoch bumped to {}", self.epoch);
    }

    /// Schedules (or replaces) the timer for `key`. Replacement is atomic:
    /// the previous pending firing for the key can never be observed after
    /// this call.
    pub fn schedule(&mut self, key: TimerKey, deadline: Instant) {
        self.next_generation += 1;
        self.live.insert(key, self.next_generation);
        self.heap.push(Reverse(HeapEntry {
            deadline,
            generation: self.next_generation,
            epoch: self.epoch,
            key,
        }));
        trace!("Timer scheduled: {:?} gen {}", key, self.next_generation);
    }

    /// Cancels the pending timer for `key`. Cancelling a timer that has
    /// already fired (or was never scheduled) is a no-op.
    pub fn cancel(&mut self, key: TimerKey) {
        if self.live.remove(&key).is_some() {
            trace!("Timer cancelled: {:?}", key);
        }
    }

    pub fn is_scheduled(&self, key: TimerKey) -> bool {
        self.live.contains_key(&key)
    }

    /// Earliest live deadline, skipping superseded heap entries.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.live.get(&entry.key) == Some(&entry.generation) {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Removes and returns every live timer due at `now`, in deadline order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<FiredTimer> {
        let mut fired = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry").0;
            if self.live.get(&entry.key) == Some(&entry.generation) {
                self.live.remove(&entry.key);
                fired.push(FiredTimer {
                    key: entry.key,
                    epoch: entry.epoch,
                });
            }
        }
        fired
    }

    /// Drops every pending timer.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key_a() -> TimerKey {
        TimerKey::button(ButtonId::A, TimerPurpose::LongHold)
    }

    fn key_b() -> TimerKey {
        TimerKey::button(ButtonId::B, TimerPurpose::DoubleTap)
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut timers = TimerQueue::new();
        let t0 = Instant::now();
        timers.schedule(key_b(), t0 + Duration::from_millis(300));
        timers.schedule(key_a(), t0 + Duration::from_millis(100));

        assert_eq!(timers.next_deadline(), Some(t0 + Duration::from_millis(100)));

        let fired = timers.pop_due(t0 + Duration::from_millis(400));
        let keys: Vec<TimerKey> = fired.iter().map(|f| f.key).collect();
        assert_eq!(keys, vec![key_a(), key_b()]);
        assert!(timers.next_deadline().is_none());
    }

    #[test]
    fn nothing_fires_before_deadline() {
        let mut timers = TimerQueue::new();
        let t0 = Instant::now();
        timers.schedule(key_a(), t0 + Duration::from_millis(100));
        assert!(timers.pop_due(t0 + Duration::from_millis(99)).is_empty());
        assert!(timers.is_scheduled(key_a()));
    }

    #[test]
    fn cancel_is_a_noop_after_firing() {
        let mut timers = TimerQueue::new();
        let t0 = Instant::now();
        timers.schedule(key_a(), t0);
        assert_eq!(timers.pop_due(t0).len(), 1);

        // Already fired; cancelling must not disturb anything.
        timers.cancel(key_a());
        assert!(timers.pop_due(t0 + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn reschedule_replaces_pending_firing_atomically() {
        let mut timers = TimerQueue::new();
        let t0 = Instant::now();
        timers.schedule(key_a(), t0 + Duration::from_millis(100));
        timers.schedule(key_a(), t0 + Duration::from_millis(500));

        // The superseded deadline must not fire.
        assert!(timers.pop_due(t0 + Duration::from_millis(200)).is_empty());

        let fired = timers.pop_due(t0 + Duration::from_millis(500));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].key, key_a());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut timers = TimerQueue::new();
        let t0 = Instant::now();
        timers.schedule(key_a(), t0 + Duration::from_millis(100));
        timers.cancel(key_a());
        assert!(timers.pop_due(t0 + Duration::from_secs(1)).is_empty());
        assert!(timers.next_deadline().is_none());
    }

    #[test]
    fn epoch_marks_entries_scheduled_before_a_bump() {
        let mut timers = TimerQueue::new();
        let t0 = Instant::now();
        timers.schedule(key_a(), t0 + Duration::from_millis(100));
        timers.bump_epoch();
        timers.schedule(key_b(), t0 + Duration::from_millis(100));

        let fired = timers.pop_due(t0 + Duration::from_millis(100));
        assert_eq!(fired.len(), 2);
        let stale: Vec<bool> = fired.iter().map(|f| f.epoch != timers.epoch()).collect();
        assert_eq!(stale, vec![true, false]);
    }
}
