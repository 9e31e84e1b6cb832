//! Delayed tasks on a virtual clock.
//!
//! The reader never sleeps or reads the wall clock. Every timeout is a task
//! queued here, and the embedding advances time explicitly, which keeps retry
//! ladders and stall windows deterministic.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Cancel handle for a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// A queue of tasks ordered by deadline, FIFO among equal deadlines.
#[derive(Debug)]
pub struct Scheduler<T> {
    now: Duration,
    next_seq: u64,
    queue: BTreeMap<(Duration, u64), T>,
    deadlines: HashMap<u64, Duration>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_seq: 0,
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Run `task` once `delay` has elapsed from now.
    pub fn schedule(&mut self, delay: Duration, task: T) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        let deadline = self.now + delay;
        self.queue.insert((deadline, seq), task);
        self.deadlines.insert(seq, deadline);
        TimerHandle(seq)
    }

    /// Drop a pending task. Cancelling a task that already fired is a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        let deadline = self.deadlines.remove(&handle.0)?;
        self.queue.remove(&(deadline, handle.0))
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.deadlines.contains_key(&handle.0)
    }

    /// Deadline of the earliest pending task.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.queue.keys().next().map(|&(deadline, _)| deadline)
    }

    /// Remove the earliest task due at or before `until`, moving the clock to
    /// its deadline.
    pub fn pop_due(&mut self, until: Duration) -> Option<T> {
        let &(deadline, seq) = self.queue.keys().next()?;
        if deadline > until {
            return None;
        }
        let task = self.queue.remove(&(deadline, seq))?;
        self.deadlines.remove(&seq);
        self.now = self.now.max(deadline);
        Some(task)
    }

    /// Move the clock forward without running anything. Never moves it back.
    pub fn advance_to(&mut self, until: Duration) {
        self.now = self.now.max(until);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn pops_in_deadline_then_fifo_order() {
        let mut s = Scheduler::new();
        s.schedule(ms(300), "c");
        s.schedule(ms(100), "a");
        s.schedule(ms(100), "b");

        assert_eq!(s.pop_due(ms(50)), None);
        assert_eq!(s.pop_due(ms(1000)), Some("a"));
        assert_eq!(s.now(), ms(100));
        assert_eq!(s.pop_due(ms(1000)), Some("b"));
        assert_eq!(s.pop_due(ms(1000)), Some("c"));
        assert_eq!(s.now(), ms(300));
        assert!(s.is_empty());
    }

    #[test]
    fn delays_are_relative_to_current_time() {
        let mut s = Scheduler::new();
        s.advance_to(ms(500));
        s.schedule(ms(100), ());
        assert_eq!(s.next_deadline(), Some(ms(600)));
    }

    #[test]
    fn cancelled_tasks_never_fire() {
        let mut s = Scheduler::new();
        let h = s.schedule(ms(10), 1);
        s.schedule(ms(20), 2);
        assert!(s.is_pending(h));
        assert_eq!(s.cancel(h), Some(1));
        assert!(!s.is_pending(h));
        assert_eq!(s.cancel(h), None);
        assert_eq!(s.pop_due(ms(100)), Some(2));
    }

    #[test]
    fn clock_never_moves_backwards() {
        let mut s: Scheduler<()> = Scheduler::new();
        s.advance_to(ms(200));
        s.advance_to(ms(100));
        assert_eq!(s.now(), ms(200));
    }
}
