//! One-shot timers with generation counting
//!
//! A [`OneShotTimer`] lives inside the object that owns the callback. Starting
//! it bumps its generation and yields a [`TimerTicket`]; the ticket goes into
//! the host-driven [`TimerQueue`]. When the queue hands a ticket back, the owner
//! fires only if the ticket's generation is still current. Restarting or
//! stopping a timer therefore invalidates earlier tickets, and a ticket whose
//! owner has been destroyed simply finds nothing to fire.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

/// Proof that a timer was armed for a given deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTicket {
    pub generation: u64,
    pub deadline: Instant,
}

/// A restartable one-shot timer.
#[derive(Debug, Default)]
pub struct OneShotTimer {
    generation: u64,
    deadline: Option<Instant>,
}

impl OneShotTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer. Any previously issued ticket goes stale.
    pub fn start(&mut self, deadline: Instant) -> TimerTicket {
        self.generation += 1;
        self.deadline = Some(deadline);
        TimerTicket {
            generation: self.generation,
            deadline,
        }
    }

    pub fn stop(&mut self) {
        if self.deadline.take().is_some() {
            self.generation += 1;
        }
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume a ticket handed back by the queue.
    /// Returns true if the owner should run its callback.
    pub fn fire(&mut self, ticket: TimerTicket) -> bool {
        if self.deadline.is_some() && ticket.generation == self.generation {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

struct Entry<K> {
    deadline: Instant,
    seq: u64,
    key: K,
    ticket: TimerTicket,
}

impl<K> PartialEq for Entry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<K> Eq for Entry<K> {}

impl<K> PartialOrd for Entry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Entry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Deadline-ordered queue of armed timers, drained by the host event loop.
/// Entries with equal deadlines come out in scheduling order.
pub struct TimerQueue<K> {
    heap: BinaryHeap<Reverse<Entry<K>>>,
    next_seq: u64,
}

impl<K> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn schedule(&mut self, key: K, ticket: TimerTicket) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry {
            deadline: ticket.deadline,
            seq,
            key,
            ticket,
        }));
    }

    /// Pop the earliest entry whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(K, TimerTicket)> {
        if self.heap.peek()?.0.deadline > now {
            return None;
        }
        self.heap.pop().map(|Reverse(entry)| (entry.key, entry.ticket))
    }

    /// Drop every entry whose key matches `pred`.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&K) -> bool) {
        self.heap.retain(|Reverse(entry)| !pred(&entry.key));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.deadline)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_restart_invalidates_old_ticket() {
        let now = Instant::now();
        let mut timer = OneShotTimer::new();
        let first = timer.start(now + Duration::from_secs(5));
        let second = timer.start(now + Duration::from_secs(10));

        assert!(!timer.fire(first));
        assert!(timer.is_running());
        assert!(timer.fire(second));
        assert!(!timer.is_running());
    }

    #[test]
    fn test_stop_invalidates_ticket() {
        let mut timer = OneShotTimer::new();
        let ticket = timer.start(Instant::now());
        timer.stop();
        assert!(!timer.fire(ticket));
    }

    #[test]
    fn test_ticket_fires_once() {
        let mut timer = OneShotTimer::new();
        let ticket = timer.start(Instant::now());
        assert!(timer.fire(ticket));
        assert!(!timer.fire(ticket));
    }

    #[test]
    fn test_queue_orders_by_deadline_then_schedule_order() {
        let now = Instant::now();
        let mut timer = OneShotTimer::new();
        let mut queue = TimerQueue::new();
        queue.schedule("late", timer.start(now + Duration::from_secs(2)));
        queue.schedule("early", timer.start(now + Duration::from_secs(1)));
        queue.schedule("early-2", timer.start(now + Duration::from_secs(1)));

        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(1)));
        assert!(queue.pop_due(now).is_none());

        let later = now + Duration::from_secs(3);
        let keys: Vec<_> = std::iter::from_fn(|| queue.pop_due(later).map(|(k, _)| k)).collect();
        assert_eq!(keys, vec!["early", "early-2", "late"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_where_drops_matching_keys() {
        let now = Instant::now();
        let mut timer = OneShotTimer::new();
        let mut queue = TimerQueue::new();
        queue.schedule(1, timer.start(now + Duration::from_secs(1)));
        queue.schedule(2, timer.start(now + Duration::from_secs(2)));
        queue.schedule(1, timer.start(now + Duration::from_secs(3)));

        queue.remove_where(|&key| key == 1);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(2)));
    }
}
