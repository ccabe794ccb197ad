//! BinaryHeap-based timer queue
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: O(1) (lazy cancellation)
//! - Poll expired: O(k log n) where k = number of expired timers
//!
//! # Cancellation Strategy
//!
//! Handles of armed timers live in a HashSet. Cancelling removes the
//! handle; the heap entry is skipped when it reaches the top. This avoids
//! O(n) removal from the heap and lets `cancel` report whether the timer
//! was still armed.

use costack_core::TimerHandle;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

/// Callback run when a timer expires
pub type TimerCallback = Box<dyn FnOnce()>;

struct HeapEntry {
    deadline: Instant,
    handle: TimerHandle,
    /// Insertion order; ties on `deadline` fire in registration order
    seq: u64,
    callback: TimerCallback,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap: earliest deadline, then earliest insert
        match other.deadline.cmp(&self.deadline) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Min-heap of one-shot timers
pub struct TimerHeap {
    heap: BinaryHeap<HeapEntry>,
    armed: HashSet<TimerHandle>,
    next_seq: u64,
    total_inserted: u64,
    total_fired: u64,
    total_cancelled: u64,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            armed: HashSet::with_capacity(capacity),
            next_seq: 0,
            total_inserted: 0,
            total_fired: 0,
            total_cancelled: 0,
        }
    }

    /// Arm a timer firing at `deadline`
    pub fn insert(&mut self, deadline: Instant, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        self.heap.push(HeapEntry {
            deadline,
            handle,
            seq: self.next_seq,
            callback,
        });
        self.next_seq += 1;
        self.armed.insert(handle);
        self.total_inserted += 1;
        handle
    }

    /// Disarm a timer; `false` if it already fired or was cancelled
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let removed = self.armed.remove(&handle);
        if removed {
            self.total_cancelled += 1;
        }
        if self.armed.is_empty() {
            self.heap.clear();
        }
        removed
    }

    /// Remove and return the callbacks of every timer due at `now`, in
    /// deadline order
    pub fn poll_expired(&mut self, now: Instant) -> Vec<TimerCallback> {
        let mut expired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Some(entry) = self.heap.pop() else {
                break;
            };
            if self.armed.remove(&entry.handle) {
                self.total_fired += 1;
                expired.push(entry.callback);
            }
        }
        expired
    }

    /// Deadline of the earliest armed timer
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(top) = self.heap.peek() {
            if self.armed.contains(&top.handle) {
                return Some(top.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Armed timers
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn stats(&self) -> TimerHeapStats {
        TimerHeapStats {
            active: self.armed.len(),
            pending_cancellations: self.heap.len().saturating_sub(self.armed.len()),
            total_inserted: self.total_inserted,
            total_fired: self.total_fired,
            total_cancelled: self.total_cancelled,
        }
    }
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for [`TimerHeap`]
#[derive(Debug, Clone)]
pub struct TimerHeapStats {
    /// Currently armed timers
    pub active: usize,
    /// Cancelled but not yet removed from heap
    pub pending_cancellations: usize,
    pub total_inserted: u64,
    pub total_fired: u64,
    pub total_cancelled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn recorder(log: &Rc<RefCell<Vec<u32>>>, id: u32) -> TimerCallback {
        let log = log.clone();
        Box::new(move || log.borrow_mut().push(id))
    }

    #[test]
    fn test_ordering() {
        let mut heap = TimerHeap::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let now = Instant::now();

        heap.insert(now + Duration::from_millis(30), recorder(&log, 3));
        heap.insert(now + Duration::from_millis(10), recorder(&log, 1));
        heap.insert(now + Duration::from_millis(20), recorder(&log, 2));
        // same deadline as #1: fires after it
        heap.insert(now + Duration::from_millis(10), recorder(&log, 4));

        for cb in heap.poll_expired(now + Duration::from_millis(50)) {
            cb();
        }
        assert_eq!(*log.borrow(), vec![1, 4, 2, 3]);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut heap = TimerHeap::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let handle = heap.insert(Instant::now(), recorder(&log, 1));

        assert_eq!(heap.len(), 1);
        assert!(heap.cancel(handle));
        assert!(!heap.cancel(handle));
        assert_eq!(heap.len(), 0);
        assert!(heap.poll_expired(Instant::now() + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_cancel_after_fire_reports_false() {
        let mut heap = TimerHeap::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let handle = heap.insert(Instant::now(), recorder(&log, 1));
        assert_eq!(heap.poll_expired(Instant::now() + Duration::from_millis(1)).len(), 1);
        assert!(!heap.cancel(handle));
    }

    #[test]
    fn test_next_deadline_skips_cancelled() {
        let mut heap = TimerHeap::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let now = Instant::now();

        assert!(heap.next_deadline().is_none());
        let early = heap.insert(now + Duration::from_millis(5), recorder(&log, 1));
        heap.insert(now + Duration::from_millis(100), recorder(&log, 2));
        heap.cancel(early);
        assert_eq!(heap.next_deadline(), Some(now + Duration::from_millis(100)));
    }

    #[test]
    fn test_stats() {
        let mut heap = TimerHeap::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        heap.insert(Instant::now(), recorder(&log, 1));
        let h2 = heap.insert(Instant::now() + Duration::from_secs(10), recorder(&log, 2));

        heap.poll_expired(Instant::now() + Duration::from_millis(1));
        heap.cancel(h2);

        let stats = heap.stats();
        assert_eq!(stats.total_inserted, 2);
        assert_eq!(stats.total_fired, 1);
        assert_eq!(stats.total_cancelled, 1);
        assert_eq!(stats.active, 0);
    }
}
