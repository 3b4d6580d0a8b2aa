//! Ready queue
//!
//! A bounded circular buffer of PIDs. Capacity equals the process-table
//! size, so with the no-duplicate invariant held the queue can never
//! legitimately overflow; hitting either condition is a kernel bug and
//! panics.

use crate::config::READY_QUEUE_CAP;
use crate::process::Pid;

pub struct ReadyQueue {
    slots: [Pid; READY_QUEUE_CAP],
    head: usize,
    len: usize,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            slots: [Pid(0); READY_QUEUE_CAP],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, pid: Pid) -> bool {
        (0..self.len).any(|i| self.slots[(self.head + i) % READY_QUEUE_CAP] == pid)
    }

    /// Append a PID. Double enqueue and overflow are invariant
    /// violations and fatal.
    pub fn enqueue(&mut self, pid: Pid) {
        if self.contains(pid) {
            panic!("ready queue: duplicate enqueue of pid {}", pid);
        }
        if self.len == READY_QUEUE_CAP {
            panic!("ready queue overflow");
        }
        self.slots[(self.head + self.len) % READY_QUEUE_CAP] = pid;
        self.len += 1;
    }

    /// Pop the head (round-robin order).
    pub fn pop_front(&mut self) -> Option<Pid> {
        if self.len == 0 {
            return None;
        }
        let pid = self.slots[self.head];
        self.head = (self.head + 1) % READY_QUEUE_CAP;
        self.len -= 1;
        Some(pid)
    }

    /// Remove a PID by linear scan (the queue is short). Returns whether
    /// it was present.
    pub fn remove(&mut self, pid: Pid) -> bool {
        for i in 0..self.len {
            let idx = (self.head + i) % READY_QUEUE_CAP;
            if self.slots[idx] == pid {
                // Shift the tail left over the hole.
                for j in i..self.len - 1 {
                    let dst = (self.head + j) % READY_QUEUE_CAP;
                    let src = (self.head + j + 1) % READY_QUEUE_CAP;
                    self.slots[dst] = self.slots[src];
                }
                self.len -= 1;
                return true;
            }
        }
        false
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = ReadyQueue::new();
        q.enqueue(Pid(1));
        q.enqueue(Pid(2));
        q.enqueue(Pid(3));
        assert_eq!(q.pop_front(), Some(Pid(1)));
        q.enqueue(Pid(4));
        assert_eq!(q.pop_front(), Some(Pid(2)));
        assert_eq!(q.pop_front(), Some(Pid(3)));
        assert_eq!(q.pop_front(), Some(Pid(4)));
        assert_eq!(q.pop_front(), None);
    }

    #[test]
    fn remove_keeps_order() {
        let mut q = ReadyQueue::new();
        for pid in 1..=5 {
            q.enqueue(Pid(pid));
        }
        assert!(q.remove(Pid(3)));
        assert!(!q.remove(Pid(3)));
        let drained: alloc::vec::Vec<_> = core::iter::from_fn(|| q.pop_front()).collect();
        assert_eq!(drained, [Pid(1), Pid(2), Pid(4), Pid(5)]);
    }

    #[test]
    fn wraparound() {
        let mut q = ReadyQueue::new();
        // Push/pop enough to wrap the ring a few times.
        for round in 0..3usize {
            for i in 0..READY_QUEUE_CAP {
                q.enqueue(Pid((round * 1000 + i) as u64));
            }
            for i in 0..READY_QUEUE_CAP {
                assert_eq!(q.pop_front(), Some(Pid((round * 1000 + i) as u64)));
            }
        }
        assert!(q.is_empty());
    }

    #[test]
    #[should_panic(expected = "duplicate enqueue")]
    fn duplicate_enqueue_is_fatal() {
        let mut q = ReadyQueue::new();
        q.enqueue(Pid(7));
        q.enqueue(Pid(7));
    }
}
