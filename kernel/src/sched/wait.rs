//! Wait queues
//!
//! FIFO of parked processes. Entries carry the PCB's wait-generation
//! token from `Process::begin_wait`; a signal wakeup bumps the token,
//! which invalidates the queue entry in place, so a process woken out
//! of band can never be woken a second time through a stale entry.
//!
//! `sleep` is the only place a kernel path may suspend besides `yield`
//! and the scheduler itself. Callers re-check their condition in a loop
//! after waking.

use alloc::collections::VecDeque;

use spin::Mutex;

use crate::process::{table, Pid, ProcessState};

pub struct WaitQueue {
    waiters: Mutex<VecDeque<(Pid, u64)>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Park the current process on this queue and yield the CPU.
    ///
    /// Atomicity: interrupts are disabled from before the enqueue until
    /// the context switch, so a wakeup racing with the enqueue cannot
    /// be lost. The caller re-checks its condition after return (the
    /// wake may be spurious or a signal).
    pub fn sleep(&self) {
        let _irq = crate::arch::irq_save();
        let pid = super::current_pid();
        let Some(proc) = table::get(pid) else {
            return;
        };
        let token = proc.begin_wait();
        self.waiters.lock().push_back((pid, token));
        proc.set_state(ProcessState::Sleeping);
        super::schedule();
    }

    /// Wake the first still-valid waiter. Stale entries (token bumped by
    /// a signal wakeup, or the process gone) are discarded in passing.
    pub fn wake_one(&self) -> bool {
        let _irq = crate::arch::irq_save();
        let mut waiters = self.waiters.lock();
        while let Some((pid, token)) = waiters.pop_front() {
            if let Some(proc) = table::get(pid) {
                if proc.wait_token() == token && proc.state() == ProcessState::Sleeping {
                    proc.set_state(ProcessState::Ready);
                    super::enqueue(pid);
                    return true;
                }
            }
        }
        false
    }

    /// Drain the queue, waking every still-valid waiter.
    pub fn wake_all(&self) -> usize {
        let _irq = crate::arch::irq_save();
        let mut woken = 0;
        let mut waiters = self.waiters.lock();
        while let Some((pid, token)) = waiters.pop_front() {
            if let Some(proc) = table::get(pid) {
                if proc.wait_token() == token && proc.state() == ProcessState::Sleeping {
                    proc.set_state(ProcessState::Ready);
                    super::enqueue(pid);
                    woken += 1;
                }
            }
        }
        woken
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    /// Number of queued entries, stale ones included (diagnostics).
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
