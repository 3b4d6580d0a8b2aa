//! Condition variable
//!
//! `wait` is the atomicity anchor: the mutex is released and the caller
//! enqueued on the condvar's queue inside one interrupts-off window, so
//! a notification between unlock and enqueue cannot be lost. The mutex
//! is re-acquired before `wait` returns.

use super::mutex::Mutex;
use crate::sched::WaitQueue;

pub struct CondVar {
    waiters: WaitQueue,
}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            waiters: WaitQueue::new(),
        }
    }

    /// Atomically release `mutex` and sleep; re-acquires `mutex` before
    /// returning. Callers re-check their predicate in a loop.
    pub fn wait(&self, mutex: &Mutex) {
        {
            let _irq = crate::arch::irq_save();
            mutex.unlock();
            self.waiters.sleep();
        }
        mutex.lock();
    }

    /// Wake one waiter.
    pub fn notify_one(&self) {
        self.waiters.wake_one();
    }

    /// Wake every waiter.
    pub fn notify_all(&self) {
        self.waiters.wake_all();
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
