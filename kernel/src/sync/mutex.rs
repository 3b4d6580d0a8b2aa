//! Blocking mutex
//!
//! A lock byte plus a wait queue. Contended lockers sleep and re-test
//! on wake (wakeups can race with a third party stealing the lock).

use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::{KernelError, KernelResult};
use crate::sched::WaitQueue;

pub struct Mutex {
    locked: AtomicBool,
    waiters: WaitQueue,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            waiters: WaitQueue::new(),
        }
    }

    /// Non-blocking attempt; `Busy` if held.
    pub fn try_lock(&self) -> KernelResult<()> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Ok(())
        } else {
            Err(KernelError::Busy)
        }
    }

    /// Acquire, sleeping while held.
    pub fn lock(&self) {
        loop {
            let _irq = crate::arch::irq_save();
            if self.try_lock().is_ok() {
                return;
            }
            self.waiters.sleep();
        }
    }

    /// Release and wake one waiter.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
        self.waiters.wake_one();
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn trylock_reports_busy() {
        let m = Mutex::new();
        m.try_lock().unwrap();
        assert_eq!(m.try_lock(), Err(KernelError::Busy));
        m.unlock();
        assert!(m.try_lock().is_ok());
        m.unlock();
    }

    #[test]
    fn uncontended_lock_does_not_sleep() {
        let m = Mutex::new();
        m.lock();
        assert!(m.is_locked());
        m.unlock();
        assert!(!m.is_locked());
    }
}
