//! Counting semaphore
//!
//! Signed count plus a wait queue: P sleeps while the count is not
//! positive, V increments and wakes one waiter.

use spin::Mutex as SpinMutex;

use crate::error::{KernelError, KernelResult};
use crate::sched::WaitQueue;

pub struct Semaphore {
    count: SpinMutex<isize>,
    waiters: WaitQueue,
}

impl Semaphore {
    pub const fn new(initial: isize) -> Self {
        Self {
            count: SpinMutex::new(initial),
            waiters: WaitQueue::new(),
        }
    }

    /// Non-blocking P; `Busy` when the count is not positive.
    pub fn try_wait(&self) -> KernelResult<()> {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            Ok(())
        } else {
            Err(KernelError::Busy)
        }
    }

    /// P: sleep while the count is not positive, then decrement.
    pub fn wait(&self) {
        loop {
            let _irq = crate::arch::irq_save();
            if self.try_wait().is_ok() {
                return;
            }
            self.waiters.sleep();
        }
    }

    /// V: increment and wake one waiter.
    pub fn post(&self) {
        {
            let mut count = self.count.lock();
            *count += 1;
        }
        self.waiters.wake_one();
    }

    pub fn value(&self) -> isize {
        *self.count.lock()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn counts_down_and_up() {
        let sem = Semaphore::new(2);
        sem.try_wait().unwrap();
        sem.try_wait().unwrap();
        assert_eq!(sem.try_wait(), Err(KernelError::Busy));
        sem.post();
        assert_eq!(sem.value(), 1);
        sem.try_wait().unwrap();
    }

    #[test]
    fn zero_initialized_blocks_until_post() {
        let sem = Semaphore::new(0);
        assert_eq!(sem.try_wait(), Err(KernelError::Busy));
        sem.post();
        assert!(sem.try_wait().is_ok());
    }
}
