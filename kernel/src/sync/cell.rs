//! Late-initialized global state
//!
//! Safe replacement for `static mut` singletons: a mutex-guarded
//! `Option<T>` that is filled exactly once during boot and accessed
//! through closures afterwards.

use spin::Mutex;

/// A global singleton initialized once at boot.
pub struct GlobalState<T> {
    inner: Mutex<Option<T>>,
}

impl<T> GlobalState<T> {
    /// Create new uninitialized global state.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Initialize the global state. Fails (returning the value back) if
    /// already initialized.
    pub fn init(&self, value: T) -> Result<(), T> {
        let mut lock = self.inner.lock();
        if lock.is_some() {
            Err(value)
        } else {
            *lock = Some(value);
            Ok(())
        }
    }

    /// Run a closure over a shared reference to the value, if initialized.
    pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> Option<R> {
        let lock = self.inner.lock();
        lock.as_ref().map(f)
    }

    /// Run a closure over a mutable reference to the value, if initialized.
    pub fn with_mut<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> Option<R> {
        let mut lock = self.inner.lock();
        lock.as_mut().map(f)
    }

    /// Whether `init` has run.
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }
}

impl<T> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the spin::Mutex serializes all access to the inner Option<T>,
// so T only needs to be Send for cross-context sharing; each caller gets
// exclusive access through the lock guard.
unsafe impl<T: Send> Send for GlobalState<T> {}
// SAFETY: see above; the mutex prevents concurrent access to T.
unsafe impl<T: Send> Sync for GlobalState<T> {}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn init_once() {
        let state: GlobalState<u32> = GlobalState::new();
        assert!(!state.is_initialized());
        assert!(state.init(7).is_ok());
        assert_eq!(state.init(9), Err(9));
        assert_eq!(state.with(|v| *v), Some(7));
        state.with_mut(|v| *v += 1);
        assert_eq!(state.with(|v| *v), Some(8));
    }

    #[test]
    fn with_on_uninitialized_is_none() {
        let state: GlobalState<u32> = GlobalState::new();
        assert_eq!(state.with(|v| *v), None);
    }
}
