//! Blocking synchronization primitives
//!
//! All of them park on wait queues; none spins while blocked. They are
//! kernel-side primitives: interrupt handlers must not take them (an
//! interrupt handler has no process context to sleep in).

pub mod cell;
pub mod condvar;
pub mod mutex;
pub mod rwlock;
pub mod semaphore;

pub use cell::GlobalState;
pub use condvar::CondVar;
pub use mutex::Mutex;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
