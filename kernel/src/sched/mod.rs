//! Scheduling
//!
//! Single-hart, preemptive round-robin with a fixed time slice. Kernel
//! paths are cooperative: preemption happens on the user-trap timer
//! tick and in the idle loop, never in the middle of a kernel path.

pub mod clock;
pub mod queue;
pub mod scheduler;
pub mod wait;

pub use scheduler::{current_pid, enqueue, on_tick, schedule, yield_now};
pub use wait::WaitQueue;
