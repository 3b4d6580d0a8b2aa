//! Process management
//!
//! The process table owns every PCB; everything else refers to
//! processes by PID and resolves them through the table. Parent/child
//! links are PIDs, so reaping a process cannot leave dangling
//! references anywhere.

pub mod creation;
pub mod exec;
pub mod exit;
pub mod fd;
pub mod fork;
pub mod pcb;
pub mod table;
pub mod wait;

use alloc::sync::Arc;

pub use pcb::{KernelStack, Process};
pub use wait::{WaitOptions, WaitStatus};

/// Process identifier. Unique and monotonically assigned; PID 0 is the
/// idle task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The idle task's PID.
pub const IDLE_PID: Pid = Pid(0);

/// Process lifecycle states.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Slot reclaimed; the PCB is about to disappear from the table.
    Unused = 0,
    /// Allocated but not yet runnable.
    Embryo = 1,
    /// On the ready queue (or the idle task between dispatches).
    Ready = 2,
    /// On the CPU.
    Running = 3,
    /// Parked on a wait queue or the timer sleep list.
    Sleeping = 4,
    /// Halted by a stop-class signal until SIGCONT.
    Stopped = 5,
    /// Exited, awaiting reap by the parent.
    Zombie = 6,
}

impl ProcessState {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Embryo,
            2 => Self::Ready,
            3 => Self::Running,
            4 => Self::Sleeping,
            5 => Self::Stopped,
            6 => Self::Zombie,
            _ => Self::Unused,
        }
    }
}

/// The currently running process, if any user process is current.
pub fn current() -> Option<Arc<Process>> {
    let pid = crate::sched::current_pid();
    if pid == IDLE_PID {
        None
    } else {
        table::get(pid)
    }
}
