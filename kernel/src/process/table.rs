//! Process table
//!
//! Owns every PCB behind `Arc` so syscall paths can hold a process
//! across blocking without pinning the table lock. Lock discipline:
//! never call into the scheduler (enqueue, wakeups, `schedule`) while
//! holding the table lock; the exit path depends on it.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::{Pid, Process, ProcessState, IDLE_PID};
use crate::config::MAX_PROCS;
use crate::error::{KernelError, KernelResult};

pub struct ProcessTable {
    slots: Vec<Option<Arc<Process>>>,
    next_pid: u64,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_pid: 1,
        }
    }

    fn ensure_slots(&mut self) {
        if self.slots.is_empty() {
            self.slots.resize_with(MAX_PROCS, || None);
        }
    }

    fn insert(&mut self, proc: Arc<Process>) -> KernelResult<()> {
        self.ensure_slots();
        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(proc);
                return Ok(());
            }
        }
        Err(KernelError::OutOfMemory)
    }

    fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.slots
            .iter()
            .flatten()
            .find(|p| p.pid == pid)
            .cloned()
    }

    fn remove(&mut self, pid: Pid) -> Option<Arc<Process>> {
        for slot in self.slots.iter_mut() {
            if slot.as_ref().map(|p| p.pid == pid).unwrap_or(false) {
                return slot.take();
            }
        }
        None
    }
}

static PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

/// Allocate the next PID (monotonic, never reused).
pub fn alloc_pid() -> Pid {
    let _irq = crate::arch::irq_save();
    let mut table = PROCESS_TABLE.lock();
    let pid = Pid(table.next_pid);
    table.next_pid += 1;
    pid
}

/// Install a fully built PCB into a free slot.
pub fn insert(proc: Arc<Process>) -> KernelResult<()> {
    let _irq = crate::arch::irq_save();
    PROCESS_TABLE.lock().insert(proc)
}

/// Look up a live process.
pub fn get(pid: Pid) -> Option<Arc<Process>> {
    let _irq = crate::arch::irq_save();
    PROCESS_TABLE.lock().get(pid)
}

/// Remove a PCB from the table (reap). The PCB itself is freed when the
/// last `Arc` drops.
pub fn remove(pid: Pid) -> Option<Arc<Process>> {
    let _irq = crate::arch::irq_save();
    let proc = PROCESS_TABLE.lock().remove(pid);
    if let Some(ref p) = proc {
        p.set_state(ProcessState::Unused);
    }
    proc
}

/// All live children of `parent`.
pub fn children_of(parent: Pid) -> Vec<Arc<Process>> {
    let _irq = crate::arch::irq_save();
    let table = PROCESS_TABLE.lock();
    table
        .slots
        .iter()
        .flatten()
        .filter(|p| p.parent() == parent)
        .cloned()
        .collect()
}

/// Number of live processes (the idle task included once installed).
pub fn count() -> usize {
    let _irq = crate::arch::irq_save();
    PROCESS_TABLE.lock().slots.iter().flatten().count()
}

/// Install the idle task's PCB. Called once during boot.
pub fn init_idle() -> KernelResult<Arc<Process>> {
    let idle = Arc::new(Process::new_idle());
    insert(idle.clone())?;
    Ok(idle)
}

/// Build and install a user PCB in EMBRYO state.
pub fn spawn_embryo(parent: Pid, name: String) -> KernelResult<Arc<Process>> {
    let pid = alloc_pid();
    let proc = Arc::new(Process::new_user(pid, parent, name)?);
    insert(proc.clone())?;
    if parent != IDLE_PID {
        if let Some(parent_proc) = get(parent) {
            parent_proc.children.lock().push(pid);
        }
    }
    Ok(proc)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    // The table is a process-wide global shared by every host test, so
    // assertions here stick to relations on the PIDs this test creates.
    #[test]
    fn spawn_lookup_remove() {
        crate::mm::heap::init_for_host_tests();
        let a = spawn_embryo(IDLE_PID, String::from("a")).unwrap();
        let b = spawn_embryo(a.pid, String::from("b")).unwrap();
        assert!(b.pid > a.pid, "PIDs are monotonic");

        assert_eq!(get(a.pid).unwrap().pid, a.pid);
        let kids = children_of(a.pid);
        assert!(kids.iter().any(|p| p.pid == b.pid));

        let removed = remove(b.pid).unwrap();
        assert_eq!(removed.state(), ProcessState::Unused);
        assert!(get(b.pid).is_none());
        remove(a.pid);
    }
}
