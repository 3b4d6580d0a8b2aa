//! Process exit
//!
//! Exit makes the process a zombie and notifies the parent; it never
//! frees the PCB, which is the reaper's job (`wait.rs`). SIGCHLD is
//! sent only after every table access is done: sending it earlier, with
//! the table lock held, would deadlock against the wakeup path.

use core::sync::atomic::Ordering;

use super::{table, Pid, ProcessState};
use crate::signal;

/// Terminate the current process with `code`. Never returns: the final
/// `schedule()` switches away from a zombie that is on no queue.
pub fn exit_current(code: i32) -> ! {
    let pid = crate::sched::current_pid();
    let proc = table::get(pid).expect("exit with no current process");

    log::debug!(target: "process", "pid {} exiting with code {}", pid, code);
    proc.exit_code.store(code, Ordering::Release);

    // Close every descriptor: refcounts drop, pipe peers wake to see
    // EOF or broken pipe.
    proc.files.lock().close_all();

    // Orphans are re-parented to init so they can still be reaped.
    for orphan in table::children_of(pid) {
        orphan.set_parent(Pid(1));
        if orphan.state() == ProcessState::Zombie {
            if let Some(init) = table::get(Pid(1)) {
                let _ = signal::send_to(&init, signal::SIGCHLD);
                init.child_wait.wake_all();
            }
        }
    }

    let parent_pid = proc.parent();
    proc.set_state(ProcessState::Zombie);
    drop(proc);

    // No locks held from here: safe to run the wakeup path.
    if let Some(parent) = table::get(parent_pid) {
        let _ = signal::send_to(&parent, signal::SIGCHLD);
        parent.child_wait.wake_all();
    }

    crate::sched::schedule();
    unreachable!("zombie pid {} was scheduled again", pid);
}
