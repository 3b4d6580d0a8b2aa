//! waitpid: reaping and state-change reporting
//!
//! The parent scans its children for a zombie (or, with WUNTRACED, a
//! stopped one); reaping captures the exit status, frees the address
//! space and the table slot, and returns the PID. If a matching child
//! exists but has not changed state yet, the parent parks on its own
//! child-exit wait queue; every child's exit path wakes it.

use core::sync::atomic::Ordering;

use alloc::sync::Arc;

use super::{table, Pid, Process, ProcessState};
use crate::error::{KernelError, KernelResult};
use crate::mm::PmmFrames;

/// Options controlling `waitpid`, modeled after the POSIX flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitOptions {
    flags: u32,
}

impl WaitOptions {
    /// Do not block if no child has changed state.
    pub const WNOHANG: u32 = 1;
    /// Also report stopped children.
    pub const WUNTRACED: u32 = 2;

    pub fn from_flags(flags: u32) -> Self {
        Self { flags }
    }

    pub fn is_nohang(&self) -> bool {
        self.flags & Self::WNOHANG != 0
    }

    pub fn is_untraced(&self) -> bool {
        self.flags & Self::WUNTRACED != 0
    }
}

/// How a child changed state, with the POSIX `wstatus` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Exited with the given code.
    Exited(i32),
    /// Stopped by a signal (reported only with WUNTRACED).
    Stopped(u32),
}

impl WaitStatus {
    /// Raw `wstatus` layout: exit code in bits 8..16; a stopped child
    /// reads 0x7F in the low byte with the signal above it.
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Exited(code) => (code & 0xFF) << 8,
            Self::Stopped(sig) => 0x7F | ((sig as i32) << 8),
        }
    }
}

/// Outcome of one non-blocking scan over the children.
enum Scan {
    Reaped(Pid, i32),
    StoppedChild(Pid, i32),
    ChildrenExist,
    NoMatch,
}

fn scan_children(parent: &Arc<Process>, target: Option<Pid>, options: WaitOptions) -> Scan {
    let children = table::children_of(parent.pid);
    let mut any_match = false;
    for child in &children {
        if let Some(want) = target {
            if child.pid != want {
                continue;
            }
        }
        any_match = true;
        match child.state() {
            ProcessState::Zombie => {
                let code = child.exit_code.load(Ordering::Acquire);
                reap(parent, child);
                return Scan::Reaped(child.pid, WaitStatus::Exited(code).to_raw());
            }
            ProcessState::Stopped if options.is_untraced() => {
                let sig = child.stop_signal.load(Ordering::Acquire);
                return Scan::StoppedChild(child.pid, WaitStatus::Stopped(sig).to_raw());
            }
            _ => {}
        }
    }
    if any_match {
        Scan::ChildrenExist
    } else {
        Scan::NoMatch
    }
}

/// Free everything the zombie still owns and clear its table slot.
fn reap(parent: &Arc<Process>, child: &Arc<Process>) {
    if let Some(mut space) = child.space.lock().take() {
        space.teardown(&mut PmmFrames);
    }
    child.vmas.lock().clear();
    parent.children.lock().retain(|pid| *pid != child.pid);
    table::remove(child.pid);
    log::debug!(target: "process", "pid {} reaped by {}", child.pid, parent.pid);
}

/// Wait for a child to change state. `target` of `None` means any
/// child. Returns `(pid, wstatus)`; with WNOHANG and nothing ready,
/// `(Pid(0), 0)`.
pub fn waitpid(
    parent: &Arc<Process>,
    target: Option<Pid>,
    options: WaitOptions,
) -> KernelResult<(Pid, i32)> {
    loop {
        match scan_children(parent, target, options) {
            Scan::Reaped(pid, status) => return Ok((pid, status)),
            Scan::StoppedChild(pid, status) => return Ok((pid, status)),
            Scan::NoMatch => return Err(KernelError::NoChild),
            Scan::ChildrenExist => {}
        }
        if options.is_nohang() {
            return Ok((Pid(0), 0));
        }
        parent.child_wait.sleep();
        if crate::signal::has_deliverable(parent) {
            return Err(KernelError::Interrupted);
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::string::String;

    use super::*;

    #[test]
    fn wstatus_encoding() {
        assert_eq!(WaitStatus::Exited(7).to_raw(), 7 << 8);
        assert_eq!(WaitStatus::Exited(143).to_raw(), 143 << 8);
        let stopped = WaitStatus::Stopped(crate::signal::SIGSTOP).to_raw();
        assert_eq!(stopped & 0xFF, 0x7F);
        assert_eq!(stopped >> 8, crate::signal::SIGSTOP as i32);
    }

    #[test]
    fn reaps_zombie_child_without_blocking() {
        crate::mm::heap::init_for_host_tests();
        let parent = table::spawn_embryo(super::super::IDLE_PID, String::from("wp")).unwrap();
        let child = table::spawn_embryo(parent.pid, String::from("wc")).unwrap();
        child.exit_code.store(7, Ordering::Release);
        child.set_state(ProcessState::Zombie);

        let (pid, status) =
            waitpid(&parent, Some(child.pid), WaitOptions::default()).unwrap();
        assert_eq!(pid, child.pid);
        assert_eq!(status, 7 << 8);
        // The slot is gone and the parent's child list is clean.
        assert!(table::get(child.pid).is_none());
        assert!(parent.children.lock().is_empty());
        table::remove(parent.pid);
    }

    #[test]
    fn no_children_is_an_error() {
        crate::mm::heap::init_for_host_tests();
        let lonely = table::spawn_embryo(super::super::IDLE_PID, String::from("lone")).unwrap();
        assert!(matches!(
            waitpid(&lonely, None, WaitOptions::default()),
            Err(KernelError::NoChild)
        ));
        assert!(matches!(
            waitpid(&lonely, Some(Pid(9999)), WaitOptions::default()),
            Err(KernelError::NoChild)
        ));
        table::remove(lonely.pid);
    }

    #[test]
    fn nohang_returns_zero_when_child_is_live() {
        crate::mm::heap::init_for_host_tests();
        let parent = table::spawn_embryo(super::super::IDLE_PID, String::from("nh")).unwrap();
        let child = table::spawn_embryo(parent.pid, String::from("nhc")).unwrap();
        child.set_state(ProcessState::Ready);

        let (pid, status) = waitpid(
            &parent,
            None,
            WaitOptions::from_flags(WaitOptions::WNOHANG),
        )
        .unwrap();
        assert_eq!((pid, status), (Pid(0), 0));
        table::remove(child.pid);
        table::remove(parent.pid);
    }

    #[test]
    fn untraced_reports_stopped_child() {
        crate::mm::heap::init_for_host_tests();
        let parent = table::spawn_embryo(super::super::IDLE_PID, String::from("ut")).unwrap();
        let child = table::spawn_embryo(parent.pid, String::from("utc")).unwrap();
        child
            .stop_signal
            .store(crate::signal::SIGTSTP, Ordering::Release);
        child.set_state(ProcessState::Stopped);

        let (pid, status) = waitpid(
            &parent,
            None,
            WaitOptions::from_flags(WaitOptions::WUNTRACED),
        )
        .unwrap();
        assert_eq!(pid, child.pid);
        assert_eq!(status & 0xFF, 0x7F);
        assert_eq!(status >> 8, crate::signal::SIGTSTP as i32);
        // Not reaped: the child is still in the table.
        assert!(table::get(child.pid).is_some());
        table::remove(child.pid);
        table::remove(parent.pid);
    }
}
