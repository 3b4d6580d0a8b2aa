//! Signals
//!
//! Per-process state is a pending mask, a blocked mask, and 32 handler
//! slots. Delivery happens exclusively at the user-return boundary and
//! the decision itself ([`SignalState::deliver`]) is a pure function of
//! the signal state and trap frame, so it is deterministic and testable
//! in isolation. Process-level consequences (exit, stop, wakeup) are
//! applied by the callers in this module.
//!
//! SIGKILL and SIGSTOP can never be blocked, caught, or ignored; the
//! blocked-mask setter masks them out and the handler setter rejects
//! them.

use alloc::sync::Arc;

use crate::error::{KernelError, KernelResult};
use crate::process::{self, Pid, Process, ProcessState};
use crate::trap::TrapFrame;

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGTRAP: u32 = 5;
pub const SIGABRT: u32 = 6;
pub const SIGBUS: u32 = 7;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGUSR1: u32 = 10;
pub const SIGSEGV: u32 = 11;
pub const SIGUSR2: u32 = 12;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19;
pub const SIGTSTP: u32 = 20;

/// Number of signal slots (signals 1..=31 are usable).
pub const NSIG: u32 = crate::config::NSIG as u32;

const UNBLOCKABLE: u64 = bit(SIGKILL) | bit(SIGSTOP);

const fn bit(signo: u32) -> u64 {
    1 << signo
}

/// Disposition of one signal slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Default action for the signal's class.
    Default,
    /// Discard on delivery.
    Ignore,
    /// User-space handler entry point.
    User(usize),
}

/// Default action classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Terminate,
    Stop,
    Continue,
    Ignore,
}

/// Default action of `signo`.
pub fn default_action(signo: u32) -> DefaultAction {
    match signo {
        SIGCHLD => DefaultAction::Ignore,
        SIGCONT => DefaultAction::Continue,
        SIGSTOP | SIGTSTP => DefaultAction::Stop,
        _ => DefaultAction::Terminate,
    }
}

/// What `deliver` decided; the caller applies process-level effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Nothing deliverable.
    None,
    /// Trap frame was redirected into a user handler.
    Handler(u32),
    /// Default action: terminate with `128 + signo`.
    Terminate(u32),
    /// Default action: stop until SIGCONT.
    Stop(u32),
    /// SIGCONT consumed (wake handled at send time).
    Continue(u32),
    /// Signal consumed with no effect (ignored).
    Ignored(u32),
}

/// Per-process signal state.
#[derive(Debug, Clone)]
pub struct SignalState {
    pending: u64,
    blocked: u64,
    handlers: [Handler; NSIG as usize],
}

impl SignalState {
    pub const fn new() -> Self {
        Self {
            pending: 0,
            blocked: 0,
            handlers: [Handler::Default; NSIG as usize],
        }
    }

    pub fn pending(&self) -> u64 {
        self.pending
    }

    pub fn blocked(&self) -> u64 {
        self.blocked
    }

    /// Mark `signo` pending.
    pub fn post(&mut self, signo: u32) -> KernelResult<()> {
        if signo == 0 || signo >= NSIG {
            return Err(KernelError::InvalidArgument);
        }
        self.pending |= bit(signo);
        Ok(())
    }

    /// Replace the blocked mask. SIGKILL and SIGSTOP are silently
    /// stripped; they cannot be blocked.
    pub fn set_blocked(&mut self, mask: u64) {
        self.blocked = mask & !UNBLOCKABLE;
    }

    /// Install a handler. SIGKILL and SIGSTOP cannot be caught or
    /// ignored.
    pub fn set_handler(&mut self, signo: u32, handler: Handler) -> KernelResult<Handler> {
        if signo == 0 || signo >= NSIG {
            return Err(KernelError::InvalidArgument);
        }
        if signo == SIGKILL || signo == SIGSTOP {
            return Err(KernelError::InvalidArgument);
        }
        let old = self.handlers[signo as usize];
        self.handlers[signo as usize] = handler;
        Ok(old)
    }

    pub fn handler(&self, signo: u32) -> Handler {
        self.handlers[signo as usize]
    }

    /// Bits that are pending and not blocked.
    pub fn deliverable(&self) -> u64 {
        self.pending & !self.blocked
    }

    /// Fork semantics: the child inherits handlers and the blocked
    /// mask, but starts with nothing pending.
    pub fn fork_clone(&self) -> Self {
        let mut child = self.clone();
        child.pending = 0;
        child
    }

    /// Exec semantics: pending set and blocked mask survive; caught
    /// handlers reset to default (the handler addresses died with the
    /// old image), ignore dispositions survive.
    pub fn reset_for_exec(&mut self) {
        for handler in self.handlers.iter_mut() {
            if matches!(handler, Handler::User(_)) {
                *handler = Handler::Default;
            }
        }
    }

    /// Deliver at most one signal: pick the lowest deliverable bit,
    /// clear it from pending, and decide the action. For a user handler
    /// the trap frame is redirected in place: `ra` takes the interrupted
    /// `sepc` so returning from the handler resumes the interrupted
    /// instruction, `sepc` takes the handler address, and `a0` the
    /// signal number.
    ///
    /// Pure with respect to kernel state: only `self` and `frame` change.
    pub fn deliver(&mut self, frame: &mut TrapFrame) -> Delivery {
        let deliverable = self.deliverable();
        if deliverable == 0 {
            return Delivery::None;
        }
        let signo = deliverable.trailing_zeros();
        self.pending &= !bit(signo);

        match self.handlers[signo as usize] {
            Handler::Ignore => Delivery::Ignored(signo),
            Handler::User(entry) => {
                frame.ra = frame.sepc;
                frame.sepc = entry;
                frame.a0 = signo as usize;
                Delivery::Handler(signo)
            }
            Handler::Default => match default_action(signo) {
                DefaultAction::Terminate => Delivery::Terminate(signo),
                DefaultAction::Stop => Delivery::Stop(signo),
                DefaultAction::Continue => Delivery::Continue(signo),
                DefaultAction::Ignore => Delivery::Ignored(signo),
            },
        }
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `proc` has a deliverable signal pending. Blocking kernel
/// paths poll this to turn signal wakeups into `Interrupted` returns.
pub fn has_deliverable(proc: &Process) -> bool {
    proc.signals.lock().deliverable() != 0
}

/// Post `signo` to `target` and apply the wakeup rules: a SLEEPING
/// process is woken by any signal except SIGCONT (interruptible
/// blocking I/O); a STOPPED process is woken only by SIGCONT, or by
/// SIGKILL, which must be able to kill a stopped process.
pub fn send_to(target: &Arc<Process>, signo: u32) -> KernelResult<()> {
    target.signals.lock().post(signo)?;

    match target.state() {
        ProcessState::Sleeping if signo != SIGCONT => {
            let _irq = crate::arch::irq_save();
            if target.state() == ProcessState::Sleeping {
                target.invalidate_wait();
                target.set_state(ProcessState::Ready);
                crate::sched::enqueue(target.pid);
            }
        }
        ProcessState::Stopped if signo == SIGCONT || signo == SIGKILL => {
            let _irq = crate::arch::irq_save();
            if target.state() == ProcessState::Stopped {
                target.set_state(ProcessState::Ready);
                crate::sched::enqueue(target.pid);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Post `signo` to the process with `pid`. `signo == 0` is an existence
/// probe.
pub fn send(pid: Pid, signo: u32) -> KernelResult<()> {
    let target = crate::process::table::get(pid).ok_or(KernelError::NoProcess)?;
    if target.state() == ProcessState::Zombie {
        return Err(KernelError::NoProcess);
    }
    if signo == 0 {
        return Ok(());
    }
    send_to(&target, signo)
}

/// The user-return boundary: exactly one `deliver` evaluation per trap
/// exit. At most the lowest deliverable bit is cleared, even when its
/// disposition turns out to be ignore; anything else still pending
/// waits for the next trap exit.
pub fn deliver_pending(frame: &mut TrapFrame) {
    let Some(proc) = process::current() else {
        return;
    };
    let decision = proc.signals.lock().deliver(frame);
    match decision {
        Delivery::None
        | Delivery::Handler(_)
        | Delivery::Ignored(_)
        | Delivery::Continue(_) => {}
        Delivery::Terminate(signo) => {
            log::info!(
                target: "signal",
                "pid {} terminated by signal {}",
                proc.pid, signo
            );
            process::exit::exit_current(128 + signo as i32);
        }
        Delivery::Stop(signo) => {
            // Parks until SIGCONT. The resumption returns to user mode
            // with whatever became pending (SIGCONT included) left for
            // the next trap exit's single delivery.
            stop_current(&proc, signo);
        }
    }
}

/// Park the current process in STOPPED state and notify the parent.
fn stop_current(proc: &Arc<Process>, signo: u32) {
    log::debug!(target: "signal", "pid {} stopped by signal {}", proc.pid, signo);
    {
        let _irq = crate::arch::irq_save();
        proc.stop_signal
            .store(signo, core::sync::atomic::Ordering::Release);
        proc.set_state(ProcessState::Stopped);
    }
    let parent = proc.parent();
    if let Some(parent_proc) = crate::process::table::get(parent) {
        let _ = send_to(&parent_proc, SIGCHLD);
        parent_proc.child_wait.wake_all();
    }
    crate::sched::schedule();
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn frame_at(pc: usize) -> TrapFrame {
        let mut f = TrapFrame::zero();
        f.sepc = pc;
        f
    }

    #[test]
    fn nothing_deliverable() {
        let mut st = SignalState::new();
        let mut f = frame_at(0x1000);
        assert_eq!(st.deliver(&mut f), Delivery::None);
        assert_eq!(f.sepc, 0x1000);
    }

    #[test]
    fn user_handler_redirects_frame_once() {
        let mut st = SignalState::new();
        st.set_handler(SIGUSR1, Handler::User(0x5000)).unwrap();
        st.post(SIGUSR1).unwrap();

        let mut f = frame_at(0x1000);
        assert_eq!(st.deliver(&mut f), Delivery::Handler(SIGUSR1));
        assert_eq!(f.sepc, 0x5000);
        assert_eq!(f.ra, 0x1000);
        assert_eq!(f.a0, SIGUSR1 as usize);
        // The pending bit is cleared; the handler fires exactly once.
        assert_eq!(st.pending() & (1 << SIGUSR1), 0);
        assert_eq!(st.deliver(&mut f), Delivery::None);
    }

    #[test]
    fn lowest_signal_wins() {
        let mut st = SignalState::new();
        st.post(SIGTERM).unwrap();
        st.post(SIGINT).unwrap();
        let mut f = frame_at(0);
        assert_eq!(st.deliver(&mut f), Delivery::Terminate(SIGINT));
    }

    #[test]
    fn blocked_signals_stay_pending() {
        let mut st = SignalState::new();
        st.set_blocked(1 << SIGTERM);
        st.post(SIGTERM).unwrap();
        let mut f = frame_at(0);
        assert_eq!(st.deliver(&mut f), Delivery::None);
        assert_ne!(st.pending() & (1 << SIGTERM), 0);
        // Unblocking makes it deliverable again.
        st.set_blocked(0);
        assert_eq!(st.deliver(&mut f), Delivery::Terminate(SIGTERM));
    }

    #[test]
    fn sigkill_cannot_be_blocked_or_caught() {
        let mut st = SignalState::new();
        assert_eq!(
            st.set_handler(SIGKILL, Handler::User(0x5000)),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            st.set_handler(SIGSTOP, Handler::Ignore),
            Err(KernelError::InvalidArgument)
        );
        st.set_blocked(u64::MAX);
        st.post(SIGKILL).unwrap();
        let mut f = frame_at(0);
        assert_eq!(st.deliver(&mut f), Delivery::Terminate(SIGKILL));
    }

    #[test]
    fn default_actions_by_class() {
        let mut st = SignalState::new();
        let mut f = frame_at(0);
        st.post(SIGCHLD).unwrap();
        assert_eq!(st.deliver(&mut f), Delivery::Ignored(SIGCHLD));
        st.post(SIGTSTP).unwrap();
        assert_eq!(st.deliver(&mut f), Delivery::Stop(SIGTSTP));
        st.post(SIGCONT).unwrap();
        assert_eq!(st.deliver(&mut f), Delivery::Continue(SIGCONT));
        st.post(SIGTERM).unwrap();
        assert_eq!(st.deliver(&mut f), Delivery::Terminate(SIGTERM));
    }

    #[test]
    fn ignore_disposition_consumes_signal() {
        let mut st = SignalState::new();
        st.set_handler(SIGTERM, Handler::Ignore).unwrap();
        st.post(SIGTERM).unwrap();
        let mut f = frame_at(0x2000);
        assert_eq!(st.deliver(&mut f), Delivery::Ignored(SIGTERM));
        assert_eq!(f.sepc, 0x2000);
        assert_eq!(st.deliver(&mut f), Delivery::None);
    }

    #[test]
    fn one_bit_consumed_per_delivery_even_when_ignored() {
        let mut st = SignalState::new();
        st.set_handler(SIGHUP, Handler::Ignore).unwrap();
        st.post(SIGHUP).unwrap();
        st.post(SIGTERM).unwrap();
        let mut f = frame_at(0);
        // First trap exit: only the ignored SIGHUP is consumed; the
        // termination stays pending for the next exit.
        assert_eq!(st.deliver(&mut f), Delivery::Ignored(SIGHUP));
        assert_ne!(st.pending() & (1 << SIGTERM), 0);
        assert_eq!(st.deliver(&mut f), Delivery::Terminate(SIGTERM));
    }

    #[test]
    fn exec_resets_caught_but_not_ignored() {
        let mut st = SignalState::new();
        st.set_handler(SIGTERM, Handler::User(0x7000)).unwrap();
        st.set_handler(SIGINT, Handler::Ignore).unwrap();
        st.reset_for_exec();
        assert_eq!(st.handler(SIGTERM), Handler::Default);
        assert_eq!(st.handler(SIGINT), Handler::Ignore);
    }

    #[test]
    fn invalid_signal_numbers_rejected() {
        let mut st = SignalState::new();
        assert!(st.post(0).is_err());
        assert!(st.post(NSIG).is_err());
        assert!(st.set_handler(0, Handler::Ignore).is_err());
    }
}
