//! Round-robin scheduler and dispatch
//!
//! One ready queue, one current PID, one time-slice counter. The
//! low-level switch saves callee-saved registers only; immediately
//! after it returns, on the *new* kernel stack, the new current
//! process's page-table root is written to `satp`. Writing it earlier
//! would unmap the stack being switched away from mid-switch.

use spin::Mutex;

use super::queue::ReadyQueue;
use crate::arch;
use crate::config::TIME_SLICE_TICKS;
use crate::process::{table, Pid, ProcessState, IDLE_PID};

struct Scheduler {
    ready: ReadyQueue,
    current: Pid,
    time_slice: u32,
}

static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler {
    ready: ReadyQueue::new(),
    current: IDLE_PID,
    time_slice: TIME_SLICE_TICKS,
});

/// PID of the process on the CPU (the idle task between dispatches).
pub fn current_pid() -> Pid {
    let _irq = arch::irq_save();
    SCHEDULER.lock().current
}

/// Append a READY process to the ready queue.
pub fn enqueue(pid: Pid) {
    let _irq = arch::irq_save();
    debug_assert!(
        table::get(pid).map(|p| p.state() == ProcessState::Ready).unwrap_or(false),
        "enqueue of non-READY pid"
    );
    SCHEDULER.lock().ready.enqueue(pid);
}

/// Remove a process from the ready queue (signal-driven state changes).
pub fn dequeue(pid: Pid) -> bool {
    let _irq = arch::irq_save();
    SCHEDULER.lock().ready.remove(pid)
}

/// Ready-queue length (diagnostics and tests).
pub fn ready_len() -> usize {
    let _irq = arch::irq_save();
    SCHEDULER.lock().ready.len()
}

/// Timer tick while a user process was running: burn one slice unit and
/// reschedule when it reaches zero (or the current process stopped
/// being runnable under us).
pub fn on_tick() {
    let need_resched = {
        let _irq = arch::irq_save();
        let mut sched = SCHEDULER.lock();
        if sched.time_slice > 0 {
            sched.time_slice -= 1;
        }
        let current_runnable = table::get(sched.current)
            .map(|p| p.state() == ProcessState::Running)
            .unwrap_or(false);
        sched.time_slice == 0 || !current_runnable
    };
    if need_resched {
        schedule();
    }
}

/// Voluntarily give up the CPU: zero the slice and reschedule.
pub fn yield_now() {
    {
        let _irq = arch::irq_save();
        SCHEDULER.lock().time_slice = 0;
    }
    schedule();
}

/// Pick and dispatch the next process.
///
/// Runs with interrupts disabled throughout. The scheduler lock is
/// released before the low-level switch (the suspended side would
/// otherwise hold it across its whole sleep); single-hart plus
/// interrupts-off makes that release safe.
pub fn schedule() {
    let irq = arch::irq_save();

    let switch_pair = {
        let mut sched = SCHEDULER.lock();
        let cur_pid = sched.current;
        let cur = table::get(cur_pid).expect("scheduler: current pid vanished");
        let cur_runnable = cur.state() == ProcessState::Running;

        let next_pid = match sched.ready.pop_front() {
            Some(pid) => pid,
            None if cur_runnable => {
                // Nothing else to run; the current process continues.
                sched.time_slice = TIME_SLICE_TICKS;
                return;
            }
            // Current is blocked/zombie/stopped: fall back to idle.
            None => IDLE_PID,
        };

        if next_pid == cur_pid {
            sched.time_slice = TIME_SLICE_TICKS;
            return;
        }

        if cur_runnable {
            cur.set_state(ProcessState::Ready);
            if cur_pid != IDLE_PID {
                sched.ready.enqueue(cur_pid);
            }
        } else if cur_pid == IDLE_PID {
            cur.set_state(ProcessState::Ready);
        }

        let next = table::get(next_pid).expect("scheduler: ready pid vanished");
        next.set_state(ProcessState::Running);
        sched.current = next_pid;
        sched.time_slice = TIME_SLICE_TICKS;
        (cur.context_ptr(), next.context_ptr())
    };

    let (old_ctx, new_ctx) = switch_pair;
    // SAFETY: both contexts live in table-owned PCBs that survive their
    // suspension (a zombie stays in the table until reaped, and reaping
    // only happens after the switch away from it has completed).
    // Interrupts are disabled across the switch.
    unsafe {
        arch::switch(old_ctx, new_ctx);
    }

    // Back on this process's stack, possibly much later. satp must be
    // re-pointed here, on the resumed stack, not before the switch.
    apply_current_satp();
    drop(irq);
}

/// Write the current process's page-table root to satp (the kernel
/// template root for the idle task) and flush the TLB.
pub fn apply_current_satp() {
    let pid = {
        let _irq = arch::irq_save();
        SCHEDULER.lock().current
    };
    let root = table::get(pid)
        .and_then(|p| p.space.lock().as_ref().map(|s| s.root_ppn()))
        .or_else(crate::mm::kernel_root_ppn);
    if let Some(ppn) = root {
        arch::switch_satp(ppn);
    }
}

/// The idle loop. Entered by `kmain` once boot completes; the boot
/// stack becomes the idle stack. Interrupts are opened around `wfi` so
/// timer and device interrupts land, then the ready queue is drained.
pub fn idle_loop() -> ! {
    loop {
        schedule();
        // SAFETY: enabling interrupts in the idle loop only; every other
        // kernel path manages SIE through IrqGuard.
        #[cfg(target_arch = "riscv64")]
        unsafe {
            riscv::register::sstatus::set_sie();
        }
        arch::wait_for_interrupt();
        #[cfg(target_arch = "riscv64")]
        unsafe {
            riscv::register::sstatus::clear_sie();
        }
        #[cfg(not(target_arch = "riscv64"))]
        unreachable!("idle loop on host target");
    }
}
