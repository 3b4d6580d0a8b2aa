//! Tick clock and timer sleeps
//!
//! The global tick counter advances on every timer interrupt. Processes
//! sleeping for a duration are parked on a deadline list that the tick
//! handler drains; wakeups by deadline and wakeups by signal both go
//! through the normal READY/enqueue transition.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::process::{table, Pid, ProcessState};

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Sleepers as (pid, wake-at-tick) pairs. Short list, linear scans.
static SLEEPERS: Mutex<Vec<(Pid, u64)>> = Mutex::new(Vec::new());

/// Ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Timer interrupt taken from user mode: rearm the deadline, advance
/// the clock, charge the current process, wake due sleepers, and give
/// the scheduler its tick (which may switch away and resume us later).
pub fn timer_tick() {
    #[cfg(target_arch = "riscv64")]
    crate::arch::riscv64::timer::rearm();
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    if let Some(proc) = crate::process::current() {
        proc.add_cpu_tick();
    }
    wake_due(now);
    super::on_tick();
}

/// Timer interrupt taken in kernel context (the idle loop, or a kernel
/// path that left interrupts enabled). Kernel code is never preempted
/// mid-flight, so this only advances the clock; the idle loop calls
/// `schedule` itself right after `wfi` returns.
pub fn timer_tick_in_kernel() {
    #[cfg(target_arch = "riscv64")]
    crate::arch::riscv64::timer::rearm();
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    wake_due(now);
}

fn wake_due(now: u64) {
    let _irq = crate::arch::irq_save();
    let mut sleepers = SLEEPERS.lock();
    let mut idx = 0;
    while idx < sleepers.len() {
        if sleepers[idx].1 <= now {
            let (pid, _) = sleepers.swap_remove(idx);
            if let Some(proc) = table::get(pid) {
                if proc.state() == ProcessState::Sleeping {
                    proc.invalidate_wait();
                    proc.set_state(ProcessState::Ready);
                    super::enqueue(pid);
                }
            }
        } else {
            idx += 1;
        }
    }
}

/// Block the current process for `duration` ticks. Returns early with
/// `Interrupted` if a deliverable signal arrives first.
pub fn sleep_ticks(duration: u64) -> crate::error::KernelResult<()> {
    let deadline = ticks() + duration;
    let pid = super::current_pid();
    loop {
        if ticks() >= deadline {
            return Ok(());
        }
        {
            let _irq = crate::arch::irq_save();
            let Some(proc) = table::get(pid) else {
                return Ok(());
            };
            if crate::signal::has_deliverable(&proc) {
                SLEEPERS.lock().retain(|(p, _)| *p != pid);
                return Err(crate::error::KernelError::Interrupted);
            }
            proc.begin_wait();
            SLEEPERS.lock().push((pid, deadline));
            proc.set_state(ProcessState::Sleeping);
            super::schedule();
        }
    }
}
