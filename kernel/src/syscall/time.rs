//! Scheduling and time helpers

use crate::error::KernelResult;

/// Give up the CPU voluntarily.
pub fn sys_yield() -> KernelResult<usize> {
    crate::sched::yield_now();
    Ok(0)
}

/// Sleep for `ticks` timer ticks.
pub fn sys_sleep(ticks: u64) -> KernelResult<usize> {
    crate::sched::clock::sleep_ticks(ticks)?;
    Ok(0)
}

/// Ticks since boot.
pub fn sys_gettime() -> KernelResult<usize> {
    Ok(crate::sched::clock::ticks() as usize)
}
