//! S-mode timer programming
//!
//! The tick counter itself is target-independent and lives in
//! `sched::clock`; this module owns the hardware side: enabling the
//! timer interrupt and programming each deadline through SBI.

use riscv::register::{sie, time};

use super::sbi;
use crate::config::TIMER_INTERVAL_CYCLES;

/// Enable the S-mode timer interrupt and arm the first deadline.
pub fn init() {
    // SAFETY: setting STIE only unmasks the S-timer interrupt source;
    // the trap vector is installed before this runs.
    unsafe {
        sie::set_stimer();
    }
    rearm();
    log::info!(
        target: "timer",
        "tick interval {} cycles",
        TIMER_INTERVAL_CYCLES
    );
}

/// Program the next timer deadline. Called from the timer interrupt
/// handler after each tick.
pub fn rearm() {
    let now = time::read() as u64;
    sbi::set_timer(now + TIMER_INTERVAL_CYCLES);
}
