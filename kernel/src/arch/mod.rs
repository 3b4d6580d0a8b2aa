//! Architecture layer
//!
//! The kernel proper talks to the hardware exclusively through this
//! module: interrupt enable state, satp/TLB control, the SUM (supervisor
//! user-memory access) bit, and the low-level context switch. On the
//! riscv64 target these are real CSR operations; on any other target a
//! stub backend is provided so the kernel library compiles and its logic
//! can be unit-tested on the host.

#[cfg(target_arch = "riscv64")]
pub mod riscv64;

#[cfg(target_arch = "riscv64")]
pub use riscv64::{
    flush_tlb_all, flush_tlb_page, initial_user_sstatus, interrupts_enabled, irq_save, shutdown,
    switch_satp, wait_for_interrupt, IrqGuard, SumGuard,
};

#[cfg(not(target_arch = "riscv64"))]
mod host;

#[cfg(not(target_arch = "riscv64"))]
pub use host::{
    flush_tlb_all, flush_tlb_page, initial_user_sstatus, interrupts_enabled, irq_save, shutdown,
    switch_satp, wait_for_interrupt, IrqGuard, SumGuard,
};

/// Saved callee-saved register context for the low-level switch.
///
/// Only `ra`, `sp` and `s0..s11` are stored; caller-saved state is
/// already on the kernel stack at the `switch` call site. The field
/// order is the assembly's load/store order and must not change.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Context {
    /// Return address: where the task resumes when switched to.
    pub ra: usize,
    /// Kernel stack pointer.
    pub sp: usize,
    /// Saved registers s0..s11.
    pub s: [usize; 12],
}

impl Context {
    /// A zeroed context; filled in by the first switch away or by
    /// `Context::kernel_entry`.
    pub const fn zero() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s: [0; 12],
        }
    }

    /// Context that enters `entry` on `stack_top` when first switched to.
    pub fn kernel_entry(entry: usize, stack_top: usize) -> Self {
        Self {
            ra: entry,
            sp: stack_top,
            s: [0; 12],
        }
    }
}

/// Switch from `old` to `new`, saving the current callee-saved registers
/// into `old` and loading those of `new`. Returns when something later
/// switches back to `old`.
///
/// # Safety
///
/// Both pointers must reference valid, distinct `Context` values that
/// stay alive until the respective task is resumed, and interrupts must
/// be disabled across the call.
#[cfg(target_arch = "riscv64")]
pub use riscv64::context::switch;

#[cfg(not(target_arch = "riscv64"))]
pub use host::switch;
