//! Host-target stand-ins for the architecture layer
//!
//! Compiled only for non-riscv64 targets so the kernel library can be
//! built and unit-tested on the development host. Interrupt state is a
//! thread-local flag (the nesting discipline of `IrqGuard` still
//! applies); MMU and context-switch entry points are inert or panic.

use core::sync::atomic::{AtomicBool, Ordering};

use super::Context;

static IRQ_ENABLED: AtomicBool = AtomicBool::new(true);

/// Scoped interrupt-disable token (host: flag only).
pub struct IrqGuard {
    was_enabled: bool,
}

/// Disable interrupts, returning a token that restores the previous
/// state on drop. Nesting composes: inner guards observe "disabled" and
/// restore "disabled".
pub fn irq_save() -> IrqGuard {
    let was_enabled = IRQ_ENABLED.swap(false, Ordering::SeqCst);
    IrqGuard { was_enabled }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        IRQ_ENABLED.store(self.was_enabled, Ordering::SeqCst);
    }
}

/// Whether interrupts are currently enabled.
pub fn interrupts_enabled() -> bool {
    IRQ_ENABLED.load(Ordering::SeqCst)
}

/// Scoped SUM-bit token (host: no-op).
pub struct SumGuard;

impl SumGuard {
    pub fn new() -> Self {
        SumGuard
    }
}

impl Default for SumGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Initial user-mode `sstatus` image (host: SPIE only).
pub fn initial_user_sstatus() -> usize {
    1 << 5
}

/// No MMU on the host backend.
pub fn switch_satp(_root_ppn: usize) {}

pub fn flush_tlb_all() {}

pub fn flush_tlb_page(_vaddr: usize) {}

pub fn wait_for_interrupt() {}

pub fn shutdown() -> ! {
    panic!("shutdown requested on host target");
}

/// The host backend never actually switches stacks.
///
/// # Safety
///
/// Never safe to reach; present only so generic scheduler code links.
pub unsafe fn switch(_old: *mut Context, _new: *const Context) {
    unreachable!("context switch on host target");
}
