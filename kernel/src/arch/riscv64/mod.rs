//! RISC-V 64 (Sv39) architecture backend

pub mod boot;
pub mod context;
pub mod plic;
pub mod sbi;
pub mod timer;
pub mod trap;
pub mod uart;

use riscv::register::sstatus;

/// Scoped interrupt-disable token.
///
/// `irq_save` clears `sstatus.SIE` and remembers the previous value;
/// dropping the guard writes it back, so nested sections compose.
pub struct IrqGuard {
    was_enabled: bool,
}

/// Disable S-mode interrupts, returning a token that restores the
/// previous enable state on drop.
pub fn irq_save() -> IrqGuard {
    let was_enabled = sstatus::read().sie();
    // SAFETY: clearing SIE only defers interrupt delivery; the matching
    // restore happens in IrqGuard::drop on this same hart.
    unsafe {
        sstatus::clear_sie();
    }
    IrqGuard { was_enabled }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            // SAFETY: re-enabling SIE after the critical section; the
            // caller held the guard for the whole section.
            unsafe {
                sstatus::set_sie();
            }
        }
    }
}

/// Whether S-mode interrupts are currently enabled.
pub fn interrupts_enabled() -> bool {
    sstatus::read().sie()
}

/// Scoped token enabling S-mode access to user pages (`sstatus.SUM`).
///
/// User buffers may only be dereferenced while one of these is alive;
/// the bit is cleared again on drop so stray kernel dereferences of
/// user memory keep faulting.
pub struct SumGuard;

impl SumGuard {
    pub fn new() -> Self {
        // SAFETY: setting SUM widens S-mode load/store permissions for
        // the guard's lifetime only; drop clears it.
        unsafe {
            sstatus::set_sum();
        }
        SumGuard
    }
}

impl Default for SumGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SumGuard {
    fn drop(&mut self) {
        // SAFETY: clearing SUM restores the default (faulting) behavior.
        unsafe {
            sstatus::clear_sum();
        }
    }
}

/// Initial user-mode `sstatus` image: the current value with SPP
/// cleared (return to U-mode) and SPIE set (interrupts on after sret).
pub fn initial_user_sstatus() -> usize {
    let current: usize;
    // SAFETY: reading sstatus has no side effects.
    unsafe {
        core::arch::asm!("csrr {}, sstatus", out(reg) current);
    }
    const SPP: usize = 1 << 8;
    const SPIE: usize = 1 << 5;
    (current & !SPP) | SPIE
}

/// Point `satp` at the page-table root whose physical page number is
/// `root_ppn` and flush the TLB.
pub fn switch_satp(root_ppn: usize) {
    // SAFETY: the caller passes the PPN of a valid Sv39 root whose
    // kernel half maps the currently executing code and stack.
    unsafe {
        riscv::register::satp::set(riscv::register::satp::Mode::Sv39, 0, root_ppn);
        core::arch::asm!("sfence.vma");
    }
}

/// Flush the entire TLB.
pub fn flush_tlb_all() {
    // SAFETY: sfence.vma has no side effects beyond TLB invalidation.
    unsafe {
        core::arch::asm!("sfence.vma");
    }
}

/// Flush the TLB entry covering one virtual page.
pub fn flush_tlb_page(vaddr: usize) {
    // SAFETY: per-address sfence.vma invalidates at most the named
    // translation.
    unsafe {
        core::arch::asm!("sfence.vma {}, zero", in(reg) vaddr);
    }
}

/// Halt until the next interrupt.
pub fn wait_for_interrupt() {
    // SAFETY: wfi stalls the hart; any enabled interrupt resumes it.
    unsafe {
        core::arch::asm!("wfi");
    }
}

/// Power off through SBI; spins if the SRST extension is absent.
pub fn shutdown() -> ! {
    sbi::shutdown();
    loop {
        wait_for_interrupt();
    }
}
