//! Platform-Level Interrupt Controller driver
//!
//! SiFive PLIC on the QEMU virt machine (base 0x0C00_0000). The PLIC
//! aggregates external sources (UART, VirtIO) and delivers them to the
//! boot hart's S-mode context via the claim/complete handshake.
//!
//! Context mapping: each hart has an M-mode (even) and an S-mode (odd)
//! context; hart 0's S-mode context is 1.

use core::sync::atomic::{fence, Ordering};

/// PLIC MMIO base on the QEMU virt machine.
const PLIC_BASE: usize = 0x0C00_0000;

/// Per-source priority registers (4 bytes each, source 0 reserved).
const PRIORITY_OFFSET: usize = 0x00_0000;
/// Per-context enable bit arrays (0x80 bytes per context).
const ENABLE_OFFSET: usize = 0x00_2000;
const ENABLE_STRIDE: usize = 0x80;
/// Per-context threshold register, with claim/complete 4 bytes above.
const THRESHOLD_OFFSET: usize = 0x20_0000;
const CLAIM_OFFSET: usize = 0x20_0004;
const CONTEXT_STRIDE: usize = 0x1000;

/// S-mode context for hart 0.
const S_CONTEXT: usize = 1;

/// Highest source number configured (virt uses 1..=127, we only route
/// the low ones).
const MAX_IRQ: u32 = 127;

/// UART0 interrupt source on the virt machine.
pub const IRQ_UART0: u32 = 10;

/// VirtIO MMIO interrupt sources (virt machine slots 1..=8).
pub const IRQ_VIRTIO_START: u32 = 1;
pub const IRQ_VIRTIO_END: u32 = 8;

#[inline]
fn priority_addr(irq: u32) -> *mut u32 {
    (PLIC_BASE + PRIORITY_OFFSET + irq as usize * 4) as *mut u32
}

#[inline]
fn enable_addr(irq: u32) -> *mut u32 {
    (PLIC_BASE + ENABLE_OFFSET + S_CONTEXT * ENABLE_STRIDE + (irq as usize / 32) * 4) as *mut u32
}

#[inline]
fn threshold_addr() -> *mut u32 {
    (PLIC_BASE + THRESHOLD_OFFSET + S_CONTEXT * CONTEXT_STRIDE) as *mut u32
}

#[inline]
fn claim_addr() -> *mut u32 {
    (PLIC_BASE + CLAIM_OFFSET + S_CONTEXT * CONTEXT_STRIDE) as *mut u32
}

/// Reset the PLIC for hart 0 S-mode: all priorities zeroed, enables
/// cleared, threshold 0, stale claims drained. Also unmasks the
/// CPU-side S-external interrupt.
pub fn init() {
    // SAFETY: setting SEIE only unmasks the external interrupt line;
    // the trap vector is installed before this runs.
    unsafe {
        riscv::register::sie::set_sext();
    }
    for irq in 1..=MAX_IRQ {
        // SAFETY: priority registers for sources 1..=MAX_IRQ lie inside
        // the PLIC MMIO window; write_volatile is required for MMIO.
        unsafe {
            core::ptr::write_volatile(priority_addr(irq), 0);
        }
    }
    for word in 0..((MAX_IRQ as usize + 32) / 32) {
        let addr =
            (PLIC_BASE + ENABLE_OFFSET + S_CONTEXT * ENABLE_STRIDE + word * 4) as *mut u32;
        // SAFETY: enable words for the S-mode context are inside the
        // PLIC MMIO window.
        unsafe {
            core::ptr::write_volatile(addr, 0);
        }
    }
    // SAFETY: threshold register for the S-mode context; 0 accepts every
    // enabled source with priority >= 1.
    unsafe {
        core::ptr::write_volatile(threshold_addr(), 0);
    }
    // Drain claims left over from before our init.
    loop {
        // SAFETY: reading claim/complete atomically claims the highest
        // pending source or returns 0.
        let stale = unsafe { core::ptr::read_volatile(claim_addr()) };
        if stale == 0 {
            break;
        }
        // SAFETY: writing the claimed source back signals EOI.
        unsafe {
            core::ptr::write_volatile(claim_addr(), stale);
        }
    }
    fence(Ordering::SeqCst);
    log::info!(target: "plic", "reset, S-mode context {}", S_CONTEXT);
}

/// Enable `irq` for the boot hart at priority 1.
pub fn enable(irq: u32) {
    debug_assert!(irq != 0 && irq <= MAX_IRQ);
    // SAFETY: both registers are inside the PLIC MMIO window for a
    // validated source number; read-modify-write preserves other bits.
    unsafe {
        core::ptr::write_volatile(priority_addr(irq), 1);
        let addr = enable_addr(irq);
        let bits = core::ptr::read_volatile(addr);
        core::ptr::write_volatile(addr, bits | (1 << (irq % 32)));
    }
    fence(Ordering::SeqCst);
}

/// Claim the highest-priority pending interrupt, if any.
pub fn claim() -> Option<u32> {
    // SAFETY: reading claim/complete atomically claims a pending source.
    let irq = unsafe { core::ptr::read_volatile(claim_addr()) };
    if irq == 0 {
        None
    } else {
        Some(irq)
    }
}

/// Signal end-of-interrupt for a source obtained from `claim`.
pub fn complete(irq: u32) {
    // SAFETY: writing the source number back to claim/complete is the
    // PLIC EOI handshake.
    unsafe {
        core::ptr::write_volatile(claim_addr(), irq);
    }
    fence(Ordering::SeqCst);
}
