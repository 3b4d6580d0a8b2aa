//! Low-level context switch
//!
//! Saves and restores only the callee-saved integer registers, the
//! return address, and the stack pointer; caller-saved state is already
//! on the kernel stack at the call site. Offsets match the field order
//! of [`crate::arch::Context`]: ra 0, sp 8, s0..s11 at 16..=104.

use core::arch::asm;

use crate::arch::Context;

/// Switch from `old` to `new`. Control returns (to the `switch` call
/// site saved in `old`) when something later switches back.
///
/// # Safety
///
/// `old` and `new` must point to valid, distinct contexts that outlive
/// their tasks' suspension, and interrupts must be disabled.
#[no_mangle]
pub unsafe extern "C" fn switch(old: *mut Context, new: *const Context) {
    // SAFETY: contract delegated to the caller; the asm stores every
    // callee-saved register into `old` and reloads them from `new`,
    // then returns into the new context's ra.
    unsafe {
        asm!(
            "sd ra, 0(a0)",
            "sd sp, 8(a0)",
            "sd s0, 16(a0)",
            "sd s1, 24(a0)",
            "sd s2, 32(a0)",
            "sd s3, 40(a0)",
            "sd s4, 48(a0)",
            "sd s5, 56(a0)",
            "sd s6, 64(a0)",
            "sd s7, 72(a0)",
            "sd s8, 80(a0)",
            "sd s9, 88(a0)",
            "sd s10, 96(a0)",
            "sd s11, 104(a0)",
            "ld ra, 0(a1)",
            "ld sp, 8(a1)",
            "ld s0, 16(a1)",
            "ld s1, 24(a1)",
            "ld s2, 32(a1)",
            "ld s3, 40(a1)",
            "ld s4, 48(a1)",
            "ld s5, 56(a1)",
            "ld s6, 64(a1)",
            "ld s7, 72(a1)",
            "ld s8, 80(a1)",
            "ld s9, 88(a1)",
            "ld s10, 96(a1)",
            "ld s11, 104(a1)",
            "ret",
            in("a0") old,
            in("a1") new,
            options(noreturn)
        );
    }
}
