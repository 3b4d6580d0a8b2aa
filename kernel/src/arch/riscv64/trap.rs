//! Trap vector: entry and exit assembly
//!
//! One S-mode vector serves every trap. `sscratch` carries the contract:
//! while user code runs it holds the address of the process's trap-frame
//! slot (kernel stack top minus the frame size); while kernel code runs
//! it holds zero. The entry stub swaps `sscratch` with `sp` and branches
//! on the result to the user or kernel path.
//!
//! User path: the full register file plus `sepc`/`sstatus` is saved into
//! the trap-frame slot and the Rust handler takes over, never returning
//! here; it leaves through `return_to_user`, whose assembly restores
//! `sscratch` *before* reloading the user stack pointer (a trap taken
//! with a stale user value in `sscratch` would corrupt the next entry).
//!
//! Kernel path: only caller-saved registers are spilled to the current
//! stack; the handler ticks the clock or routes a device interrupt and
//! returns. Exceptions in the kernel path are fatal.
//!
//! Frame offsets below match the field order of `trap::TrapFrame`:
//! ra 0, sp 8, gp 16, tp 24, t0-t2 32..48, s0-s1 56..64, s2-s11 72..144,
//! a0-a7 152..208, t3-t6 216..240, sepc 248, sstatus 256.

use core::arch::global_asm;

use riscv::register::{scause, sepc, sscratch, stval, stvec};

use crate::trap::TrapFrame;

global_asm!(
    r#"
    .section .text
    .align 4
    .globl __trap_vector
__trap_vector:
    csrrw sp, sscratch, sp
    beqz  sp, 9f

    # ---- trap from U-mode: sp = trap-frame slot on the kernel stack ----
    sd ra, 0(sp)
    sd gp, 16(sp)
    sd tp, 24(sp)
    sd t0, 32(sp)
    sd t1, 40(sp)
    sd t2, 48(sp)
    sd s0, 56(sp)
    sd s1, 64(sp)
    sd s2, 72(sp)
    sd s3, 80(sp)
    sd s4, 88(sp)
    sd s5, 96(sp)
    sd s6, 104(sp)
    sd s7, 112(sp)
    sd s8, 120(sp)
    sd s9, 128(sp)
    sd s10, 136(sp)
    sd s11, 144(sp)
    sd a0, 152(sp)
    sd a1, 160(sp)
    sd a2, 168(sp)
    sd a3, 176(sp)
    sd a4, 184(sp)
    sd a5, 192(sp)
    sd a6, 200(sp)
    sd a7, 208(sp)
    sd t3, 216(sp)
    sd t4, 224(sp)
    sd t5, 232(sp)
    sd t6, 240(sp)
    # user sp was swapped into sscratch
    csrr t0, sscratch
    sd   t0, 8(sp)
    csrr t0, sepc
    sd   t0, 248(sp)
    csrr t0, sstatus
    sd   t0, 256(sp)
    # mark "in kernel" so a nested trap takes the kernel path
    csrw sscratch, zero
    mv   a0, sp
    call user_trap
    # user_trap diverges

    # ---- trap from S-mode: sscratch was zero, undo the swap ----
9:
    csrrw sp, sscratch, sp
    addi  sp, sp, -144
    sd ra, 0(sp)
    sd t0, 8(sp)
    sd t1, 16(sp)
    sd t2, 24(sp)
    sd t3, 32(sp)
    sd t4, 40(sp)
    sd t5, 48(sp)
    sd t6, 56(sp)
    sd a0, 64(sp)
    sd a1, 72(sp)
    sd a2, 80(sp)
    sd a3, 88(sp)
    sd a4, 96(sp)
    sd a5, 104(sp)
    sd a6, 112(sp)
    sd a7, 120(sp)
    csrr t0, sepc
    sd   t0, 128(sp)
    csrr t0, sstatus
    sd   t0, 136(sp)
    call kernel_trap
    ld   t0, 128(sp)
    csrw sepc, t0
    ld   t0, 136(sp)
    csrw sstatus, t0
    ld ra, 0(sp)
    ld t0, 8(sp)
    ld t1, 16(sp)
    ld t2, 24(sp)
    ld t3, 32(sp)
    ld t4, 40(sp)
    ld t5, 48(sp)
    ld t6, 56(sp)
    ld a0, 64(sp)
    ld a1, 72(sp)
    ld a2, 80(sp)
    ld a3, 88(sp)
    ld a4, 96(sp)
    ld a5, 104(sp)
    ld a6, 112(sp)
    ld a7, 120(sp)
    addi sp, sp, 144
    sret

    .globl __restore_user
__restore_user:
    # a0 = trap frame. Restore sscratch first: the next user trap must
    # land on this frame slot, and it must be in place before sp leaves
    # the kernel stack.
    csrw sscratch, a0
    ld   t0, 248(a0)
    csrw sepc, t0
    ld   t0, 256(a0)
    csrw sstatus, t0
    ld ra, 0(a0)
    ld gp, 16(a0)
    ld tp, 24(a0)
    ld t0, 32(a0)
    ld t1, 40(a0)
    ld t2, 48(a0)
    ld s0, 56(a0)
    ld s1, 64(a0)
    ld s2, 72(a0)
    ld s3, 80(a0)
    ld s4, 88(a0)
    ld s5, 96(a0)
    ld s6, 104(a0)
    ld s7, 112(a0)
    ld s8, 120(a0)
    ld s9, 128(a0)
    ld s10, 136(a0)
    ld s11, 144(a0)
    ld a1, 160(a0)
    ld a2, 168(a0)
    ld a3, 176(a0)
    ld a4, 184(a0)
    ld a5, 192(a0)
    ld a6, 200(a0)
    ld a7, 208(a0)
    ld t3, 216(a0)
    ld t4, 224(a0)
    ld t5, 232(a0)
    ld t6, 240(a0)
    ld sp, 8(a0)
    ld a0, 152(a0)
    sret
"#
);

extern "C" {
    fn __trap_vector();
    fn __restore_user(frame: *mut TrapFrame) -> !;
}

/// Install the trap vector and mark the hart as "in kernel".
pub fn init() {
    // SAFETY: __trap_vector is 4-byte aligned (".align 4") and valid for
    // the lifetime of the kernel.
    unsafe {
        stvec::write(__trap_vector as usize, stvec::TrapMode::Direct);
    }
    sscratch::write(0);
}

/// Leave the kernel through the trap-exit assembly.
///
/// # Safety
///
/// `frame` must be the trap-frame slot of the current process's kernel
/// stack, fully populated, with `sstatus.SPP` indicating U-mode.
pub unsafe fn return_to_user(frame: *mut TrapFrame) -> ! {
    // SAFETY: delegated to the caller; the asm restores the register
    // file from the frame and executes sret.
    unsafe { __restore_user(frame) }
}

/// Rust side of the U-mode trap path.
#[no_mangle]
extern "C" fn user_trap(frame: *mut TrapFrame) -> ! {
    let cause = scause::read().bits();
    let tval = stval::read();
    // SAFETY: the entry stub passes the current process's trap-frame
    // slot, which stays valid for the whole kernel excursion.
    let frame = unsafe { &mut *frame };
    crate::trap::handle_user_trap(frame, cause, tval)
}

/// Rust side of the S-mode trap path. Interrupts only; an exception
/// taken in kernel code is unrecoverable.
#[no_mangle]
extern "C" fn kernel_trap() {
    let cause = scause::read().bits();
    crate::trap::handle_kernel_trap(cause, sepc::read(), stval::read());
}
