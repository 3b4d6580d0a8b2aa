//! Boot entry
//!
//! OpenSBI drops us here in S-mode with `a0` = hart id and `a1` = the
//! device-tree blob. The assembly stub establishes the boot stack,
//! clears BSS, and jumps to `kmain`. The boot stack later becomes the
//! idle task's kernel stack.

use core::arch::global_asm;

global_asm!(
    r#"
    .section .text.entry
    .globl _start
_start:
    la   sp, __boot_stack_top
    # Clear BSS (the linker guarantees 8-byte alignment of both symbols)
    la   t0, __bss_start
    la   t1, __bss_end
1:
    bgeu t0, t1, 2f
    sd   zero, 0(t0)
    addi t0, t0, 8
    j    1b
2:
    call kmain
    # kmain never returns; park the hart if it somehow does
3:
    wfi
    j    3b

    .section .bss.stack
    .align 12
    .globl __boot_stack
__boot_stack:
    .space {boot_stack_size}
    .globl __boot_stack_top
__boot_stack_top:
"#,
    boot_stack_size = const crate::config::KERNEL_STACK_SIZE * 4,
);

extern "C" {
    /// End of the kernel image; physical frames are managed from here up.
    pub static __kernel_end: u8;
}

/// Physical address of the first byte past the kernel image.
pub fn kernel_end() -> usize {
    // SAFETY: __kernel_end is a linker-provided symbol; only its address
    // is taken, never its value.
    unsafe { core::ptr::addr_of!(__kernel_end) as usize }
}
