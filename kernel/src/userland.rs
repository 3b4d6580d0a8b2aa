//! Built-in user programs
//!
//! There is no in-tree userland toolchain, so the seed programs are
//! assembled by hand into minimal static ELF64 images at boot. `init`
//! is a yield loop: enough to exercise the full load/trap/syscall path
//! end to end.

use alloc::vec::Vec;

use crate::config::USER_BASE;
use crate::elf::{ELF_CLASS_64, ELF_DATA_2LSB, ELF_MAGIC, EM_RISCV, ET_EXEC, PF_R, PF_X, PT_LOAD};

/// Entry point of the built-in init image.
pub const INIT_ENTRY: usize = USER_BASE + 0x1_0000;

/// File offset of init's single segment (page-congruent with the vaddr).
const SEGMENT_OFFSET: usize = 0x1000;

/// Syscall number of `yield` (see `syscall`).
const SYS_YIELD: u32 = 26;

/// init's code:
///
/// ```text
/// _start: li   a7, SYS_YIELD
///         ecall
///         j    _start
/// ```
fn init_code() -> Vec<u8> {
    let mut code = Vec::new();
    // addi a7, zero, SYS_YIELD
    code.extend_from_slice(&((SYS_YIELD << 20) | (17 << 7) | 0x13).to_le_bytes());
    // ecall
    code.extend_from_slice(&0x0000_0073u32.to_le_bytes());
    // jal zero, -8
    code.extend_from_slice(&0xFF9F_F06Fu32.to_le_bytes());
    code
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Assemble the init ELF image.
pub fn init_image() -> Vec<u8> {
    let code = init_code();
    let mut out = Vec::with_capacity(SEGMENT_OFFSET + code.len());

    // ELF header (64 bytes)
    out.extend_from_slice(&ELF_MAGIC);
    out.push(ELF_CLASS_64);
    out.push(ELF_DATA_2LSB);
    out.push(1); // EV_CURRENT
    out.push(0); // System V ABI
    out.push(0);
    out.extend_from_slice(&[0; 7]);
    push_u16(&mut out, ET_EXEC);
    push_u16(&mut out, EM_RISCV);
    push_u32(&mut out, 1); // e_version
    push_u64(&mut out, INIT_ENTRY as u64);
    push_u64(&mut out, 64); // e_phoff: right after this header
    push_u64(&mut out, 0); // e_shoff
    push_u32(&mut out, 0); // e_flags
    push_u16(&mut out, 64); // e_ehsize
    push_u16(&mut out, 56); // e_phentsize
    push_u16(&mut out, 1); // e_phnum
    push_u16(&mut out, 0); // e_shentsize
    push_u16(&mut out, 0); // e_shnum
    push_u16(&mut out, 0); // e_shstrndx

    // Program header (56 bytes)
    push_u32(&mut out, PT_LOAD);
    push_u32(&mut out, PF_R | PF_X);
    push_u64(&mut out, SEGMENT_OFFSET as u64);
    push_u64(&mut out, INIT_ENTRY as u64);
    push_u64(&mut out, INIT_ENTRY as u64);
    push_u64(&mut out, code.len() as u64);
    push_u64(&mut out, code.len() as u64);
    push_u64(&mut out, 0x1000);

    // Pad to the segment offset, then the code.
    out.resize(SEGMENT_OFFSET, 0);
    out.extend_from_slice(&code);
    out
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn image_layout_is_consistent() {
        let image = init_image();
        assert_eq!(&image[..4], &ELF_MAGIC);
        assert!(image.len() > SEGMENT_OFFSET);
        // The entry instruction is the li a7 encoding.
        let first = u32::from_le_bytes(image[SEGMENT_OFFSET..SEGMENT_OFFSET + 4].try_into().unwrap());
        assert_eq!(first & 0x7F, 0x13); // opcode OP-IMM
        assert_eq!((first >> 7) & 0x1F, 17); // rd = a7
    }
}
