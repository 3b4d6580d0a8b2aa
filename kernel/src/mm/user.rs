//! Validated access to user memory
//!
//! Kernel code never dereferences a raw user pointer. Every access goes
//! through [`UserAccess`], which (i) is constructed from the VMA map of
//! the process whose address space is active, (ii) validates the range
//! against the required access mode, and (iii) holds the SUM bit only
//! for the duration of the copy. Interrupt handlers have no business
//! here: only syscall paths construct one.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use super::vma::{VmaFlags, VmaMap};
use crate::arch::SumGuard;
use crate::config::PAGE_SIZE;
use crate::error::{KernelError, KernelResult};

/// Window into the current process's user memory.
pub struct UserAccess<'a> {
    vmas: &'a VmaMap,
}

impl<'a> UserAccess<'a> {
    /// Build an access window over `vmas`, which must belong to the
    /// process whose page-table root is in `satp`.
    pub fn new(vmas: &'a VmaMap) -> Self {
        Self { vmas }
    }

    /// Validate `[ptr, ptr + len)` for the given access mode.
    pub fn validate(&self, ptr: usize, len: usize, required: VmaFlags) -> KernelResult<()> {
        if self
            .vmas
            .validate_user_range(ptr, len, required | VmaFlags::USER)
        {
            Ok(())
        } else {
            Err(KernelError::BadAddress)
        }
    }

    /// Copy `buf.len()` bytes in from user address `src`.
    pub fn read_bytes(&self, src: usize, buf: &mut [u8]) -> KernelResult<()> {
        self.validate(src, buf.len(), VmaFlags::READ)?;
        let _sum = SumGuard::new();
        // SAFETY: the range was just validated against the active VMA
        // map and SUM is held for the copy.
        unsafe {
            core::ptr::copy_nonoverlapping(src as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Copy `data` out to user address `dst`.
    pub fn write_bytes(&self, dst: usize, data: &[u8]) -> KernelResult<()> {
        self.validate(dst, data.len(), VmaFlags::WRITE)?;
        let _sum = SumGuard::new();
        // SAFETY: validated writable range, SUM held.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), dst as *mut u8, data.len());
        }
        Ok(())
    }

    /// Read a usize (fd pairs, status words) from user memory.
    pub fn read_usize(&self, src: usize) -> KernelResult<usize> {
        let mut buf = [0u8; core::mem::size_of::<usize>()];
        self.read_bytes(src, &mut buf)?;
        Ok(usize::from_ne_bytes(buf))
    }

    /// Write a usize to user memory.
    pub fn write_usize(&self, dst: usize, value: usize) -> KernelResult<usize> {
        self.write_bytes(dst, &value.to_ne_bytes())?;
        Ok(0)
    }

    /// Copy a NUL-terminated string in, up to `max` bytes. Validation
    /// runs page by page so a short string near the end of a mapping is
    /// accepted even when `src + max` would run off it.
    pub fn read_cstring(&self, src: usize, max: usize) -> KernelResult<String> {
        let mut collected: Vec<u8> = Vec::new();
        let mut cursor = src;
        let end = src.checked_add(max).ok_or(KernelError::BadAddress)?;
        while cursor < end {
            let page_end = (cursor & !(PAGE_SIZE - 1)) + PAGE_SIZE;
            let chunk_len = page_end.min(end) - cursor;
            let mut chunk = vec![0u8; chunk_len];
            self.read_bytes(cursor, &mut chunk)?;
            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                collected.extend_from_slice(&chunk[..nul]);
                return String::from_utf8(collected).map_err(|_| KernelError::InvalidArgument);
            }
            collected.extend_from_slice(&chunk);
            cursor = page_end;
        }
        Err(KernelError::NameTooLong)
    }
}
