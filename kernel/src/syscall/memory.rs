//! Memory system calls: sbrk and anonymous mmap/munmap

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::config::{PAGE_SIZE, USER_MMAP_BASE, USER_TOP};
use crate::error::{KernelError, KernelResult};
use crate::mm::{self, frame_allocator, PmmFrames, PteFlags, VirtAddr, VmaFlags};
use crate::process::Process;

fn current() -> KernelResult<Arc<Process>> {
    crate::process::current().ok_or(KernelError::NoProcess)
}

/// Map zeroed frames over `[start, start + pages * PAGE_SIZE)`.
fn map_anonymous(proc: &Process, start: usize, pages: usize, flags: PteFlags) -> KernelResult<()> {
    let mut space_guard = proc.space.lock();
    let space = space_guard.as_mut().ok_or(KernelError::InvalidArgument)?;
    for idx in 0..pages {
        let pa = frame_allocator::alloc_frame().ok_or(KernelError::OutOfMemory)?;
        space.track_user_frame(pa);
        space.map(VirtAddr::new(start + idx * PAGE_SIZE), pa, flags, &mut PmmFrames)?;
    }
    Ok(())
}

/// Unmap and free `[start, start + pages * PAGE_SIZE)`.
fn unmap_range(proc: &Process, start: usize, pages: usize) {
    let mut space_guard = proc.space.lock();
    let Some(space) = space_guard.as_mut() else {
        return;
    };
    for idx in 0..pages {
        if let Ok(pa) = space.unmap(VirtAddr::new(start + idx * PAGE_SIZE)) {
            if space.untrack_user_frame(pa) {
                frame_allocator::free_frame(pa);
            }
        }
    }
}

/// Grow or shrink the heap by `delta` bytes; returns the old break.
pub fn sys_sbrk(delta: isize) -> KernelResult<usize> {
    let proc = current()?;
    let mut heap = proc.heap.lock();
    let old_end = heap.end;

    if delta == 0 {
        return Ok(old_end);
    }

    let new_end = if delta > 0 {
        old_end.checked_add(delta as usize)
    } else {
        old_end.checked_sub((-delta) as usize)
    }
    .ok_or(KernelError::InvalidArgument)?;

    if new_end < heap.start || new_end > USER_MMAP_BASE {
        return Err(KernelError::OutOfMemory);
    }

    let old_pages_end = mm::page_align_up(old_end);
    let new_pages_end = mm::page_align_up(new_end);
    let heap_flags = VmaFlags::READ | VmaFlags::WRITE | VmaFlags::USER;

    if new_pages_end > old_pages_end {
        let pages = (new_pages_end - old_pages_end) / PAGE_SIZE;
        map_anonymous(
            &proc,
            old_pages_end,
            pages,
            PteFlags::READ | PteFlags::WRITE | PteFlags::USER,
        )?;
        let mut vmas = proc.vmas.lock();
        let grown = if old_end == heap.start {
            vmas.insert(heap.start, new_pages_end, heap_flags).is_ok()
        } else {
            vmas.resize(heap.start, new_pages_end).is_ok()
        };
        if !grown {
            drop(vmas);
            unmap_range(&proc, old_pages_end, pages);
            return Err(KernelError::InvalidArgument);
        }
    } else if new_pages_end < old_pages_end {
        let pages = (old_pages_end - new_pages_end) / PAGE_SIZE;
        unmap_range(&proc, new_pages_end, pages);
        let mut vmas = proc.vmas.lock();
        if new_pages_end == heap.start {
            vmas.remove(heap.start);
        } else {
            let _ = vmas.resize(heap.start, new_pages_end);
        }
    }

    heap.end = new_end;
    Ok(old_end)
}

/// mmap protection bits.
const PROT_READ: u32 = 1;
const PROT_WRITE: u32 = 2;
const PROT_EXEC: u32 = 4;

/// Anonymous mmap. A zero hint lets the kernel place the region at the
/// mmap cursor; a non-zero hint must be page aligned and free.
pub fn sys_mmap(hint: usize, len: usize, prot: u32) -> KernelResult<usize> {
    let proc = current()?;
    if len == 0 {
        return Err(KernelError::InvalidArgument);
    }
    let pages = mm::page_align_up(len) / PAGE_SIZE;
    let size = pages * PAGE_SIZE;

    let start = if hint == 0 {
        proc.mmap_cursor.load(Ordering::Acquire)
    } else {
        if hint % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument);
        }
        hint
    };
    if start < USER_MMAP_BASE || start + size > USER_TOP {
        return Err(KernelError::InvalidArgument);
    }

    let mut vma_flags = VmaFlags::USER;
    let mut pte_flags = PteFlags::USER;
    if prot & PROT_READ != 0 {
        vma_flags |= VmaFlags::READ;
        pte_flags |= PteFlags::READ;
    }
    if prot & PROT_WRITE != 0 {
        vma_flags |= VmaFlags::WRITE;
        pte_flags |= PteFlags::WRITE;
    }
    if prot & PROT_EXEC != 0 {
        vma_flags |= VmaFlags::EXEC;
        pte_flags |= PteFlags::EXEC;
    }

    if proc.vmas.lock().insert(start, start + size, vma_flags).is_err() {
        return Err(KernelError::InvalidArgument);
    }
    if let Err(e) = map_anonymous(&proc, start, pages, pte_flags) {
        // Roll the partially mapped region back.
        unmap_range(&proc, start, pages);
        proc.vmas.lock().remove(start);
        return Err(e);
    }

    if hint == 0 {
        proc.mmap_cursor.store(start + size, Ordering::Release);
    }
    Ok(start)
}

/// Unmap a region previously created by `sys_mmap`. The range must
/// name a whole mapping: `addr` its start, `len` its length.
pub fn sys_munmap(addr: usize, len: usize) -> KernelResult<usize> {
    let proc = current()?;
    let size = mm::page_align_up(len);
    {
        let vmas = proc.vmas.lock();
        let area = vmas.find(addr).ok_or(KernelError::InvalidArgument)?;
        if area.start != addr || area.end != addr + size {
            return Err(KernelError::InvalidArgument);
        }
    }
    unmap_range(&proc, addr, size / PAGE_SIZE);
    proc.vmas.lock().remove(addr);
    Ok(0)
}
