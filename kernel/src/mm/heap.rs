//! Kernel heap
//!
//! Two layers. The page-granular `kmalloc`/`kfree` allocator hands out
//! runs of whole pages prefixed by a `{magic, size_in_pages}` header;
//! a corrupted header on free is fatal. No fragmentation mitigation:
//! internal fragmentation is the accepted price of simplicity. Kernel
//! stacks are its main customer.
//!
//! Separately, `linked_list_allocator` serves as the `#[global_allocator]`
//! backing `alloc` collections on the target (the host test build uses
//! the system allocator instead); its region comes out of the frame
//! pool during `init`.

use spin::Mutex;

use crate::config::PAGE_SIZE;
use crate::error::{KernelError, KernelResult};

/// Header magic; a mismatch on free means heap corruption.
const HEAP_MAGIC: u32 = 0xDEAD_BEEF;

/// Size of the kmalloc region in pages (4 MiB).
const KMALLOC_PAGES: usize = 1024;

/// Allocation header, written at the start of the first page of every
/// allocation. The caller's pointer starts just past it.
#[repr(C)]
struct AllocHeader {
    magic: u32,
    size_in_pages: u32,
}

const HEADER_SIZE: usize = core::mem::size_of::<AllocHeader>();

/// Page-granular allocator over a fixed region.
pub struct KernelHeap {
    base: usize,
    pages: usize,
    /// 1 = page in use.
    used: [u64; KMALLOC_PAGES / 64],
}

impl KernelHeap {
    pub const fn empty() -> Self {
        Self {
            base: 0,
            pages: 0,
            used: [0; KMALLOC_PAGES / 64],
        }
    }

    /// Arm the allocator over `pages` pages starting at `base` (page
    /// aligned, identity accessible).
    pub fn init(&mut self, base: usize, pages: usize) {
        debug_assert!(base % PAGE_SIZE == 0);
        self.base = base;
        self.pages = pages.min(KMALLOC_PAGES);
        self.used = [0; KMALLOC_PAGES / 64];
    }

    fn is_used(&self, idx: usize) -> bool {
        self.used[idx / 64] & (1 << (idx % 64)) != 0
    }

    fn set_used(&mut self, idx: usize, used: bool) {
        if used {
            self.used[idx / 64] |= 1 << (idx % 64);
        } else {
            self.used[idx / 64] &= !(1 << (idx % 64));
        }
    }

    /// Allocate `size` usable bytes (rounded up to whole pages including
    /// the header).
    pub fn alloc(&mut self, size: usize) -> KernelResult<*mut u8> {
        if size == 0 || self.pages == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let npages = (size + HEADER_SIZE).div_ceil(PAGE_SIZE);
        let mut run = 0;
        let mut start = 0;
        for idx in 0..self.pages {
            if self.is_used(idx) {
                run = 0;
                continue;
            }
            if run == 0 {
                start = idx;
            }
            run += 1;
            if run == npages {
                for i in start..start + npages {
                    self.set_used(i, true);
                }
                let head = (self.base + start * PAGE_SIZE) as *mut AllocHeader;
                // SAFETY: the run lies inside the armed region, which the
                // caller guaranteed to be identity accessible.
                unsafe {
                    head.write(AllocHeader {
                        magic: HEAP_MAGIC,
                        size_in_pages: npages as u32,
                    });
                    return Ok((head as *mut u8).add(HEADER_SIZE));
                }
            }
        }
        Err(KernelError::OutOfMemory)
    }

    /// Free an allocation returned by `alloc`. A bad header is heap
    /// corruption and panics.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc` on this heap and not be freed twice.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        let head_ptr = (ptr as usize - HEADER_SIZE) as *mut AllocHeader;
        // SAFETY: per the function contract the header precedes `ptr`.
        let head = unsafe { head_ptr.read() };
        if head.magic != HEAP_MAGIC {
            panic!(
                "kernel heap corruption: bad magic {:#x} at {:#x}",
                head.magic, head_ptr as usize
            );
        }
        let start = (head_ptr as usize - self.base) / PAGE_SIZE;
        let npages = head.size_in_pages as usize;
        for idx in start..start + npages {
            if !self.is_used(idx) {
                panic!("kernel heap double free at {:#x}", head_ptr as usize);
            }
            self.set_used(idx, false);
        }
        // Poison the magic so a stale pointer is caught next time.
        // SAFETY: the header is still ours until the pages are reused.
        unsafe {
            (*head_ptr).magic = 0;
        }
    }

    /// (total, used) page counts.
    pub fn stats(&self) -> (usize, usize) {
        let used = (0..self.pages).filter(|&i| self.is_used(i)).count();
        (self.pages, used)
    }
}

static KERNEL_HEAP: Mutex<KernelHeap> = Mutex::new(KernelHeap::empty());

/// Allocate `size` bytes from the page-granular heap.
pub fn kmalloc(size: usize) -> KernelResult<*mut u8> {
    KERNEL_HEAP.lock().alloc(size)
}

/// Free a `kmalloc` allocation.
///
/// # Safety
///
/// `ptr` must come from `kmalloc` and not be freed twice.
pub unsafe fn kfree(ptr: *mut u8) {
    // SAFETY: contract forwarded to the caller.
    unsafe {
        KERNEL_HEAP.lock().free(ptr);
    }
}

/// (total, used) page counts of the global kmalloc heap.
pub fn kmalloc_stats() -> (usize, usize) {
    KERNEL_HEAP.lock().stats()
}

/// Boot-path initialization: carve the global-allocator region and the
/// kmalloc region out of the frame pool.
#[cfg(target_arch = "riscv64")]
pub fn init() -> KernelResult<()> {
    use crate::config::KERNEL_HEAP_SIZE;

    let alloc_pages = KERNEL_HEAP_SIZE / PAGE_SIZE;
    let region = super::frame_allocator::alloc_contiguous(alloc_pages)
        .ok_or(KernelError::OutOfMemory)?;
    // SAFETY: the region was just allocated and is identity-mapped; it
    // is handed to the global allocator exactly once.
    unsafe {
        crate::ALLOCATOR
            .lock()
            .init(super::phys_to_ptr(region), KERNEL_HEAP_SIZE);
    }

    let kmalloc_region = super::frame_allocator::alloc_contiguous(KMALLOC_PAGES)
        .ok_or(KernelError::OutOfMemory)?;
    KERNEL_HEAP
        .lock()
        .init(kmalloc_region.as_usize(), KMALLOC_PAGES);
    log::info!(
        target: "heap",
        "{} KiB global + {} KiB kmalloc",
        KERNEL_HEAP_SIZE / 1024,
        KMALLOC_PAGES * PAGE_SIZE / 1024
    );
    Ok(())
}

/// Arm the global kmalloc heap over a leaked host buffer so process
/// creation paths can run in host tests. Idempotent.
#[cfg(not(target_os = "none"))]
pub fn init_for_host_tests() {
    use alloc::vec;

    let mut heap = KERNEL_HEAP.lock();
    if heap.pages != 0 {
        return;
    }
    let backing = vec![0u8; (KMALLOC_PAGES + 1) * PAGE_SIZE].leak();
    let base = super::page_align_up(backing.as_mut_ptr() as usize);
    heap.init(base, KMALLOC_PAGES);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::vec;

    use super::*;

    fn heap(pages: usize) -> (KernelHeap, &'static mut [u8]) {
        let backing = vec![0u8; (pages + 1) * PAGE_SIZE].leak();
        let base = crate::mm::page_align_up(backing.as_mut_ptr() as usize);
        let mut h = KernelHeap::empty();
        h.init(base, pages);
        (h, backing)
    }

    #[test]
    fn alloc_rounds_up_to_pages() {
        let (mut h, _keep) = heap(8);
        let p = h.alloc(1).unwrap();
        assert_eq!(h.stats().1, 1);
        // One page of payload plus the header needs two pages.
        let q = h.alloc(PAGE_SIZE).unwrap();
        assert_eq!(h.stats().1, 3);
        // SAFETY: both pointers come from this heap.
        unsafe {
            h.free(p);
            h.free(q);
        }
        assert_eq!(h.stats().1, 0);
    }

    #[test]
    fn freed_pages_are_reused() {
        let (mut h, _keep) = heap(4);
        let p = h.alloc(PAGE_SIZE * 2).unwrap();
        // SAFETY: p comes from this heap.
        unsafe { h.free(p) };
        let q = h.alloc(PAGE_SIZE * 2).unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let (mut h, _keep) = heap(2);
        let _p = h.alloc(PAGE_SIZE).unwrap(); // 2 pages with header
        assert_eq!(h.alloc(1), Err(KernelError::OutOfMemory));
    }

    #[test]
    #[should_panic(expected = "bad magic")]
    fn corrupted_header_is_fatal() {
        let (mut h, _keep) = heap(4);
        let p = h.alloc(16).unwrap();
        // Stomp the header.
        // SAFETY: test intentionally corrupts its own allocation.
        unsafe {
            (p.sub(HEADER_SIZE) as *mut u32).write(0x1234_5678);
            h.free(p);
        }
    }

    #[test]
    #[should_panic(expected = "bad magic")]
    fn double_free_is_caught_by_poisoned_magic() {
        let (mut h, _keep) = heap(4);
        let p = h.alloc(16).unwrap();
        // SAFETY: first free is legitimate; the second is the bug under test.
        unsafe {
            h.free(p);
            h.free(p);
        }
    }
}
