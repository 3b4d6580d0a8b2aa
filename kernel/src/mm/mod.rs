//! Memory management
//!
//! Owns physical frames (bitmap allocator), the Sv39 address-space
//! manager, per-process VMA bookkeeping, the page-granular kernel heap,
//! contiguous DMA regions, and validated user-memory access.

pub mod dma;
pub mod frame_allocator;
pub mod heap;
pub mod page_table;
pub mod user;
pub mod vma;

use crate::config::PAGE_SIZE;
use crate::error::KernelResult;
use crate::sync::cell::GlobalState;

pub use frame_allocator::{alloc_contiguous, alloc_frame, free_contiguous, free_frame};
pub use page_table::{AddressSpace, FrameSource, PmmFrames, PteFlags};
pub use vma::{VmaFlags, VmaMap};

/// Physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn as_usize(&self) -> usize {
        self.0
    }

    /// Physical page number (Sv39 PTE form).
    pub const fn ppn(&self) -> usize {
        self.0 >> 12
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 % PAGE_SIZE == 0
    }
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn as_usize(&self) -> usize {
        self.0
    }

    pub const fn page_base(&self) -> Self {
        Self(self.0 & !(PAGE_SIZE - 1))
    }

    pub const fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

/// Round `value` up to the next page boundary.
pub const fn page_align_up(value: usize) -> usize {
    (value + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Round `value` down to a page boundary.
pub const fn page_align_down(value: usize) -> usize {
    value & !(PAGE_SIZE - 1)
}

/// Kernel view of a physical address. The kernel identity-maps the RAM
/// window, so the cast is direct.
pub fn phys_to_ptr(pa: PhysAddr) -> *mut u8 {
    pa.as_usize() as *mut u8
}

/// Zero `count` frames starting at `pa`.
///
/// # Safety
///
/// The frames must be owned by the caller and identity-mapped (RAM
/// window only).
pub unsafe fn zero_frames(pa: PhysAddr, count: usize) {
    // SAFETY: contract delegated to the caller.
    unsafe {
        core::ptr::write_bytes(phys_to_ptr(pa), 0, count * PAGE_SIZE);
    }
}

/// Copy one frame's contents from `src` to `dst`.
///
/// # Safety
///
/// Both frames must be owned by the caller, distinct, and
/// identity-mapped.
pub unsafe fn copy_frame(dst: PhysAddr, src: PhysAddr) {
    // SAFETY: contract delegated to the caller.
    unsafe {
        core::ptr::copy_nonoverlapping(phys_to_ptr(src), phys_to_ptr(dst), PAGE_SIZE);
    }
}

/// The kernel's own address space: identity map of RAM plus the MMIO
/// windows. Process roots share its kernel-half entries.
pub static KERNEL_SPACE: GlobalState<AddressSpace> = GlobalState::new();

/// Root PPN of the kernel address space, for satp on kernel-only tasks.
pub fn kernel_root_ppn() -> Option<usize> {
    KERNEL_SPACE.with(|space| space.root_ppn())
}

/// Initialize memory management on the boot path: the frame allocator
/// over `[kernel_end, RAM_END)`, the heaps, and the kernel address
/// space, which is activated before returning.
#[cfg(target_arch = "riscv64")]
pub fn init(kernel_end: usize) -> KernelResult<()> {
    use crate::config::{RAM_BASE, RAM_END};
    use crate::error::KernelError;

    let managed_base = page_align_up(kernel_end);
    frame_allocator::init(managed_base, RAM_END);
    heap::init()?;

    let mut space = AddressSpace::new(&mut PmmFrames)?;

    // Identity map of the RAM window. Writable and executable: the
    // kernel image lives inside it.
    let ram_flags = PteFlags::READ | PteFlags::WRITE | PteFlags::EXEC | PteFlags::GLOBAL;
    space.map_range(
        VirtAddr::new(RAM_BASE),
        PhysAddr::new(RAM_BASE),
        (RAM_END - RAM_BASE) / PAGE_SIZE,
        ram_flags,
        &mut PmmFrames,
    )?;

    // MMIO windows: UART (one page) and the PLIC register file (4 MiB).
    let mmio_flags = PteFlags::READ | PteFlags::WRITE | PteFlags::GLOBAL;
    space.map_range(
        VirtAddr::new(0x1000_0000),
        PhysAddr::new(0x1000_0000),
        1,
        mmio_flags,
        &mut PmmFrames,
    )?;
    space.map_range(
        VirtAddr::new(0x0C00_0000),
        PhysAddr::new(0x0C00_0000),
        0x40_0000 / PAGE_SIZE,
        mmio_flags,
        &mut PmmFrames,
    )?;

    space.activate();
    let (total, free) = frame_allocator::stats();
    log::info!(target: "mm", "paging on, {} of {} frames free", free, total);
    KERNEL_SPACE
        .init(space)
        .map_err(|_| KernelError::AlreadyExists)?;
    Ok(())
}

/// Build a fresh process root: empty user half, kernel half shared by
/// entry copy from the kernel template.
pub fn build_process_root(frames: &mut dyn FrameSource) -> KernelResult<AddressSpace> {
    let mut space = AddressSpace::new(frames)?;
    KERNEL_SPACE
        .with(|kernel| space.share_kernel_half(kernel))
        .transpose()?;
    Ok(space)
}
