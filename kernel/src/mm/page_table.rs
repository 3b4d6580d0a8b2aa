//! Sv39 page tables and the address-space manager
//!
//! Three translation levels, 512 entries per node, 4 KiB leaves only
//! (no superpages). An [`AddressSpace`] owns its root, every
//! intermediate node it allocated, and the user data frames registered
//! with it; the kernel half of a process root is shared by copying the
//! kernel template's root entries, which works because user space is
//! confined to a single root entry (see `config`).
//!
//! Table nodes are reached through the identity map, so the walk code
//! also runs on the host where a test `FrameSource` hands out heap
//! memory in place of physical frames.

use alloc::vec::Vec;
use bitflags::bitflags;

use super::{phys_to_ptr, PhysAddr, VirtAddr};
use crate::config::{PAGE_SIZE, USER_BASE};
use crate::error::{KernelError, KernelResult};

bitflags! {
    /// Sv39 page-table entry flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: usize {
        const VALID    = 1 << 0;
        const READ     = 1 << 1;
        const WRITE    = 1 << 2;
        const EXEC     = 1 << 3;
        const USER     = 1 << 4;
        const GLOBAL   = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY    = 1 << 7;
    }
}

/// One Sv39 page-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Pte(usize);

impl Pte {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Leaf entry mapping a frame. A and D are set eagerly: the virt
    /// machine faults on access to pages without them instead of
    /// managing the bits in hardware.
    pub fn leaf(pa: PhysAddr, flags: PteFlags) -> Self {
        let flags = flags | PteFlags::VALID | PteFlags::ACCESSED | PteFlags::DIRTY;
        Self((pa.ppn() << 10) | flags.bits())
    }

    /// Non-leaf entry pointing at the next-level node.
    pub fn table(pa: PhysAddr) -> Self {
        Self((pa.ppn() << 10) | PteFlags::VALID.bits())
    }

    pub fn is_valid(&self) -> bool {
        self.0 & PteFlags::VALID.bits() != 0
    }

    /// A valid entry with any of R/W/X set is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.is_valid()
            && self.0 & (PteFlags::READ | PteFlags::WRITE | PteFlags::EXEC).bits() != 0
    }

    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & 0x3FF)
    }

    pub fn phys(&self) -> PhysAddr {
        PhysAddr::new((self.0 >> 10) << 12)
    }
}

/// A 512-entry translation node.
#[repr(C, align(4096))]
pub struct PageTableNode {
    pub entries: [Pte; 512],
}

impl PageTableNode {
    pub const fn zeroed() -> Self {
        Self {
            entries: [Pte::empty(); 512],
        }
    }
}

/// Where an address space gets and returns physical frames: zeroed
/// frames for new table nodes on the way in, and every owned frame
/// (table nodes and user data alike) on teardown. The kernel uses the
/// global frame pool; host tests substitute heap-backed frames.
pub trait FrameSource {
    /// A zeroed, identity-accessible frame.
    fn alloc_frame(&mut self) -> Option<PhysAddr>;
    fn free_frame(&mut self, pa: PhysAddr);
}

/// `FrameSource` over the global physical frame pool.
pub struct PmmFrames;

impl FrameSource for PmmFrames {
    fn alloc_frame(&mut self) -> Option<PhysAddr> {
        super::frame_allocator::alloc_frame()
    }

    fn free_frame(&mut self, pa: PhysAddr) {
        super::frame_allocator::free_frame(pa);
    }
}

/// Root entry index owned by user space (everything else is kernel).
const USER_ROOT_INDEX: usize = (USER_BASE >> 30) & 0x1FF;

/// Virtual page number at `level` (2 = root).
fn vpn(va: VirtAddr, level: usize) -> usize {
    (va.as_usize() >> (12 + 9 * level)) & 0x1FF
}

fn node_ref(pa: PhysAddr) -> &'static PageTableNode {
    // SAFETY: `pa` was produced by a FrameSource, so it names a live,
    // aligned, identity-accessible node.
    unsafe { &*(phys_to_ptr(pa) as *const PageTableNode) }
}

#[allow(clippy::mut_from_ref)]
fn node_mut(pa: PhysAddr) -> &'static mut PageTableNode {
    // SAFETY: as above; callers hold the address space exclusively
    // (`&mut self`), so no aliased mutation occurs.
    unsafe { &mut *(phys_to_ptr(pa) as *mut PageTableNode) }
}

/// A Sv39 translation tree plus ownership bookkeeping.
pub struct AddressSpace {
    root: PhysAddr,
    /// Every node frame this space allocated, the root included.
    table_frames: Vec<PhysAddr>,
    /// User data frames owned by this space (freed on teardown).
    user_frames: Vec<PhysAddr>,
}

impl AddressSpace {
    /// Allocate an empty space (root only).
    pub fn new(frames: &mut dyn FrameSource) -> KernelResult<Self> {
        let root = frames.alloc_frame().ok_or(KernelError::OutOfMemory)?;
        let mut table_frames = Vec::new();
        table_frames.push(root);
        Ok(Self {
            root,
            table_frames,
            user_frames: Vec::new(),
        })
    }

    /// Physical page number of the root, in satp form.
    pub fn root_ppn(&self) -> usize {
        self.root.ppn()
    }

    /// Create a 4 KiB leaf for `va -> pa`. Intermediate nodes are
    /// allocated as needed; mapping over an existing leaf is an error.
    pub fn map(
        &mut self,
        va: VirtAddr,
        pa: PhysAddr,
        flags: PteFlags,
        frames: &mut dyn FrameSource,
    ) -> KernelResult<()> {
        let mut node_pa = self.root;
        for level in [2, 1] {
            let idx = vpn(va, level);
            let entry = node_ref(node_pa).entries[idx];
            if !entry.is_valid() {
                let child = frames.alloc_frame().ok_or(KernelError::OutOfMemory)?;
                self.table_frames.push(child);
                node_mut(node_pa).entries[idx] = Pte::table(child);
                node_pa = child;
            } else if entry.is_leaf() {
                return Err(KernelError::AlreadyExists);
            } else {
                node_pa = entry.phys();
            }
        }
        let idx = vpn(va, 0);
        let slot = &mut node_mut(node_pa).entries[idx];
        if slot.is_valid() {
            return Err(KernelError::AlreadyExists);
        }
        *slot = Pte::leaf(pa, flags);
        Ok(())
    }

    /// Map `count` consecutive pages starting at `va -> pa`.
    pub fn map_range(
        &mut self,
        va: VirtAddr,
        pa: PhysAddr,
        count: usize,
        flags: PteFlags,
        frames: &mut dyn FrameSource,
    ) -> KernelResult<()> {
        for i in 0..count {
            self.map(
                VirtAddr::new(va.as_usize() + i * PAGE_SIZE),
                PhysAddr::new(pa.as_usize() + i * PAGE_SIZE),
                flags,
                frames,
            )?;
        }
        Ok(())
    }

    /// Clear the leaf for `va` and flush its TLB entry, returning the
    /// frame that was mapped there. Intermediate nodes are never
    /// collapsed.
    pub fn unmap(&mut self, va: VirtAddr) -> KernelResult<PhysAddr> {
        let mut node_pa = self.root;
        for level in [2, 1] {
            let entry = node_ref(node_pa).entries[vpn(va, level)];
            if !entry.is_valid() || entry.is_leaf() {
                return Err(KernelError::NotFound);
            }
            node_pa = entry.phys();
        }
        let slot = &mut node_mut(node_pa).entries[vpn(va, 0)];
        if !slot.is_valid() {
            return Err(KernelError::NotFound);
        }
        let pa = slot.phys();
        *slot = Pte::empty();
        crate::arch::flush_tlb_page(va.page_base().as_usize());
        Ok(pa)
    }

    /// Translate a virtual address, honoring the page offset.
    pub fn translate(&self, va: VirtAddr) -> Option<PhysAddr> {
        let mut node_pa = self.root;
        for level in [2, 1] {
            let entry = node_ref(node_pa).entries[vpn(va, level)];
            if !entry.is_valid() || entry.is_leaf() {
                return None;
            }
            node_pa = entry.phys();
        }
        let entry = node_ref(node_pa).entries[vpn(va, 0)];
        if !entry.is_leaf() {
            return None;
        }
        Some(PhysAddr::new(entry.phys().as_usize() + va.page_offset()))
    }

    /// Leaf flags for `va`, if mapped. Used by the fork copy loop.
    pub fn leaf_flags(&self, va: VirtAddr) -> Option<PteFlags> {
        let mut node_pa = self.root;
        for level in [2, 1] {
            let entry = node_ref(node_pa).entries[vpn(va, level)];
            if !entry.is_valid() || entry.is_leaf() {
                return None;
            }
            node_pa = entry.phys();
        }
        let entry = node_ref(node_pa).entries[vpn(va, 0)];
        if entry.is_leaf() {
            Some(entry.flags())
        } else {
            None
        }
    }

    /// Copy the kernel template's root entries into this root, leaving
    /// the user entry untouched. The subtrees stay owned by the kernel
    /// space; this space will never free them.
    pub fn share_kernel_half(&mut self, kernel: &AddressSpace) -> KernelResult<()> {
        let src = node_ref(kernel.root);
        let dst = node_mut(self.root);
        for idx in 0..512 {
            if idx != USER_ROOT_INDEX {
                dst.entries[idx] = src.entries[idx];
            }
        }
        Ok(())
    }

    /// Record a user data frame as owned by this space.
    pub fn track_user_frame(&mut self, pa: PhysAddr) {
        self.user_frames.push(pa);
    }

    /// Record a contiguous run of user data frames.
    pub fn track_user_frames(&mut self, pa: PhysAddr, count: usize) {
        for i in 0..count {
            self.user_frames.push(PhysAddr::new(pa.as_usize() + i * PAGE_SIZE));
        }
    }

    /// Stop tracking (and return) the user frame at `pa`, if tracked.
    pub fn untrack_user_frame(&mut self, pa: PhysAddr) -> bool {
        if let Some(pos) = self.user_frames.iter().position(|f| *f == pa) {
            self.user_frames.swap_remove(pos);
            true
        } else {
            false
        }
    }

    /// Iterate the user frames owned by this space.
    pub fn user_frames(&self) -> &[PhysAddr] {
        &self.user_frames
    }

    /// Point `satp` at this space and flush the TLB.
    pub fn activate(&self) {
        crate::arch::switch_satp(self.root_ppn());
    }

    /// Free every owned frame: user data first, then the translation
    /// nodes this space allocated (shared kernel subtrees are not in
    /// that list). The space is unusable afterwards.
    pub fn teardown(&mut self, frames: &mut dyn FrameSource) {
        for pa in self.user_frames.drain(..) {
            frames.free_frame(pa);
        }
        for pa in self.table_frames.drain(..) {
            frames.free_frame(pa);
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::boxed::Box;

    use super::*;

    /// Frame source handing out heap-backed "frames" whose addresses
    /// stand in for physical addresses (the walk goes through the
    /// identity map either way).
    struct HeapFrames {
        live: usize,
    }

    impl HeapFrames {
        fn new() -> Self {
            Self { live: 0 }
        }
    }

    impl FrameSource for HeapFrames {
        fn alloc_frame(&mut self) -> Option<PhysAddr> {
            self.live += 1;
            let node = Box::new(PageTableNode::zeroed());
            Some(PhysAddr::new(Box::into_raw(node) as usize))
        }

        fn free_frame(&mut self, pa: PhysAddr) {
            self.live -= 1;
            // SAFETY: every frame freed here came from Box::into_raw in
            // alloc_frame above.
            unsafe {
                drop(Box::from_raw(pa.as_usize() as *mut PageTableNode));
            }
        }
    }

    const RW_USER: PteFlags = PteFlags::READ.union(PteFlags::WRITE).union(PteFlags::USER);

    #[test]
    fn map_translate_unmap_roundtrip() {
        let mut frames = HeapFrames::new();
        let mut space = AddressSpace::new(&mut frames).unwrap();
        let frame = frames.alloc_frame().unwrap();
        let va = VirtAddr::new(USER_BASE + 0x5000);

        space.map(va, frame, RW_USER, &mut frames).unwrap();
        assert_eq!(space.translate(va), Some(frame));
        assert_eq!(
            space.translate(VirtAddr::new(va.as_usize() + 0x123)),
            Some(PhysAddr::new(frame.as_usize() + 0x123))
        );

        let unmapped = space.unmap(va).unwrap();
        assert_eq!(unmapped, frame);
        assert_eq!(space.translate(va), None);

        frames.free_frame(frame);
        space.teardown(&mut frames);
        assert_eq!(frames.live, 0);
    }

    #[test]
    fn double_map_is_rejected() {
        let mut frames = HeapFrames::new();
        let mut space = AddressSpace::new(&mut frames).unwrap();
        let frame = frames.alloc_frame().unwrap();
        let va = VirtAddr::new(USER_BASE);
        space.map(va, frame, RW_USER, &mut frames).unwrap();
        assert_eq!(
            space.map(va, frame, RW_USER, &mut frames),
            Err(KernelError::AlreadyExists)
        );
        frames.free_frame(space.unmap(va).unwrap());
        space.teardown(&mut frames);
    }

    #[test]
    fn unmap_of_unmapped_is_not_found() {
        let mut frames = HeapFrames::new();
        let mut space = AddressSpace::new(&mut frames).unwrap();
        assert_eq!(
            space.unmap(VirtAddr::new(USER_BASE)),
            Err(KernelError::NotFound)
        );
        space.teardown(&mut frames);
    }

    #[test]
    fn kernel_half_is_shared_by_entry_copy() {
        let mut frames = HeapFrames::new();
        let mut kernel = AddressSpace::new(&mut frames).unwrap();
        // A "kernel" mapping outside the user gigabyte.
        let kframe = frames.alloc_frame().unwrap();
        let kva = VirtAddr::new(0x8000_0000);
        kernel
            .map(kva, kframe, PteFlags::READ | PteFlags::WRITE, &mut frames)
            .unwrap();

        let mut proc = AddressSpace::new(&mut frames).unwrap();
        proc.share_kernel_half(&kernel).unwrap();
        assert_eq!(proc.translate(kva), Some(kframe));
        // The user entry stays per-process.
        assert_eq!(proc.translate(VirtAddr::new(USER_BASE)), None);

        // Tearing down the process space must not free kernel subtrees.
        proc.teardown(&mut frames);
        assert_eq!(kernel.translate(kva), Some(kframe));

        frames.free_frame(kernel.unmap(kva).unwrap());
        kernel.teardown(&mut frames);
        assert_eq!(frames.live, 0);
    }

    #[test]
    fn leaf_flags_reports_mapping_permissions() {
        let mut frames = HeapFrames::new();
        let mut space = AddressSpace::new(&mut frames).unwrap();
        let frame = frames.alloc_frame().unwrap();
        let va = VirtAddr::new(USER_BASE + 0x2000);
        space
            .map(va, frame, PteFlags::READ | PteFlags::EXEC | PteFlags::USER, &mut frames)
            .unwrap();
        let flags = space.leaf_flags(va).unwrap();
        assert!(flags.contains(PteFlags::EXEC));
        assert!(!flags.contains(PteFlags::WRITE));
        frames.free_frame(space.unmap(va).unwrap());
        space.teardown(&mut frames);
    }
}
