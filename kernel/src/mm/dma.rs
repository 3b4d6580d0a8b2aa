//! Physically contiguous DMA regions
//!
//! Devices need multi-page buffers that are contiguous in physical
//! memory. Allocation goes through the frame pool's first-fit
//! contiguous path; every live region is recorded in a registry so
//! ownership is auditable and double release is caught.

use alloc::vec::Vec;
use spin::Mutex;

use super::PhysAddr;
use crate::error::{KernelError, KernelResult};

/// One live DMA region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRegion {
    pub base: PhysAddr,
    pub pages: usize,
    /// Which driver owns it (for diagnostics).
    pub owner: &'static str,
}

/// Bookkeeping for live regions.
#[derive(Default)]
pub struct DmaRegistry {
    regions: Vec<DmaRegion>,
}

impl DmaRegistry {
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Record a region. Overlap with a live region is a kernel bug.
    pub fn insert(&mut self, region: DmaRegion) {
        let new_end = region.base.as_usize() + region.pages * crate::config::PAGE_SIZE;
        for live in &self.regions {
            let live_end = live.base.as_usize() + live.pages * crate::config::PAGE_SIZE;
            if region.base.as_usize() < live_end && live.base.as_usize() < new_end {
                panic!("overlapping DMA regions at {:#x}", region.base.as_usize());
            }
        }
        self.regions.push(region);
    }

    /// Remove the region starting at `base`.
    pub fn remove(&mut self, base: PhysAddr) -> KernelResult<DmaRegion> {
        let pos = self
            .regions
            .iter()
            .position(|r| r.base == base)
            .ok_or(KernelError::NotFound)?;
        Ok(self.regions.swap_remove(pos))
    }

    /// Region containing `pa`, if any.
    pub fn find(&self, pa: PhysAddr) -> Option<&DmaRegion> {
        self.regions.iter().find(|r| {
            pa >= r.base
                && pa.as_usize() < r.base.as_usize() + r.pages * crate::config::PAGE_SIZE
        })
    }

    /// Total pages held in live regions (frame-conservation audits).
    pub fn total_pages(&self) -> usize {
        self.regions.iter().map(|r| r.pages).sum()
    }
}

static REGISTRY: Mutex<DmaRegistry> = Mutex::new(DmaRegistry::new());

/// Allocate a zeroed, physically contiguous region of `pages` pages.
pub fn alloc_region(pages: usize, owner: &'static str) -> KernelResult<DmaRegion> {
    if pages == 0 {
        return Err(KernelError::InvalidArgument);
    }
    let base = super::frame_allocator::alloc_contiguous(pages).ok_or(KernelError::OutOfMemory)?;
    let region = DmaRegion { base, pages, owner };
    REGISTRY.lock().insert(region);
    Ok(region)
}

/// Release a region previously obtained from `alloc_region`.
pub fn release_region(base: PhysAddr) -> KernelResult<()> {
    let region = REGISTRY.lock().remove(base)?;
    super::frame_allocator::free_contiguous(region.base, region.pages);
    Ok(())
}

/// Pages currently held by DMA regions.
pub fn pages_in_use() -> usize {
    REGISTRY.lock().total_pages()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;

    fn region(base: usize, pages: usize) -> DmaRegion {
        DmaRegion {
            base: PhysAddr::new(base),
            pages,
            owner: "test",
        }
    }

    #[test]
    fn insert_find_remove() {
        let mut reg = DmaRegistry::new();
        reg.insert(region(0x8010_0000, 4));
        reg.insert(region(0x8020_0000, 2));
        assert_eq!(reg.total_pages(), 6);
        assert!(reg.find(PhysAddr::new(0x8010_2000)).is_some());
        assert!(reg.find(PhysAddr::new(0x8030_0000)).is_none());
        let removed = reg.remove(PhysAddr::new(0x8010_0000)).unwrap();
        assert_eq!(removed.pages, 4);
        assert_eq!(
            reg.remove(PhysAddr::new(0x8010_0000)),
            Err(KernelError::NotFound)
        );
    }

    #[test]
    #[should_panic(expected = "overlapping DMA regions")]
    fn overlap_is_fatal() {
        let mut reg = DmaRegistry::new();
        reg.insert(region(0x8010_0000, 4));
        reg.insert(region(0x8010_0000 + 2 * PAGE_SIZE, 1));
    }
}
