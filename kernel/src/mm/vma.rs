//! Virtual memory areas
//!
//! Per process, an ordered list of non-overlapping `(start, end, flags)`
//! regions. Every syscall that touches user memory validates the
//! pointer against this map before dereferencing anything.

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::config::{USER_BASE, USER_TOP};

bitflags! {
    /// Access flags of a region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmaFlags: u32 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        const EXEC   = 1 << 2;
        const USER   = 1 << 3;
        const SHARED = 1 << 4;
    }
}

/// One mapped region, `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vma {
    pub start: usize,
    pub end: usize,
    pub flags: VmaFlags,
}

impl Vma {
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Ordered, non-overlapping region list. The list is short (an image
/// region per segment, heap, stack, a few mmaps), so scans are linear.
#[derive(Debug, Clone, Default)]
pub struct VmaMap {
    areas: Vec<Vma>,
}

impl VmaMap {
    pub const fn new() -> Self {
        Self { areas: Vec::new() }
    }

    /// Insert a region; rejects empty, out-of-user-range, and
    /// overlapping regions, and keeps the list ordered by start.
    pub fn insert(&mut self, start: usize, end: usize, flags: VmaFlags) -> Result<(), ()> {
        if start >= end || start < USER_BASE || end > USER_TOP {
            return Err(());
        }
        let pos = self.areas.partition_point(|a| a.start < start);
        if pos > 0 && self.areas[pos - 1].end > start {
            return Err(());
        }
        if pos < self.areas.len() && self.areas[pos].start < end {
            return Err(());
        }
        self.areas.insert(pos, Vma { start, end, flags });
        Ok(())
    }

    /// The region containing `addr`, if any.
    pub fn find(&self, addr: usize) -> Option<&Vma> {
        self.areas.iter().find(|a| a.contains(addr))
    }

    /// Detach the region starting exactly at `start`. The caller unmaps
    /// the pages.
    pub fn remove(&mut self, start: usize) -> Option<Vma> {
        let pos = self.areas.iter().position(|a| a.start == start)?;
        Some(self.areas.remove(pos))
    }

    /// Grow or shrink the region starting at `start` to a new end.
    pub fn resize(&mut self, start: usize, new_end: usize) -> Result<(), ()> {
        let pos = match self.areas.iter().position(|a| a.start == start) {
            Some(p) => p,
            None => return Err(()),
        };
        if new_end <= start || new_end > USER_TOP {
            return Err(());
        }
        if pos + 1 < self.areas.len() && self.areas[pos + 1].start < new_end {
            return Err(());
        }
        self.areas[pos].end = new_end;
        Ok(())
    }

    /// True iff `[ptr, ptr + len)` is covered by regions (one or more,
    /// contiguous) whose flags all include `required`.
    pub fn validate_user_range(&self, ptr: usize, len: usize, required: VmaFlags) -> bool {
        if len == 0 {
            return self
                .find(ptr)
                .map(|a| a.flags.contains(required))
                .unwrap_or(false);
        }
        let end = match ptr.checked_add(len) {
            Some(e) => e,
            None => return false,
        };
        let mut cursor = ptr;
        while cursor < end {
            match self.find(cursor) {
                Some(area) if area.flags.contains(required) => cursor = area.end,
                _ => return false,
            }
        }
        true
    }

    /// All regions, ordered by start.
    pub fn areas(&self) -> &[Vma] {
        &self.areas
    }

    /// Drop every region (exec teardown). The caller unmaps the pages.
    pub fn clear(&mut self) {
        self.areas.clear();
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    const RW: VmaFlags = VmaFlags::READ.union(VmaFlags::WRITE).union(VmaFlags::USER);
    const RO: VmaFlags = VmaFlags::READ.union(VmaFlags::USER);

    fn base(off: usize) -> usize {
        USER_BASE + off
    }

    #[test]
    fn insert_keeps_order_and_rejects_overlap() {
        let mut map = VmaMap::new();
        map.insert(base(0x3000), base(0x4000), RW).unwrap();
        map.insert(base(0x1000), base(0x2000), RW).unwrap();
        assert_eq!(map.areas()[0].start, base(0x1000));
        assert_eq!(map.areas()[1].start, base(0x3000));

        // Overlapping tail, head, and containment are all rejected.
        assert!(map.insert(base(0x1800), base(0x2800), RW).is_err());
        assert!(map.insert(base(0x2800), base(0x3800), RW).is_err());
        assert!(map.insert(base(0x0000), base(0x8000), RW).is_err());
        // Exactly abutting is fine.
        map.insert(base(0x2000), base(0x3000), RO).unwrap();
        assert_eq!(map.areas().len(), 3);
    }

    #[test]
    fn out_of_user_range_is_rejected() {
        let mut map = VmaMap::new();
        assert!(map.insert(USER_BASE - 0x1000, USER_BASE, RW).is_err());
        assert!(map.insert(USER_TOP - 0x1000, USER_TOP + 0x1000, RW).is_err());
        assert!(map.insert(base(0x1000), base(0x1000), RW).is_err());
    }

    #[test]
    fn validate_spans_contiguous_areas() {
        let mut map = VmaMap::new();
        map.insert(base(0x1000), base(0x2000), RW).unwrap();
        map.insert(base(0x2000), base(0x3000), RW).unwrap();
        assert!(map.validate_user_range(base(0x1800), 0x1000, VmaFlags::READ));
        // A hole breaks coverage.
        map.insert(base(0x4000), base(0x5000), RW).unwrap();
        assert!(!map.validate_user_range(base(0x2800), 0x2000, VmaFlags::READ));
    }

    #[test]
    fn validate_checks_flags() {
        let mut map = VmaMap::new();
        map.insert(base(0x1000), base(0x2000), RO).unwrap();
        assert!(map.validate_user_range(base(0x1000), 16, VmaFlags::READ));
        assert!(!map.validate_user_range(base(0x1000), 16, VmaFlags::WRITE));
    }

    #[test]
    fn remove_and_resize() {
        let mut map = VmaMap::new();
        map.insert(base(0x1000), base(0x2000), RW).unwrap();
        map.insert(base(0x4000), base(0x5000), RW).unwrap();
        map.resize(base(0x1000), base(0x3000)).unwrap();
        assert!(map.validate_user_range(base(0x2800), 8, VmaFlags::READ));
        // Growing into the next region fails.
        assert!(map.resize(base(0x1000), base(0x4800)).is_err());
        let removed = map.remove(base(0x1000)).unwrap();
        assert_eq!(removed.end, base(0x3000));
        assert!(map.find(base(0x1800)).is_none());
    }
}
