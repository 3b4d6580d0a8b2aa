//! Address-space and user-validation flows driven end to end on the
//! host: Sv39 walks over heap-backed tables, kernel-half sharing, and
//! the pointer checks every syscall depends on.

use cinder_kernel::config::{PAGE_SIZE, USER_BASE};
use cinder_kernel::mm::page_table::PageTableNode;
use cinder_kernel::mm::user::UserAccess;
use cinder_kernel::mm::{AddressSpace, FrameSource, PhysAddr, PteFlags, VirtAddr, VmaFlags, VmaMap};

/// Heap-backed frames standing in for physical memory.
struct HeapFrames;

impl FrameSource for HeapFrames {
    fn alloc_frame(&mut self) -> Option<PhysAddr> {
        let node = Box::new(PageTableNode::zeroed());
        Some(PhysAddr::new(Box::into_raw(node) as usize))
    }

    fn free_frame(&mut self, pa: PhysAddr) {
        // SAFETY: every frame handed out above came from Box::into_raw.
        unsafe {
            drop(Box::from_raw(pa.as_usize() as *mut PageTableNode));
        }
    }
}

#[test]
fn process_image_mapping_roundtrip() {
    let mut frames = HeapFrames;
    let mut space = AddressSpace::new(&mut frames).unwrap();

    // A three-page "image" plus a stack page, mapped like the loader
    // does: text R+X, data R+W, stack R+W.
    let text = frames.alloc_frame().unwrap();
    let data = frames.alloc_frame().unwrap();
    let stack = frames.alloc_frame().unwrap();
    let text_va = VirtAddr::new(USER_BASE + 0x1_0000);
    let data_va = VirtAddr::new(USER_BASE + 0x1_1000);
    let stack_va = VirtAddr::new(USER_BASE + 0x40_0000);

    space
        .map(text_va, text, PteFlags::READ | PteFlags::EXEC | PteFlags::USER, &mut frames)
        .unwrap();
    space
        .map(data_va, data, PteFlags::READ | PteFlags::WRITE | PteFlags::USER, &mut frames)
        .unwrap();
    space
        .map(stack_va, stack, PteFlags::READ | PteFlags::WRITE | PteFlags::USER, &mut frames)
        .unwrap();

    // Translation honors page offsets.
    assert_eq!(
        space.translate(VirtAddr::new(text_va.as_usize() + 0x42)),
        Some(PhysAddr::new(text.as_usize() + 0x42))
    );
    // Permissions are per page.
    assert!(space.leaf_flags(text_va).unwrap().contains(PteFlags::EXEC));
    assert!(!space.leaf_flags(data_va).unwrap().contains(PteFlags::EXEC));

    // Unmapping makes the page invisible again; the law holds per page.
    let freed = space.unmap(data_va).unwrap();
    assert_eq!(freed, data);
    assert_eq!(space.translate(data_va), None);
    assert_eq!(
        space.translate(text_va),
        Some(PhysAddr::new(text.as_usize()))
    );

    frames.free_frame(data);
    frames.free_frame(space.unmap(text_va).unwrap());
    frames.free_frame(space.unmap(stack_va).unwrap());
    space.teardown(&mut frames);
}

#[test]
fn syscall_pointer_validation_via_vma_map() {
    // The exact checks sys_read/sys_write perform before touching a
    // user buffer.
    let mut vmas = VmaMap::new();
    let ro = VmaFlags::READ | VmaFlags::USER;
    let rw = VmaFlags::READ | VmaFlags::WRITE | VmaFlags::USER;
    vmas.insert(USER_BASE + 0x1000, USER_BASE + 0x3000, ro).unwrap();
    vmas.insert(USER_BASE + 0x3000, USER_BASE + 0x5000, rw).unwrap();

    let user = UserAccess::new(&vmas);
    // Read-only text region: readable, not writable.
    assert!(user.validate(USER_BASE + 0x1800, 64, VmaFlags::READ).is_ok());
    assert!(user.validate(USER_BASE + 0x1800, 64, VmaFlags::WRITE).is_err());
    // A buffer spanning the ro/rw boundary is readable end to end but
    // not writable end to end.
    assert!(user
        .validate(USER_BASE + 0x2F00, 0x200, VmaFlags::READ)
        .is_ok());
    assert!(user
        .validate(USER_BASE + 0x2F00, 0x200, VmaFlags::WRITE)
        .is_err());
    // Outside any region: rejected with the fault error.
    assert!(user.validate(USER_BASE, 8, VmaFlags::READ).is_err());
    // Zero-length still requires a mapped base address.
    assert!(user.validate(USER_BASE + 0x1000, 0, VmaFlags::READ).is_ok());
    assert!(user.validate(USER_BASE + 0x9000, 0, VmaFlags::READ).is_err());
}

#[test]
fn fork_style_copy_produces_equal_but_distinct_mappings() {
    // The structure of the fork copy loop: walk the parent's VMAs,
    // allocate a fresh frame per mapped page, map it with the parent's
    // leaf flags. Child mappings must resolve to different frames.
    let mut frames = HeapFrames;
    let mut parent = AddressSpace::new(&mut frames).unwrap();
    let mut vmas = VmaMap::new();
    let flags = PteFlags::READ | PteFlags::WRITE | PteFlags::USER;
    let start = USER_BASE + 0x2_0000;
    for idx in 0..4 {
        let pa = frames.alloc_frame().unwrap();
        parent
            .map(VirtAddr::new(start + idx * PAGE_SIZE), pa, flags, &mut frames)
            .unwrap();
    }
    vmas.insert(start, start + 4 * PAGE_SIZE, VmaFlags::READ | VmaFlags::WRITE | VmaFlags::USER)
        .unwrap();

    let mut child = AddressSpace::new(&mut frames).unwrap();
    for area in vmas.areas() {
        let mut va = area.start;
        while va < area.end {
            let vaddr = VirtAddr::new(va);
            if let Some(_pa) = parent.translate(vaddr) {
                let leaf = parent.leaf_flags(vaddr).unwrap();
                let copy = frames.alloc_frame().unwrap();
                child.map(vaddr, copy, leaf, &mut frames).unwrap();
            }
            va += PAGE_SIZE;
        }
    }

    for idx in 0..4 {
        let va = VirtAddr::new(start + idx * PAGE_SIZE);
        let parent_pa = parent.translate(va).unwrap();
        let child_pa = child.translate(va).unwrap();
        assert_ne!(parent_pa, child_pa, "fork must not share user frames");
        assert_eq!(parent.leaf_flags(va), child.leaf_flags(va));
    }

    for idx in 0..4 {
        let va = VirtAddr::new(start + idx * PAGE_SIZE);
        frames.free_frame(parent.unmap(va).unwrap());
        frames.free_frame(child.unmap(va).unwrap());
    }
    parent.teardown(&mut frames);
    child.teardown(&mut frames);
}
