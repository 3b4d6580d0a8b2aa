//! Process creation from ELF images
//!
//! The loader builds a complete user image (address space, frames,
//! mappings, VMAs, argv-carrying stack) as a detached [`LoadedImage`]
//! before anything is committed to a PCB. Spawn commits it into a fresh
//! EMBRYO process; exec commits it into the calling process after the
//! old image is torn down. Either way, failure before the commit point
//! leaves no trace.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use super::{table, Pid, ProcessState};
use crate::config::{PAGE_SIZE, USER_MMAP_BASE, USER_STACK_PAGES, USER_TOP};
use crate::elf::{self, ElfImage};
use crate::error::{KernelError, KernelResult};
use crate::mm::{
    self, frame_allocator, AddressSpace, PhysAddr, PmmFrames, PteFlags, VirtAddr, VmaFlags, VmaMap,
};
use crate::trap::TrapFrame;

/// A fully built user image, not yet attached to any PCB.
pub struct LoadedImage {
    pub space: AddressSpace,
    pub vmas: VmaMap,
    pub entry: usize,
    pub user_sp: usize,
    pub argc: usize,
    pub argv_ptr: usize,
    /// First byte past the image (heap start).
    pub image_end: usize,
    /// Lowest address of the stack mapping.
    pub stack_base: usize,
}

impl LoadedImage {
    /// Release every frame if the image is abandoned before commit.
    pub fn discard(mut self) {
        self.space.teardown(&mut PmmFrames);
    }
}

/// Per-page VMA/PTE flags derived from the segments covering the page.
fn page_flags(image: &ElfImage, page_va: usize) -> Option<(PteFlags, VmaFlags)> {
    let mut pte = PteFlags::USER;
    let mut vma = VmaFlags::USER;
    let mut covered = false;
    for seg in &image.segments {
        let seg_lo = mm::page_align_down(seg.vaddr);
        let seg_hi = mm::page_align_up(seg.vaddr + seg.memsz);
        if page_va >= seg_lo && page_va < seg_hi {
            covered = true;
            if seg.readable() {
                pte |= PteFlags::READ;
                vma |= VmaFlags::READ;
            }
            if seg.writable() {
                pte |= PteFlags::WRITE;
                vma |= VmaFlags::WRITE;
            }
            if seg.executable() {
                pte |= PteFlags::EXEC;
                vma |= VmaFlags::EXEC;
            }
        }
    }
    covered.then_some((pte, vma))
}

/// Copy bytes into a physical region through the identity map.
///
/// # Safety
///
/// `base` must be an owned, identity-mapped frame run large enough for
/// `offset + data.len()`.
unsafe fn copy_to_phys(base: PhysAddr, offset: usize, data: &[u8]) {
    // SAFETY: contract delegated to the caller.
    unsafe {
        core::ptr::copy_nonoverlapping(
            data.as_ptr(),
            mm::phys_to_ptr(PhysAddr::new(base.as_usize() + offset)),
            data.len(),
        );
    }
}

/// Build the user half for `image`, with `argv` laid out on the stack.
pub fn load_image(image: &ElfImage, file: &[u8], argv: &[String]) -> KernelResult<LoadedImage> {
    let (lo, hi) = image.load_range();
    if lo < crate::config::USER_BASE || hi > USER_MMAP_BASE || lo >= hi {
        return Err(KernelError::InvalidArgument);
    }

    let mut space = mm::build_process_root(&mut PmmFrames)?;
    let mut vmas = VmaMap::new();

    // Physically contiguous frames for the whole load union; segment
    // bytes land at their offsets, the rest stays zero (BSS tail).
    let image_pages = (hi - lo) / PAGE_SIZE;
    let image_base = match frame_allocator::alloc_contiguous(image_pages) {
        Some(pa) => pa,
        None => {
            space.teardown(&mut PmmFrames);
            return Err(KernelError::OutOfMemory);
        }
    };
    space.track_user_frames(image_base, image_pages);

    for seg in &image.segments {
        if seg.filesz > 0 {
            // SAFETY: the run spans [lo, hi) and seg.vaddr + filesz is
            // inside it; the frames were just allocated.
            unsafe {
                copy_to_phys(
                    image_base,
                    seg.vaddr - lo,
                    &file[seg.offset..seg.offset + seg.filesz],
                );
            }
        }
    }

    // Map image pages with per-page permissions and record matching
    // VMAs, coalescing runs of equal flags.
    let mut run_start = 0usize;
    let mut run_flags: Option<(PteFlags, VmaFlags)> = None;
    for idx in 0..=image_pages {
        let va = lo + idx * PAGE_SIZE;
        let flags = if idx < image_pages {
            page_flags(image, va)
        } else {
            None
        };
        if flags != run_flags {
            if let Some((_, vma_flags)) = run_flags {
                if let Err(e) = vmas
                    .insert(lo + run_start * PAGE_SIZE, va, vma_flags)
                    .map_err(|_| KernelError::InvalidArgument)
                {
                    space.teardown(&mut PmmFrames);
                    return Err(e);
                }
            }
            run_start = idx;
            run_flags = flags;
        }
        if let Some((pte_flags, _)) = flags {
            let pa = PhysAddr::new(image_base.as_usize() + idx * PAGE_SIZE);
            if let Err(e) = space.map(VirtAddr::new(va), pa, pte_flags, &mut PmmFrames) {
                space.teardown(&mut PmmFrames);
                return Err(e);
            }
        }
    }

    // User stack at the top of the user half, grown down.
    let stack_base = USER_TOP - USER_STACK_PAGES * PAGE_SIZE;
    let mut stack_frames = Vec::with_capacity(USER_STACK_PAGES);
    for idx in 0..USER_STACK_PAGES {
        let pa = match frame_allocator::alloc_frame() {
            Some(pa) => pa,
            None => {
                space.teardown(&mut PmmFrames);
                return Err(KernelError::OutOfMemory);
            }
        };
        space.track_user_frame(pa);
        stack_frames.push(pa);
        let va = VirtAddr::new(stack_base + idx * PAGE_SIZE);
        let flags = PteFlags::READ | PteFlags::WRITE | PteFlags::USER;
        if let Err(e) = space.map(va, pa, flags, &mut PmmFrames) {
            space.teardown(&mut PmmFrames);
            return Err(e);
        }
    }
    if vmas
        .insert(
            stack_base,
            USER_TOP,
            VmaFlags::READ | VmaFlags::WRITE | VmaFlags::USER,
        )
        .is_err()
    {
        space.teardown(&mut PmmFrames);
        return Err(KernelError::InvalidArgument);
    }

    let (user_sp, argc, argv_ptr) = build_argv_stack(&stack_frames, stack_base, argv)?;

    Ok(LoadedImage {
        space,
        vmas,
        entry: image.entry,
        user_sp,
        argc,
        argv_ptr,
        image_end: hi,
        stack_base,
    })
}

/// Lay argv out at the top of the stack: string bytes first, then the
/// NULL-terminated pointer array, then alignment. Returns the initial
/// user stack pointer and the argv array address.
fn build_argv_stack(
    stack_frames: &[PhysAddr],
    stack_base: usize,
    argv: &[String],
) -> KernelResult<(usize, usize, usize)> {
    let mut sp = USER_TOP;
    let mut pointers = Vec::with_capacity(argv.len() + 1);

    let mut scratch: Vec<(usize, Vec<u8>)> = Vec::new();
    for arg in argv.iter().rev() {
        let bytes_len = arg.len() + 1;
        sp -= bytes_len;
        let mut bytes = Vec::with_capacity(bytes_len);
        bytes.extend_from_slice(arg.as_bytes());
        bytes.push(0);
        scratch.push((sp, bytes));
        pointers.push(sp);
    }
    pointers.reverse();
    pointers.push(0);

    // Pointer array, 16-byte aligned below the strings.
    sp &= !0xF;
    sp -= pointers.len() * core::mem::size_of::<usize>();
    sp &= !0xF;
    let argv_ptr = sp;

    if sp <= stack_base {
        return Err(KernelError::OutOfRange);
    }

    for (va, bytes) in &scratch {
        write_stack_bytes(stack_frames, stack_base, *va, bytes);
    }
    let mut ptr_bytes = Vec::with_capacity(pointers.len() * 8);
    for ptr in &pointers {
        ptr_bytes.extend_from_slice(&ptr.to_ne_bytes());
    }
    write_stack_bytes(stack_frames, stack_base, argv_ptr, &ptr_bytes);

    Ok((sp, argv.len(), argv_ptr))
}

/// Write into the not-yet-live stack mapping through its frames.
fn write_stack_bytes(stack_frames: &[PhysAddr], stack_base: usize, va: usize, data: &[u8]) {
    let mut cursor = 0;
    while cursor < data.len() {
        let addr = va + cursor;
        let page = (addr - stack_base) / PAGE_SIZE;
        let offset = addr % PAGE_SIZE;
        let chunk = (PAGE_SIZE - offset).min(data.len() - cursor);
        // SAFETY: the frame belongs to the stack run just allocated and
        // the chunk stays inside it.
        unsafe {
            core::ptr::copy_nonoverlapping(
                data.as_ptr().add(cursor),
                mm::phys_to_ptr(PhysAddr::new(stack_frames[page].as_usize() + offset)),
                chunk,
            );
        }
        cursor += chunk;
    }
}

/// Commit a loaded image into `proc` and initialize its trap frame and
/// switch context. The process becomes READY and is enqueued.
pub fn commit_image(proc: &super::Process, loaded: LoadedImage) -> KernelResult<()> {
    let frame_ptr = proc.trap_frame_ptr().ok_or(KernelError::InvalidArgument)?;
    // SAFETY: the trap-frame slot belongs to this process's kernel
    // stack and the process is not running yet (EMBRYO).
    unsafe {
        let frame = &mut *frame_ptr;
        *frame = TrapFrame::zero();
        frame.sepc = loaded.entry;
        frame.sp = loaded.user_sp;
        frame.a0 = loaded.argc;
        frame.a1 = loaded.argv_ptr;
        frame.sstatus = crate::arch::initial_user_sstatus();
    }

    {
        let mut heap = proc.heap.lock();
        heap.start = loaded.image_end;
        heap.end = loaded.image_end;
    }
    proc.user_stack_base
        .store(loaded.stack_base, core::sync::atomic::Ordering::Release);
    *proc.vmas.lock() = loaded.vmas;
    *proc.space.lock() = Some(loaded.space);

    // Fresh kernel entry: the first switch lands in task_entry, which
    // drops straight through the trap-exit path into user mode.
    let kernel_sp = proc.kernel_sp().ok_or(KernelError::InvalidArgument)?;
    // SAFETY: EMBRYO process, nothing else touches the context yet.
    unsafe {
        *proc.context_ptr() =
            crate::arch::Context::kernel_entry(crate::trap::task_entry as usize, kernel_sp);
    }
    Ok(())
}

/// Spawn a new process from the ELF at `path`.
pub fn spawn_from_path(parent: Pid, path: &str) -> KernelResult<Pid> {
    let node = crate::fs::resolve("/", path)?;
    if node.kind() != crate::fs::NodeKind::File {
        return Err(KernelError::IsADirectory);
    }
    let size = node.stat().size as usize;
    let mut data = vec![0u8; size];
    node.read(0, &mut data)?;
    spawn_from_image(parent, path, &data, &[String::from(path)])
}

/// Spawn a new process from an in-memory ELF image.
pub fn spawn_from_image(
    parent: Pid,
    name: &str,
    data: &[u8],
    argv: &[String],
) -> KernelResult<Pid> {
    let image = elf::parse(data)?;
    let proc = table::spawn_embryo(parent, String::from(name))?;
    let loaded = match load_image(&image, data, argv) {
        Ok(loaded) => loaded,
        Err(e) => {
            table::remove(proc.pid);
            return Err(e);
        }
    };
    if let Err(e) = commit_image(&proc, loaded) {
        table::remove(proc.pid);
        return Err(e);
    }

    proc.set_state(ProcessState::Ready);
    crate::sched::enqueue(proc.pid);
    log::info!(
        target: "process",
        "spawned pid {} from {} (entry {:#x})",
        proc.pid, name, image.entry
    );
    Ok(proc.pid)
}
