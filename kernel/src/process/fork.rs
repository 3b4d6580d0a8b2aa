//! fork: duplicate the calling process
//!
//! Eager copy: the child gets fresh frames that are bytewise copies of
//! every page the parent has mapped. The caller's trap frame is copied
//! verbatim and only the return-value register differs: 0 in the child,
//! the child's PID in the parent.

use core::sync::atomic::Ordering;

use alloc::sync::Arc;

use super::{table, Pid, Process, ProcessState};
use crate::config::PAGE_SIZE;
use crate::error::{KernelError, KernelResult};
use crate::mm::{self, frame_allocator, PmmFrames, VirtAddr};
use crate::trap::TrapFrame;

/// Fork the current process. Returns the child PID (the parent's view);
/// the child resumes in user mode with 0 in `a0`.
pub fn fork_current(parent_frame: &TrapFrame) -> KernelResult<Pid> {
    let parent = super::current().ok_or(KernelError::NoProcess)?;
    let name = parent.name.lock().clone();
    let child = table::spawn_embryo(parent.pid, name)?;

    if let Err(e) = build_child(&parent, &child, parent_frame) {
        parent.children.lock().retain(|pid| *pid != child.pid);
        table::remove(child.pid);
        return Err(e);
    }

    child.set_state(ProcessState::Ready);
    crate::sched::enqueue(child.pid);
    log::debug!(target: "process", "pid {} forked child {}", parent.pid, child.pid);
    Ok(child.pid)
}

fn build_child(
    parent: &Arc<Process>,
    child: &Arc<Process>,
    parent_frame: &TrapFrame,
) -> KernelResult<()> {
    // Address space: fresh root, then a frame-by-frame copy of every
    // mapped user page with the parent's leaf permissions.
    let mut space = mm::build_process_root(&mut PmmFrames)?;
    {
        let parent_space = parent.space.lock();
        let parent_space = parent_space.as_ref().ok_or(KernelError::InvalidArgument)?;
        let vmas = parent.vmas.lock();
        for area in vmas.areas() {
            let mut va = area.start;
            while va < area.end {
                let vaddr = VirtAddr::new(va);
                if let Some(pa) = parent_space.translate(vaddr) {
                    let flags = parent_space
                        .leaf_flags(vaddr)
                        .ok_or(KernelError::InvalidArgument)?;
                    let copy = match frame_allocator::alloc_frame() {
                        Some(pa) => pa,
                        None => {
                            space.teardown(&mut PmmFrames);
                            return Err(KernelError::OutOfMemory);
                        }
                    };
                    space.track_user_frame(copy);
                    // SAFETY: both frames are owned and identity-mapped;
                    // translate returned the page base (va is aligned).
                    unsafe {
                        mm::copy_frame(copy, pa);
                    }
                    if let Err(e) = space.map(vaddr, copy, flags, &mut PmmFrames) {
                        space.teardown(&mut PmmFrames);
                        return Err(e);
                    }
                }
                va += PAGE_SIZE;
            }
        }
        *child.vmas.lock() = vmas.clone();
    }
    *child.space.lock() = Some(space);

    // Trap frame: verbatim copy, then the one divergence.
    let child_frame_ptr = child
        .trap_frame_ptr()
        .ok_or(KernelError::InvalidArgument)?;
    // SAFETY: the slot belongs to the EMBRYO child's kernel stack.
    unsafe {
        let frame = &mut *child_frame_ptr;
        *frame = parent_frame.clone();
        frame.a0 = 0;
    }

    // Kernel context: first dispatch enters task_entry on the child's
    // own stack and returns to user through the copied frame.
    let kernel_sp = child.kernel_sp().ok_or(KernelError::InvalidArgument)?;
    // SAFETY: EMBRYO child, nothing else touches the context.
    unsafe {
        *child.context_ptr() =
            crate::arch::Context::kernel_entry(crate::trap::task_entry as usize, kernel_sp);
    }

    // Inherited state: files (refcounted), cwd, heap bounds, signal
    // dispositions (pending set stays empty), terminal.
    *child.files.lock() = parent.files.lock().clone_for_fork();
    *child.cwd.lock() = parent.cwd.lock().clone();
    *child.heap.lock() = *parent.heap.lock();
    *child.signals.lock() = parent.signals.lock().fork_clone();
    child
        .mmap_cursor
        .store(parent.mmap_cursor.load(Ordering::Acquire), Ordering::Release);
    child.user_stack_base.store(
        parent.user_stack_base.load(Ordering::Acquire),
        Ordering::Release,
    );
    child
        .ctty
        .store(parent.ctty.load(Ordering::Acquire), Ordering::Release);
    Ok(())
}
