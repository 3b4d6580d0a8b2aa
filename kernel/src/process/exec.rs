//! exec: replace the calling process's image
//!
//! The path and argv live in the caller's user memory, which exec is
//! about to free, so the syscall layer copies them into kernel buffers
//! before calling in here. Atomicity: the new image is built completely
//! off to the side first; only after that can the old one be torn down.
//! Any failure before the commit point returns with the caller's image
//! untouched.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use super::creation;
use crate::error::{KernelError, KernelResult};
use crate::mm::PmmFrames;
use crate::trap::TrapFrame;

/// Replace the current image with the ELF at `path`. On success the
/// trap frame is rewritten so the return to user mode lands on the new
/// entry point with `a0 = argc`, `a1 = argv`.
pub fn exec_current(frame: &mut TrapFrame, path: &str, argv: Vec<String>) -> KernelResult<usize> {
    let proc = super::current().ok_or(KernelError::NoProcess)?;

    // Read the whole file before touching anything.
    let cwd = proc.cwd.lock().clone();
    let node = crate::fs::resolve(&cwd, path)?;
    if node.kind() != crate::fs::NodeKind::File {
        return Err(KernelError::IsADirectory);
    }
    let size = node.stat().size as usize;
    let mut data = vec![0u8; size];
    node.read(0, &mut data)?;

    // Parse and build the complete replacement image. Everything up to
    // here fails cleanly with the old image intact.
    let image = crate::elf::parse(&data)?;
    let loaded = creation::load_image(&image, &data, &argv)?;

    // Commit point. Activate the new root first (kernel mappings are
    // shared between both roots, so the switch is safe mid-path), then
    // free the old image.
    loaded.space.activate();
    let old_space = proc.space.lock().replace(loaded.space);
    if let Some(mut old) = old_space {
        old.teardown(&mut PmmFrames);
    }
    *proc.vmas.lock() = loaded.vmas;
    {
        let mut heap = proc.heap.lock();
        heap.start = loaded.image_end;
        heap.end = loaded.image_end;
    }
    proc.user_stack_base
        .store(loaded.stack_base, Ordering::Release);
    proc.mmap_cursor
        .store(crate::config::USER_MMAP_BASE, Ordering::Release);
    proc.signals.lock().reset_for_exec();
    *proc.name.lock() = String::from(path);

    // Rewrite the trap frame in place: new entry, fresh stack, argv.
    *frame = TrapFrame::zero();
    frame.sepc = loaded.entry;
    frame.sp = loaded.user_sp;
    frame.a1 = loaded.argv_ptr;
    frame.sstatus = crate::arch::initial_user_sstatus();
    log::info!(target: "process", "pid {} exec {}", proc.pid, path);

    // Returned into a0 by the syscall layer: argc for the new image.
    Ok(loaded.argc)
}
