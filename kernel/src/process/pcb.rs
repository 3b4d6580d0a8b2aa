//! Process control block

use alloc::string::String;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use super::{Pid, ProcessState};
use crate::arch::Context;
use crate::config::KERNEL_STACK_SIZE;
use crate::error::{KernelError, KernelResult};
use crate::mm::{heap, AddressSpace, VmaMap};
use crate::sched::wait::WaitQueue;
use crate::signal::SignalState;
use crate::trap::{TrapFrame, TRAP_FRAME_SIZE};

/// A process's kernel stack, carved from the page-granular kernel heap.
/// The trap-frame slot lives at the aligned top.
pub struct KernelStack {
    base: *mut u8,
}

impl KernelStack {
    pub fn new() -> KernelResult<Self> {
        let base = heap::kmalloc(KERNEL_STACK_SIZE)?;
        Ok(Self { base })
    }

    /// 16-byte-aligned top of the stack.
    pub fn top(&self) -> usize {
        (self.base as usize + KERNEL_STACK_SIZE) & !0xF
    }

    /// The trap-frame slot at the top of the stack.
    pub fn trap_frame_ptr(&self) -> *mut TrapFrame {
        (self.top() - TRAP_FRAME_SIZE) as *mut TrapFrame
    }

    /// Where the kernel-side stack begins (just below the trap frame).
    pub fn kernel_sp(&self) -> usize {
        self.trap_frame_ptr() as usize
    }
}

impl Drop for KernelStack {
    fn drop(&mut self) {
        // SAFETY: `base` came from kmalloc in `new` and is freed once.
        unsafe {
            heap::kfree(self.base);
        }
    }
}

// SAFETY: the stack region is exclusively owned by its process; the
// raw pointer is only a handle to a kmalloc allocation.
unsafe impl Send for KernelStack {}
// SAFETY: see above; shared access only reads the base address.
unsafe impl Sync for KernelStack {}

/// Heap bounds of a process (`sbrk` region).
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapRange {
    pub start: usize,
    pub end: usize,
}

/// Process control block.
pub struct Process {
    /// Process ID.
    pub pid: Pid,
    /// Parent PID (0 = unparented / init's parent).
    parent: AtomicU64,
    /// Program name (diagnostics).
    pub name: Mutex<String>,
    /// Lifecycle state.
    state: AtomicU32,
    /// Kernel stack; `None` only for the idle task, which keeps the
    /// boot stack.
    kstack: Option<KernelStack>,
    /// Saved callee-saved context for the low-level switch. Only the
    /// scheduler touches it, with interrupts disabled.
    context: UnsafeCell<Context>,
    /// Page-table root and owned frames. `None` for the idle task.
    pub space: Mutex<Option<AddressSpace>>,
    /// Ordered user regions.
    pub vmas: Mutex<VmaMap>,
    /// sbrk heap bounds.
    pub heap: Mutex<HeapRange>,
    /// Next free address for anonymous mmap.
    pub mmap_cursor: AtomicUsize,
    /// Base (lowest address) of the user stack mapping.
    pub user_stack_base: AtomicUsize,
    /// Working directory (absolute, normalized).
    pub cwd: Mutex<String>,
    /// Open files.
    pub files: Mutex<super::fd::FdTable>,
    /// Pending/blocked masks and handler slots.
    pub signals: Mutex<SignalState>,
    /// Child PIDs (weak: resolved through the table).
    pub children: Mutex<Vec<Pid>>,
    /// Parent parks here in waitpid; children's exit path wakes it.
    pub child_wait: WaitQueue,
    /// Controlling virtual terminal.
    pub ctty: AtomicU32,
    /// Exit code (valid once ZOMBIE).
    pub exit_code: AtomicI32,
    /// Accumulated CPU ticks.
    pub cpu_ticks: AtomicU64,
    /// Per-process errno slot (KernelError code; 0 = none).
    errno: AtomicU32,
    /// Wait-queue generation token; see `sched::wait`.
    wait_token: AtomicU64,
    /// Signal that stopped this process (waitpid reporting).
    pub stop_signal: AtomicU32,
}

// SAFETY: the only non-Sync field is the context UnsafeCell, which is
// accessed exclusively by the scheduler with interrupts disabled on a
// single hart.
unsafe impl Send for Process {}
// SAFETY: see above.
unsafe impl Sync for Process {}

impl Process {
    /// Allocate a PCB with a fresh kernel stack, in EMBRYO state.
    pub fn new_user(pid: Pid, parent: Pid, name: String) -> KernelResult<Self> {
        let kstack = KernelStack::new()?;
        Ok(Self {
            pid,
            parent: AtomicU64::new(parent.0),
            name: Mutex::new(name),
            state: AtomicU32::new(ProcessState::Embryo as u32),
            kstack: Some(kstack),
            context: UnsafeCell::new(Context::zero()),
            space: Mutex::new(None),
            vmas: Mutex::new(VmaMap::new()),
            heap: Mutex::new(HeapRange::default()),
            mmap_cursor: AtomicUsize::new(crate::config::USER_MMAP_BASE),
            user_stack_base: AtomicUsize::new(0),
            cwd: Mutex::new(String::from("/")),
            files: Mutex::new(super::fd::FdTable::new()),
            signals: Mutex::new(SignalState::new()),
            children: Mutex::new(Vec::new()),
            child_wait: WaitQueue::new(),
            ctty: AtomicU32::new(0),
            exit_code: AtomicI32::new(0),
            cpu_ticks: AtomicU64::new(0),
            errno: AtomicU32::new(0),
            wait_token: AtomicU64::new(0),
            stop_signal: AtomicU32::new(0),
        })
    }

    /// The idle task's PCB: no kernel stack of its own (it keeps the
    /// boot stack), no address space, never enqueued.
    pub fn new_idle() -> Self {
        Self {
            pid: super::IDLE_PID,
            parent: AtomicU64::new(0),
            name: Mutex::new(String::from("idle")),
            state: AtomicU32::new(ProcessState::Running as u32),
            kstack: None,
            context: UnsafeCell::new(Context::zero()),
            space: Mutex::new(None),
            vmas: Mutex::new(VmaMap::new()),
            heap: Mutex::new(HeapRange::default()),
            mmap_cursor: AtomicUsize::new(0),
            user_stack_base: AtomicUsize::new(0),
            cwd: Mutex::new(String::from("/")),
            files: Mutex::new(super::fd::FdTable::new()),
            signals: Mutex::new(SignalState::new()),
            children: Mutex::new(Vec::new()),
            child_wait: WaitQueue::new(),
            ctty: AtomicU32::new(0),
            exit_code: AtomicI32::new(0),
            cpu_ticks: AtomicU64::new(0),
            errno: AtomicU32::new(0),
            wait_token: AtomicU64::new(0),
            stop_signal: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub fn parent(&self) -> Pid {
        Pid(self.parent.load(Ordering::Acquire))
    }

    pub fn set_parent(&self, pid: Pid) {
        self.parent.store(pid.0, Ordering::Release);
    }

    /// Raw pointer to the saved context. Scheduler only, interrupts off.
    pub fn context_ptr(&self) -> *mut Context {
        self.context.get()
    }

    /// The trap-frame slot on this process's kernel stack.
    pub fn trap_frame_ptr(&self) -> Option<*mut TrapFrame> {
        self.kstack.as_ref().map(|k| k.trap_frame_ptr())
    }

    /// Kernel stack pointer for a fresh kernel entry (below the frame).
    pub fn kernel_sp(&self) -> Option<usize> {
        self.kstack.as_ref().map(|k| k.kernel_sp())
    }

    pub fn set_errno(&self, err: KernelError) {
        self.errno.store(err.code(), Ordering::Release);
    }

    /// Last stored errno code (0 = none).
    pub fn errno_code(&self) -> u32 {
        self.errno.load(Ordering::Acquire)
    }

    pub fn add_cpu_tick(&self) {
        self.cpu_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cpu_ticks(&self) -> u64 {
        self.cpu_ticks.load(Ordering::Relaxed)
    }

    /// Start a wait-queue sleep: bump and return the generation token
    /// the queue entry will carry.
    pub fn begin_wait(&self) -> u64 {
        self.wait_token.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Invalidate any outstanding wait-queue entry (signal wakeups).
    pub fn invalidate_wait(&self) {
        self.wait_token.fetch_add(1, Ordering::AcqRel);
    }

    pub fn wait_token(&self) -> u64 {
        self.wait_token.load(Ordering::Acquire)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn kernel_stack_frame_slot_is_aligned() {
        crate::mm::heap::init_for_host_tests();
        let stack = KernelStack::new().unwrap();
        assert_eq!(stack.top() % 16, 0);
        assert_eq!(stack.trap_frame_ptr() as usize % 16, 0);
        assert!(stack.kernel_sp() < stack.top());
    }

    #[test]
    fn state_roundtrip_and_wait_tokens() {
        crate::mm::heap::init_for_host_tests();
        let proc = Process::new_user(Pid(5), Pid(1), String::from("t")).unwrap();
        assert_eq!(proc.state(), ProcessState::Embryo);
        proc.set_state(ProcessState::Ready);
        assert_eq!(proc.state(), ProcessState::Ready);

        let tok = proc.begin_wait();
        assert_eq!(proc.wait_token(), tok);
        proc.invalidate_wait();
        assert_ne!(proc.wait_token(), tok);
    }
}
