//! Build-time kernel configuration
//!
//! Every platform number lives here: the physical memory window, the
//! user-space layout, stack sizes, scheduler tuning, and table capacities.
//! The rest of the kernel imports these constants instead of repeating
//! magic numbers.

/// Size of a page / physical frame in bytes.
pub const PAGE_SIZE: usize = 4096;

// ---------------------------------------------------------------------------
// Physical memory window (QEMU virt machine)
// ---------------------------------------------------------------------------

/// Base of RAM on the QEMU virt machine.
pub const RAM_BASE: usize = 0x8000_0000;

/// Size of the managed RAM window (128 MiB).
pub const RAM_SIZE: usize = 128 * 1024 * 1024;

/// Exclusive end of the managed RAM window.
pub const RAM_END: usize = RAM_BASE + RAM_SIZE;

/// Maximum number of frames the bitmap allocator can track.
pub const MAX_FRAMES: usize = RAM_SIZE / PAGE_SIZE;

/// Size of the boot-time kernel heap backing `alloc` collections (8 MiB).
pub const KERNEL_HEAP_SIZE: usize = 8 * 1024 * 1024;

// ---------------------------------------------------------------------------
// User-space layout
//
// Sv39 root entries cover 1 GiB each. The kernel identity-maps MMIO
// (root entry 0) and RAM (root entry 2); user space owns root entry 1
// exclusively, which is what makes the kernel half of a process root
// shareable by plain entry copy.
// ---------------------------------------------------------------------------

/// Lowest valid user virtual address.
pub const USER_BASE: usize = 0x4000_0000;

/// User-space boundary. User stacks grow down from here; no user mapping
/// may reach it.
pub const USER_TOP: usize = 0x8000_0000;

/// Base of the anonymous-mmap area, above any reasonable image + heap.
pub const USER_MMAP_BASE: usize = 0x6000_0000;

/// Number of pages in the initial user stack.
pub const USER_STACK_PAGES: usize = 16;

/// Size of a per-process kernel stack.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Timer ticks per scheduling quantum (10 ticks = 1 s at the reference
/// tick rate).
pub const TIME_SLICE_TICKS: u32 = 10;

/// Timer interrupts per second.
pub const TICKS_PER_SEC: u64 = 10;

/// QEMU virt timebase frequency in Hz.
pub const TIMER_FREQ_HZ: u64 = 10_000_000;

/// Timer cycles between ticks.
pub const TIMER_INTERVAL_CYCLES: u64 = TIMER_FREQ_HZ / TICKS_PER_SEC;

// ---------------------------------------------------------------------------
// Tables and buffers
// ---------------------------------------------------------------------------

/// Maximum number of simultaneous processes (process-table slots).
pub const MAX_PROCS: usize = 64;

/// Capacity of the ready queue. One slot per process is sufficient
/// because a PCB is enqueued at most once.
pub const READY_QUEUE_CAP: usize = MAX_PROCS;

/// Per-process file-descriptor table size.
pub const MAX_FDS: usize = 32;

/// Number of signals (1..=31 usable).
pub const NSIG: usize = 32;

/// Pipe ring-buffer capacity in bytes.
pub const PIPE_BUF_SIZE: usize = 4096;

/// Number of virtual terminals multiplexed over the console.
pub const MAX_VTERMS: usize = 4;

/// Per-terminal input ring capacity.
pub const VTERM_INPUT_BUF: usize = 256;

/// Maximum path length accepted from user space.
pub const MAX_PATH_LEN: usize = 256;

/// Maximum number of path components resolved before giving up.
pub const MAX_PATH_DEPTH: usize = 32;

/// Maximum argv entries accepted by execve.
pub const MAX_ARGS: usize = 32;

/// Maximum length of a single argv string.
pub const MAX_ARG_LEN: usize = 256;
