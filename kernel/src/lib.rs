//! CinderOS kernel library
//!
//! A single-hart RISC-V (Sv39) kernel with preemptive round-robin
//! scheduling, per-process address spaces, POSIX-flavored syscalls,
//! signals, pipes, and a RAM-backed VFS. The library compiles for the
//! host target too (with the architecture layer stubbed out) so the
//! kernel's logic can be unit-tested off-target; `main.rs` is the
//! bare-metal entry.

#![no_std]

extern crate alloc;

// Bare-metal targets run on the kernel's own allocator; the host build
// (unit tests, tooling) delegates to the system allocator so test code
// using Vec/String works unmodified.
#[cfg(target_arch = "riscv64")]
use linked_list_allocator::LockedHeap;

#[cfg(target_arch = "riscv64")]
#[global_allocator]
pub static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fs;
pub mod ipc;
pub mod logger;
pub mod mm;
pub mod process;
pub mod sched;
pub mod signal;
pub mod sync;
pub mod syscall;
pub mod trap;
pub mod userland;

// Re-exports for tests and the binary.
pub use error::{ElfError, KernelError, KernelResult};
pub use process::{Pid, ProcessState};
