//! Trap dispatch core
//!
//! The architecture layer saves the interrupted state and calls in here
//! with the raw cause; this module decodes it and routes to the syscall
//! layer, the scheduler tick, the external-interrupt mux, or the fault
//! exit. Every return to user mode funnels through [`user_return`],
//! which is where pending signals are delivered.
//!
//! Supervisor access to user buffers is not enabled wholesale for the
//! trap: syscalls take a scoped `SumGuard` around each individual copy,
//! so the exit path has nothing to clear.

use crate::process;
use crate::sched;
use crate::signal;
use crate::syscall;

/// Saved user register file, layered at the top of the kernel stack on
/// trap entry. Field order is the trap assembly's save order; the
/// offset assertions below pin it.
#[repr(C, align(16))]
#[derive(Debug, Clone)]
pub struct TrapFrame {
    pub ra: usize,
    pub sp: usize,
    pub gp: usize,
    pub tp: usize,
    pub t0: usize,
    pub t1: usize,
    pub t2: usize,
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
    pub a7: usize,
    pub t3: usize,
    pub t4: usize,
    pub t5: usize,
    pub t6: usize,
    /// User program counter at the trap.
    pub sepc: usize,
    /// User sstatus at the trap (SPP must read U on the way out).
    pub sstatus: usize,
}

/// Size of the trap-frame slot reserved at the top of each kernel stack.
pub const TRAP_FRAME_SIZE: usize = core::mem::size_of::<TrapFrame>();

const _: () = assert!(core::mem::offset_of!(TrapFrame, ra) == 0);
const _: () = assert!(core::mem::offset_of!(TrapFrame, sp) == 8);
const _: () = assert!(core::mem::offset_of!(TrapFrame, s0) == 56);
const _: () = assert!(core::mem::offset_of!(TrapFrame, a0) == 152);
const _: () = assert!(core::mem::offset_of!(TrapFrame, a7) == 208);
const _: () = assert!(core::mem::offset_of!(TrapFrame, t6) == 240);
const _: () = assert!(core::mem::offset_of!(TrapFrame, sepc) == 248);
const _: () = assert!(core::mem::offset_of!(TrapFrame, sstatus) == 256);
const _: () = assert!(TRAP_FRAME_SIZE == 272);

impl TrapFrame {
    /// An all-zero frame. `sepc`/`sstatus` are filled in by the loader.
    pub const fn zero() -> Self {
        // SAFETY: TrapFrame is plain-old-data; all-zero is a valid value.
        unsafe { core::mem::zeroed() }
    }

    /// Syscall arguments a0..a5.
    pub fn syscall_args(&self) -> [usize; 6] {
        [self.a0, self.a1, self.a2, self.a3, self.a4, self.a5]
    }

    /// Syscall number (a7).
    pub fn syscall_number(&self) -> usize {
        self.a7
    }

    /// Store the syscall result in a0.
    pub fn set_return_value(&mut self, value: usize) {
        self.a0 = value;
    }
}

/// Decoded trap cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// ECALL from U-mode.
    UserEcall,
    /// S-mode timer interrupt.
    TimerInterrupt,
    /// External interrupt (PLIC).
    ExternalInterrupt,
    /// Software interrupt (unused on a single hart, acknowledged).
    SoftwareInterrupt,
    /// Instruction/load/store page fault, with the faulting address.
    PageFault(usize),
    /// Illegal instruction.
    IllegalInstruction,
    /// Misaligned or failed bus access.
    BusFault(usize),
    /// Anything else.
    Unknown(usize),
}

const INTERRUPT_BIT: usize = 1 << (usize::BITS - 1);

impl Cause {
    /// Decode a raw `scause` value (`tval` is the faulting address for
    /// memory causes).
    pub fn decode(scause: usize, tval: usize) -> Self {
        let code = scause & !INTERRUPT_BIT;
        if scause & INTERRUPT_BIT != 0 {
            match code {
                1 => Self::SoftwareInterrupt,
                5 => Self::TimerInterrupt,
                9 => Self::ExternalInterrupt,
                _ => Self::Unknown(scause),
            }
        } else {
            match code {
                8 => Self::UserEcall,
                2 => Self::IllegalInstruction,
                12 | 13 | 15 => Self::PageFault(tval),
                0 | 1 | 4 | 5 | 6 | 7 => Self::BusFault(tval),
                _ => Self::Unknown(scause),
            }
        }
    }
}

/// Handle a trap taken from U-mode. Never returns here; control leaves
/// through [`user_return`] (or the process exits and is scheduled away).
pub fn handle_user_trap(frame: &mut TrapFrame, scause: usize, tval: usize) -> ! {
    match Cause::decode(scause, tval) {
        Cause::UserEcall => {
            // Resume past the ecall instruction.
            frame.sepc += 4;
            syscall::dispatch(frame);
        }
        Cause::TimerInterrupt => {
            sched::clock::timer_tick();
        }
        Cause::ExternalInterrupt => {
            external_interrupt();
        }
        Cause::SoftwareInterrupt => {}
        fault => fault_exit(frame, fault),
    }
    user_return(frame)
}

/// Handle a trap taken from S-mode. Interrupts only: kernel paths are
/// never preempted mid-flight, so this ticks the clock or services a
/// device and returns. An exception here is a kernel bug and is fatal.
pub fn handle_kernel_trap(scause: usize, sepc: usize, tval: usize) {
    match Cause::decode(scause, tval) {
        Cause::TimerInterrupt => {
            sched::clock::timer_tick_in_kernel();
        }
        Cause::ExternalInterrupt => {
            external_interrupt();
        }
        Cause::SoftwareInterrupt => {}
        other => {
            panic!(
                "exception in supervisor mode: {:?} scause={:#x} sepc={:#x} stval={:#x}",
                other, scause, sepc, tval
            );
        }
    }
}

/// Deliver at most one pending signal, then leave for user mode.
pub fn user_return(frame: &mut TrapFrame) -> ! {
    signal::deliver_pending(frame);

    #[cfg(target_arch = "riscv64")]
    // SAFETY: `frame` is the current process's trap-frame slot and the
    // signal layer keeps SPP = U.
    unsafe {
        crate::arch::riscv64::trap::return_to_user(frame as *mut TrapFrame)
    }

    #[cfg(not(target_arch = "riscv64"))]
    unreachable!("user_return on host target");
}

/// First kernel entry of a fresh process: the low-level switch lands
/// here (interrupts still disabled), and we fall straight through the
/// trap-exit path into user mode.
#[no_mangle]
pub extern "C" fn task_entry() -> ! {
    sched::scheduler::apply_current_satp();
    let frame_ptr = {
        let proc = process::current().expect("task_entry with no current process");
        proc.trap_frame_ptr().expect("task_entry without a trap frame")
    };
    // SAFETY: the slot belongs to the current process's kernel stack,
    // populated by commit_image or fork before the process became READY.
    let frame = unsafe { &mut *frame_ptr };
    user_return(frame)
}

/// Route a claimed PLIC interrupt to its driver.
fn external_interrupt() {
    #[cfg(target_arch = "riscv64")]
    {
        use crate::arch::riscv64::{plic, uart};
        while let Some(irq) = plic::claim() {
            match irq {
                plic::IRQ_UART0 => {
                    if let Some(byte) = uart::getc() {
                        crate::drivers::console::handle_input(byte);
                    }
                }
                plic::IRQ_VIRTIO_START..=plic::IRQ_VIRTIO_END => {
                    log::debug!(target: "trap", "virtio irq {} (no driver bound)", irq);
                }
                other => {
                    log::warn!(target: "trap", "unexpected external irq {}", other);
                }
            }
            plic::complete(irq);
        }
    }
}

/// Terminate the current process after a user-mode fault.
fn fault_exit(frame: &TrapFrame, cause: Cause) -> ! {
    let signo = match cause {
        Cause::IllegalInstruction => signal::SIGILL,
        Cause::PageFault(_) => signal::SIGSEGV,
        Cause::BusFault(_) => signal::SIGBUS,
        _ => signal::SIGKILL,
    };
    let pid = sched::current_pid();
    log::error!(
        target: "trap",
        "pid {:?}: fatal {:?} at sepc={:#x} sp={:#x} ra={:#x}",
        pid, cause, frame.sepc, frame.sp, frame.ra
    );
    process::exit::exit_current(128 + signo as i32)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn decode_interrupts() {
        let timer = INTERRUPT_BIT | 5;
        assert_eq!(Cause::decode(timer, 0), Cause::TimerInterrupt);
        let ext = INTERRUPT_BIT | 9;
        assert_eq!(Cause::decode(ext, 0), Cause::ExternalInterrupt);
    }

    #[test]
    fn decode_exceptions() {
        assert_eq!(Cause::decode(8, 0), Cause::UserEcall);
        assert_eq!(Cause::decode(13, 0xdead), Cause::PageFault(0xdead));
        assert_eq!(Cause::decode(2, 0), Cause::IllegalInstruction);
        assert_eq!(Cause::decode(5, 0x10), Cause::BusFault(0x10));
    }

    #[test]
    fn frame_roundtrips_syscall_registers() {
        let mut frame = TrapFrame::zero();
        frame.a7 = 16;
        frame.a0 = 1;
        frame.a1 = 2;
        assert_eq!(frame.syscall_number(), 16);
        assert_eq!(frame.syscall_args()[..2], [1, 2]);
        frame.set_return_value(99);
        assert_eq!(frame.a0, 99);
    }
}
