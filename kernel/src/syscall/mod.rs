//! System call dispatch
//!
//! ABI: number in `a7`, up to six arguments in `a0..a5`, result in
//! `a0`. `-1` (all ones) signals an error and the kind is stored in the
//! caller's per-process errno slot. Numbers are assigned densely from 1
//! and are stable ABI.

pub mod fs;
pub mod memory;
pub mod process;
pub mod time;

use crate::error::{KernelError, KernelResult};
use crate::trap::TrapFrame;

/// Recognized system calls (stable numbers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Syscall {
    Exit = 1,
    Write = 2,
    Read = 3,
    Open = 4,
    Close = 5,
    Lseek = 6,
    Stat = 7,
    Mkdir = 8,
    Rmdir = 9,
    Unlink = 10,
    Getdents = 11,
    Chdir = 12,
    Getcwd = 13,
    Getpid = 14,
    Getppid = 15,
    Fork = 16,
    Execve = 17,
    Waitpid = 18,
    Kill = 19,
    Signal = 20,
    Sigaction = 21,
    Pipe = 22,
    Mmap = 23,
    Munmap = 24,
    Sbrk = 25,
    Yield = 26,
    Sleep = 27,
    Gettime = 28,
    Dup2 = 29,
    Sigprocmask = 30,
}

impl Syscall {
    pub fn from_number(nr: usize) -> Option<Self> {
        Some(match nr {
            1 => Self::Exit,
            2 => Self::Write,
            3 => Self::Read,
            4 => Self::Open,
            5 => Self::Close,
            6 => Self::Lseek,
            7 => Self::Stat,
            8 => Self::Mkdir,
            9 => Self::Rmdir,
            10 => Self::Unlink,
            11 => Self::Getdents,
            12 => Self::Chdir,
            13 => Self::Getcwd,
            14 => Self::Getpid,
            15 => Self::Getppid,
            16 => Self::Fork,
            17 => Self::Execve,
            18 => Self::Waitpid,
            19 => Self::Kill,
            20 => Self::Signal,
            21 => Self::Sigaction,
            22 => Self::Pipe,
            23 => Self::Mmap,
            24 => Self::Munmap,
            25 => Self::Sbrk,
            26 => Self::Yield,
            27 => Self::Sleep,
            28 => Self::Gettime,
            29 => Self::Dup2,
            30 => Self::Sigprocmask,
            _ => return None,
        })
    }
}

/// Entry point from the trap core. Applies the return-value / errno
/// convention around the handler result.
pub fn dispatch(frame: &mut TrapFrame) {
    let nr = frame.syscall_number();
    let args = frame.syscall_args();
    let result = invoke(nr, args, frame);
    match result {
        Ok(value) => frame.set_return_value(value),
        Err(err) => {
            if let Some(proc) = crate::process::current() {
                proc.set_errno(err);
            }
            frame.set_return_value(usize::MAX);
        }
    }
}

fn invoke(nr: usize, args: [usize; 6], frame: &mut TrapFrame) -> KernelResult<usize> {
    let syscall = Syscall::from_number(nr).ok_or(KernelError::InvalidArgument)?;
    match syscall {
        Syscall::Exit => crate::process::exit::exit_current(args[0] as i32),
        Syscall::Write => fs::sys_write(args[0], args[1], args[2]),
        Syscall::Read => fs::sys_read(args[0], args[1], args[2]),
        Syscall::Open => fs::sys_open(args[0], args[1] as u32),
        Syscall::Close => fs::sys_close(args[0]),
        Syscall::Lseek => fs::sys_lseek(args[0], args[1] as isize, args[2]),
        Syscall::Stat => fs::sys_stat(args[0], args[1]),
        Syscall::Mkdir => fs::sys_mkdir(args[0]),
        Syscall::Rmdir => fs::sys_rmdir(args[0]),
        Syscall::Unlink => fs::sys_unlink(args[0]),
        Syscall::Getdents => fs::sys_getdents(args[0], args[1], args[2]),
        Syscall::Chdir => fs::sys_chdir(args[0]),
        Syscall::Getcwd => fs::sys_getcwd(args[0], args[1]),
        Syscall::Getpid => process::sys_getpid(),
        Syscall::Getppid => process::sys_getppid(),
        Syscall::Fork => crate::process::fork::fork_current(frame).map(|pid| pid.0 as usize),
        Syscall::Execve => process::sys_execve(args[0], args[1], frame),
        Syscall::Waitpid => process::sys_waitpid(args[0] as isize, args[1], args[2] as u32),
        Syscall::Kill => process::sys_kill(args[0] as isize, args[1] as u32),
        Syscall::Signal => process::sys_signal(args[0] as u32, args[1]),
        Syscall::Sigaction => process::sys_sigaction(args[0] as u32, args[1], args[2]),
        Syscall::Pipe => fs::sys_pipe(args[0]),
        Syscall::Mmap => memory::sys_mmap(args[0], args[1], args[2] as u32),
        Syscall::Munmap => memory::sys_munmap(args[0], args[1]),
        Syscall::Sbrk => memory::sys_sbrk(args[0] as isize),
        Syscall::Yield => time::sys_yield(),
        Syscall::Sleep => time::sys_sleep(args[0] as u64),
        Syscall::Gettime => time::sys_gettime(),
        Syscall::Dup2 => fs::sys_dup2(args[0], args[1]),
        Syscall::Sigprocmask => process::sys_sigprocmask(args[0], args[1] as u64),
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn numbers_roundtrip() {
        for nr in 1..=30usize {
            let sc = Syscall::from_number(nr).unwrap();
            assert_eq!(sc as usize, nr);
        }
        assert!(Syscall::from_number(0).is_none());
        assert!(Syscall::from_number(31).is_none());
    }
}
