//! Process and signal system calls

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::{MAX_ARGS, MAX_ARG_LEN, MAX_PATH_LEN};
use crate::error::{KernelError, KernelResult};
use crate::mm::user::UserAccess;
use crate::process::{self, Pid, Process, WaitOptions};
use crate::signal::{self, Handler};
use crate::trap::TrapFrame;

fn current() -> KernelResult<Arc<Process>> {
    process::current().ok_or(KernelError::NoProcess)
}

pub fn sys_getpid() -> KernelResult<usize> {
    Ok(current()?.pid.0 as usize)
}

pub fn sys_getppid() -> KernelResult<usize> {
    Ok(current()?.parent().0 as usize)
}

/// execve: the path and argv point into the address space exec is about
/// to destroy, so both are copied into kernel memory first.
pub fn sys_execve(path_ptr: usize, argv_ptr: usize, frame: &mut TrapFrame) -> KernelResult<usize> {
    let proc = current()?;
    let (path, argv) = {
        let vmas = proc.vmas.lock();
        let user = UserAccess::new(&vmas);
        let path = user.read_cstring(path_ptr, MAX_PATH_LEN)?;
        let mut argv: Vec<String> = Vec::new();
        if argv_ptr != 0 {
            for idx in 0..MAX_ARGS {
                let slot = argv_ptr + idx * core::mem::size_of::<usize>();
                let arg_ptr = user.read_usize(slot)?;
                if arg_ptr == 0 {
                    break;
                }
                argv.push(user.read_cstring(arg_ptr, MAX_ARG_LEN)?);
            }
        }
        (path, argv)
    };
    drop(proc);
    process::exec::exec_current(frame, &path, argv)
}

pub fn sys_waitpid(pid_arg: isize, status_ptr: usize, options: u32) -> KernelResult<usize> {
    let proc = current()?;
    let target = if pid_arg <= 0 {
        None
    } else {
        Some(Pid(pid_arg as u64))
    };
    let (pid, status) = process::wait::waitpid(&proc, target, WaitOptions::from_flags(options))?;
    if status_ptr != 0 {
        let vmas = proc.vmas.lock();
        UserAccess::new(&vmas).write_bytes(status_ptr, &status.to_ne_bytes())?;
    }
    Ok(pid.0 as usize)
}

pub fn sys_kill(pid_arg: isize, signo: u32) -> KernelResult<usize> {
    if pid_arg <= 0 {
        // Process groups are not implemented.
        return Err(KernelError::InvalidArgument);
    }
    signal::send(Pid(pid_arg as u64), signo)?;
    Ok(0)
}

/// Handler encoding shared by signal/sigaction: 0 = default,
/// 1 = ignore, anything else is a user entry point.
fn decode_handler(raw: usize) -> Handler {
    match raw {
        0 => Handler::Default,
        1 => Handler::Ignore,
        entry => Handler::User(entry),
    }
}

fn encode_handler(handler: Handler) -> usize {
    match handler {
        Handler::Default => 0,
        Handler::Ignore => 1,
        Handler::User(entry) => entry,
    }
}

/// signal(): install a handler, returning the previous one.
pub fn sys_signal(signo: u32, handler_raw: usize) -> KernelResult<usize> {
    let proc = current()?;
    let old = proc
        .signals
        .lock()
        .set_handler(signo, decode_handler(handler_raw))?;
    Ok(encode_handler(old))
}

/// sigaction(): like signal(), but the previous disposition is written
/// out through `old_ptr` when non-null.
pub fn sys_sigaction(signo: u32, handler_raw: usize, old_ptr: usize) -> KernelResult<usize> {
    let proc = current()?;
    let old = proc
        .signals
        .lock()
        .set_handler(signo, decode_handler(handler_raw))?;
    if old_ptr != 0 {
        let vmas = proc.vmas.lock();
        UserAccess::new(&vmas).write_usize(old_ptr, encode_handler(old))?;
    }
    Ok(0)
}

/// sigprocmask how-values.
const SIG_SETMASK: usize = 0;
const SIG_BLOCK: usize = 1;
const SIG_UNBLOCK: usize = 2;

/// Adjust the blocked mask, returning the previous mask. SIGKILL and
/// SIGSTOP are stripped by the setter regardless of `how`.
pub fn sys_sigprocmask(how: usize, mask: u64) -> KernelResult<usize> {
    let proc = current()?;
    let mut signals = proc.signals.lock();
    let old = signals.blocked();
    let new = match how {
        SIG_SETMASK => mask,
        SIG_BLOCK => old | mask,
        SIG_UNBLOCK => old & !mask,
        _ => return Err(KernelError::InvalidArgument),
    };
    signals.set_blocked(new);
    Ok(old as usize)
}
