//! File and descriptor system calls
//!
//! Every user pointer is validated through the VMA map before it is
//! touched, and user data is staged through kernel buffers: an
//! operation that can block (pipes, the console) must never run with
//! the VMA lock held.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::config::{MAX_PATH_LEN, PIPE_BUF_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::fs::{self, NodeKind, Stat};
use crate::ipc::Pipe;
use crate::mm::user::UserAccess;
use crate::process::fd::{OpenFile, OpenFlags};
use crate::process::Process;

fn current() -> KernelResult<Arc<Process>> {
    crate::process::current().ok_or(KernelError::NoProcess)
}

/// Copy a path string in from user memory.
fn user_path(proc: &Process, ptr: usize) -> KernelResult<String> {
    let vmas = proc.vmas.lock();
    UserAccess::new(&vmas).read_cstring(ptr, MAX_PATH_LEN)
}

pub fn sys_write(fd: usize, buf: usize, len: usize) -> KernelResult<usize> {
    let proc = current()?;
    if len == 0 {
        // Still validates the descriptor.
        proc.files.lock().get(fd)?;
        return Ok(0);
    }
    let len = len.min(PIPE_BUF_SIZE * 8);
    let mut data = vec![0u8; len];
    {
        let vmas = proc.vmas.lock();
        UserAccess::new(&vmas).read_bytes(buf, &mut data)?;
    }
    let file = proc.files.lock().get(fd)?;
    let result = file.write(&data);
    if let Err(KernelError::BrokenPipe) = result {
        // Writing a pipe with no readers also raises SIGPIPE.
        let _ = crate::signal::send_to(&proc, crate::signal::SIGPIPE);
    }
    result
}

pub fn sys_read(fd: usize, buf: usize, len: usize) -> KernelResult<usize> {
    let proc = current()?;
    if len == 0 {
        proc.files.lock().get(fd)?;
        return Ok(0);
    }
    let len = len.min(PIPE_BUF_SIZE * 8);
    // Validate the destination before blocking on the source.
    {
        let vmas = proc.vmas.lock();
        UserAccess::new(&vmas).validate(buf, len, crate::mm::VmaFlags::WRITE)?;
    }
    let file = proc.files.lock().get(fd)?;
    let mut data = vec![0u8; len];
    let n = file.read(&mut data)?;
    let vmas = proc.vmas.lock();
    UserAccess::new(&vmas).write_bytes(buf, &data[..n])?;
    Ok(n)
}

pub fn sys_open(path_ptr: usize, raw_flags: u32) -> KernelResult<usize> {
    let proc = current()?;
    let path = user_path(&proc, path_ptr)?;
    let flags = OpenFlags(raw_flags);
    let cwd = proc.cwd.lock().clone();

    let node = match fs::resolve(&cwd, &path) {
        Ok(node) => node,
        Err(KernelError::NotFound) if flags.create() => {
            let (parent, name) = fs::resolve_parent(&cwd, &path)?;
            parent.create(&name, NodeKind::File)?
        }
        Err(e) => return Err(e),
    };

    if node.kind() == NodeKind::Directory && flags.writable() {
        return Err(KernelError::IsADirectory);
    }
    if flags.truncate() && node.kind() == NodeKind::File {
        node.truncate()?;
    }
    let fd = proc.files.lock().install(OpenFile::from_node(node, flags))?;
    Ok(fd)
}

pub fn sys_close(fd: usize) -> KernelResult<usize> {
    let proc = current()?;
    proc.files.lock().close(fd)?;
    Ok(0)
}

pub fn sys_lseek(fd: usize, offset: isize, whence: usize) -> KernelResult<usize> {
    let proc = current()?;
    let file = proc.files.lock().get(fd)?;
    let node = match &file.class {
        crate::process::fd::FileClass::Node(node) if node.kind() == NodeKind::File => {
            node.clone()
        }
        _ => return Err(KernelError::InvalidArgument),
    };
    let base: i64 = match whence {
        0 => 0,
        1 => file.pos() as i64,
        2 => node.stat().size as i64,
        _ => return Err(KernelError::InvalidArgument),
    };
    let target = base + offset as i64;
    if target < 0 {
        return Err(KernelError::InvalidArgument);
    }
    file.set_pos(target as u64);
    Ok(target as usize)
}

pub fn sys_stat(path_ptr: usize, stat_ptr: usize) -> KernelResult<usize> {
    let proc = current()?;
    let path = user_path(&proc, path_ptr)?;
    let cwd = proc.cwd.lock().clone();
    let node = fs::resolve(&cwd, &path)?;
    let stat = node.stat();

    let bytes = stat_to_bytes(&stat);
    let vmas = proc.vmas.lock();
    UserAccess::new(&vmas).write_bytes(stat_ptr, &bytes)?;
    Ok(0)
}

fn stat_to_bytes(stat: &Stat) -> [u8; core::mem::size_of::<Stat>()] {
    let mut bytes = [0u8; core::mem::size_of::<Stat>()];
    bytes[0..8].copy_from_slice(&stat.ino.to_ne_bytes());
    bytes[8..12].copy_from_slice(&stat.kind.to_ne_bytes());
    bytes[12..16].copy_from_slice(&stat.nlink.to_ne_bytes());
    bytes[16..24].copy_from_slice(&stat.size.to_ne_bytes());
    bytes
}

pub fn sys_mkdir(path_ptr: usize) -> KernelResult<usize> {
    let proc = current()?;
    let path = user_path(&proc, path_ptr)?;
    let cwd = proc.cwd.lock().clone();
    let (parent, name) = fs::resolve_parent(&cwd, &path)?;
    parent.create(&name, NodeKind::Directory)?;
    Ok(0)
}

pub fn sys_rmdir(path_ptr: usize) -> KernelResult<usize> {
    let proc = current()?;
    let path = user_path(&proc, path_ptr)?;
    let cwd = proc.cwd.lock().clone();
    let (parent, name) = fs::resolve_parent(&cwd, &path)?;
    parent.rmdir(&name)?;
    Ok(0)
}

pub fn sys_unlink(path_ptr: usize) -> KernelResult<usize> {
    let proc = current()?;
    let path = user_path(&proc, path_ptr)?;
    let cwd = proc.cwd.lock().clone();
    let (parent, name) = fs::resolve_parent(&cwd, &path)?;
    parent.unlink(&name)?;
    Ok(0)
}

/// Directory-entry record layout for getdents: `{ino: u64, kind: u16,
/// reclen: u16, namelen: u16, pad: u16, name bytes}`, 8-byte aligned.
const DENT_HEADER: usize = 16;

pub fn sys_getdents(fd: usize, buf: usize, len: usize) -> KernelResult<usize> {
    let proc = current()?;
    let file = proc.files.lock().get(fd)?;
    let node = match &file.class {
        crate::process::fd::FileClass::Node(node) if node.kind() == NodeKind::Directory => {
            node.clone()
        }
        _ => return Err(KernelError::NotADirectory),
    };

    let mut out: Vec<u8> = Vec::new();
    let mut index = file.pos() as usize;
    while out.len() < len {
        let Some(entry) = node.readdir(index)? else {
            break;
        };
        let reclen = (DENT_HEADER + entry.name.len() + 1 + 7) & !7;
        if out.len() + reclen > len {
            break;
        }
        out.extend_from_slice(&entry.ino.to_ne_bytes());
        out.extend_from_slice(&(entry.kind.as_u32() as u16).to_ne_bytes());
        out.extend_from_slice(&(reclen as u16).to_ne_bytes());
        out.extend_from_slice(&(entry.name.len() as u16).to_ne_bytes());
        out.extend_from_slice(&0u16.to_ne_bytes());
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        while out.len() % 8 != 0 {
            out.push(0);
        }
        index += 1;
    }
    if out.is_empty() && node.readdir(index)?.is_some() {
        // Not even one record fits.
        return Err(KernelError::OutOfRange);
    }
    file.set_pos(index as u64);
    let vmas = proc.vmas.lock();
    UserAccess::new(&vmas).write_bytes(buf, &out)?;
    Ok(out.len())
}

pub fn sys_chdir(path_ptr: usize) -> KernelResult<usize> {
    let proc = current()?;
    let path = user_path(&proc, path_ptr)?;
    let cwd = proc.cwd.lock().clone();
    let node = fs::resolve(&cwd, &path)?;
    if node.kind() != NodeKind::Directory {
        return Err(KernelError::NotADirectory);
    }
    let canonical = fs::path::canonicalize(&cwd, &path)?;
    *proc.cwd.lock() = canonical;
    Ok(0)
}

pub fn sys_getcwd(buf: usize, len: usize) -> KernelResult<usize> {
    let proc = current()?;
    let cwd = proc.cwd.lock().clone();
    if cwd.len() + 1 > len {
        return Err(KernelError::OutOfRange);
    }
    let mut bytes = Vec::with_capacity(cwd.len() + 1);
    bytes.extend_from_slice(cwd.as_bytes());
    bytes.push(0);
    let vmas = proc.vmas.lock();
    UserAccess::new(&vmas).write_bytes(buf, &bytes)?;
    Ok(cwd.len())
}

/// pipe(): create both ends and store the two descriptors as C ints in
/// the user array.
pub fn sys_pipe(fds_ptr: usize) -> KernelResult<usize> {
    let proc = current()?;
    let pipe = Pipe::new();
    let (rfd, wfd) = {
        let mut files = proc.files.lock();
        let rfd = files.install(OpenFile::pipe_reader(pipe.clone()))?;
        let wfd = match files.install(OpenFile::pipe_writer(pipe.clone())) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = files.close(rfd);
                return Err(e);
            }
        };
        (rfd, wfd)
    };

    let mut bytes = [0u8; 8];
    bytes[0..4].copy_from_slice(&(rfd as i32).to_ne_bytes());
    bytes[4..8].copy_from_slice(&(wfd as i32).to_ne_bytes());
    let write_back = {
        let vmas = proc.vmas.lock();
        UserAccess::new(&vmas).write_bytes(fds_ptr, &bytes)
    };
    if let Err(e) = write_back {
        let mut files = proc.files.lock();
        let _ = files.close(rfd);
        let _ = files.close(wfd);
        return Err(e);
    }
    Ok(0)
}

pub fn sys_dup2(old_fd: usize, new_fd: usize) -> KernelResult<usize> {
    let proc = current()?;
    let mut files = proc.files.lock();
    let file = files.get(old_fd)?;
    if old_fd == new_fd {
        return Ok(new_fd);
    }
    files.install_at(new_fd, file)
}
