//! Pipes
//!
//! A kernel-owned 4 KiB ring buffer with explicit reader/writer end
//! counts and a wait queue per direction. The end counts track FD-table
//! references, not `Arc` clones: closing the last write end is what
//! turns an empty pipe into EOF for readers, and closing the last read
//! end is what turns writes into broken pipes.
//!
//! The non-blocking `try_read`/`try_write` carry the ring logic; the
//! blocking wrappers add the sleep/re-check loop and bail out with
//! `Interrupted` when a deliverable signal arrives.

use alloc::boxed::Box;
use alloc::sync::Arc;

use spin::Mutex;

use crate::config::PIPE_BUF_SIZE;
use crate::error::{KernelError, KernelResult};
use crate::sched::WaitQueue;

struct PipeInner {
    buf: Box<[u8; PIPE_BUF_SIZE]>,
    /// Read cursor.
    rpos: usize,
    /// Bytes currently buffered.
    count: usize,
    /// Open read ends (FD-table references).
    readers: usize,
    /// Open write ends.
    writers: usize,
}

pub struct Pipe {
    inner: Mutex<PipeInner>,
    read_wait: WaitQueue,
    write_wait: WaitQueue,
}

impl Pipe {
    /// A fresh pipe with no registered ends; the FD layer registers
    /// each end as it installs descriptors.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PipeInner {
                buf: Box::new([0; PIPE_BUF_SIZE]),
                rpos: 0,
                count: 0,
                readers: 0,
                writers: 0,
            }),
            read_wait: WaitQueue::new(),
            write_wait: WaitQueue::new(),
        })
    }

    pub fn add_reader(&self) {
        self.inner.lock().readers += 1;
    }

    pub fn add_writer(&self) {
        self.inner.lock().writers += 1;
    }

    /// Drop one read end. When the last goes, sleeping writers must
    /// wake to observe the broken pipe.
    pub fn release_reader(&self) {
        let last = {
            let mut inner = self.inner.lock();
            inner.readers -= 1;
            inner.readers == 0
        };
        if last {
            self.write_wait.wake_all();
        }
    }

    /// Drop one write end. When the last goes, sleeping readers must
    /// wake to observe EOF.
    pub fn release_writer(&self) {
        let last = {
            let mut inner = self.inner.lock();
            inner.writers -= 1;
            inner.writers == 0
        };
        if last {
            self.read_wait.wake_all();
        }
    }

    pub fn reader_count(&self) -> usize {
        self.inner.lock().readers
    }

    pub fn writer_count(&self) -> usize {
        self.inner.lock().writers
    }

    /// Buffered byte count.
    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy up to `buf.len()` buffered bytes out. `Ok(0)` is EOF (empty
    /// with no writers); `WouldBlock` means empty with writers alive.
    pub fn try_read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        let mut inner = self.inner.lock();
        if inner.count == 0 {
            if inner.writers == 0 {
                return Ok(0);
            }
            return Err(KernelError::WouldBlock);
        }
        let n = buf.len().min(inner.count);
        for byte in buf.iter_mut().take(n) {
            *byte = inner.buf[inner.rpos];
            inner.rpos = (inner.rpos + 1) % PIPE_BUF_SIZE;
            inner.count -= 1;
        }
        drop(inner);
        if n > 0 {
            self.write_wait.wake_one();
        }
        Ok(n)
    }

    /// Copy up to `data.len()` bytes in. `BrokenPipe` if no read end is
    /// open (the syscall layer turns that into SIGPIPE + EPIPE);
    /// `WouldBlock` if the ring is full.
    pub fn try_write(&self, data: &[u8]) -> KernelResult<usize> {
        let mut inner = self.inner.lock();
        if inner.readers == 0 {
            return Err(KernelError::BrokenPipe);
        }
        let space = PIPE_BUF_SIZE - inner.count;
        if space == 0 {
            return Err(KernelError::WouldBlock);
        }
        let n = data.len().min(space);
        for &byte in data.iter().take(n) {
            let wpos = (inner.rpos + inner.count) % PIPE_BUF_SIZE;
            inner.buf[wpos] = byte;
            inner.count += 1;
        }
        drop(inner);
        if n > 0 {
            self.read_wait.wake_one();
        }
        Ok(n)
    }

    /// Blocking read: sleeps on the reader queue while the pipe is
    /// empty and writers exist.
    pub fn read_blocking(&self, buf: &mut [u8]) -> KernelResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            {
                let _irq = crate::arch::irq_save();
                match self.try_read(buf) {
                    Err(KernelError::WouldBlock) => self.read_wait.sleep(),
                    other => return other,
                }
            }
            if current_has_signal() {
                return Err(KernelError::Interrupted);
            }
        }
    }

    /// Blocking write of the whole buffer: sleeps on the writer queue
    /// while the ring is full and readers exist.
    pub fn write_blocking(&self, data: &[u8]) -> KernelResult<usize> {
        let mut written = 0;
        while written < data.len() {
            {
                let _irq = crate::arch::irq_save();
                match self.try_write(&data[written..]) {
                    Ok(n) => {
                        written += n;
                        continue;
                    }
                    Err(KernelError::WouldBlock) => self.write_wait.sleep(),
                    Err(e) => return Err(e),
                }
            }
            if current_has_signal() {
                return Err(KernelError::Interrupted);
            }
        }
        Ok(written)
    }
}

fn current_has_signal() -> bool {
    crate::process::current()
        .map(|p| crate::signal::has_deliverable(&p))
        .unwrap_or(false)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn open_pipe() -> Arc<Pipe> {
        let pipe = Pipe::new();
        pipe.add_reader();
        pipe.add_writer();
        pipe
    }

    #[test]
    fn write_then_read_roundtrips() {
        let pipe = open_pipe();
        assert_eq!(pipe.try_write(b"hello").unwrap(), 5);
        let mut buf = [0u8; 16];
        assert_eq!(pipe.try_read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        // Drained again: would block while the writer is open.
        assert_eq!(pipe.try_read(&mut buf), Err(KernelError::WouldBlock));
    }

    #[test]
    fn eof_after_last_writer_closes() {
        let pipe = open_pipe();
        pipe.try_write(b"bye").unwrap();
        pipe.release_writer();
        let mut buf = [0u8; 8];
        // Buffered data is still readable after the writer closed.
        assert_eq!(pipe.try_read(&mut buf).unwrap(), 3);
        // Then EOF, repeatably.
        assert_eq!(pipe.try_read(&mut buf).unwrap(), 0);
        assert_eq!(pipe.try_read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_without_readers_is_broken_pipe() {
        let pipe = open_pipe();
        pipe.release_reader();
        assert_eq!(pipe.try_write(b"x"), Err(KernelError::BrokenPipe));
    }

    #[test]
    fn ring_wraps_correctly() {
        let pipe = open_pipe();
        let chunk = [0xA5u8; 3000];
        assert_eq!(pipe.try_write(&chunk).unwrap(), 3000);
        let mut buf = [0u8; 2500];
        assert_eq!(pipe.try_read(&mut buf).unwrap(), 2500);
        // Next write wraps around the ring boundary.
        let chunk2: alloc::vec::Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(pipe.try_write(&chunk2).unwrap(), 3000);
        let mut out = alloc::vec![0u8; 3500];
        let n = pipe.try_read(&mut out).unwrap();
        assert_eq!(n, 3500); // 500 left from the first chunk + 3000
        assert_eq!(&out[..500], &chunk[..500]);
        assert_eq!(&out[500..], &chunk2[..]);
    }

    #[test]
    fn full_pipe_would_block() {
        let pipe = open_pipe();
        let big = alloc::vec![7u8; PIPE_BUF_SIZE + 100];
        assert_eq!(pipe.try_write(&big).unwrap(), PIPE_BUF_SIZE);
        assert_eq!(pipe.try_write(b"x"), Err(KernelError::WouldBlock));
        let mut buf = [0u8; 100];
        assert_eq!(pipe.try_read(&mut buf).unwrap(), 100);
        assert_eq!(pipe.try_write(b"x").unwrap(), 1);
    }
}
