//! File descriptors
//!
//! An fd is an index into the process's table of `Arc<OpenFile>`
//! handles. fork and dup share the handle (and therefore the position
//! cursor); pipe end counts track table references, so every install
//! and close goes through the register/release pair here.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::MAX_FDS;
use crate::error::{KernelError, KernelResult};
use crate::fs::{NodeKind, VfsNode};
use crate::ipc::Pipe;

/// Open flags (stable ABI values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const RDONLY: u32 = 0;
    pub const WRONLY: u32 = 1;
    pub const RDWR: u32 = 2;
    const ACCMODE: u32 = 3;
    pub const CREAT: u32 = 0x40;
    pub const TRUNC: u32 = 0x200;
    pub const APPEND: u32 = 0x400;

    pub fn readable(&self) -> bool {
        self.0 & Self::ACCMODE != Self::WRONLY
    }

    pub fn writable(&self) -> bool {
        self.0 & Self::ACCMODE != Self::RDONLY
    }

    pub fn create(&self) -> bool {
        self.0 & Self::CREAT != 0
    }

    pub fn truncate(&self) -> bool {
        self.0 & Self::TRUNC != 0
    }

    pub fn append(&self) -> bool {
        self.0 & Self::APPEND != 0
    }
}

/// What an open file refers to.
pub enum FileClass {
    Node(Arc<dyn VfsNode>),
    PipeReader(Arc<Pipe>),
    PipeWriter(Arc<Pipe>),
}

/// One open file: target, access mode, shared position cursor.
pub struct OpenFile {
    pub class: FileClass,
    pub flags: OpenFlags,
    pos: AtomicU64,
}

impl OpenFile {
    pub fn from_node(node: Arc<dyn VfsNode>, flags: OpenFlags) -> Arc<Self> {
        Arc::new(Self {
            class: FileClass::Node(node),
            flags,
            pos: AtomicU64::new(0),
        })
    }

    pub fn pipe_reader(pipe: Arc<Pipe>) -> Arc<Self> {
        Arc::new(Self {
            class: FileClass::PipeReader(pipe),
            flags: OpenFlags(OpenFlags::RDONLY),
            pos: AtomicU64::new(0),
        })
    }

    pub fn pipe_writer(pipe: Arc<Pipe>) -> Arc<Self> {
        Arc::new(Self {
            class: FileClass::PipeWriter(pipe),
            flags: OpenFlags(OpenFlags::WRONLY),
            pos: AtomicU64::new(0),
        })
    }

    pub fn pos(&self) -> u64 {
        self.pos.load(Ordering::Acquire)
    }

    pub fn set_pos(&self, pos: u64) {
        self.pos.store(pos, Ordering::Release);
    }

    /// Read at the cursor, advancing it. Pipes block; console reads go
    /// through the caller's controlling terminal.
    pub fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        match &self.class {
            FileClass::Node(node) => {
                if !self.flags.readable() {
                    return Err(KernelError::BadFileDescriptor);
                }
                match node.kind() {
                    NodeKind::Directory => Err(KernelError::IsADirectory),
                    NodeKind::CharDev => {
                        let vt = crate::process::current()
                            .map(|p| p.ctty.load(Ordering::Relaxed) as usize)
                            .unwrap_or(0);
                        crate::drivers::console::read(vt, buf)
                    }
                    NodeKind::File => {
                        let n = node.read(self.pos(), buf)?;
                        self.pos.fetch_add(n as u64, Ordering::AcqRel);
                        Ok(n)
                    }
                }
            }
            FileClass::PipeReader(pipe) => pipe.read_blocking(buf),
            FileClass::PipeWriter(_) => Err(KernelError::BadFileDescriptor),
        }
    }

    /// Write at the cursor (or the end with O_APPEND), advancing it.
    pub fn write(&self, data: &[u8]) -> KernelResult<usize> {
        match &self.class {
            FileClass::Node(node) => {
                if !self.flags.writable() {
                    return Err(KernelError::BadFileDescriptor);
                }
                match node.kind() {
                    NodeKind::Directory => Err(KernelError::IsADirectory),
                    NodeKind::CharDev => {
                        let vt = crate::process::current()
                            .map(|p| p.ctty.load(Ordering::Relaxed) as usize)
                            .unwrap_or(0);
                        Ok(crate::drivers::console::write_bytes(vt, data))
                    }
                    NodeKind::File => {
                        if self.flags.append() {
                            self.set_pos(node.stat().size);
                        }
                        let n = node.write(self.pos(), data)?;
                        self.pos.fetch_add(n as u64, Ordering::AcqRel);
                        Ok(n)
                    }
                }
            }
            FileClass::PipeWriter(pipe) => pipe.write_blocking(data),
            FileClass::PipeReader(_) => Err(KernelError::BadFileDescriptor),
        }
    }
}

fn register(file: &OpenFile) {
    match &file.class {
        FileClass::PipeReader(pipe) => pipe.add_reader(),
        FileClass::PipeWriter(pipe) => pipe.add_writer(),
        FileClass::Node(_) => {}
    }
}

fn release(file: &OpenFile) {
    match &file.class {
        FileClass::PipeReader(pipe) => pipe.release_reader(),
        FileClass::PipeWriter(pipe) => pipe.release_writer(),
        FileClass::Node(_) => {}
    }
}

/// Per-process descriptor table.
pub struct FdTable {
    entries: Vec<Option<Arc<OpenFile>>>,
}

impl FdTable {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(MAX_FDS);
        entries.resize_with(MAX_FDS, || None);
        Self { entries }
    }

    /// Install into the lowest free slot.
    pub fn install(&mut self, file: Arc<OpenFile>) -> KernelResult<usize> {
        for (fd, slot) in self.entries.iter_mut().enumerate() {
            if slot.is_none() {
                register(&file);
                *slot = Some(file);
                return Ok(fd);
            }
        }
        Err(KernelError::TooManyOpenFiles)
    }

    /// Install at a specific slot (dup2), closing whatever was there.
    pub fn install_at(&mut self, fd: usize, file: Arc<OpenFile>) -> KernelResult<usize> {
        if fd >= MAX_FDS {
            return Err(KernelError::BadFileDescriptor);
        }
        if let Some(old) = self.entries[fd].take() {
            release(&old);
        }
        register(&file);
        self.entries[fd] = Some(file);
        Ok(fd)
    }

    pub fn get(&self, fd: usize) -> KernelResult<Arc<OpenFile>> {
        self.entries
            .get(fd)
            .and_then(|slot| slot.clone())
            .ok_or(KernelError::BadFileDescriptor)
    }

    pub fn close(&mut self, fd: usize) -> KernelResult<()> {
        let slot = self
            .entries
            .get_mut(fd)
            .ok_or(KernelError::BadFileDescriptor)?;
        let file = slot.take().ok_or(KernelError::BadFileDescriptor)?;
        release(&file);
        Ok(())
    }

    /// Close every descriptor (exit path).
    pub fn close_all(&mut self) {
        for slot in self.entries.iter_mut() {
            if let Some(file) = slot.take() {
                release(&file);
            }
        }
    }

    /// Duplicate for fork: the child shares every handle, and every
    /// shared pipe end is registered again.
    pub fn clone_for_fork(&self) -> Self {
        let mut entries = Vec::with_capacity(MAX_FDS);
        for slot in &self.entries {
            match slot {
                Some(file) => {
                    register(file);
                    entries.push(Some(file.clone()));
                }
                None => entries.push(None),
            }
        }
        Self { entries }
    }

    pub fn open_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::fs::ramfs::RamNode;

    fn file_node() -> Arc<dyn VfsNode> {
        let root = RamNode::new_root();
        root.create("f", NodeKind::File).unwrap()
    }

    #[test]
    fn install_uses_lowest_free_slot() {
        let mut table = FdTable::new();
        let node = file_node();
        let a = table
            .install(OpenFile::from_node(node.clone(), OpenFlags(OpenFlags::RDWR)))
            .unwrap();
        let b = table
            .install(OpenFile::from_node(node.clone(), OpenFlags(OpenFlags::RDWR)))
            .unwrap();
        assert_eq!((a, b), (0, 1));
        table.close(0).unwrap();
        let c = table
            .install(OpenFile::from_node(node, OpenFlags(OpenFlags::RDWR)))
            .unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn close_invalidates_descriptor() {
        let mut table = FdTable::new();
        let fd = table
            .install(OpenFile::from_node(file_node(), OpenFlags(OpenFlags::RDONLY)))
            .unwrap();
        table.close(fd).unwrap();
        assert!(table.get(fd).is_err());
        assert!(table.close(fd).is_err());
    }

    #[test]
    fn positions_are_shared_across_dup() {
        let node = file_node();
        node.write(0, b"abcdef").unwrap();
        let mut table = FdTable::new();
        let file = OpenFile::from_node(node, OpenFlags(OpenFlags::RDONLY));
        let fd = table.install(file.clone()).unwrap();
        let dup_fd = table.install_at(7, file).unwrap();

        let mut buf = [0u8; 3];
        table.get(fd).unwrap().read(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        table.get(dup_fd).unwrap().read(&mut buf).unwrap();
        assert_eq!(&buf, b"def");
    }

    #[test]
    fn fork_clone_tracks_pipe_end_counts() {
        let pipe = Pipe::new();
        let mut table = FdTable::new();
        table.install(OpenFile::pipe_reader(pipe.clone())).unwrap();
        table.install(OpenFile::pipe_writer(pipe.clone())).unwrap();
        assert_eq!((pipe.reader_count(), pipe.writer_count()), (1, 1));

        let mut child = table.clone_for_fork();
        assert_eq!((pipe.reader_count(), pipe.writer_count()), (2, 2));

        child.close_all();
        assert_eq!((pipe.reader_count(), pipe.writer_count()), (1, 1));
        table.close_all();
        assert_eq!((pipe.reader_count(), pipe.writer_count()), (0, 0));
    }

    #[test]
    fn access_mode_is_enforced() {
        let node = file_node();
        node.write(0, b"x").unwrap();
        let table_file = OpenFile::from_node(node.clone(), OpenFlags(OpenFlags::WRONLY));
        let mut buf = [0u8; 1];
        assert!(matches!(
            table_file.read(&mut buf),
            Err(KernelError::BadFileDescriptor)
        ));
        let ro = OpenFile::from_node(node, OpenFlags(OpenFlags::RDONLY));
        assert!(matches!(
            ro.write(b"y"),
            Err(KernelError::BadFileDescriptor)
        ));
    }

    #[test]
    fn append_writes_at_end() {
        let node = file_node();
        node.write(0, b"base").unwrap();
        let file = OpenFile::from_node(
            node.clone(),
            OpenFlags(OpenFlags::WRONLY | OpenFlags::APPEND),
        );
        file.write(b"+tail").unwrap();
        let mut buf = [0u8; 16];
        let n = node.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"base+tail");
    }
}
