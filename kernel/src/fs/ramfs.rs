//! RAM-backed filesystem
//!
//! The boot root filesystem. Files are byte vectors, directories are
//! name-to-node maps; inode numbers come from a global counter. This is
//! also the reference implementation of the VFS contract for the test
//! suite.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::{DirEntry, NodeKind, Stat, VfsNode};
use crate::error::{KernelError, KernelResult};

static NEXT_INO: AtomicU64 = AtomicU64::new(1);

fn alloc_ino() -> u64 {
    NEXT_INO.fetch_add(1, Ordering::Relaxed)
}

enum NodeBody {
    File(Mutex<Vec<u8>>),
    Directory(Mutex<BTreeMap<String, Arc<RamNode>>>),
    CharDev,
}

pub struct RamNode {
    ino: u64,
    body: NodeBody,
}

impl RamNode {
    /// The root directory of a fresh filesystem.
    pub fn new_root() -> Arc<Self> {
        Arc::new(Self {
            ino: alloc_ino(),
            body: NodeBody::Directory(Mutex::new(BTreeMap::new())),
        })
    }

    fn new(kind: NodeKind) -> Arc<Self> {
        let body = match kind {
            NodeKind::File => NodeBody::File(Mutex::new(Vec::new())),
            NodeKind::Directory => NodeBody::Directory(Mutex::new(BTreeMap::new())),
            NodeKind::CharDev => NodeBody::CharDev,
        };
        Arc::new(Self {
            ino: alloc_ino(),
            body,
        })
    }

    fn children(&self) -> KernelResult<&Mutex<BTreeMap<String, Arc<RamNode>>>> {
        match &self.body {
            NodeBody::Directory(children) => Ok(children),
            _ => Err(KernelError::NotADirectory),
        }
    }
}

impl VfsNode for RamNode {
    fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::File(_) => NodeKind::File,
            NodeBody::Directory(_) => NodeKind::Directory,
            NodeBody::CharDev => NodeKind::CharDev,
        }
    }

    fn stat(&self) -> Stat {
        let (size, nlink) = match &self.body {
            NodeBody::File(data) => (data.lock().len() as u64, 1),
            NodeBody::Directory(children) => (children.lock().len() as u64, 2),
            NodeBody::CharDev => (0, 1),
        };
        Stat {
            ino: self.ino,
            kind: self.kind().as_u32(),
            nlink,
            size,
        }
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        match &self.body {
            NodeBody::File(data) => {
                let data = data.lock();
                let offset = offset as usize;
                if offset >= data.len() {
                    return Ok(0);
                }
                let n = buf.len().min(data.len() - offset);
                buf[..n].copy_from_slice(&data[offset..offset + n]);
                Ok(n)
            }
            NodeBody::Directory(_) => Err(KernelError::IsADirectory),
            NodeBody::CharDev => Err(KernelError::NotSupported),
        }
    }

    fn write(&self, offset: u64, new_data: &[u8]) -> KernelResult<usize> {
        match &self.body {
            NodeBody::File(data) => {
                let mut data = data.lock();
                let offset = offset as usize;
                if offset + new_data.len() > data.len() {
                    data.resize(offset + new_data.len(), 0);
                }
                data[offset..offset + new_data.len()].copy_from_slice(new_data);
                Ok(new_data.len())
            }
            NodeBody::Directory(_) => Err(KernelError::IsADirectory),
            NodeBody::CharDev => Err(KernelError::NotSupported),
        }
    }

    fn truncate(&self) -> KernelResult<()> {
        match &self.body {
            NodeBody::File(data) => {
                data.lock().clear();
                Ok(())
            }
            _ => Err(KernelError::NotSupported),
        }
    }

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn VfsNode>> {
        let children = self.children()?.lock();
        let node = children.get(name).ok_or(KernelError::NotFound)?.clone();
        Ok(node)
    }

    fn create(&self, name: &str, kind: NodeKind) -> KernelResult<Arc<dyn VfsNode>> {
        if name.is_empty() || name.contains('/') {
            return Err(KernelError::InvalidArgument);
        }
        let mut children = self.children()?.lock();
        if children.contains_key(name) {
            return Err(KernelError::AlreadyExists);
        }
        let node = RamNode::new(kind);
        children.insert(String::from(name), node.clone());
        Ok(node)
    }

    fn readdir(&self, index: usize) -> KernelResult<Option<DirEntry>> {
        let children = self.children()?.lock();
        Ok(children.iter().nth(index).map(|(name, node)| DirEntry {
            ino: node.ino,
            kind: node.kind(),
            name: name.clone(),
        }))
    }

    fn rmdir(&self, name: &str) -> KernelResult<()> {
        let mut children = self.children()?.lock();
        let target = children.get(name).ok_or(KernelError::NotFound)?;
        match &target.body {
            NodeBody::Directory(grandchildren) => {
                if !grandchildren.lock().is_empty() {
                    return Err(KernelError::NotEmpty);
                }
            }
            _ => return Err(KernelError::NotADirectory),
        }
        children.remove(name);
        Ok(())
    }

    fn unlink(&self, name: &str) -> KernelResult<()> {
        let mut children = self.children()?.lock();
        let target = children.get(name).ok_or(KernelError::NotFound)?;
        if matches!(target.body, NodeBody::Directory(_)) {
            return Err(KernelError::IsADirectory);
        }
        children.remove(name);
        Ok(())
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn file_read_write_extends_and_eofs() {
        let root = RamNode::new_root();
        let file = root.create("f", NodeKind::File).unwrap();
        assert_eq!(file.write(0, b"hello").unwrap(), 5);
        // Sparse write past the end zero-fills.
        assert_eq!(file.write(8, b"!").unwrap(), 1);
        assert_eq!(file.stat().size, 9);

        let mut buf = [0xFFu8; 16];
        assert_eq!(file.read(0, &mut buf).unwrap(), 9);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(&buf[5..8], &[0, 0, 0]);
        // Read at EOF.
        assert_eq!(file.read(9, &mut buf).unwrap(), 0);
        // Partial read in the middle.
        let mut two = [0u8; 2];
        assert_eq!(file.read(1, &mut two).unwrap(), 2);
        assert_eq!(&two, b"el");
    }

    #[test]
    fn truncate_empties_file() {
        let root = RamNode::new_root();
        let file = root.create("t", NodeKind::File).unwrap();
        file.write(0, b"data").unwrap();
        file.truncate().unwrap();
        assert_eq!(file.stat().size, 0);
    }

    #[test]
    fn directory_listing_is_sorted_and_indexed() {
        let root = RamNode::new_root();
        root.create("b", NodeKind::File).unwrap();
        root.create("a", NodeKind::Directory).unwrap();
        root.create("c", NodeKind::File).unwrap();

        let names: Vec<String> = (0..)
            .map_while(|i| root.readdir(i).unwrap())
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
        let first = root.readdir(0).unwrap().unwrap();
        assert_eq!(first.kind, NodeKind::Directory);
    }

    #[test]
    fn rmdir_semantics() {
        let root = RamNode::new_root();
        let dir = root.create("d", NodeKind::Directory).unwrap();
        dir.create("inner", NodeKind::File).unwrap();
        assert!(matches!(root.rmdir("d"), Err(KernelError::NotEmpty)));
        dir.unlink("inner").unwrap();
        root.rmdir("d").unwrap();
        assert!(matches!(root.lookup("d"), Err(KernelError::NotFound)));
        // rmdir of a file is NotADirectory.
        root.create("f", NodeKind::File).unwrap();
        assert!(matches!(root.rmdir("f"), Err(KernelError::NotADirectory)));
    }

    #[test]
    fn unlink_semantics() {
        let root = RamNode::new_root();
        root.create("d", NodeKind::Directory).unwrap();
        assert!(matches!(root.unlink("d"), Err(KernelError::IsADirectory)));
        assert!(matches!(root.unlink("nope"), Err(KernelError::NotFound)));
        root.create("f", NodeKind::File).unwrap();
        root.unlink("f").unwrap();
    }

    #[test]
    fn create_rejects_duplicates_and_bad_names() {
        let root = RamNode::new_root();
        root.create("x", NodeKind::File).unwrap();
        assert!(matches!(
            root.create("x", NodeKind::File),
            Err(KernelError::AlreadyExists)
        ));
        assert!(matches!(
            root.create("a/b", NodeKind::File),
            Err(KernelError::InvalidArgument)
        ));
        // Creating inside a file is NotADirectory.
        let file = root.lookup("x").unwrap();
        assert!(matches!(
            file.create("y", NodeKind::File),
            Err(KernelError::NotADirectory)
        ));
    }

    #[test]
    fn inodes_are_unique() {
        let root = RamNode::new_root();
        let a = root.create("a", NodeKind::File).unwrap();
        let b = root.create("b", NodeKind::File).unwrap();
        assert_ne!(a.stat().ino, b.stat().ino);
    }
}
