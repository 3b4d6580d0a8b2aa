//! Virtual filesystem layer
//!
//! The kernel sees files only through the [`VfsNode`] contract; the
//! backing store is opaque. The in-tree root filesystem is RAM-backed
//! (`ramfs`); an on-disk filesystem would implement the same trait over
//! the block-device contract.

pub mod path;
pub mod ramfs;

use alloc::string::String;
use alloc::sync::Arc;

use lazy_static::lazy_static;

use crate::error::{KernelError, KernelResult};

/// Node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    /// Byte-oriented device (the console).
    CharDev,
}

impl NodeKind {
    /// Stable numeric tag used in `Stat` and getdents records.
    pub fn as_u32(self) -> u32 {
        match self {
            NodeKind::File => 1,
            NodeKind::Directory => 2,
            NodeKind::CharDev => 3,
        }
    }
}

/// File metadata record returned by `stat`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub ino: u64,
    pub kind: u32,
    pub nlink: u32,
    pub size: u64,
}

/// One directory entry, as yielded by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: NodeKind,
    pub name: String,
}

/// The filesystem contract. Offsets are byte offsets; directory
/// enumeration is by dense index so getdents can resume.
pub trait VfsNode: Send + Sync {
    fn kind(&self) -> NodeKind;

    fn stat(&self) -> Stat;

    /// Read at `offset`; short reads at EOF.
    fn read(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize>;

    /// Write at `offset`, extending the file as needed.
    fn write(&self, offset: u64, data: &[u8]) -> KernelResult<usize>;

    /// Truncate to zero length (O_TRUNC).
    fn truncate(&self) -> KernelResult<()> {
        Err(KernelError::NotSupported)
    }

    /// Look up a child by name (directories only).
    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn VfsNode>>;

    /// Create a child (file or directory) in this directory.
    fn create(&self, name: &str, kind: NodeKind) -> KernelResult<Arc<dyn VfsNode>>;

    /// Entry at `index`, or `None` past the end.
    fn readdir(&self, index: usize) -> KernelResult<Option<DirEntry>>;

    /// Remove an empty child directory.
    fn rmdir(&self, name: &str) -> KernelResult<()>;

    /// Remove a child file.
    fn unlink(&self, name: &str) -> KernelResult<()>;
}

lazy_static! {
    /// The mounted root filesystem.
    static ref ROOT: Arc<ramfs::RamNode> = ramfs::RamNode::new_root();
}

/// The root directory node.
pub fn root() -> Arc<dyn VfsNode> {
    ROOT.clone()
}

/// Resolve `path` (relative to `cwd`) to a node.
pub fn resolve(cwd: &str, path: &str) -> KernelResult<Arc<dyn VfsNode>> {
    let components = path::normalize(cwd, path)?;
    let mut node: Arc<dyn VfsNode> = root();
    for comp in &components {
        if node.kind() != NodeKind::Directory {
            return Err(KernelError::NotADirectory);
        }
        node = node.lookup(comp)?;
    }
    Ok(node)
}

/// Resolve to the parent directory of `path`, returning the final
/// component. Used by create/unlink-style operations.
pub fn resolve_parent(cwd: &str, path: &str) -> KernelResult<(Arc<dyn VfsNode>, String)> {
    let mut components = path::normalize(cwd, path)?;
    let name = components.pop().ok_or(KernelError::InvalidArgument)?;
    let mut node: Arc<dyn VfsNode> = root();
    for comp in &components {
        if node.kind() != NodeKind::Directory {
            return Err(KernelError::NotADirectory);
        }
        node = node.lookup(comp)?;
    }
    if node.kind() != NodeKind::Directory {
        return Err(KernelError::NotADirectory);
    }
    Ok((node, name))
}

/// Populate the boot filesystem: standard directories, the console
/// device, and the built-in init image.
pub fn init() -> KernelResult<()> {
    let root = root();
    for dir in ["bin", "dev", "tmp"] {
        match root.create(dir, NodeKind::Directory) {
            Ok(_) | Err(KernelError::AlreadyExists) => {}
            Err(e) => return Err(e),
        }
    }
    let dev = root.lookup("dev")?;
    match dev.create("console", NodeKind::CharDev) {
        Ok(_) | Err(KernelError::AlreadyExists) => {}
        Err(e) => return Err(e),
    }

    let bin = root.lookup("bin")?;
    let init = bin.create("init", NodeKind::File)?;
    let image = crate::userland::init_image();
    init.write(0, &image)?;
    log::info!(target: "fs", "ramfs root mounted, /bin/init {} bytes", image.len());
    Ok(())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    // Resolution against the shared root: use a dedicated subtree to
    // stay independent of other tests.
    #[test]
    fn resolve_walks_directories() {
        let root = root();
        let home = match root.create("res_home", NodeKind::Directory) {
            Ok(n) => n,
            Err(_) => root.lookup("res_home").unwrap(),
        };
        home.create("user", NodeKind::Directory).unwrap();

        let node = resolve("/", "/res_home/user").unwrap();
        assert_eq!(node.kind(), NodeKind::Directory);
        // Relative resolution against a cwd.
        let node = resolve("/res_home", "user").unwrap();
        assert_eq!(node.kind(), NodeKind::Directory);
        assert!(matches!(
            resolve("/", "/res_home/missing"),
            Err(KernelError::NotFound)
        ));
    }

    #[test]
    fn resolve_parent_returns_final_component() {
        let root = root();
        match root.create("rp_dir", NodeKind::Directory) {
            Ok(_) | Err(KernelError::AlreadyExists) => {}
            Err(e) => panic!("{e}"),
        }
        let (parent, name) = resolve_parent("/", "/rp_dir/newfile").unwrap();
        assert_eq!(name, "newfile");
        assert_eq!(parent.kind(), NodeKind::Directory);
        assert!(matches!(
            resolve_parent("/", "/"),
            Err(KernelError::InvalidArgument)
        ));
    }

    #[test]
    fn traversal_through_file_is_not_a_directory() {
        let root = root();
        match root.create("nd_file", NodeKind::File) {
            Ok(_) | Err(KernelError::AlreadyExists) => {}
            Err(e) => panic!("{e}"),
        }
        assert!(matches!(
            resolve("/", "/nd_file/child"),
            Err(KernelError::NotADirectory)
        ));
    }
}
