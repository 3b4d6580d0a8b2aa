//! Kernel error types
//!
//! One tagged error enum for the whole kernel. Syscalls return
//! `KernelResult<usize>`; the dispatch layer translates an `Err` into the
//! `-1` return value and stores the kind in the caller's per-process errno
//! slot, so a concurrent syscall on another process can never overwrite it.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// File or directory not found (ENOENT).
    NotFound,
    /// Permission denied (EACCES).
    PermissionDenied,
    /// File descriptor is not open or wrong mode (EBADF).
    BadFileDescriptor,
    /// User pointer outside any VMA with the required access (EFAULT).
    BadAddress,
    /// Operation would block (EAGAIN).
    WouldBlock,
    /// Resource temporarily held (EBUSY); trylock/trywait failures.
    Busy,
    /// Out of physical frames or heap (ENOMEM).
    OutOfMemory,
    /// No space left on the filesystem (ENOSPC).
    NoSpace,
    /// Path names a directory where a file was required (EISDIR).
    IsADirectory,
    /// Path component is not a directory (ENOTDIR).
    NotADirectory,
    /// Directory not empty on rmdir (ENOTEMPTY).
    NotEmpty,
    /// Write to a pipe with no readers (EPIPE).
    BrokenPipe,
    /// Malformed argument (EINVAL); also the search-argument kind.
    InvalidArgument,
    /// Result does not fit the supplied buffer (ERANGE).
    OutOfRange,
    /// Path resolution exceeded the depth limit (ELOOP).
    TooManyLevels,
    /// Target already exists (EEXIST).
    AlreadyExists,
    /// No such process (ESRCH).
    NoProcess,
    /// Caller has no children to wait for (ECHILD).
    NoChild,
    /// FD table is full (EMFILE).
    TooManyOpenFiles,
    /// Path or name exceeds the configured limit (ENAMETOOLONG).
    NameTooLong,
    /// Blocking operation interrupted by a deliverable signal (EINTR).
    Interrupted,
    /// Operation not supported by this node or subsystem.
    NotSupported,
    /// ELF image rejected by the loader.
    Elf(ElfError),
}

/// ELF-loader error sub-kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// First four bytes are not `\x7fELF`.
    BadMagic,
    /// Not a 64-bit little-endian image.
    BadClass,
    /// Machine field is not RISC-V.
    WrongArchitecture,
    /// Not an executable (ET_EXEC) image.
    WrongType,
    /// Image declares no program headers.
    NoProgramHeaders,
    /// Image shorter than its own headers claim.
    Truncated,
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Stable numeric code stored in the per-process errno slot and
    /// readable by userland. Codes are kernel-private (no POSIX numeric
    /// compatibility is promised), but they never change once assigned.
    pub fn code(self) -> u32 {
        match self {
            Self::NotFound => 1,
            Self::PermissionDenied => 2,
            Self::BadFileDescriptor => 3,
            Self::BadAddress => 4,
            Self::WouldBlock => 5,
            Self::Busy => 6,
            Self::OutOfMemory => 7,
            Self::NoSpace => 8,
            Self::IsADirectory => 9,
            Self::NotADirectory => 10,
            Self::NotEmpty => 11,
            Self::BrokenPipe => 12,
            Self::InvalidArgument => 13,
            Self::OutOfRange => 14,
            Self::TooManyLevels => 15,
            Self::AlreadyExists => 16,
            Self::NoProcess => 17,
            Self::NoChild => 18,
            Self::TooManyOpenFiles => 19,
            Self::NameTooLong => 20,
            Self::Interrupted => 21,
            Self::NotSupported => 22,
            Self::Elf(ElfError::BadMagic) => 30,
            Self::Elf(ElfError::BadClass) => 31,
            Self::Elf(ElfError::WrongArchitecture) => 32,
            Self::Elf(ElfError::WrongType) => 33,
            Self::Elf(ElfError::NoProgramHeaders) => 34,
            Self::Elf(ElfError::Truncated) => 35,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such file or directory"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::BadFileDescriptor => write!(f, "bad file descriptor"),
            Self::BadAddress => write!(f, "bad user address"),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::Busy => write!(f, "resource busy"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::NoSpace => write!(f, "no space left"),
            Self::IsADirectory => write!(f, "is a directory"),
            Self::NotADirectory => write!(f, "not a directory"),
            Self::NotEmpty => write!(f, "directory not empty"),
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::OutOfRange => write!(f, "result out of range"),
            Self::TooManyLevels => write!(f, "too many levels of path resolution"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::NoProcess => write!(f, "no such process"),
            Self::NoChild => write!(f, "no child processes"),
            Self::TooManyOpenFiles => write!(f, "too many open files"),
            Self::NameTooLong => write!(f, "name too long"),
            Self::Interrupted => write!(f, "interrupted by signal"),
            Self::NotSupported => write!(f, "operation not supported"),
            Self::Elf(e) => write!(f, "ELF rejected: {:?}", e),
        }
    }
}

impl From<ElfError> for KernelError {
    fn from(err: ElfError) -> Self {
        Self::Elf(err)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn elf_subkinds_have_distinct_codes() {
        let kinds = [
            ElfError::BadMagic,
            ElfError::BadClass,
            ElfError::WrongArchitecture,
            ElfError::WrongType,
            ElfError::NoProgramHeaders,
            ElfError::Truncated,
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in kinds.iter().skip(i + 1) {
                assert_ne!(KernelError::Elf(*a).code(), KernelError::Elf(*b).code());
            }
        }
    }

    #[test]
    fn codes_are_nonzero() {
        assert_ne!(KernelError::NotFound.code(), 0);
        assert_ne!(KernelError::Elf(ElfError::BadMagic).code(), 0);
    }
}
