//! Flash filesystem abstraction.
//!
//! The command handlers and the animation loader only ever talk to storage
//! through [`FlashFs`]. Error values mirror littlefs so they can be copied
//! straight into a response status byte.

use std::fmt;
use std::ops::BitOr;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod host;
pub mod memory;
pub mod path;

pub use host::HostFs;
pub use memory::MemFs;

/// Blocks in the flash partition (16 MiB / 4 KiB).
pub const DEFAULT_TOTAL_BLOCKS: u32 = 4096;
/// Erase block size of the flash partition.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
/// Longest path accepted by any path-taking command.
pub const MAX_PATH_LENGTH: usize = 256;

pub type FsResult<T> = std::result::Result<T, FsError>;

/// Filesystem error with a littlefs-compatible negative code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    Io,
    Corrupt,
    NoEntry,
    Exists,
    NotDir,
    IsDir,
    NotEmpty,
    BadHandle,
    TooLarge,
    Invalid,
    NoSpace,
    NoMemory,
    NameTooLong,
}

impl FsError {
    pub fn code(self) -> i32 {
        match self {
            FsError::Io => -5,
            FsError::Corrupt => -84,
            FsError::NoEntry => -2,
            FsError::Exists => -17,
            FsError::NotDir => -20,
            FsError::IsDir => -21,
            FsError::NotEmpty => -39,
            FsError::BadHandle => -9,
            FsError::TooLarge => -27,
            FsError::Invalid => -22,
            FsError::NoSpace => -28,
            FsError::NoMemory => -12,
            FsError::NameTooLong => -36,
        }
    }

    /// Status byte the protocol reports for this error: the code truncated to 8 bits.
    pub fn status_byte(self) -> u8 {
        self.code() as i8 as u8
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FsError::Io => "i/o error",
            FsError::Corrupt => "corrupted",
            FsError::NoEntry => "no such entry",
            FsError::Exists => "entry exists",
            FsError::NotDir => "not a directory",
            FsError::IsDir => "is a directory",
            FsError::NotEmpty => "directory not empty",
            FsError::BadHandle => "bad handle",
            FsError::TooLarge => "file too large",
            FsError::Invalid => "invalid argument",
            FsError::NoSpace => "no space left",
            FsError::NoMemory => "out of memory",
            FsError::NameTooLong => "name too long",
        };
        write!(f, "{label} ({})", self.code())
    }
}

impl std::error::Error for FsError {}

/// Open mode bits, modelled on `LFS_O_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(u8);

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags(0x01);
    pub const WRITE: OpenFlags = OpenFlags(0x02);
    pub const CREATE: OpenFlags = OpenFlags(0x04);
    pub const APPEND: OpenFlags = OpenFlags(0x08);
    pub const TRUNCATE: OpenFlags = OpenFlags(0x10);

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn writable(self) -> bool {
        self.contains(OpenFlags::WRITE)
    }

    pub fn readable(self) -> bool {
        self.contains(OpenFlags::READ)
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// Result of `stat` and of each directory read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Blocking filesystem primitives consumed by the module.
///
/// Paths handed to implementations are absolute and normalised (see
/// [`path::resolve`]). Directory reads yield `.` and `..` first, like littlefs.
pub trait FlashFs: Send {
    fn open(&mut self, path: &str, flags: OpenFlags) -> FsResult<FileHandle>;
    fn close(&mut self, file: FileHandle) -> FsResult<()>;
    fn read(&mut self, file: FileHandle, buf: &mut [u8]) -> FsResult<usize>;
    fn write(&mut self, file: FileHandle, data: &[u8]) -> FsResult<usize>;
    fn sync(&mut self, file: FileHandle) -> FsResult<()>;
    /// Absolute seek; returns the new position.
    fn seek(&mut self, file: FileHandle, pos: u64) -> FsResult<u64>;
    fn stat(&mut self, path: &str) -> FsResult<FileInfo>;
    fn mkdir(&mut self, path: &str) -> FsResult<()>;
    fn remove(&mut self, path: &str) -> FsResult<()>;
    fn dir_open(&mut self, path: &str) -> FsResult<DirHandle>;
    /// Next entry, or `None` once the directory is exhausted.
    fn dir_read(&mut self, dir: DirHandle) -> FsResult<Option<FileInfo>>;
    fn dir_tell(&mut self, dir: DirHandle) -> FsResult<u64>;
    fn dir_seek(&mut self, dir: DirHandle, pos: u64) -> FsResult<()>;
    fn dir_close(&mut self, dir: DirHandle) -> FsResult<()>;
    fn format(&mut self) -> FsResult<()>;
    fn mount(&mut self) -> FsResult<()>;
    /// Blocks currently allocated, like `lfs_fs_size`.
    fn used_blocks(&mut self) -> FsResult<u32>;
}

/// Filesystem shared between the dispatcher and the animation loader.
pub struct Storage<F> {
    inner: Arc<Mutex<F>>,
}

impl<F> Clone for Storage<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: FlashFs> Storage<F> {
    pub fn new(fs: F) -> Self {
        Self {
            inner: Arc::new(Mutex::new(fs)),
        }
    }

    /// Lock the filesystem. A poisoned lock is recovered: the filesystem keeps
    /// no invariants that a panicking reader could break halfway.
    pub fn lock(&self) -> MutexGuard<'_, F> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Free-space budget the module advertises, independent of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashBudget {
    pub total_blocks: u32,
    pub block_size: u32,
}

impl Default for FlashBudget {
    fn default() -> Self {
        Self {
            total_blocks: DEFAULT_TOTAL_BLOCKS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl FlashBudget {
    pub fn free_bytes(&self, used_blocks: u32) -> u64 {
        let free_blocks = self.total_blocks.saturating_sub(used_blocks);
        u64::from(free_blocks) * u64::from(self.block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_byte_truncates_negative_code() {
        assert_eq!(FsError::NoEntry.status_byte(), 0xFE);
        assert_eq!(FsError::Corrupt.status_byte(), (-84i8) as u8);
    }

    #[test]
    fn budget_saturates_when_overcommitted() {
        let budget = FlashBudget::default();
        assert_eq!(budget.free_bytes(4095), 4096);
        assert_eq!(budget.free_bytes(5000), 0);
    }

    #[test]
    fn flags_combine() {
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::APPEND;
        assert!(flags.writable());
        assert!(!flags.readable());
        assert!(flags.contains(OpenFlags::APPEND));
    }
}
