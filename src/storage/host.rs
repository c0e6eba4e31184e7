//! Host directory standing in for the flash partition.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{
    DirHandle, EntryKind, FileHandle, FileInfo, FlashFs, FsError, FsResult, OpenFlags,
    DEFAULT_BLOCK_SIZE,
};

const SUPERBLOCKS: u32 = 2;

struct HostFile {
    file: File,
    append: bool,
}

struct HostDir {
    entries: Vec<FileInfo>,
    pos: usize,
}

/// Flash partition backed by a directory on the host.
pub struct HostFs {
    root: PathBuf,
    block_size: u32,
    files: HashMap<u32, HostFile>,
    dirs: HashMap<u32, HostDir>,
    next_handle: u32,
    mounted: bool,
}

impl HostFs {
    /// Use `root` as the partition, creating it if needed. The filesystem is
    /// not mounted until [`FlashFs::mount`] succeeds.
    pub fn new(root: impl Into<PathBuf>, block_size: u32) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            block_size: if block_size == 0 {
                DEFAULT_BLOCK_SIZE
            } else {
                block_size
            },
            files: HashMap::new(),
            dirs: HashMap::new(),
            next_handle: 1,
            mounted: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &str) -> PathBuf {
        let rel = path.trim_start_matches('/');
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    fn ensure_mounted(&self) -> FsResult<()> {
        if self.mounted {
            Ok(())
        } else {
            Err(FsError::Invalid)
        }
    }

    fn allocate_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        handle
    }

    fn tree_blocks(&self, dir: &Path) -> io::Result<u32> {
        let mut used = 0u32;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                used += 1 + self.tree_blocks(&entry.path())?;
            } else {
                used += meta.len().div_ceil(u64::from(self.block_size)) as u32;
            }
        }
        Ok(used)
    }
}

fn map_io(err: io::Error) -> FsError {
    match err.kind() {
        ErrorKind::NotFound => FsError::NoEntry,
        ErrorKind::AlreadyExists => FsError::Exists,
        ErrorKind::InvalidInput => FsError::Invalid,
        ErrorKind::PermissionDenied => FsError::Io,
        ErrorKind::OutOfMemory => FsError::NoMemory,
        _ => match err.raw_os_error() {
            // ENOTDIR, EISDIR, ENOTEMPTY, ENOSPC, ENAMETOOLONG
            Some(20) => FsError::NotDir,
            Some(21) => FsError::IsDir,
            Some(39) => FsError::NotEmpty,
            Some(28) => FsError::NoSpace,
            Some(36) => FsError::NameTooLong,
            _ => FsError::Io,
        },
    }
}

fn info_from(name: String, meta: &fs::Metadata) -> FileInfo {
    FileInfo {
        name,
        kind: if meta.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        },
        size: if meta.is_dir() { 0 } else { meta.len() },
    }
}

impl FlashFs for HostFs {
    fn open(&mut self, path: &str, flags: OpenFlags) -> FsResult<FileHandle> {
        self.ensure_mounted()?;
        let target = self.host_path(path);
        if target.is_dir() {
            return Err(FsError::IsDir);
        }
        let file = OpenOptions::new()
            .read(flags.readable())
            .write(flags.writable())
            .create(flags.contains(OpenFlags::CREATE) && flags.writable())
            .truncate(flags.contains(OpenFlags::TRUNCATE) && flags.writable())
            .open(&target)
            .map_err(map_io)?;
        let handle = self.allocate_handle();
        self.files.insert(
            handle,
            HostFile {
                file,
                append: flags.contains(OpenFlags::APPEND),
            },
        );
        Ok(FileHandle(handle))
    }

    fn close(&mut self, file: FileHandle) -> FsResult<()> {
        self.files
            .remove(&file.0)
            .map(|_| ())
            .ok_or(FsError::BadHandle)
    }

    fn read(&mut self, file: FileHandle, buf: &mut [u8]) -> FsResult<usize> {
        let open = self.files.get_mut(&file.0).ok_or(FsError::BadHandle)?;
        let mut total = 0;
        while total < buf.len() {
            match open.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(map_io(err)),
            }
        }
        Ok(total)
    }

    fn write(&mut self, file: FileHandle, data: &[u8]) -> FsResult<usize> {
        let open = self.files.get_mut(&file.0).ok_or(FsError::BadHandle)?;
        if open.append {
            open.file.seek(SeekFrom::End(0)).map_err(map_io)?;
        }
        open.file.write_all(data).map_err(map_io)?;
        Ok(data.len())
    }

    fn sync(&mut self, file: FileHandle) -> FsResult<()> {
        let open = self.files.get_mut(&file.0).ok_or(FsError::BadHandle)?;
        open.file.flush().map_err(map_io)
    }

    fn seek(&mut self, file: FileHandle, pos: u64) -> FsResult<u64> {
        let open = self.files.get_mut(&file.0).ok_or(FsError::BadHandle)?;
        open.file.seek(SeekFrom::Start(pos)).map_err(map_io)
    }

    fn stat(&mut self, path: &str) -> FsResult<FileInfo> {
        self.ensure_mounted()?;
        let target = self.host_path(path);
        let meta = fs::metadata(&target).map_err(map_io)?;
        let name = if path == "/" {
            "/".to_string()
        } else {
            super::path::file_name(path).to_string()
        };
        Ok(info_from(name, &meta))
    }

    fn mkdir(&mut self, path: &str) -> FsResult<()> {
        self.ensure_mounted()?;
        fs::create_dir(self.host_path(path)).map_err(map_io)
    }

    fn remove(&mut self, path: &str) -> FsResult<()> {
        self.ensure_mounted()?;
        if path == "/" {
            return Err(FsError::Invalid);
        }
        let target = self.host_path(path);
        let meta = fs::metadata(&target).map_err(map_io)?;
        if meta.is_dir() {
            if fs::read_dir(&target).map_err(map_io)?.next().is_some() {
                return Err(FsError::NotEmpty);
            }
            fs::remove_dir(&target).map_err(map_io)
        } else {
            fs::remove_file(&target).map_err(map_io)
        }
    }

    fn dir_open(&mut self, path: &str) -> FsResult<DirHandle> {
        self.ensure_mounted()?;
        let target = self.host_path(path);
        let meta = fs::metadata(&target).map_err(map_io)?;
        if !meta.is_dir() {
            return Err(FsError::NotDir);
        }
        let mut children = Vec::new();
        for entry in fs::read_dir(&target).map_err(map_io)? {
            let entry = entry.map_err(map_io)?;
            // Names that are not UTF-8 cannot be addressed by later commands.
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let meta = entry.metadata().map_err(map_io)?;
            children.push(info_from(name, &meta));
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));

        let dot = |name: &str| FileInfo {
            name: name.to_string(),
            kind: EntryKind::Dir,
            size: 0,
        };
        let mut entries = vec![dot("."), dot("..")];
        entries.extend(children);
        let handle = self.allocate_handle();
        self.dirs.insert(handle, HostDir { entries, pos: 0 });
        Ok(DirHandle(handle))
    }

    fn dir_read(&mut self, dir: DirHandle) -> FsResult<Option<FileInfo>> {
        let open = self.dirs.get_mut(&dir.0).ok_or(FsError::BadHandle)?;
        let entry = open.entries.get(open.pos).cloned();
        if entry.is_some() {
            open.pos += 1;
        }
        Ok(entry)
    }

    fn dir_tell(&mut self, dir: DirHandle) -> FsResult<u64> {
        let open = self.dirs.get(&dir.0).ok_or(FsError::BadHandle)?;
        Ok(open.pos as u64)
    }

    fn dir_seek(&mut self, dir: DirHandle, pos: u64) -> FsResult<()> {
        let open = self.dirs.get_mut(&dir.0).ok_or(FsError::BadHandle)?;
        if pos as usize > open.entries.len() {
            return Err(FsError::Invalid);
        }
        open.pos = pos as usize;
        Ok(())
    }

    fn dir_close(&mut self, dir: DirHandle) -> FsResult<()> {
        self.dirs
            .remove(&dir.0)
            .map(|_| ())
            .ok_or(FsError::BadHandle)
    }

    fn format(&mut self) -> FsResult<()> {
        self.files.clear();
        self.dirs.clear();
        self.mounted = false;
        for entry in fs::read_dir(&self.root).map_err(map_io)? {
            let entry = entry.map_err(map_io)?;
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(map_io)?;
            } else {
                fs::remove_file(&path).map_err(map_io)?;
            }
        }
        Ok(())
    }

    fn mount(&mut self) -> FsResult<()> {
        if !self.root.is_dir() {
            return Err(FsError::Corrupt);
        }
        self.mounted = true;
        Ok(())
    }

    fn used_blocks(&mut self) -> FsResult<u32> {
        self.ensure_mounted()?;
        let used = self.tree_blocks(&self.root).map_err(map_io)?;
        Ok(SUPERBLOCKS + used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounted(dir: &tempfile::TempDir) -> HostFs {
        let mut fs = HostFs::new(dir.path(), 4096).unwrap();
        fs.mount().unwrap();
        fs
    }

    #[test]
    fn refuses_access_before_mount() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = HostFs::new(dir.path(), 4096).unwrap();
        assert_eq!(fs.stat("/"), Err(FsError::Invalid));
        fs.mount().unwrap();
        assert!(fs.stat("/").unwrap().is_dir());
    }

    #[test]
    fn writes_append_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = mounted(&dir);
        let file = fs
            .open("/img.raw", OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::APPEND)
            .unwrap();
        fs.write(file, b"hello ").unwrap();
        fs.write(file, b"flash").unwrap();
        fs.close(file).unwrap();

        let file = fs.open("/img.raw", OpenFlags::READ).unwrap();
        fs.seek(file, 6).unwrap();
        let mut buf = [0u8; 16];
        let n = fs.read(file, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"flash");
        fs.close(file).unwrap();
        assert_eq!(fs.stat("/img.raw").unwrap().size, 11);
    }

    #[test]
    fn lists_sorted_with_dot_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = mounted(&dir);
        fs.mkdir("/b").unwrap();
        fs.open("/a", OpenFlags::WRITE | OpenFlags::CREATE)
            .and_then(|f| fs.close(f))
            .unwrap();
        let handle = fs.dir_open("/").unwrap();
        let mut names = Vec::new();
        while let Some(info) = fs.dir_read(handle).unwrap() {
            names.push((info.name, info.kind));
        }
        fs.dir_close(handle).unwrap();
        assert_eq!(
            names,
            vec![
                (".".to_string(), EntryKind::Dir),
                ("..".to_string(), EntryKind::Dir),
                ("a".to_string(), EntryKind::File),
                ("b".to_string(), EntryKind::Dir),
            ]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn skips_names_that_are_not_utf8() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let mut fs = mounted(&dir);
        std::fs::write(fs.root().join(OsStr::from_bytes(b"bad\xff.raw")), b"x").unwrap();
        std::fs::write(fs.root().join("good.raw"), b"x").unwrap();
        let handle = fs.dir_open("/").unwrap();
        let mut names = Vec::new();
        while let Some(info) = fs.dir_read(handle).unwrap() {
            names.push(info.name);
        }
        fs.dir_close(handle).unwrap();
        assert_eq!(names, vec![".", "..", "good.raw"]);
    }

    #[test]
    fn maps_missing_and_non_empty_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = mounted(&dir);
        assert_eq!(fs.dir_open("/nope").unwrap_err(), FsError::NoEntry);
        fs.mkdir("/d").unwrap();
        fs.open("/d/f", OpenFlags::WRITE | OpenFlags::CREATE)
            .and_then(|f| fs.close(f))
            .unwrap();
        assert_eq!(fs.remove("/d"), Err(FsError::NotEmpty));
        assert_eq!(fs.mkdir("/d"), Err(FsError::Exists));
    }

    #[test]
    fn format_clears_partition() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = mounted(&dir);
        fs.mkdir("/d").unwrap();
        assert_eq!(fs.used_blocks().unwrap(), 3);
        fs.format().unwrap();
        fs.mount().unwrap();
        assert_eq!(fs.used_blocks().unwrap(), 2);
    }
}
