//! In-memory flash filesystem.
//!
//! Behaves like a freshly formatted littlefs partition: two superblocks are
//! always allocated, each directory costs one block and each file costs
//! `ceil(len / block_size)` blocks. Every `write` call is journaled so callers
//! can check exactly how data reached the flash, and faults can be queued to
//! exercise error paths.

use std::collections::{BTreeMap, HashMap, VecDeque};

use super::{
    path, DirHandle, EntryKind, FileHandle, FileInfo, FlashFs, FsError, FsResult, OpenFlags,
    DEFAULT_BLOCK_SIZE, DEFAULT_TOTAL_BLOCKS,
};

const SUPERBLOCKS: u32 = 2;

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    pos: u64,
    flags: OpenFlags,
}

#[derive(Debug)]
struct OpenDir {
    entries: Vec<FileInfo>,
    pos: usize,
}

/// One `write` call as seen by the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub path: String,
    pub len: usize,
}

/// Fault consumed by the next matching operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    FailWrite(FsError),
    /// Accept only this many bytes on the next write.
    ShortWrite(usize),
    FailRead(FsError),
}

#[derive(Debug)]
pub struct MemFs {
    nodes: BTreeMap<String, Node>,
    files: HashMap<u32, OpenFile>,
    dirs: HashMap<u32, OpenDir>,
    next_handle: u32,
    mounted: bool,
    block_size: u32,
    block_count: u32,
    journal: Vec<WriteRecord>,
    faults: VecDeque<Fault>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        Self::with_geometry(DEFAULT_BLOCK_SIZE, DEFAULT_TOTAL_BLOCKS)
    }

    pub fn with_geometry(block_size: u32, block_count: u32) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            nodes,
            files: HashMap::new(),
            dirs: HashMap::new(),
            next_handle: 1,
            mounted: true,
            block_size: block_size.max(1),
            block_count,
            journal: Vec::new(),
            faults: VecDeque::new(),
        }
    }

    /// Create or replace a file, making missing parent directories.
    pub fn insert_file(&mut self, path: &str, contents: &[u8]) {
        let path = path::resolve("/", path);
        self.make_parents(&path);
        self.nodes.insert(path, Node::File(contents.to_vec()));
    }

    pub fn insert_dir(&mut self, path: &str) {
        let path = path::resolve("/", path);
        self.make_parents(&path);
        self.nodes.insert(path, Node::Dir);
    }

    pub fn contents(&self, path: &str) -> Option<&[u8]> {
        match self.nodes.get(&path::resolve("/", path)) {
            Some(Node::File(data)) => Some(data),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(&path::resolve("/", path))
    }

    pub fn journal(&self) -> &[WriteRecord] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    pub fn inject(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    pub fn open_dirs(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn make_parents(&mut self, path: &str) {
        let mut current = String::new();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for seg in segments.iter().take(segments.len().saturating_sub(1)) {
            current.push('/');
            current.push_str(seg);
            self.nodes.entry(current.clone()).or_insert(Node::Dir);
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

    fn blocks_for(&self, len: usize) -> u32 {
        let bs = self.block_size as usize;
        len.div_ceil(bs) as u32
    }

    fn blocks_in_use(&self) -> u32 {
        let mut used = SUPERBLOCKS;
        for (path, node) in &self.nodes {
            match node {
                Node::Dir if path != "/" => used += 1,
                Node::Dir => {}
                Node::File(data) => used += self.blocks_for(data.len()),
            }
        }
        used
    }

    fn check_parent(&self, path: &str) -> FsResult<()> {
        match self.nodes.get(path::parent(path)) {
            Some(Node::Dir) => Ok(()),
            Some(Node::File(_)) => Err(FsError::NotDir),
            None => Err(FsError::NoEntry),
        }
    }

    fn take_fault(&mut self, matches: impl Fn(&Fault) -> bool) -> Option<Fault> {
        let idx = self.faults.iter().position(matches)?;
        self.faults.remove(idx)
    }

    fn children(&self, dir: &str) -> Vec<FileInfo> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{dir}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| key.len() > prefix.len() && !key[prefix.len()..].contains('/'))
            .map(|(key, node)| info_for(path::file_name(key), node))
            .collect()
    }
}

fn info_for(name: &str, node: &Node) -> FileInfo {
    match node {
        Node::File(data) => FileInfo {
            name: name.to_string(),
            kind: EntryKind::File,
            size: data.len() as u64,
        },
        Node::Dir => FileInfo {
            name: name.to_string(),
            kind: EntryKind::Dir,
            size: 0,
        },
    }
}

impl FlashFs for MemFs {
    fn open(&mut self, path: &str, flags: OpenFlags) -> FsResult<FileHandle> {
        self.ensure_mounted()?;
        let is_dir = self.nodes.get(path).map(|node| matches!(node, Node::Dir));
        match is_dir {
            Some(true) => return Err(FsError::IsDir),
            Some(false) => {
                if flags.contains(OpenFlags::TRUNCATE) && flags.writable() {
                    if let Some(Node::File(data)) = self.nodes.get_mut(path) {
                        data.clear();
                    }
                }
            }
            None => {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(FsError::NoEntry);
                }
                self.check_parent(path)?;
                self.nodes.insert(path.to_string(), Node::File(Vec::new()));
            }
        }
        let handle = self.allocate_handle();
        self.files.insert(
            handle,
            OpenFile {
                path: path.to_string(),
                pos: 0,
                flags,
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
        if let Some(Fault::FailRead(err)) = self.take_fault(|f| matches!(f, Fault::FailRead(_))) {
            return Err(err);
        }
        let open = self.files.get_mut(&file.0).ok_or(FsError::BadHandle)?;
        if !open.flags.readable() {
            return Err(FsError::BadHandle);
        }
        let data = match self.nodes.get(&open.path) {
            Some(Node::File(data)) => data,
            _ => return Err(FsError::NoEntry),
        };
        let start = (open.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        open.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, file: FileHandle, data: &[u8]) -> FsResult<usize> {
        let (path, pos, flags) = {
            let open = self.files.get(&file.0).ok_or(FsError::BadHandle)?;
            (open.path.clone(), open.pos, open.flags)
        };
        if !flags.writable() {
            return Err(FsError::BadHandle);
        }
        let mut accepted = data.len();
        match self.take_fault(|f| matches!(f, Fault::FailWrite(_) | Fault::ShortWrite(_))) {
            Some(Fault::FailWrite(err)) => return Err(err),
            Some(Fault::ShortWrite(n)) => accepted = accepted.min(n),
            _ => {}
        }

        let current_len = match self.nodes.get(&path) {
            Some(Node::File(existing)) => existing.len(),
            _ => return Err(FsError::NoEntry),
        };
        let start = if flags.contains(OpenFlags::APPEND) {
            current_len
        } else {
            pos as usize
        };
        let new_len = current_len.max(start + accepted);
        let extra = self
            .blocks_for(new_len)
            .saturating_sub(self.blocks_for(current_len));
        if self.blocks_in_use() + extra > self.block_count {
            return Err(FsError::NoSpace);
        }

        if let Some(Node::File(existing)) = self.nodes.get_mut(&path) {
            if existing.len() < new_len {
                existing.resize(new_len, 0);
            }
            existing[start..start + accepted].copy_from_slice(&data[..accepted]);
        }
        if let Some(open) = self.files.get_mut(&file.0) {
            open.pos = (start + accepted) as u64;
        }
        self.journal.push(WriteRecord {
            path,
            len: accepted,
        });
        Ok(accepted)
    }

    fn sync(&mut self, file: FileHandle) -> FsResult<()> {
        if self.files.contains_key(&file.0) {
            Ok(())
        } else {
            Err(FsError::BadHandle)
        }
    }

    fn seek(&mut self, file: FileHandle, pos: u64) -> FsResult<u64> {
        let open = self.files.get_mut(&file.0).ok_or(FsError::BadHandle)?;
        open.pos = pos;
        Ok(pos)
    }

    fn stat(&mut self, path: &str) -> FsResult<FileInfo> {
        self.ensure_mounted()?;
        let node = self.nodes.get(path).ok_or(FsError::NoEntry)?;
        let name = if path == "/" { "/" } else { path::file_name(path) };
        Ok(info_for(name, node))
    }

    fn mkdir(&mut self, path: &str) -> FsResult<()> {
        self.ensure_mounted()?;
        if self.nodes.contains_key(path) {
            return Err(FsError::Exists);
        }
        self.check_parent(path)?;
        if self.blocks_in_use() + 1 > self.block_count {
            return Err(FsError::NoSpace);
        }
        self.nodes.insert(path.to_string(), Node::Dir);
        Ok(())
    }

    fn remove(&mut self, path: &str) -> FsResult<()> {
        self.ensure_mounted()?;
        if path == "/" {
            return Err(FsError::Invalid);
        }
        match self.nodes.get(path) {
            None => return Err(FsError::NoEntry),
            Some(Node::Dir) if !self.children(path).is_empty() => return Err(FsError::NotEmpty),
            Some(_) => {}
        }
        self.nodes.remove(path);
        Ok(())
    }

    fn dir_open(&mut self, path: &str) -> FsResult<DirHandle> {
        self.ensure_mounted()?;
        match self.nodes.get(path) {
            None => return Err(FsError::NoEntry),
            Some(Node::File(_)) => return Err(FsError::NotDir),
            Some(Node::Dir) => {}
        }
        let mut entries = vec![
            info_for(".", &Node::Dir),
            info_for("..", &Node::Dir),
        ];
        entries.extend(self.children(path));
        let handle = self.allocate_handle();
        self.dirs.insert(handle, OpenDir { entries, pos: 0 });
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
        self.nodes.clear();
        self.nodes.insert("/".to_string(), Node::Dir);
        self.mounted = false;
        Ok(())
    }

    fn mount(&mut self) -> FsResult<()> {
        if !self.nodes.contains_key("/") {
            return Err(FsError::Corrupt);
        }
        self.mounted = true;
        Ok(())
    }

    fn used_blocks(&mut self) -> FsResult<u32> {
        self.ensure_mounted()?;
        Ok(self.blocks_in_use())
    }
}
