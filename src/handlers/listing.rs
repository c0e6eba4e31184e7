use crate::storage::{DirHandle, FileInfo, FlashFs};

use super::{CommandError, HandlerResult, Reply};

/// Directory iterator that survives across list / list-next round trips.
#[derive(Debug, Default)]
pub struct DirCursor {
    dir: Option<DirHandle>,
}

impl DirCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.dir.is_some()
    }

    /// Start listing `path`, superseding any listing in progress.
    pub fn first_page<F: FlashFs + ?Sized>(
        &mut self,
        fs: &mut F,
        path: &str,
        out: &mut [u8],
    ) -> HandlerResult {
        self.close(fs);
        self.dir = Some(fs.dir_open(path)?);
        self.fill(fs, out)
    }

    pub fn next_page<F: FlashFs + ?Sized>(&mut self, fs: &mut F, out: &mut [u8]) -> HandlerResult {
        if self.dir.is_none() {
            return Err(CommandError::Invalid);
        }
        self.fill(fs, out)
    }

    pub fn close<F: FlashFs + ?Sized>(&mut self, fs: &mut F) {
        if let Some(dir) = self.dir.take() {
            let _ = fs.dir_close(dir);
        }
    }

    fn fill<F: FlashFs + ?Sized>(&mut self, fs: &mut F, out: &mut [u8]) -> HandlerResult {
        match self.fill_inner(fs, out) {
            Ok(Reply::Done) => {
                self.close(fs);
                Ok(Reply::Done)
            }
            Ok(Reply::More) => Ok(Reply::More),
            Err(err) => {
                self.close(fs);
                Err(err)
            }
        }
    }

    fn fill_inner<F: FlashFs + ?Sized>(&mut self, fs: &mut F, out: &mut [u8]) -> HandlerResult {
        let Some(dir) = self.dir else {
            return Err(CommandError::Invalid);
        };
        let mut written = 0usize;
        loop {
            let pos = fs.dir_tell(dir)?;
            let Some(entry) = fs.dir_read(dir)? else {
                return Ok(Reply::Done);
            };
            if skip(&entry) {
                continue;
            }
            let line = entry_line(&entry);
            if written + line.len() <= out.len() {
                out[written..written + line.len()].copy_from_slice(&line);
                written += line.len();
                continue;
            }
            if written == 0 {
                // Name longer than a whole response: send what fits so paging advances.
                let keep = out.len().saturating_sub(2);
                out[..keep].copy_from_slice(&line[..keep]);
                if out.len() >= 2 {
                    out[keep] = line[line.len() - 2];
                    out[keep + 1] = b'\n';
                }
                return Ok(Reply::More);
            }
            fs.dir_seek(dir, pos)?;
            return Ok(Reply::More);
        }
    }
}

fn skip(entry: &FileInfo) -> bool {
    entry.name.is_empty() || entry.name == "." || entry.name == ".."
}

/// `name/\n` for directories, `name \n` for files.
fn entry_line(entry: &FileInfo) -> Vec<u8> {
    let mut line = Vec::with_capacity(entry.name.len() + 2);
    line.extend_from_slice(entry.name.as_bytes());
    line.push(if entry.is_dir() { b'/' } else { b' ' });
    line.push(b'\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemFs;

    fn collect(fs: &mut MemFs, cursor: &mut DirCursor, capacity: usize) -> (String, usize) {
        let mut out = vec![0u8; capacity];
        let mut text = String::new();
        let mut reply = cursor.first_page(fs, "/", &mut out).unwrap();
        let mut pages = 1;
        text.push_str(std::str::from_utf8(&out).unwrap().trim_end_matches('\0'));
        while reply == Reply::More {
            out.fill(0);
            reply = cursor.next_page(fs, &mut out).unwrap();
            pages += 1;
            text.push_str(std::str::from_utf8(&out).unwrap().trim_end_matches('\0'));
        }
        (text, pages)
    }

    #[test]
    fn marks_directories_and_files() {
        let mut fs = MemFs::new();
        fs.insert_dir("/anim");
        fs.insert_file("/logo.raw", b"x");
        let mut cursor = DirCursor::new();
        let (text, pages) = collect(&mut fs, &mut cursor, 63);
        assert_eq!(text, "anim/\nlogo.raw \n");
        assert_eq!(pages, 1);
        assert!(!cursor.is_open());
        assert_eq!(fs.open_dirs(), 0);
    }

    #[test]
    fn overflow_rewinds_so_nothing_is_lost() {
        let mut fs = MemFs::new();
        for idx in 0..10 {
            fs.insert_file(&format!("/frame_{idx:02}.raw"), b"");
        }
        let mut cursor = DirCursor::new();
        let (text, pages) = collect(&mut fs, &mut cursor, 40);
        let names: Vec<&str> = text.lines().collect();
        assert_eq!(names.len(), 10);
        assert_eq!(names[0], "frame_00.raw ");
        assert_eq!(names[9], "frame_09.raw ");
        assert!(pages > 1);
    }

    #[test]
    fn next_page_without_cursor_is_invalid() {
        let mut fs = MemFs::new();
        let mut cursor = DirCursor::new();
        let mut out = [0u8; 63];
        assert_eq!(
            cursor.next_page(&mut fs, &mut out),
            Err(CommandError::Invalid)
        );
    }

    #[test]
    fn missing_directory_reports_fs_error() {
        let mut fs = MemFs::new();
        let mut cursor = DirCursor::new();
        let mut out = [0u8; 63];
        assert_eq!(
            cursor.first_page(&mut fs, "/nope", &mut out),
            Err(CommandError::Fs(crate::storage::FsError::NoEntry))
        );
        assert!(!cursor.is_open());
    }
}
