use crate::storage::{FileHandle, FlashFs, FsError, OpenFlags};

use super::{HandlerResult, Reply};

/// Read cursor for `cat`, so files larger than one response can be fetched
/// by repeating the same request.
#[derive(Debug, Default)]
pub struct CatCursor {
    file: Option<FileHandle>,
    path: String,
    pos: u64,
}

impl CatCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Fill `out` with `[n][n bytes]` from `path`.
    pub fn cat<F: FlashFs + ?Sized>(
        &mut self,
        fs: &mut F,
        path: &str,
        out: &mut [u8],
    ) -> HandlerResult {
        if self.file.is_some() && self.path != path {
            self.close(fs);
        }
        let file = match self.file {
            Some(file) => file,
            None => {
                if fs.stat(path)?.is_dir() {
                    return Err(FsError::IsDir.into());
                }
                let file = fs.open(path, OpenFlags::READ)?;
                self.file = Some(file);
                self.path = path.to_string();
                self.pos = 0;
                file
            }
        };

        let Some((len_byte, data)) = out.split_first_mut() else {
            self.close(fs);
            return Ok(Reply::Done);
        };
        let capacity = data.len().min(usize::from(u8::MAX));
        let read = match read_full(fs, file, &mut data[..capacity]) {
            Ok(read) => read,
            Err(err) => {
                self.close(fs);
                return Err(err.into());
            }
        };
        *len_byte = read as u8;
        self.pos += read as u64;
        // Size is re-read each call so bytes appended mid-transfer are sent too.
        let size = match fs.stat(path) {
            Ok(info) => info.size,
            Err(err) => {
                self.close(fs);
                return Err(err.into());
            }
        };
        if read < capacity || self.pos >= size {
            self.close(fs);
            return Ok(Reply::Done);
        }
        Ok(Reply::More)
    }

    pub fn close<F: FlashFs + ?Sized>(&mut self, fs: &mut F) {
        if let Some(file) = self.file.take() {
            let _ = fs.close(file);
        }
        self.path.clear();
        self.pos = 0;
    }
}

/// Read until `buf` is full or the file ends.
pub(crate) fn read_full<F: FlashFs + ?Sized>(
    fs: &mut F,
    file: FileHandle,
    buf: &mut [u8],
) -> crate::storage::FsResult<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = fs.read(file, &mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::CommandError;
    use crate::storage::MemFs;

    #[test]
    fn small_file_fits_one_response() {
        let mut fs = MemFs::new();
        fs.insert_file("/note.txt", b"hi there");
        let mut cursor = CatCursor::new();
        let mut out = [0u8; 63];
        assert_eq!(cursor.cat(&mut fs, "/note.txt", &mut out), Ok(Reply::Done));
        assert_eq!(out[0], 8);
        assert_eq!(&out[1..9], b"hi there");
        assert_eq!(fs.open_files(), 0);
    }

    #[test]
    fn repeated_cat_resumes_until_eof() {
        let mut fs = MemFs::new();
        let data: Vec<u8> = (0..150u8).collect();
        fs.insert_file("/blob", &data);
        let mut cursor = CatCursor::new();
        let mut collected = Vec::new();
        let mut out = [0u8; 63];
        loop {
            let reply = cursor.cat(&mut fs, "/blob", &mut out).unwrap();
            collected.extend_from_slice(&out[1..1 + usize::from(out[0])]);
            if reply == Reply::Done {
                break;
            }
        }
        assert_eq!(collected, data);
        assert!(!cursor.is_open());
    }

    #[test]
    fn exact_multiple_ends_without_empty_round_trip() {
        let mut fs = MemFs::new();
        fs.insert_file("/even", &[7u8; 62]);
        let mut cursor = CatCursor::new();
        let mut out = [0u8; 63];
        assert_eq!(cursor.cat(&mut fs, "/even", &mut out), Ok(Reply::Done));
        assert_eq!(out[0], 62);
    }

    #[test]
    fn bytes_appended_mid_transfer_are_sent() {
        let mut fs = MemFs::new();
        let head: Vec<u8> = (0..100u8).collect();
        fs.insert_file("/grow", &head);
        let mut cursor = CatCursor::new();
        let mut out = [0u8; 63];
        assert_eq!(cursor.cat(&mut fs, "/grow", &mut out), Ok(Reply::More));
        let mut collected = out[1..1 + usize::from(out[0])].to_vec();

        let tail = [0xAAu8; 50];
        let file = fs
            .open("/grow", OpenFlags::WRITE | OpenFlags::APPEND)
            .unwrap();
        fs.write(file, &tail).unwrap();
        fs.close(file).unwrap();

        loop {
            let reply = cursor.cat(&mut fs, "/grow", &mut out).unwrap();
            collected.extend_from_slice(&out[1..1 + usize::from(out[0])]);
            if reply == Reply::Done {
                break;
            }
        }
        assert_eq!(collected.len(), 150);
        assert_eq!(&collected[..100], &head[..]);
        assert_eq!(&collected[100..], &tail[..]);
        assert_eq!(fs.open_files(), 0);
    }

    #[test]
    fn other_path_restarts() {
        let mut fs = MemFs::new();
        fs.insert_file("/a", &[1u8; 100]);
        fs.insert_file("/b", b"bee");
        let mut cursor = CatCursor::new();
        let mut out = [0u8; 63];
        assert_eq!(cursor.cat(&mut fs, "/a", &mut out), Ok(Reply::More));
        assert_eq!(cursor.cat(&mut fs, "/b", &mut out), Ok(Reply::Done));
        assert_eq!(&out[1..4], b"bee");
        assert_eq!(fs.open_files(), 0);
    }

    #[test]
    fn missing_file_is_fs_error() {
        let mut fs = MemFs::new();
        let mut cursor = CatCursor::new();
        let mut out = [0u8; 63];
        assert_eq!(
            cursor.cat(&mut fs, "/none", &mut out),
            Err(CommandError::Fs(FsError::NoEntry))
        );
    }
}
