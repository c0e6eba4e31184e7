//! Append-write session: bytes from many packets are staged and reach the
//! flash in full 256-byte chunks, plus one short flush on close.

use crate::app::Logger;
use crate::storage::{FileHandle, FlashBudget, FlashFs, FsError, OpenFlags};

use super::{CommandError, HandlerResult, Reply};

pub const CHUNK_SIZE: usize = 256;
pub const MAX_WRITE_PAYLOAD: usize = 4096;

#[derive(Debug)]
pub struct WriteSession {
    file: Option<FileHandle>,
    path: String,
    buffer: [u8; CHUNK_SIZE],
    fill: usize,
}

impl Default for WriteSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteSession {
    pub fn new() -> Self {
        Self {
            file: None,
            path: String::new(),
            buffer: [0; CHUNK_SIZE],
            fill: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Bytes staged but not yet written.
    pub fn pending(&self) -> usize {
        self.fill
    }

    pub fn path(&self) -> Option<&str> {
        self.file.map(|_| self.path.as_str())
    }

    /// Open `path` for appending. A session already in progress is flushed and closed first.
    pub fn open<F: FlashFs + ?Sized>(
        &mut self,
        fs: &mut F,
        path: &str,
        logger: &Logger,
    ) -> Result<(), CommandError> {
        if self.is_open() {
            logger.warn(format!(
                "open {path}: closing unfinished write session on {}",
                self.path
            ));
            if let Err(err) = self.finish(fs) {
                logger.warn(format!("previous session close failed: {err}"));
            }
        }
        let file = fs.open(path, OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::APPEND)?;
        self.file = Some(file);
        self.path = path.to_string();
        self.fill = 0;
        Ok(())
    }

    pub fn write<F: FlashFs + ?Sized>(
        &mut self,
        fs: &mut F,
        budget: FlashBudget,
        payload: &[u8],
    ) -> HandlerResult {
        let Some(file) = self.file else {
            self.fill = 0;
            return Err(CommandError::Invalid);
        };
        let used = fs.used_blocks().map_err(|_| CommandError::Invalid)?;
        let free = budget.free_bytes(used);
        if payload.len() as u64 > free {
            return Err(CommandError::FlashFull);
        }
        if payload.is_empty() || payload.len() > MAX_WRITE_PAYLOAD {
            return Err(CommandError::Invalid);
        }

        let mut rest = payload;
        loop {
            let space = CHUNK_SIZE - self.fill;
            if rest.len() <= space {
                self.buffer[self.fill..self.fill + rest.len()].copy_from_slice(rest);
                self.fill += rest.len();
                return Ok(Reply::Done);
            }
            self.buffer[self.fill..].copy_from_slice(&rest[..space]);
            self.fill = CHUNK_SIZE;
            rest = &rest[space..];
            self.flush(fs, file)?;
        }
    }

    /// Flush the partial chunk and close the file.
    pub fn close<F: FlashFs + ?Sized>(&mut self, fs: &mut F) -> HandlerResult {
        if !self.is_open() {
            self.fill = 0;
            return Err(CommandError::Invalid);
        }
        self.finish(fs)?;
        Ok(Reply::Done)
    }

    /// Close without reporting; used on shutdown and format.
    pub fn abandon<F: FlashFs + ?Sized>(&mut self, fs: &mut F) {
        let _ = self.finish(fs);
    }

    fn finish<F: FlashFs + ?Sized>(&mut self, fs: &mut F) -> Result<(), CommandError> {
        let Some(file) = self.file.take() else {
            self.fill = 0;
            return Ok(());
        };
        let flushed = if self.fill > 0 {
            self.flush(fs, file)
        } else {
            Ok(())
        };
        let synced = fs.sync(file);
        let closed = fs.close(file);
        self.path.clear();
        flushed?;
        synced?;
        closed?;
        Ok(())
    }

    fn flush<F: FlashFs + ?Sized>(&mut self, fs: &mut F, file: FileHandle) -> Result<(), CommandError> {
        let len = self.fill;
        self.fill = 0;
        let written = fs.write(file, &self.buffer[..len])?;
        if written != len {
            return Err(CommandError::Fs(FsError::Io));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::LogLevel;
    use crate::storage::memory::{Fault, WriteRecord};
    use crate::storage::MemFs;

    fn quiet() -> Logger {
        Logger::stderr(LogLevel::Error)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn small_writes_are_staged_until_a_chunk_fills() {
        let mut fs = MemFs::new();
        let mut session = WriteSession::new();
        session.open(&mut fs, "/a.raw", &quiet()).unwrap();
        for _ in 0..4 {
            session
                .write(&mut fs, FlashBudget::default(), &[1u8; 58])
                .unwrap();
        }
        assert!(fs.journal().is_empty());
        assert_eq!(session.pending(), 232);
        session
            .write(&mut fs, FlashBudget::default(), &[2u8; 58])
            .unwrap();
        assert_eq!(fs.journal().len(), 1);
        assert_eq!(fs.journal()[0].len, CHUNK_SIZE);
        assert_eq!(session.pending(), 34);
    }

    #[test]
    fn large_payload_flushes_every_full_chunk() {
        let mut fs = MemFs::new();
        let mut session = WriteSession::new();
        session.open(&mut fs, "/big.raw", &quiet()).unwrap();
        let data = pattern(1000);
        session
            .write(&mut fs, FlashBudget::default(), &data)
            .unwrap();
        session.close(&mut fs).unwrap();
        let lens: Vec<usize> = fs.journal().iter().map(|r| r.len).collect();
        assert_eq!(lens, vec![256, 256, 256, 232]);
        assert_eq!(fs.contents("/big.raw").unwrap(), data.as_slice());
    }

    #[test]
    fn oversized_and_empty_payloads_are_invalid() {
        let mut fs = MemFs::new();
        let mut session = WriteSession::new();
        session.open(&mut fs, "/a.raw", &quiet()).unwrap();
        let budget = FlashBudget::default();
        assert_eq!(
            session.write(&mut fs, budget, &vec![0u8; MAX_WRITE_PAYLOAD + 1]),
            Err(CommandError::Invalid)
        );
        assert_eq!(session.write(&mut fs, budget, &[]), Err(CommandError::Invalid));
    }

    #[test]
    fn flash_full_rejects_before_buffering() {
        let mut fs = MemFs::new();
        let mut session = WriteSession::new();
        session.open(&mut fs, "/a.raw", &quiet()).unwrap();
        let budget = FlashBudget {
            total_blocks: 2,
            block_size: 4096,
        };
        assert_eq!(
            session.write(&mut fs, budget, &[0u8; 10]),
            Err(CommandError::FlashFull)
        );
        assert_eq!(session.pending(), 0);
        session.close(&mut fs).unwrap();
        assert!(fs.journal().is_empty());
    }

    #[test]
    fn usage_query_failure_is_invalid() {
        let mut fs = MemFs::new();
        let mut session = WriteSession::new();
        session.open(&mut fs, "/a.raw", &quiet()).unwrap();
        fs.format().unwrap();
        assert_eq!(
            session.write(&mut fs, FlashBudget::default(), b"data"),
            Err(CommandError::Invalid)
        );
        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn exact_chunk_multiple_flushes_last_chunk_on_close() {
        let mut fs = MemFs::new();
        let mut session = WriteSession::new();
        session.open(&mut fs, "/even.raw", &quiet()).unwrap();
        let data = pattern(512);
        for chunk in data.chunks(58) {
            session
                .write(&mut fs, FlashBudget::default(), chunk)
                .unwrap();
        }
        assert_eq!(session.pending(), CHUNK_SIZE);
        assert_eq!(fs.journal().len(), 1);
        session.close(&mut fs).unwrap();
        let lens: Vec<usize> = fs.journal().iter().map(|r| r.len).collect();
        assert_eq!(lens, vec![256, 256]);
        assert_eq!(fs.contents("/even.raw").unwrap(), data.as_slice());
    }

    #[test]
    fn failed_flush_discards_staged_bytes() {
        let mut fs = MemFs::new();
        let mut session = WriteSession::new();
        session.open(&mut fs, "/a.raw", &quiet()).unwrap();
        fs.inject(Fault::ShortWrite(100));
        assert_eq!(
            session.write(&mut fs, FlashBudget::default(), &pattern(300)),
            Err(CommandError::Fs(FsError::Io))
        );
        assert_eq!(session.pending(), 0);
        assert!(session.is_open());
        session.close(&mut fs).unwrap();
        assert_eq!(
            fs.journal(),
            &[WriteRecord {
                path: "/a.raw".into(),
                len: 100
            }]
        );
    }

    #[test]
    fn reopen_flushes_previous_session() {
        let mut fs = MemFs::new();
        let mut session = WriteSession::new();
        session.open(&mut fs, "/first.raw", &quiet()).unwrap();
        session
            .write(&mut fs, FlashBudget::default(), b"hello")
            .unwrap();
        session.open(&mut fs, "/second.raw", &quiet()).unwrap();
        assert_eq!(fs.contents("/first.raw"), Some(&b"hello"[..]));
        assert_eq!(session.path(), Some("/second.raw"));
        assert_eq!(fs.open_files(), 1);
    }

    #[test]
    fn write_and_close_without_session_are_invalid() {
        let mut fs = MemFs::new();
        let mut session = WriteSession::new();
        assert_eq!(
            session.write(&mut fs, FlashBudget::default(), b"x"),
            Err(CommandError::Invalid)
        );
        assert_eq!(session.close(&mut fs), Err(CommandError::Invalid));
    }
}
