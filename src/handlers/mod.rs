//! Command handlers and the cross-call sessions they own.

use std::fmt;

use crate::storage::FsError;

pub mod chunked;
pub mod files;
pub mod listing;
pub mod reader;
pub mod screen;

pub use chunked::{WriteSession, CHUNK_SIZE, MAX_WRITE_PAYLOAD};
pub use listing::DirCursor;
pub use reader::CatCursor;
pub use screen::DisplayWriter;

/// Bound on the current directory path.
pub const DIRECTORY_MAX: usize = 64;
/// Longest image path choose-image accepts (exclusive bound).
pub const IMAGE_PATH_MAX: usize = crate::storage::MAX_PATH_LENGTH - 2;

/// How a successful handler finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Done,
    /// Partial response; the client should ask again.
    More,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    Invalid,
    FlashFull,
    Fs(FsError),
}

impl From<FsError> for CommandError {
    fn from(value: FsError) -> Self {
        CommandError::Fs(value)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Invalid => f.write_str("invalid command"),
            CommandError::FlashFull => f.write_str("flash full"),
            CommandError::Fs(err) => write!(f, "filesystem: {err}"),
        }
    }
}

pub type HandlerResult = Result<Reply, CommandError>;

/// Extract a path argument: bytes up to the first NUL, valid UTF-8, shorter than `limit`.
pub fn path_arg(payload: &[u8], limit: usize) -> Result<&str, CommandError> {
    if payload.is_empty() {
        return Err(CommandError::Invalid);
    }
    let len = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
    if len == 0 || len >= limit {
        return Err(CommandError::Invalid);
    }
    std::str::from_utf8(&payload[..len]).map_err(|_| CommandError::Invalid)
}
