//! Module command protocol.
//!
//! Every request is one fixed-size transport buffer:
//! ```text
//! ┌───────┬─────────┬──────────┬──────────────────┐
//! │ MAGIC │ COMMAND │ RESERVED │ PAYLOAD          │
//! │ 0x09  │ id+base │ 4B       │ 0..MTU-6 bytes   │
//! └───────┴─────────┴──────────┴──────────────────┘
//! ```
//! The response reuses the same buffer: byte 0 becomes the status and the
//! rest carries the handler's payload.

use std::fmt;

use crate::storage::FsError;

pub mod codec;

pub use codec::{Dispatcher, DispatcherConfig, Notice, BOOT_GREETING};
pub use crate::handlers::files::TimeOfDay;

pub const MAGIC: u8 = 0x09;
/// Offset added to the handler index on the wire.
pub const CMD_BASE: u8 = 0x40;
/// Magic, command and four reserved bytes.
pub const HEADER_SIZE: usize = 6;
/// Transport packet size (raw HID endpoint / CDC transfer).
pub const DEFAULT_MTU: usize = 64;

/// Handler table, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    List,
    ChangeDir,
    PrintDir,
    Remove,
    MakeDir,
    Touch,
    Cat,
    Open,
    Write,
    Close,
    Format,
    FreeSpace,
    ChooseImage,
    WriteDisplay,
    SetTime,
    Ping,
    ListNext,
}

impl CommandId {
    pub const ALL: [CommandId; 17] = [
        CommandId::List,
        CommandId::ChangeDir,
        CommandId::PrintDir,
        CommandId::Remove,
        CommandId::MakeDir,
        CommandId::Touch,
        CommandId::Cat,
        CommandId::Open,
        CommandId::Write,
        CommandId::Close,
        CommandId::Format,
        CommandId::FreeSpace,
        CommandId::ChooseImage,
        CommandId::WriteDisplay,
        CommandId::SetTime,
        CommandId::Ping,
        CommandId::ListNext,
    ];

    /// Decode the wire byte; `None` when it falls outside the table.
    pub fn from_wire(byte: u8) -> Option<Self> {
        let index = byte.checked_sub(CMD_BASE)?;
        Self::ALL.get(usize::from(index)).copied()
    }

    pub fn index(self) -> u8 {
        Self::ALL
            .iter()
            .position(|cmd| *cmd == self)
            .map(|idx| idx as u8)
            .unwrap_or(0)
    }

    pub fn wire(self) -> u8 {
        CMD_BASE + self.index()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandId::List => "ls",
            CommandId::ChangeDir => "cd",
            CommandId::PrintDir => "pwd",
            CommandId::Remove => "rm",
            CommandId::MakeDir => "mkdir",
            CommandId::Touch => "touch",
            CommandId::Cat => "cat",
            CommandId::Open => "open",
            CommandId::Write => "write",
            CommandId::Close => "close",
            CommandId::Format => "format",
            CommandId::FreeSpace => "flash_remaining",
            CommandId::ChooseImage => "choose_image",
            CommandId::WriteDisplay => "write_display",
            CommandId::SetTime => "set_time",
            CommandId::Ping => "ping",
            CommandId::ListNext => "ls_next",
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status byte written at offset 0 of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    InvalidCommand,
    FlashFull,
    MoreEntries,
    Fs(FsError),
}

impl Status {
    pub const SUCCESS: u8 = 0x00;
    pub const INVALID_COMMAND: u8 = 0x01;
    pub const FLASH_FULL: u8 = 0x02;
    pub const MORE_ENTRIES: u8 = 0x03;

    pub fn code(self) -> u8 {
        match self {
            Status::Success => Self::SUCCESS,
            Status::InvalidCommand => Self::INVALID_COMMAND,
            Status::FlashFull => Self::FLASH_FULL,
            Status::MoreEntries => Self::MORE_ENTRIES,
            Status::Fs(err) => err.status_byte(),
        }
    }

    /// Whether the request completed (including partially, with more to fetch).
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Success | Status::MoreEntries)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::InvalidCommand => "invalid_command",
            Status::FlashFull => "flash_full",
            Status::MoreEntries => "more_entries",
            Status::Fs(_) => "fs_error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Fs(err) => write!(f, "fs_error: {err}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Why a buffer was refused before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    BadLength(usize),
    BadMagic(u8),
    UnknownCommand(u8),
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::BadLength(len) => write!(f, "invalid packet length {len}"),
            PacketError::BadMagic(byte) => write!(f, "invalid magic number {byte:#04x}"),
            PacketError::UnknownCommand(byte) => write!(f, "invalid command id {byte:#04x}"),
        }
    }
}

/// A validated request header plus a view of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub command: CommandId,
    pub payload: &'a [u8],
}

impl<'a> Request<'a> {
    /// Validate `packet` (exactly the received bytes) against the header rules.
    pub fn decode(packet: &'a [u8], mtu: usize) -> Result<Self, PacketError> {
        if packet.len() < HEADER_SIZE || packet.len() > mtu {
            return Err(PacketError::BadLength(packet.len()));
        }
        if packet[0] != MAGIC {
            return Err(PacketError::BadMagic(packet[0]));
        }
        let command =
            CommandId::from_wire(packet[1]).ok_or(PacketError::UnknownCommand(packet[1]))?;
        Ok(Self {
            command,
            payload: &packet[HEADER_SIZE..],
        })
    }
}

/// Build a request buffer; used by host tooling and tests.
pub fn encode_request(command: CommandId, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len());
    packet.extend_from_slice(&[MAGIC, command.wire(), 0, 0, 0, 0]);
    packet.extend_from_slice(payload);
    packet
}
