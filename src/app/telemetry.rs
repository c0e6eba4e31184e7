use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::{CommandId, Status};
use crate::serial::errors::SerialFailureKind;

/// Append-only JSON-lines record of dispatched packets and reconnects.
pub struct Journal {
    file: Mutex<File>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPhase {
    Attempt,
    Success,
    Failure,
}

#[derive(Serialize)]
struct PacketEntry<'a> {
    ts_ms: u128,
    event: &'static str,
    command: Option<&'a str>,
    status: &'a str,
    code: u8,
    payload_len: usize,
}

#[derive(Serialize)]
struct BackoffEntry<'a> {
    ts_ms: u128,
    event: &'static str,
    phase: BackoffPhase,
    attempt: u64,
    delay_ms: u64,
    device: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<SerialFailureKind>,
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// `command` is `None` when the packet was rejected before decoding.
    pub fn record_packet(
        &self,
        command: Option<CommandId>,
        status: Status,
        payload_len: usize,
    ) -> io::Result<()> {
        let entry = PacketEntry {
            ts_ms: now_ms(),
            event: "packet",
            command: command.map(|c| c.as_str()),
            status: status.as_str(),
            code: status.code(),
            payload_len,
        };
        self.append(&entry)
    }

    pub fn record_backoff(
        &self,
        phase: BackoffPhase,
        attempt: u64,
        delay_ms: u64,
        device: &str,
        failure: Option<SerialFailureKind>,
    ) -> io::Result<()> {
        let entry = BackoffEntry {
            ts_ms: now_ms(),
            event: "serial_backoff",
            phase,
            attempt,
            delay_ms,
            device,
            failure,
        };
        self.append(&entry)
    }

    fn append<T: Serialize>(&self, entry: &T) -> io::Result<()> {
        let line = serde_json::to_string(entry).map_err(io::Error::other)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("journal lock poisoned"))?;
        writeln!(file, "{line}")
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsError;

    #[test]
    fn writes_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("journal.jsonl");
        let journal = Journal::open(&path).unwrap();
        journal
            .record_packet(Some(CommandId::Write), Status::FlashFull, 58)
            .unwrap();
        journal
            .record_packet(None, Status::InvalidCommand, 0)
            .unwrap();
        journal
            .record_packet(Some(CommandId::Cat), Status::Fs(FsError::NoEntry), 9)
            .unwrap();
        journal
            .record_backoff(
                BackoffPhase::Failure,
                2,
                1000,
                "/dev/ttyGS0",
                Some(SerialFailureKind::DeviceMissing),
            )
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["command"], "write");
        assert_eq!(lines[0]["status"], "flash_full");
        assert_eq!(lines[0]["payload_len"], 58);
        assert!(lines[1]["command"].is_null());
        assert_eq!(lines[2]["code"], 0xFE);
        assert_eq!(lines[3]["event"], "serial_backoff");
        assert_eq!(lines[3]["phase"], "failure");
    }
}
