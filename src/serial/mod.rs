pub mod assembler;
pub mod backoff;
pub mod errors;
pub mod fake;
pub mod sync;

pub use assembler::PacketAssembler;
pub use sync::SerialPort;

use crate::Result;

pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 50;

/// Port settings; the module link is always 8N1 without flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialOptions {
    pub baud: u32,
    pub timeout_ms: u64,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            baud: crate::config::DEFAULT_BAUD,
            timeout_ms: DEFAULT_SERIAL_TIMEOUT_MS,
        }
    }
}

/// Byte transport the serve loop runs over. Lets tests swap in a fake.
pub trait Link {
    /// Read what is available. Returns 0 when the read timed out with no data.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write_all_bytes(&mut self, data: &[u8]) -> Result<()>;
}
