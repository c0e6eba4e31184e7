use crate::{Error, Result};
use std::path::{Path, PathBuf};

pub mod loader;

pub const DEFAULT_DEVICE: &str = "/dev/ttyGS0";
pub const DEFAULT_BAUD: u32 = 115_200;
pub const DEFAULT_PACKET_SIZE: usize = crate::protocol::DEFAULT_MTU;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 10_000;
const CONFIG_DIR_NAME: &str = ".toffee_module";
const CONFIG_FILE_NAME: &str = "config.toml";
const FLASH_DIR_NAME: &str = "flash";

/// How responses are acknowledged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Only the MTU-sized response packet.
    #[default]
    Packet,
    /// Response packet followed by `OK` or `ERROR`.
    Text,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Packet => "packet",
            AckMode::Text => "text",
        }
    }
}

impl std::str::FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "packet" => Ok(AckMode::Packet),
            "text" => Ok(AckMode::Text),
            other => Err(format!("expected 'packet' or 'text', got '{other}'")),
        }
    }
}

/// User-supplied settings loaded from the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub device: String,
    pub baud: u32,
    pub serial_timeout_ms: u64,
    pub packet_size: usize,
    pub ack_mode: AckMode,
    /// Host directory backing the flash partition; `None` means `~/.toffee_module/flash`.
    pub storage_root: Option<String>,
    pub total_blocks: u32,
    pub block_size: u32,
    pub frame_width: u16,
    pub frame_height: u16,
    pub bytes_per_pixel: u8,
    pub fps: u32,
    pub frame_dump: Option<String>,
    pub journal_path: Option<String>,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            baud: DEFAULT_BAUD,
            serial_timeout_ms: crate::serial::DEFAULT_SERIAL_TIMEOUT_MS,
            packet_size: DEFAULT_PACKET_SIZE,
            ack_mode: AckMode::default(),
            storage_root: None,
            total_blocks: crate::storage::DEFAULT_TOTAL_BLOCKS,
            block_size: crate::storage::DEFAULT_BLOCK_SIZE,
            frame_width: crate::display::DEFAULT_FRAME_WIDTH,
            frame_height: crate::display::DEFAULT_FRAME_HEIGHT,
            bytes_per_pixel: crate::display::DEFAULT_BYTES_PER_PIXEL,
            fps: crate::animation::DEFAULT_FPS,
            frame_dump: None,
            journal_path: None,
            backoff_initial_ms: DEFAULT_BACKOFF_INITIAL_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl Config {
    pub fn load_or_default() -> Result<Self> {
        loader::load_or_default()
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        loader::load_from_path(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        loader::save_to_path(self, path)
    }

    /// Where the flash partition lives on the host.
    pub fn resolved_storage_root(&self) -> Result<PathBuf> {
        match &self.storage_root {
            Some(root) => Ok(PathBuf::from(root)),
            None => Ok(config_dir()?.join(FLASH_DIR_NAME)),
        }
    }
}

/// `~/.toffee_module`, located through the platform home directory.
pub fn config_dir() -> Result<PathBuf> {
    let dirs = directories::BaseDirs::new().ok_or_else(|| {
        Error::InvalidArgs("home directory not found; cannot locate config directory".into())
    })?;
    Ok(dirs.home_dir().join(CONFIG_DIR_NAME))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

pub(crate) fn validate(cfg: &Config) -> Result<()> {
    if cfg.device.trim().is_empty() {
        return Err(Error::InvalidArgs("device must not be empty".into()));
    }
    if cfg.baud == 0 {
        return Err(Error::InvalidArgs("baud must be greater than zero".into()));
    }
    if !(1..=10_000).contains(&cfg.serial_timeout_ms) {
        return Err(Error::InvalidArgs(
            "serial_timeout_ms must be between 1 and 10000".into(),
        ));
    }
    if !(crate::protocol::HEADER_SIZE + 1..=1024).contains(&cfg.packet_size) {
        return Err(Error::InvalidArgs(
            "packet_size must be between 7 and 1024".into(),
        ));
    }
    if cfg.total_blocks < 2 {
        return Err(Error::InvalidArgs("total_blocks must be at least 2".into()));
    }
    if cfg.block_size < 128 || !cfg.block_size.is_power_of_two() {
        return Err(Error::InvalidArgs(
            "block_size must be a power of two of at least 128".into(),
        ));
    }
    if cfg.frame_width == 0 || cfg.frame_height == 0 {
        return Err(Error::InvalidArgs(
            "frame_width and frame_height must be non-zero".into(),
        ));
    }
    if !(1..=4).contains(&cfg.bytes_per_pixel) {
        return Err(Error::InvalidArgs(
            "bytes_per_pixel must be between 1 and 4".into(),
        ));
    }
    if !(1..=60).contains(&cfg.fps) {
        return Err(Error::InvalidArgs("fps must be between 1 and 60".into()));
    }
    if cfg.backoff_initial_ms < 10 {
        return Err(Error::InvalidArgs(
            "backoff_initial_ms must be at least 10".into(),
        ));
    }
    if cfg.backoff_max_ms < cfg.backoff_initial_ms {
        return Err(Error::InvalidArgs(
            "backoff_max_ms must not be below backoff_initial_ms".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate(&Config::default()).unwrap();
    }

    #[test]
    fn ack_mode_parses_case_insensitively() {
        assert_eq!("TEXT".parse::<AckMode>(), Ok(AckMode::Text));
        assert!("loud".parse::<AckMode>().is_err());
    }

    #[test]
    fn explicit_storage_root_wins() {
        let cfg = Config {
            storage_root: Some("/srv/flash".into()),
            ..Config::default()
        };
        assert_eq!(
            cfg.resolved_storage_root().unwrap(),
            PathBuf::from("/srv/flash")
        );
    }

    #[test]
    fn backoff_order_is_checked() {
        let cfg = Config {
            backoff_initial_ms: 500,
            backoff_max_ms: 100,
            ..Config::default()
        };
        let err = validate(&cfg).unwrap_err();
        assert!(format!("{err}").contains("backoff_max_ms"));
    }
}
