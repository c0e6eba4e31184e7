use std::{fs, path::Path, str::FromStr};

use crate::{Error, Result};

use super::Config;

pub fn load_or_default() -> Result<Config> {
    let path = super::config_path()?;
    if !path.exists() {
        let cfg = Config::default();
        save_to_path(&cfg, &path)?;
        super::validate(&cfg)?;
        return Ok(cfg);
    }
    load_from_path(&path)
}

pub fn load_from_path(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        super::validate(&cfg)?;
        return Ok(cfg);
    }

    let raw = fs::read_to_string(path)?;
    parse(&raw)
}

pub fn save_to_path(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = format!(
        "# toffee-module config\n\
device = \"{}\"\n\
baud = {}\n\
serial_timeout_ms = {}\n\
packet_size = {}\n\
ack_mode = \"{}\"\n\
storage_root = {}\n\
total_blocks = {}\n\
block_size = {}\n\
frame_width = {}\n\
frame_height = {}\n\
bytes_per_pixel = {}\n\
fps = {}\n\
frame_dump = {}\n\
journal_path = {}\n\
backoff_initial_ms = {}\n\
backoff_max_ms = {}\n",
        config.device,
        config.baud,
        config.serial_timeout_ms,
        config.packet_size,
        config.ack_mode.as_str(),
        format_optional(&config.storage_root),
        config.total_blocks,
        config.block_size,
        config.frame_width,
        config.frame_height,
        config.bytes_per_pixel,
        config.fps,
        format_optional(&config.frame_dump),
        format_optional(&config.journal_path),
        config.backoff_initial_ms,
        config.backoff_max_ms
    );
    fs::write(path, contents)?;
    Ok(())
}

pub fn parse(raw: &str) -> Result<Config> {
    let mut cfg = Config::default();

    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (key, value) = trimmed.split_once('=').ok_or_else(|| {
            Error::InvalidArgs(format!("invalid config line {}: '{}'", idx + 1, line))
        })?;

        let key = key.trim();
        let raw_value = value.trim();
        let value = raw_value.trim_matches('"');
        let line_no = idx + 1;
        match key {
            "device" => cfg.device = value.to_string(),
            "baud" => cfg.baud = number(key, value, line_no)?,
            "serial_timeout_ms" => cfg.serial_timeout_ms = number(key, value, line_no)?,
            "packet_size" => cfg.packet_size = number(key, value, line_no)?,
            "ack_mode" => {
                cfg.ack_mode = value.parse().map_err(|e: String| {
                    Error::InvalidArgs(format!("invalid ack_mode on line {line_no}: {e}"))
                })?;
            }
            "storage_root" => cfg.storage_root = optional(raw_value),
            "total_blocks" => cfg.total_blocks = number(key, value, line_no)?,
            "block_size" => cfg.block_size = number(key, value, line_no)?,
            "frame_width" => cfg.frame_width = number(key, value, line_no)?,
            "frame_height" => cfg.frame_height = number(key, value, line_no)?,
            "bytes_per_pixel" => cfg.bytes_per_pixel = number(key, value, line_no)?,
            "fps" => cfg.fps = number(key, value, line_no)?,
            "frame_dump" => cfg.frame_dump = optional(raw_value),
            "journal_path" => cfg.journal_path = optional(raw_value),
            "backoff_initial_ms" => cfg.backoff_initial_ms = number(key, value, line_no)?,
            "backoff_max_ms" => cfg.backoff_max_ms = number(key, value, line_no)?,
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unknown config key '{other}' on line {line_no}"
                )));
            }
        }
    }

    super::validate(&cfg)?;
    Ok(cfg)
}

fn number<T: FromStr>(key: &str, value: &str, line_no: usize) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidArgs(format!("invalid {key} value on line {line_no}")))
}

/// `null` (unquoted) or an empty string means unset.
fn optional(raw_value: &str) -> Option<String> {
    if raw_value == "null" {
        return None;
    }
    let value = raw_value.trim_matches('"');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn format_optional(value: &Option<String>) -> String {
    match value {
        Some(v) => format!("\"{v}\""),
        None => "null".into(),
    }
}
