//! Single-shot filesystem commands.

use crate::storage::{path, FlashBudget, FlashFs, OpenFlags, MAX_PATH_LENGTH};

use super::{path_arg, CommandError, HandlerResult, Reply, DIRECTORY_MAX};

/// Resolve a path payload against the current directory.
pub fn target(cwd: &str, payload: &[u8]) -> Result<String, CommandError> {
    let raw = path_arg(payload, MAX_PATH_LENGTH)?;
    let resolved = path::resolve(cwd, raw);
    if resolved.len() >= MAX_PATH_LENGTH {
        return Err(CommandError::Invalid);
    }
    Ok(resolved)
}

pub fn change_dir<F: FlashFs + ?Sized>(
    fs: &mut F,
    cwd: &mut String,
    payload: &[u8],
) -> HandlerResult {
    let raw = path_arg(payload, DIRECTORY_MAX)?;
    let resolved = path::resolve(cwd, raw);
    if resolved.len() >= DIRECTORY_MAX {
        return Err(CommandError::Invalid);
    }
    let dir = fs.dir_open(&resolved).map_err(|_| CommandError::Invalid)?;
    fs.dir_close(dir)?;
    *cwd = resolved;
    Ok(Reply::Done)
}

pub fn print_dir(cwd: &str, out: &mut [u8]) -> HandlerResult {
    let len = cwd.len().min(out.len());
    out[..len].copy_from_slice(&cwd.as_bytes()[..len]);
    Ok(Reply::Done)
}

pub fn remove<F: FlashFs + ?Sized>(fs: &mut F, cwd: &str, payload: &[u8]) -> HandlerResult {
    let path = target(cwd, payload)?;
    fs.remove(&path)?;
    Ok(Reply::Done)
}

pub fn make_dir<F: FlashFs + ?Sized>(fs: &mut F, cwd: &str, payload: &[u8]) -> HandlerResult {
    let path = target(cwd, payload)?;
    fs.mkdir(&path)?;
    Ok(Reply::Done)
}

/// Create the file if it does not exist; existing contents are kept.
pub fn touch<F: FlashFs + ?Sized>(fs: &mut F, cwd: &str, payload: &[u8]) -> HandlerResult {
    let path = target(cwd, payload)?;
    let file = fs.open(&path, OpenFlags::WRITE | OpenFlags::CREATE)?;
    fs.close(file)?;
    Ok(Reply::Done)
}

/// Erase the partition and mount the fresh filesystem.
pub fn format<F: FlashFs + ?Sized>(fs: &mut F) -> HandlerResult {
    fs.format()?;
    fs.mount()?;
    Ok(Reply::Done)
}

/// Free bytes as a little-endian `u32`.
pub fn free_space<F: FlashFs + ?Sized>(
    fs: &mut F,
    budget: FlashBudget,
    out: &mut [u8],
) -> HandlerResult {
    if out.len() < 4 {
        return Err(CommandError::Invalid);
    }
    let used = fs.used_blocks().map_err(|_| CommandError::Invalid)?;
    let free = u32::try_from(budget.free_bytes(used)).unwrap_or(u32::MAX);
    out[..4].copy_from_slice(&free.to_le_bytes());
    Ok(Reply::Done)
}

/// Wall-clock time pushed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl TimeOfDay {
    pub fn parse(payload: &[u8]) -> Result<Self, CommandError> {
        let &[hour, minute, second, ..] = payload else {
            return Err(CommandError::Invalid);
        };
        if hour > 23 || minute > 59 || second > 59 {
            return Err(CommandError::Invalid);
        }
        Ok(Self {
            hour,
            minute,
            second,
        })
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsError, MemFs};

    #[test]
    fn cd_validates_and_resolves_relative_paths() {
        let mut fs = MemFs::new();
        fs.insert_dir("/anim/cats");
        let mut cwd = "/".to_string();
        change_dir(&mut fs, &mut cwd, b"anim").unwrap();
        assert_eq!(cwd, "/anim");
        change_dir(&mut fs, &mut cwd, b"cats").unwrap();
        assert_eq!(cwd, "/anim/cats");
        change_dir(&mut fs, &mut cwd, b"../..").unwrap();
        assert_eq!(cwd, "/");
        assert_eq!(
            change_dir(&mut fs, &mut cwd, b"x/dir"),
            Err(CommandError::Invalid)
        );
        assert_eq!(cwd, "/");
        assert_eq!(fs.open_dirs(), 0);
    }

    #[test]
    fn cd_into_file_is_invalid() {
        let mut fs = MemFs::new();
        fs.insert_file("/a.raw", b"");
        let mut cwd = "/".to_string();
        assert_eq!(
            change_dir(&mut fs, &mut cwd, b"a.raw"),
            Err(CommandError::Invalid)
        );
    }

    #[test]
    fn touch_keeps_existing_contents() {
        let mut fs = MemFs::new();
        fs.insert_file("/keep", b"data");
        touch(&mut fs, "/", b"keep").unwrap();
        touch(&mut fs, "/", b"fresh").unwrap();
        assert_eq!(fs.contents("/keep"), Some(&b"data"[..]));
        assert_eq!(fs.contents("/fresh"), Some(&b""[..]));
        assert_eq!(fs.open_files(), 0);
    }

    #[test]
    fn rm_reports_littlefs_codes() {
        let mut fs = MemFs::new();
        fs.insert_file("/dir/inner", b"");
        assert_eq!(
            remove(&mut fs, "/", b"dir"),
            Err(CommandError::Fs(FsError::NotEmpty))
        );
        assert_eq!(
            remove(&mut fs, "/", b"ghost"),
            Err(CommandError::Fs(FsError::NoEntry))
        );
        remove(&mut fs, "/dir", b"inner").unwrap();
        remove(&mut fs, "/", b"dir").unwrap();
    }

    #[test]
    fn free_space_is_little_endian_bytes() {
        let mut fs = MemFs::new();
        let mut out = [0u8; 63];
        free_space(&mut fs, FlashBudget::default(), &mut out).unwrap();
        let free = u32::from_le_bytes([out[0], out[1], out[2], out[3]]);
        assert_eq!(free, (4096 - 2) * 4096);
    }

    #[test]
    fn free_space_on_unmounted_flash_is_invalid() {
        let mut fs = MemFs::new();
        fs.format().unwrap();
        let mut out = [0u8; 63];
        assert_eq!(
            free_space(&mut fs, FlashBudget::default(), &mut out),
            Err(CommandError::Invalid)
        );
    }

    #[test]
    fn format_remounts_empty() {
        let mut fs = MemFs::new();
        fs.insert_file("/a", b"1");
        format(&mut fs).unwrap();
        assert!(fs.is_mounted());
        assert!(!fs.exists("/a"));
    }

    #[test]
    fn time_needs_three_valid_fields() {
        assert_eq!(
            TimeOfDay::parse(&[13, 5, 9]),
            Ok(TimeOfDay {
                hour: 13,
                minute: 5,
                second: 9
            })
        );
        assert_eq!(TimeOfDay::parse(&[1, 2]), Err(CommandError::Invalid));
        assert_eq!(TimeOfDay::parse(&[24, 0, 0]), Err(CommandError::Invalid));
        assert_eq!(TimeOfDay::parse(&[9, 8, 7]).unwrap().to_string(), "09:08:07");
    }
}
