use crate::animation::{AnimationPlayer, ANIMATION_EXTENSION};
use crate::display::Display;
use crate::storage::{path, FlashFs};

use super::{path_arg, CommandError, HandlerResult, Reply, IMAGE_PATH_MAX};

/// Pick what the screen shows: `.araw` files play as animations, anything
/// else is shown as a single frame.
pub fn choose_image<F: FlashFs + 'static, D: Display + 'static>(
    player: &mut AnimationPlayer<F, D>,
    cwd: &str,
    payload: &[u8],
) -> HandlerResult {
    let raw = path_arg(payload, IMAGE_PATH_MAX)?;
    let resolved = path::resolve(cwd, raw);
    if resolved.len() >= IMAGE_PATH_MAX {
        return Err(CommandError::Invalid);
    }
    if is_animation(raw) {
        player.start(&resolved)?;
    } else {
        player.show_file(&resolved)?;
    }
    Ok(Reply::Done)
}

fn is_animation(path: &str) -> bool {
    path.len() > ANIMATION_EXTENSION.len() && path.ends_with(ANIMATION_EXTENSION)
}

/// Frame-sized staging buffer for pixels streamed over write-display.
#[derive(Debug)]
pub struct DisplayWriter {
    frame: Vec<u8>,
    filled: usize,
}

impl DisplayWriter {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame: vec![0; frame_size],
            filled: 0,
        }
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Append pixels, dropping whatever overflows the frame. Returns the
    /// complete frame once the last byte lands; the write pointer then rewinds.
    pub fn push(&mut self, payload: &[u8]) -> Result<Option<&[u8]>, CommandError> {
        if payload.is_empty() {
            return Err(CommandError::Invalid);
        }
        let take = payload.len().min(self.frame.len() - self.filled);
        self.frame[self.filled..self.filled + take].copy_from_slice(&payload[..take]);
        self.filled += take;
        if self.filled >= self.frame.len() {
            self.filled = 0;
            return Ok(Some(&self.frame));
        }
        Ok(None)
    }
}
