use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use crc32fast::Hasher;

use super::{Display, DisplayError, FrameGeometry, ImageId};

const PRESENT_HISTORY: usize = 1024;

#[derive(Debug)]
struct ImageObject {
    geometry: FrameGeometry,
    pixels: Vec<u8>,
    crc: Option<u32>,
    redraws: u64,
}

/// Display without a panel: tracks image objects and fingerprints every
/// redraw so callers can see what would have been on screen.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    objects: HashMap<ImageId, ImageObject>,
    next_id: u32,
    created: u64,
    deleted: u64,
    presented: VecDeque<u32>,
    dump_path: Option<PathBuf>,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also write the raw pixels of every redraw to `path`, replacing the previous frame.
    pub fn with_dump(path: impl Into<PathBuf>) -> Self {
        Self {
            dump_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn live_images(&self) -> usize {
        self.objects.len()
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn deleted(&self) -> u64 {
        self.deleted
    }

    /// CRC-32 of each redrawn frame, oldest first.
    pub fn presented(&self) -> Vec<u32> {
        self.presented.iter().copied().collect()
    }

    pub fn pixels(&self, image: ImageId) -> Option<&[u8]> {
        self.objects.get(&image).map(|obj| obj.pixels.as_slice())
    }

    pub fn redraws(&self, image: ImageId) -> u64 {
        self.objects.get(&image).map(|obj| obj.redraws).unwrap_or(0)
    }
}

pub fn frame_crc(pixels: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(pixels);
    hasher.finalize()
}

impl Display for HeadlessDisplay {
    fn create_image(&mut self, geometry: FrameGeometry) -> ImageId {
        self.next_id = self.next_id.wrapping_add(1);
        let id = ImageId(self.next_id);
        self.objects.insert(
            id,
            ImageObject {
                geometry,
                pixels: Vec::new(),
                crc: None,
                redraws: 0,
            },
        );
        self.created += 1;
        id
    }

    fn set_source(&mut self, image: ImageId, pixels: &[u8]) -> Result<(), DisplayError> {
        let obj = self
            .objects
            .get_mut(&image)
            .ok_or(DisplayError::UnknownImage(image))?;
        let expected = obj.geometry.frame_size();
        if pixels.len() != expected {
            return Err(DisplayError::SizeMismatch {
                expected,
                got: pixels.len(),
            });
        }
        obj.pixels.clear();
        obj.pixels.extend_from_slice(pixels);
        obj.crc = Some(frame_crc(pixels));
        Ok(())
    }

    fn invalidate(&mut self, image: ImageId) -> Result<(), DisplayError> {
        let obj = self
            .objects
            .get_mut(&image)
            .ok_or(DisplayError::UnknownImage(image))?;
        obj.redraws += 1;
        if let Some(crc) = obj.crc {
            if self.presented.len() == PRESENT_HISTORY {
                self.presented.pop_front();
            }
            self.presented.push_back(crc);
        }
        if let Some(path) = self.dump_path.as_ref() {
            let _ = std::fs::write(path, &obj.pixels);
        }
        Ok(())
    }

    fn delete(&mut self, image: ImageId) -> Result<(), DisplayError> {
        self.objects
            .remove(&image)
            .ok_or(DisplayError::UnknownImage(image))?;
        self.deleted += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> FrameGeometry {
        FrameGeometry {
            width: 2,
            height: 2,
            bytes_per_pixel: 2,
        }
    }

    #[test]
    fn records_redraws_by_crc() {
        let mut display = HeadlessDisplay::new();
        let img = display.create_image(tiny());
        display.set_source(img, &[7u8; 8]).unwrap();
        display.invalidate(img).unwrap();
        display.invalidate(img).unwrap();
        assert_eq!(display.presented(), vec![frame_crc(&[7u8; 8]); 2]);
        assert_eq!(display.redraws(img), 2);
    }

    #[test]
    fn rejects_wrong_frame_size_and_unknown_ids() {
        let mut display = HeadlessDisplay::new();
        let img = display.create_image(tiny());
        assert_eq!(
            display.set_source(img, &[0u8; 3]),
            Err(DisplayError::SizeMismatch {
                expected: 8,
                got: 3
            })
        );
        display.delete(img).unwrap();
        assert_eq!(display.invalidate(img), Err(DisplayError::UnknownImage(img)));
        assert_eq!(display.live_images(), 0);
        assert_eq!((display.created(), display.deleted()), (1, 1));
    }

    #[test]
    fn dumps_last_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.raw");
        let mut display = HeadlessDisplay::with_dump(&path);
        let img = display.create_image(tiny());
        display.set_source(img, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        display.invalidate(img).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
