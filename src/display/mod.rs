//! Graphics layer consumed by the module: image objects with a pixel source.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod headless;

pub use headless::HeadlessDisplay;

pub const DEFAULT_FRAME_WIDTH: u16 = 128;
pub const DEFAULT_FRAME_HEIGHT: u16 = 128;
/// RGB565.
pub const DEFAULT_BYTES_PER_PIXEL: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayError {
    UnknownImage(ImageId),
    SizeMismatch { expected: usize, got: usize },
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayError::UnknownImage(id) => write!(f, "unknown image object {}", id.0),
            DisplayError::SizeMismatch { expected, got } => {
                write!(f, "frame is {got} bytes, expected {expected}")
            }
        }
    }
}

impl std::error::Error for DisplayError {}

/// Size of one raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u16,
    pub height: u16,
    pub bytes_per_pixel: u8,
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self {
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            bytes_per_pixel: DEFAULT_BYTES_PER_PIXEL,
        }
    }
}

impl FrameGeometry {
    pub fn frame_size(&self) -> usize {
        usize::from(self.width) * usize::from(self.height) * usize::from(self.bytes_per_pixel)
    }
}

/// Image-object primitives of the widget library.
pub trait Display: Send {
    fn create_image(&mut self, geometry: FrameGeometry) -> ImageId;
    /// Point the image at new pixels. Implementations copy what they need.
    fn set_source(&mut self, image: ImageId, pixels: &[u8]) -> Result<(), DisplayError>;
    /// Force a redraw of the image area.
    fn invalidate(&mut self, image: ImageId) -> Result<(), DisplayError>;
    fn delete(&mut self, image: ImageId) -> Result<(), DisplayError>;
}

/// Display shared between the command context and the presenter timer.
pub struct SharedDisplay<D> {
    inner: Arc<Mutex<D>>,
}

impl<D> Clone for SharedDisplay<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Display> SharedDisplay<D> {
    pub fn new(display: D) -> Self {
        Self {
            inner: Arc::new(Mutex::new(display)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, D> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
