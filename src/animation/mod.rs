//! Animation playback: a loader thread pre-reads the next frame from flash
//! into the back slot while a periodic presenter swaps it on screen.
//!
//! Lock order is animation state, then display or filesystem. Nothing takes
//! the animation lock while holding the filesystem lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Sender};

use crate::app::Logger;
use crate::display::{Display, FrameGeometry, ImageId, SharedDisplay};
use crate::handlers::reader::read_full;
use crate::handlers::CommandError;
use crate::storage::{FileHandle, FlashFs, FsError, FsResult, OpenFlags, Storage};

mod loader;
mod presenter;
pub mod slots;

use slots::FrameSlots;

/// File extension that selects animated playback.
pub const ANIMATION_EXTENSION: &str = ".araw";
pub const DEFAULT_FPS: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Playing,
    Stopping,
}

#[derive(Debug)]
struct AnimState {
    phase: Phase,
    file: Option<FileHandle>,
    slots: FrameSlots,
    frame_count: u32,
    next_frame: u32,
    current_frame: u32,
    image: Option<ImageId>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<AnimState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, AnimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Live and peak thread counts for one worker role.
#[derive(Debug, Default)]
pub struct LiveCounter {
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl LiveCounter {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Held by a worker thread for its whole lifetime.
struct LiveGuard(Arc<LiveCounter>);

impl LiveGuard {
    fn enter(counter: Arc<LiveCounter>) -> Self {
        let now = counter.live.fetch_add(1, Ordering::SeqCst) + 1;
        counter.peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct AnimationPlayer<F: FlashFs + 'static, D: Display + 'static> {
    shared: Arc<Shared>,
    storage: Storage<F>,
    display: SharedDisplay<D>,
    geometry: FrameGeometry,
    interval: Duration,
    loader: Option<JoinHandle<()>>,
    presenter: Option<(Sender<()>, JoinHandle<()>)>,
    loaders: Arc<LiveCounter>,
    presenters: Arc<LiveCounter>,
    logger: Logger,
}

impl<F: FlashFs + 'static, D: Display + 'static> AnimationPlayer<F, D> {
    pub fn new(
        storage: Storage<F>,
        display: SharedDisplay<D>,
        geometry: FrameGeometry,
        fps: u32,
        logger: Logger,
    ) -> Self {
        let interval = Duration::from_millis(1000 / u64::from(fps.max(1)));
        let state = AnimState {
            phase: Phase::Idle,
            file: None,
            slots: FrameSlots::new(geometry.frame_size()),
            frame_count: 0,
            next_frame: 0,
            current_frame: 0,
            image: None,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                wake: Condvar::new(),
            }),
            storage,
            display,
            geometry,
            interval,
            loader: None,
            presenter: None,
            loaders: Arc::new(LiveCounter::default()),
            presenters: Arc::new(LiveCounter::default()),
            logger,
        }
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    pub fn frame_count(&self) -> u32 {
        self.shared.lock().frame_count
    }

    /// Frame on screen right now.
    pub fn current_frame(&self) -> u32 {
        self.shared.lock().current_frame
    }

    pub fn image(&self) -> Option<ImageId> {
        self.shared.lock().image
    }

    pub fn frame_interval(&self) -> Duration {
        self.interval
    }

    pub fn loaders(&self) -> &LiveCounter {
        &self.loaders
    }

    pub fn presenters(&self) -> &LiveCounter {
        &self.presenters
    }

    /// Start playing `path`, tearing down whatever was showing.
    pub fn start(&mut self, path: &str) -> Result<(), CommandError> {
        self.cleanup();

        let frame_size = self.geometry.frame_size();
        let info = self.storage.lock().stat(path)?;
        if info.is_dir() {
            return Err(CommandError::Fs(FsError::IsDir));
        }
        let frames = info.size / frame_size as u64;
        if frames == 0 {
            self.logger.warn(format!(
                "animation {path}: {} bytes is shorter than one {frame_size}-byte frame",
                info.size
            ));
            return Err(CommandError::Invalid);
        }
        let frame_count = u32::try_from(frames).unwrap_or(u32::MAX);
        let file = self.storage.lock().open(path, OpenFlags::READ)?;
        let image = self.display.lock().create_image(self.geometry);

        let first = {
            let mut state = self.shared.lock();
            state.file = Some(file);
            state.image = Some(image);
            state.frame_count = frame_count;
            state.next_frame = 1 % frame_count;
            state.current_frame = 0;
            match state.slots.lease_front(0) {
                Some(mut lease) => match read_frame(&self.storage, file, 0, &mut lease.buffer) {
                    Ok(()) => {
                        let shown = show(&self.display, image, &lease.buffer, &self.logger);
                        state.slots.present_front(lease);
                        if shown {
                            state.phase = Phase::Playing;
                            Ok(())
                        } else {
                            Err(CommandError::Invalid)
                        }
                    }
                    Err(err) => {
                        state.slots.present_front(lease);
                        Err(CommandError::Fs(err))
                    }
                },
                None => Err(CommandError::Invalid),
            }
        };
        if let Err(err) = first {
            self.cleanup();
            return Err(err);
        }

        if let Err(err) = self.spawn_workers() {
            self.logger
                .error(format!("animation {path}: cannot start workers: {err}"));
            self.cleanup();
            return Err(CommandError::Fs(FsError::NoMemory));
        }
        self.logger.info(format!(
            "animation {path}: {frame_count} frames every {}",
            humantime::format_duration(self.interval)
        ));
        Ok(())
    }

    fn spawn_workers(&mut self) -> std::io::Result<()> {
        let poll = self.interval / 4;
        self.loader = Some(loader::spawn(
            Arc::clone(&self.shared),
            self.storage.clone(),
            poll,
            Arc::clone(&self.loaders),
            self.logger.clone(),
        )?);
        let (stop_tx, stop_rx) = channel::bounded(1);
        let handle = presenter::spawn(
            Arc::clone(&self.shared),
            self.display.clone(),
            self.interval,
            stop_rx,
            Arc::clone(&self.presenters),
            self.logger.clone(),
        )?;
        self.presenter = Some((stop_tx, handle));
        Ok(())
    }

    /// Show one frame read from `path` as a still image.
    pub fn show_file(&mut self, path: &str) -> Result<(), CommandError> {
        self.cleanup();
        let mut pixels = vec![0u8; self.geometry.frame_size()];
        {
            let mut fs = self.storage.lock();
            let file = fs.open(path, OpenFlags::READ)?;
            let read = read_full(&mut *fs, file, &mut pixels);
            let closed = fs.close(file);
            read?;
            closed?;
        }
        self.show_pixels(&pixels)
    }

    /// Replace whatever is on screen with `pixels`.
    pub fn show_pixels(&mut self, pixels: &[u8]) -> Result<(), CommandError> {
        self.cleanup();
        let image = self.display.lock().create_image(self.geometry);
        self.shared.lock().image = Some(image);
        if show(&self.display, image, pixels, &self.logger) {
            Ok(())
        } else {
            Err(CommandError::Invalid)
        }
    }

    /// Stop playback and release the file and image object.
    pub fn cleanup(&mut self) {
        {
            let mut state = self.shared.lock();
            if state.phase == Phase::Playing {
                state.phase = Phase::Stopping;
            }
        }
        self.shared.wake.notify_all();

        if let Some((stop, handle)) = self.presenter.take() {
            drop(stop);
            if handle.join().is_err() {
                self.logger.error("animation presenter panicked");
            }
        }
        if let Some(handle) = self.loader.take() {
            if handle.join().is_err() {
                self.logger.error("animation loader panicked");
            }
        }

        let (file, image) = {
            let mut state = self.shared.lock();
            state.slots.reset();
            state.phase = Phase::Idle;
            state.frame_count = 0;
            state.next_frame = 0;
            state.current_frame = 0;
            (state.file.take(), state.image.take())
        };
        if let Some(file) = file {
            if let Err(err) = self.storage.lock().close(file) {
                self.logger
                    .warn(format!("animation file close failed: {err}"));
            }
        }
        if let Some(image) = image {
            if let Err(err) = self.display.lock().delete(image) {
                self.logger.warn(format!("image delete failed: {err}"));
            }
        }
    }
}

impl<F: FlashFs + 'static, D: Display + 'static> Drop for AnimationPlayer<F, D> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Seek to `frame` and fill `buf`, zero-padding a short read.
fn read_frame<F: FlashFs>(
    storage: &Storage<F>,
    file: FileHandle,
    frame: u32,
    buf: &mut [u8],
) -> FsResult<()> {
    let mut fs = storage.lock();
    fs.seek(file, u64::from(frame) * buf.len() as u64)?;
    let read = read_full(&mut *fs, file, buf)?;
    buf[read..].fill(0);
    Ok(())
}

fn show<D: Display>(
    display: &SharedDisplay<D>,
    image: ImageId,
    pixels: &[u8],
    logger: &Logger,
) -> bool {
    let mut screen = display.lock();
    let result = screen
        .set_source(image, pixels)
        .and_then(|()| screen.invalidate(image));
    match result {
        Ok(()) => true,
        Err(err) => {
            logger.warn(format!("redraw failed: {err}"));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_guard_tracks_peak() {
        let counter = Arc::new(LiveCounter::default());
        {
            let _a = LiveGuard::enter(Arc::clone(&counter));
            let _b = LiveGuard::enter(Arc::clone(&counter));
            assert_eq!(counter.live(), 2);
        }
        assert_eq!(counter.live(), 0);
        assert_eq!(counter.peak(), 2);
    }
}
