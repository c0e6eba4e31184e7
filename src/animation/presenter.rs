use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{select, tick, Receiver};

use crate::app::Logger;
use crate::display::{Display, SharedDisplay};

use super::{show, LiveCounter, LiveGuard, Phase, Shared};

/// Periodic frame timer. Exits when the stop sender is dropped.
pub(super) fn spawn<D: Display + 'static>(
    shared: Arc<Shared>,
    display: SharedDisplay<D>,
    interval: Duration,
    stop: Receiver<()>,
    live: Arc<LiveCounter>,
    logger: Logger,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("anim-presenter".into())
        .spawn(move || {
            let _live = LiveGuard::enter(live);
            let ticker = tick(interval);
            loop {
                select! {
                    recv(stop) -> _ => break,
                    recv(ticker) -> _ => present_next(&shared, &display, &logger),
                }
            }
            logger.debug("animation presenter stopped");
        })
}

/// Swap in the back slot if the loader has it ready.
fn present_next<D: Display>(shared: &Shared, display: &SharedDisplay<D>, logger: &Logger) {
    let mut state = shared.lock();
    if state.phase != Phase::Playing {
        return;
    }
    let Some(image) = state.image else {
        return;
    };
    let Some((pixels, frame)) = state.slots.swap_ready() else {
        return;
    };
    show(display, image, pixels, logger);
    state.current_frame = frame;
    drop(state);
    shared.wake.notify_all();
}
