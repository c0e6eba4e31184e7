use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::app::Logger;
use crate::storage::{FlashFs, Storage};

use super::{read_frame, LiveCounter, LiveGuard, Phase, Shared};

pub(super) fn spawn<F: FlashFs + 'static>(
    shared: Arc<Shared>,
    storage: Storage<F>,
    poll: Duration,
    live: Arc<LiveCounter>,
    logger: Logger,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("anim-loader".into())
        .spawn(move || {
            let _live = LiveGuard::enter(live);
            run(&shared, &storage, poll, &logger);
            logger.debug("animation loader stopped");
        })
}

/// Keep the back slot filled with the next frame until playback stops.
fn run<F: FlashFs>(shared: &Shared, storage: &Storage<F>, poll: Duration, logger: &Logger) {
    let mut state = shared.lock();
    loop {
        if state.phase != Phase::Playing {
            return;
        }
        let Some(file) = state.file else {
            return;
        };
        let frame = state.next_frame;
        let Some(mut lease) = state.slots.begin_load(frame) else {
            state = wait(shared, state, poll);
            continue;
        };

        drop(state);
        let result = read_frame(storage, file, frame, &mut lease.buffer);
        state = shared.lock();

        match result {
            Ok(()) => {
                state.next_frame = (frame + 1) % state.frame_count.max(1);
                state.slots.finish_load(lease);
            }
            Err(err) => {
                logger.warn(format!("animation frame {frame} read failed: {err}"));
                state.slots.abort_load(lease);
                state = wait(shared, state, poll);
            }
        }
    }
}

fn wait<'a>(
    shared: &'a Shared,
    state: std::sync::MutexGuard<'a, super::AnimState>,
    poll: Duration,
) -> std::sync::MutexGuard<'a, super::AnimState> {
    match shared.wake.wait_timeout(state, poll) {
        Ok((guard, _)) => guard,
        Err(poisoned) => poisoned.into_inner().0,
    }
}
