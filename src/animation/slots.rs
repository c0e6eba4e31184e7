//! Double-buffered frame cache.
//!
//! Each slot owns its buffer except while the loader is filling it; the
//! buffer is moved out on `begin_load` and handed back on `finish_load` or
//! `abort_load`, so the loader can read from flash without holding the
//! animation lock.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Loading,
    Ready,
    Presenting,
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    buffer: Option<Vec<u8>>,
    frame: u32,
}

impl Slot {
    fn new(frame_size: usize) -> Self {
        Self {
            state: SlotState::Idle,
            buffer: Some(vec![0; frame_size]),
            frame: 0,
        }
    }
}

#[derive(Debug)]
pub struct FrameSlots {
    slots: [Slot; 2],
    front: usize,
    frame_size: usize,
}

/// A buffer checked out for loading.
#[derive(Debug)]
pub struct Lease {
    pub buffer: Vec<u8>,
    pub frame: u32,
}

impl FrameSlots {
    pub fn new(frame_size: usize) -> Self {
        Self {
            slots: [Slot::new(frame_size), Slot::new(frame_size)],
            front: 0,
            frame_size,
        }
    }

    pub fn front_state(&self) -> SlotState {
        self.slots[self.front].state
    }

    pub fn back_state(&self) -> SlotState {
        self.slots[1 - self.front].state
    }

    /// Check out the front buffer for a synchronous load (the first frame).
    pub fn lease_front(&mut self, frame: u32) -> Option<Lease> {
        let slot = &mut self.slots[self.front];
        if slot.state != SlotState::Idle {
            return None;
        }
        let buffer = slot.buffer.take()?;
        slot.state = SlotState::Loading;
        Some(Lease { buffer, frame })
    }

    /// Return the front buffer and mark it on screen.
    pub fn present_front(&mut self, lease: Lease) {
        let slot = &mut self.slots[self.front];
        slot.buffer = Some(lease.buffer);
        slot.frame = lease.frame;
        slot.state = SlotState::Presenting;
    }

    /// Idle → Loading for the back slot.
    pub fn begin_load(&mut self, frame: u32) -> Option<Lease> {
        let slot = &mut self.slots[1 - self.front];
        if slot.state != SlotState::Idle {
            return None;
        }
        let buffer = slot.buffer.take()?;
        slot.state = SlotState::Loading;
        Some(Lease { buffer, frame })
    }

    /// Loading → Ready.
    pub fn finish_load(&mut self, lease: Lease) {
        let slot = &mut self.slots[1 - self.front];
        slot.buffer = Some(lease.buffer);
        slot.frame = lease.frame;
        slot.state = SlotState::Ready;
    }

    /// Loading → Idle, discarding whatever was read.
    pub fn abort_load(&mut self, lease: Lease) {
        let slot = &mut self.slots[1 - self.front];
        slot.buffer = Some(lease.buffer);
        slot.state = SlotState::Idle;
    }

    /// Swap a ready back slot to the front. The old front goes back to Idle
    /// so the loader can refill it. Returns the new front's pixels and frame.
    pub fn swap_ready(&mut self) -> Option<(&[u8], u32)> {
        let back = 1 - self.front;
        if self.slots[back].state != SlotState::Ready {
            return None;
        }
        let front = self.front;
        if self.slots[front].state == SlotState::Presenting {
            self.slots[front].state = SlotState::Idle;
        }
        self.slots[back].state = SlotState::Presenting;
        self.front = back;
        let slot = &self.slots[back];
        slot.buffer.as_deref().map(|pixels| (pixels, slot.frame))
    }

    /// Every slot back to Idle with a buffer. Only valid once no lease is outstanding.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            if slot.buffer.is_none() {
                slot.buffer = Some(vec![0; self.frame_size]);
            }
            slot.state = SlotState::Idle;
            slot.frame = 0;
        }
        self.front = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_move_through_the_cycle() {
        let mut slots = FrameSlots::new(4);
        let lease = slots.lease_front(0).unwrap();
        slots.present_front(Lease {
            buffer: vec![0, 0, 0, 0],
            ..lease
        });
        assert_eq!(slots.front_state(), SlotState::Presenting);

        let mut lease = slots.begin_load(1).unwrap();
        assert_eq!(slots.back_state(), SlotState::Loading);
        assert!(slots.begin_load(1).is_none());
        lease.buffer.copy_from_slice(&[1, 1, 1, 1]);
        slots.finish_load(lease);
        assert_eq!(slots.back_state(), SlotState::Ready);

        let (pixels, frame) = slots.swap_ready().unwrap();
        assert_eq!(pixels, &[1, 1, 1, 1]);
        assert_eq!(frame, 1);
        assert_eq!(slots.front_state(), SlotState::Presenting);
        assert_eq!(slots.back_state(), SlotState::Idle);
        assert!(slots.swap_ready().is_none());
    }

    #[test]
    fn abort_returns_buffer_to_idle() {
        let mut slots = FrameSlots::new(2);
        let lease = slots.begin_load(3).unwrap();
        slots.abort_load(lease);
        assert_eq!(slots.back_state(), SlotState::Idle);
        assert!(slots.begin_load(3).is_some());
    }

    #[test]
    fn reset_restores_missing_buffers() {
        let mut slots = FrameSlots::new(2);
        let _lost = slots.begin_load(1).unwrap();
        slots.reset();
        assert_eq!(slots.back_state(), SlotState::Idle);
        assert_eq!(slots.begin_load(1).unwrap().buffer.len(), 2);
    }
}
