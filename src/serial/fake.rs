use crate::Result;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::Link;

/// Scripted link for tests: each read pops one chunk, each write is recorded.
///
/// Once the script runs dry reads time out (return 0) and, if a running flag
/// was attached, the flag is cleared so a serve loop winds down.
#[derive(Default)]
pub struct FakeLink {
    script: VecDeque<Result<Vec<u8>>>,
    writes: Vec<Vec<u8>>,
    stop_when_drained: Option<Arc<AtomicBool>>,
}

impl FakeLink {
    pub fn new(script: Vec<Result<Vec<u8>>>) -> Self {
        Self {
            script: script.into(),
            writes: Vec::new(),
            stop_when_drained: None,
        }
    }

    pub fn stop_when_drained(mut self, running: Arc<AtomicBool>) -> Self {
        self.stop_when_drained = Some(running);
        self
    }

    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// Every written byte, in order.
    pub fn written(&self) -> Vec<u8> {
        self.writes.concat()
    }
}

impl Link for FakeLink {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.script.pop_front() {
            Some(Ok(chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.script.push_front(Ok(chunk[n..].to_vec()));
                }
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => {
                if let Some(running) = self.stop_when_drained.as_ref() {
                    running.store(false, Ordering::SeqCst);
                }
                Ok(0)
            }
        }
    }

    fn write_all_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writes.push(data.to_vec());
        Ok(())
    }
}
