//! Rebuilds fixed-size packets from a serial byte stream.
//!
//! Idle drops bytes until it sees the magic byte; Receiving collects until
//! the packet is MTU bytes long. A quiet line hands over whatever was
//! collected so the codec can reject a truncated packet instead of it
//! swallowing the start of the next one.

use crate::protocol::MAGIC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Idle,
    Receiving,
}

#[derive(Debug)]
pub struct PacketAssembler {
    mtu: usize,
    buf: Vec<u8>,
    state: AssemblerState,
    discarded: u64,
}

impl PacketAssembler {
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu: mtu.max(1),
            buf: Vec::with_capacity(mtu),
            state: AssemblerState::Idle,
            discarded: 0,
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Bytes dropped while hunting for a magic byte.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Feed received bytes; returns every packet completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        for &byte in bytes {
            match self.state {
                AssemblerState::Idle => {
                    if byte == MAGIC {
                        self.buf.push(byte);
                        self.state = AssemblerState::Receiving;
                    } else {
                        self.discarded += 1;
                    }
                }
                AssemblerState::Receiving => self.buf.push(byte),
            }
            if self.state == AssemblerState::Receiving && self.buf.len() >= self.mtu {
                packets.push(self.take());
            }
        }
        packets
    }

    /// The line went quiet: hand over a partial packet, if any.
    pub fn flush_idle(&mut self) -> Option<Vec<u8>> {
        if self.state == AssemblerState::Receiving {
            Some(self.take())
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = AssemblerState::Idle;
    }

    fn take(&mut self) -> Vec<u8> {
        self.state = AssemblerState::Idle;
        std::mem::replace(&mut self.buf, Vec::with_capacity(self.mtu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resyncs_on_magic_and_splits_packets() {
        let mut asm = PacketAssembler::new(6);
        let mut stream = vec![0x00, 0xFF];
        stream.extend_from_slice(&[MAGIC, 0x40, 0, 0, 0, 0]);
        stream.extend_from_slice(&[MAGIC, 0x42, 0, 0]);
        let packets = asm.push(&stream);
        assert_eq!(packets, vec![vec![MAGIC, 0x40, 0, 0, 0, 0]]);
        assert_eq!(asm.discarded(), 2);
        assert_eq!(asm.state(), AssemblerState::Receiving);
        let packets = asm.push(&[0, 0]);
        assert_eq!(packets, vec![vec![MAGIC, 0x42, 0, 0, 0, 0]]);
    }

    #[test]
    fn quiet_line_flushes_partial_packet() {
        let mut asm = PacketAssembler::new(64);
        assert!(asm.push(&[MAGIC, 0x4F, 0]).is_empty());
        assert_eq!(asm.flush_idle(), Some(vec![MAGIC, 0x4F, 0]));
        assert_eq!(asm.flush_idle(), None);
        assert_eq!(asm.state(), AssemblerState::Idle);
    }
}
