use std::mem;
use std::time::Duration;

use super::connection::Connection;

// A dissected packet. The payload starts at the network layer (link layer
// stripped) and is truncated so its flow never exceeds the configured
// cutoff. The timestamp is the capture timestamp, not the wall clock.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketEvent {
    pub id: u64,
    pub conn: Connection,
    pub payload: Vec<u8>,
    pub timestamp: Duration,
}

impl PacketEvent {
    pub fn size(&self) -> usize {
        mem::size_of::<PacketEvent>() + self.payload.len()
    }
}
