use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use log::warn;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

// Replays a trace at 1/factor of its own speed by sleeping the scaled
// inter-packet gap between emissions. A non-positive factor disables
// pacing. Sleeps are sliced so a termination signal is observed promptly.
pub struct Pacer {
    factor: i64,
    last: Duration,
    terminated: Arc<AtomicBool>,
}

impl Pacer {
    pub fn new(factor: i64, terminated: Arc<AtomicBool>) -> Self {
        Pacer {
            factor,
            last: Duration::ZERO,
            terminated,
        }
    }

    pub fn enabled(&self) -> bool {
        self.factor > 0
    }

    pub fn disable(&mut self) {
        self.factor = 0;
    }

    // The scaled gap to the previous packet. None on the first packet,
    // when pacing is off, or when timestamps regress.
    pub fn delay_for(&mut self, timestamp: Duration) -> Option<Duration> {
        if self.factor <= 0 {
            return None;
        }
        let delay = if timestamp < self.last {
            warn!(
                "non-monotonic packet timestamps: {:?} < {:?}",
                timestamp, self.last
            );
            None
        } else if self.last.is_zero() {
            None
        } else {
            Some((timestamp - self.last) / self.factor as u32)
        };
        self.last = timestamp;
        delay
    }

    pub fn pace(&mut self, timestamp: Duration) {
        let mut remaining = match self.delay_for(timestamp) {
            Some(delay) => delay,
            None => return,
        };
        while !remaining.is_zero() && !self.terminated.load(Ordering::Relaxed) {
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }
}
