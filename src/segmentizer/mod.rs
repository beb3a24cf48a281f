mod throughput;

pub use throughput::RateCounter;

use std::mem;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::common::{PacketEvent, Segment, SegmentWriter};
use crate::utils::queue::{self, Receiver, Sender};
use crate::utils::stats::{Counter, CounterType, CounterValue, RefCountable};

const RECV_TIMEOUT: Duration = Duration::from_secs(1);
const RATE_WINDOW: Duration = Duration::from_secs(1);

// Messages handed to the downstream consumer.
#[derive(Debug)]
pub enum Output {
    Segment(Segment),
    Statistics(f64),
}

#[derive(Debug, Clone, Copy)]
pub struct SegmentizerConfig {
    pub max_events_per_chunk: usize,
    pub max_segment_size: usize,
}

#[derive(Debug, Default)]
pub struct SegmentizerCounter {
    pub events: AtomicU64,
    pub segments: AtomicU64,
    pub segment_bytes: AtomicU64,
}

impl RefCountable for SegmentizerCounter {
    fn get_counters(&self) -> Vec<Counter> {
        vec![
            (
                "events",
                CounterType::Counted,
                CounterValue::Unsigned(self.events.swap(0, Ordering::Relaxed)),
            ),
            (
                "segments",
                CounterType::Counted,
                CounterValue::Unsigned(self.segments.swap(0, Ordering::Relaxed)),
            ),
            (
                "segment_bytes",
                CounterType::Counted,
                CounterValue::Unsigned(self.segment_bytes.swap(0, Ordering::Relaxed)),
            ),
        ]
    }
}

// Batches incoming events into chunks and byte-bounded segments; closed
// segments are shipped downstream at once, the open one at teardown. No
// event reaches the consumer outside a shipped segment.
pub struct Segmentizer {
    config: SegmentizerConfig,
    receiver: Arc<Receiver<PacketEvent>>,
    output: Mutex<Option<Sender<Output>>>,
    counter: Arc<SegmentizerCounter>,
    thread: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Segmentizer {
    pub fn new(
        config: SegmentizerConfig,
        receiver: Receiver<PacketEvent>,
        output: Sender<Output>,
    ) -> Self {
        Segmentizer {
            config,
            receiver: Arc::new(receiver),
            output: Mutex::new(Some(output)),
            counter: Arc::new(SegmentizerCounter::default()),
            thread: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn counter(&self) -> Arc<SegmentizerCounter> {
        self.counter.clone()
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            debug!("segmentizer has already been started");
            return;
        }
        let receiver = self.receiver.clone();
        let output = self.output.lock().unwrap().take().unwrap();
        let mut worker = Worker {
            writer: SegmentWriter::new(
                self.config.max_events_per_chunk,
                self.config.max_segment_size,
            ),
            segment: Segment::new(),
            rate: RateCounter::new(RATE_WINDOW),
            output,
            counter: self.counter.clone(),
        };
        let thread = thread::spawn(move || loop {
            match receiver.recv(Some(RECV_TIMEOUT)) {
                Ok(event) => worker.process(event),
                Err(queue::Error::Timeout) => continue,
                Err(queue::Error::Terminated(..)) => {
                    worker.finish();
                    break;
                }
            }
        });
        self.thread.lock().unwrap().replace(thread);
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            debug!("segmentizer has already been stopped");
            return;
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!("segmentizer stopped");
    }
}

struct Worker {
    writer: SegmentWriter,
    segment: Segment,
    rate: RateCounter,
    output: Sender<Output>,
    counter: Arc<SegmentizerCounter>,
}

impl Worker {
    fn process(&mut self, event: PacketEvent) {
        self.counter.events.fetch_add(1, Ordering::Relaxed);
        if self.writer.write(&mut self.segment, event) {
            if self.rate.timed_add(1, Instant::now()) && self.rate.last() > 0.0 {
                let _ = self.output.send(Output::Statistics(self.rate.last()));
                info!(
                    "ingesting at rate {:.0} events/sec (mean {:.2}, median {:.2}, standard deviation {:.2})",
                    self.rate.last(),
                    self.rate.mean(),
                    self.rate.median(),
                    self.rate.std_dev(),
                );
            }
            return;
        }
        self.ship();
    }

    // Ships the current segment and attaches the writer to a fresh one,
    // carrying over the chunk that did not fit.
    fn ship(&mut self) {
        let segment = mem::take(&mut self.segment);
        self.writer.attach(&mut self.segment);
        debug!(
            "sending segment {} with {} events ({} bytes)",
            segment.id(),
            segment.events(),
            segment.size()
        );
        self.send(segment);
    }

    fn finish(&mut self) {
        if !self.writer.flush(&mut self.segment) {
            // The open segment is out of room: ship it and retry the seal
            // on the fresh one.
            self.ship();
            if !self.writer.flush(&mut self.segment) {
                error!("failed to flush a fresh segment");
            }
        }
        let segment = mem::take(&mut self.segment);
        debug!(
            "sending final segment {} with {} events",
            segment.id(),
            segment.events()
        );
        self.send(segment);
    }

    fn send(&mut self, segment: Segment) {
        self.counter.segments.fetch_add(1, Ordering::Relaxed);
        self.counter
            .segment_bytes
            .fetch_add(segment.size() as u64, Ordering::Relaxed);
        if self.output.send(Output::Segment(segment)).is_err() {
            debug!("consumer is gone, dropping segment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Connection;

    fn event(id: u64, payload_len: usize) -> PacketEvent {
        PacketEvent {
            id,
            conn: Connection::default(),
            payload: vec![0u8; payload_len],
            timestamp: Duration::from_secs(id),
        }
    }

    fn pipeline(
        config: SegmentizerConfig,
    ) -> (Sender<PacketEvent>, Segmentizer, Receiver<Output>) {
        let (event_sender, event_receiver) = queue::bounded(1024);
        let (output_sender, output_receiver) = queue::bounded(1024);
        let segmentizer = Segmentizer::new(config, event_receiver, output_sender);
        (event_sender, segmentizer, output_receiver)
    }

    fn shipped_segments(receiver: &Receiver<Output>) -> Vec<Segment> {
        let mut segments = vec![];
        while let Ok(output) = receiver.recv(Some(Duration::from_millis(100))) {
            if let Output::Segment(segment) = output {
                segments.push(segment);
            }
        }
        segments
    }

    #[test]
    fn single_event_ships_one_short_segment_at_teardown() {
        let (sender, segmentizer, receiver) = pipeline(SegmentizerConfig {
            max_events_per_chunk: 1000,
            max_segment_size: usize::MAX,
        });
        segmentizer.start();
        sender.send(event(0, 64)).unwrap();
        drop(sender);
        segmentizer.stop();

        let segments = shipped_segments(&receiver);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].events(), 1);
        assert_eq!(segments[0].chunks().len(), 1);
    }

    #[test]
    fn tight_budget_ships_one_segment_per_chunk() {
        let (sender, segmentizer, receiver) = pipeline(SegmentizerConfig {
            max_events_per_chunk: 1,
            max_segment_size: 1,
        });
        segmentizer.start();
        for i in 0..3 {
            sender.send(event(i, 16)).unwrap();
        }
        drop(sender);
        segmentizer.stop();

        let segments = shipped_segments(&receiver);
        assert_eq!(segments.len(), 3);
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.events(), 1);
            assert_eq!(segment.chunks()[0].first_id(), Some(i as u64));
        }
    }

    #[test]
    fn order_is_preserved_across_segments() {
        let (sender, segmentizer, receiver) = pipeline(SegmentizerConfig {
            max_events_per_chunk: 4,
            max_segment_size: 2048,
        });
        segmentizer.start();
        for i in 0..100 {
            sender.send(event(i, 100)).unwrap();
        }
        drop(sender);
        segmentizer.stop();

        let segments = shipped_segments(&receiver);
        assert!(segments.len() > 1);
        let mut next_id = 0;
        for segment in &segments {
            for chunk in segment.chunks() {
                for event in chunk.events() {
                    assert_eq!(event.id, next_id);
                    next_id += 1;
                }
            }
        }
        assert_eq!(next_id, 100);
    }

    #[test]
    fn segment_ids_are_unique() {
        let (sender, segmentizer, receiver) = pipeline(SegmentizerConfig {
            max_events_per_chunk: 1,
            max_segment_size: 1,
        });
        segmentizer.start();
        for i in 0..10 {
            sender.send(event(i, 16)).unwrap();
        }
        drop(sender);
        segmentizer.stop();

        let segments = shipped_segments(&receiver);
        for (i, a) in segments.iter().enumerate() {
            for b in &segments[i + 1..] {
                assert_ne!(a.id(), b.id());
            }
        }
    }

    #[test]
    fn empty_run_ships_an_empty_final_segment() {
        let (sender, segmentizer, receiver) = pipeline(SegmentizerConfig {
            max_events_per_chunk: 1000,
            max_segment_size: usize::MAX,
        });
        segmentizer.start();
        drop(sender);
        segmentizer.stop();

        let segments = shipped_segments(&receiver);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].events(), 0);
    }
}
