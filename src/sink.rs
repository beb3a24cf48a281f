use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};

use crate::segmentizer::Output;
use crate::utils::queue::{self, Receiver};
use crate::utils::stats::{Counter, CounterType, CounterValue, RefCountable};

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct SinkCounter {
    pub segments: AtomicU64,
    pub events: AtomicU64,
    pub bytes: AtomicU64,
    pub rate_reports: AtomicU64,
}

impl RefCountable for SinkCounter {
    fn get_counters(&self) -> Vec<Counter> {
        vec![
            (
                "segments",
                CounterType::Counted,
                CounterValue::Unsigned(self.segments.swap(0, Ordering::Relaxed)),
            ),
            (
                "events",
                CounterType::Counted,
                CounterValue::Unsigned(self.events.swap(0, Ordering::Relaxed)),
            ),
            (
                "bytes",
                CounterType::Counted,
                CounterValue::Unsigned(self.bytes.swap(0, Ordering::Relaxed)),
            ),
            (
                "rate_reports",
                CounterType::Counted,
                CounterValue::Unsigned(self.rate_reports.swap(0, Ordering::Relaxed)),
            ),
        ]
    }
}

// Terminal consumer of the pipeline. Accepts shipped segments, short
// final segments included, and periodic rate reports.
pub struct SegmentSink {
    receiver: Arc<Receiver<Output>>,
    counter: Arc<SinkCounter>,
    thread: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl SegmentSink {
    pub fn new(receiver: Receiver<Output>) -> Self {
        SegmentSink {
            receiver: Arc::new(receiver),
            counter: Arc::new(SinkCounter::default()),
            thread: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn counter(&self) -> Arc<SinkCounter> {
        self.counter.clone()
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            debug!("segment sink has already been started");
            return;
        }
        let receiver = self.receiver.clone();
        let counter = self.counter.clone();
        let thread = thread::spawn(move || loop {
            match receiver.recv(Some(RECV_TIMEOUT)) {
                Ok(Output::Segment(segment)) => {
                    info!(
                        "received segment {} with {} events ({} bytes)",
                        segment.id(),
                        segment.events(),
                        segment.size()
                    );
                    counter.segments.fetch_add(1, Ordering::Relaxed);
                    counter
                        .events
                        .fetch_add(segment.events() as u64, Ordering::Relaxed);
                    counter
                        .bytes
                        .fetch_add(segment.size() as u64, Ordering::Relaxed);
                }
                Ok(Output::Statistics(rate)) => {
                    debug!("ingestion rate {:.0} events/sec", rate);
                    counter.rate_reports.fetch_add(1, Ordering::Relaxed);
                }
                Err(queue::Error::Timeout) => continue,
                Err(queue::Error::Terminated(..)) => break,
            }
        });
        self.thread.lock().unwrap().replace(thread);
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            debug!("segment sink has already been stopped");
            return;
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!("segment sink stopped");
    }
}
