mod capture;
mod dissect;
mod error;
mod flow_table;
mod pacer;

pub use capture::{Frame, Next, Reader, Resolution};
pub use dissect::{dissect, Dissection};
pub use error::Error;
pub use flow_table::{Accounting, FlowEntry, FlowTable};
pub use pacer::Pacer;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::common::consts::ETH_HEADER_SIZE;
use crate::common::PacketEvent;
use crate::utils::queue::{self, Sender};
use crate::utils::stats::{Counter, CounterType, CounterValue, RefCountable};

// Why the source run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Done,
    Stop,
    Error,
    Kill,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub input: String,
    pub cutoff: u64,
    pub max_flows: usize,
    pub max_age: Duration,
    pub expire_interval: Duration,
    pub pseudo_realtime: i64,
}

#[derive(Debug, Default)]
pub struct SourceCounter {
    pub rx: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub events: AtomicU64,
    pub skipped: AtomicU64,
    pub dropped_cutoff: AtomicU64,
    pub truncated: AtomicU64,
    pub dissect_errors: AtomicU64,
    pub flows_expired: AtomicU64,
    pub flows_evicted: AtomicU64,
}

impl RefCountable for SourceCounter {
    fn get_counters(&self) -> Vec<Counter> {
        vec![
            (
                "rx",
                CounterType::Counted,
                CounterValue::Unsigned(self.rx.swap(0, Ordering::Relaxed)),
            ),
            (
                "rx_bytes",
                CounterType::Counted,
                CounterValue::Unsigned(self.rx_bytes.swap(0, Ordering::Relaxed)),
            ),
            (
                "events",
                CounterType::Counted,
                CounterValue::Unsigned(self.events.swap(0, Ordering::Relaxed)),
            ),
            (
                "skipped",
                CounterType::Counted,
                CounterValue::Unsigned(self.skipped.swap(0, Ordering::Relaxed)),
            ),
            (
                "dropped_cutoff",
                CounterType::Counted,
                CounterValue::Unsigned(self.dropped_cutoff.swap(0, Ordering::Relaxed)),
            ),
            (
                "truncated",
                CounterType::Counted,
                CounterValue::Unsigned(self.truncated.swap(0, Ordering::Relaxed)),
            ),
            (
                "dissect_errors",
                CounterType::Counted,
                CounterValue::Unsigned(self.dissect_errors.swap(0, Ordering::Relaxed)),
            ),
            (
                "flows_expired",
                CounterType::Counted,
                CounterValue::Unsigned(self.flows_expired.swap(0, Ordering::Relaxed)),
            ),
            (
                "flows_evicted",
                CounterType::Counted,
                CounterValue::Unsigned(self.flows_evicted.swap(0, Ordering::Relaxed)),
            ),
        ]
    }
}

// Reads raw frames, dissects them against the flow table and emits paced
// packet events downstream. Owns the capture handle for its lifetime.
pub struct PacketSource {
    runner: Mutex<Option<Runner>>,
    terminated: Arc<AtomicBool>,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<ExitReason>>>,
    exit_reason: Mutex<Option<ExitReason>>,
    counter: Arc<SourceCounter>,
}

impl PacketSource {
    pub fn new(options: Options, output: Sender<PacketEvent>) -> Self {
        let terminated = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(SourceCounter::default());
        let runner = Runner {
            flow_table: FlowTable::new(
                options.cutoff,
                options.max_flows,
                options.max_age.as_secs(),
                options.expire_interval.as_secs(),
            ),
            pacer: Pacer::new(options.pseudo_realtime, terminated.clone()),
            options,
            output,
            terminated: terminated.clone(),
            counter: counter.clone(),
            next_event_id: 0,
        };
        PacketSource {
            runner: Mutex::new(Some(runner)),
            terminated,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
            exit_reason: Mutex::new(None),
            counter,
        }
    }

    pub fn counter(&self) -> Arc<SourceCounter> {
        self.counter.clone()
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            return;
        }
        let mut runner = self.runner.lock().unwrap().take().unwrap();
        self.handle
            .lock()
            .unwrap()
            .replace(thread::spawn(move || runner.run()));
    }

    pub fn stop(&self) -> ExitReason {
        if !self.running.swap(false, Ordering::Relaxed) {
            return self
                .exit_reason
                .lock()
                .unwrap()
                .unwrap_or(ExitReason::Stop);
        }
        self.terminated.store(true, Ordering::Relaxed);
        let reason = match self.handle.lock().unwrap().take() {
            Some(handle) => handle.join().unwrap_or(ExitReason::Kill),
            None => ExitReason::Stop,
        };
        self.exit_reason.lock().unwrap().replace(reason);
        info!("packet source exited: {:?}", reason);
        reason
    }

    // Whether the run loop has completed on its own, e.g. at the end of an
    // offline trace.
    pub fn is_finished(&self) -> bool {
        match self.handle.lock().unwrap().as_ref() {
            Some(handle) => handle.is_finished(),
            None => self.exit_reason.lock().unwrap().is_some(),
        }
    }
}

struct Runner {
    options: Options,
    flow_table: FlowTable,
    pacer: Pacer,
    output: Sender<PacketEvent>,
    terminated: Arc<AtomicBool>,
    counter: Arc<SourceCounter>,
    next_event_id: u64,
}

impl Runner {
    fn run(&mut self) -> ExitReason {
        let mut reader = match Reader::open(&self.options.input) {
            Ok(reader) => reader,
            Err(e) => {
                error!("{}", e);
                return ExitReason::Error;
            }
        };
        if reader.is_live() && self.pacer.enabled() {
            warn!("pseudo-realtime is ignored in live mode");
            self.pacer.disable();
        }
        info!(
            "cutting off flows after {} bytes in each direction",
            self.options.cutoff
        );
        info!("keeping at most {} concurrent flows", self.options.max_flows);
        info!(
            "evicting flows after {}s of inactivity",
            self.options.max_age.as_secs()
        );
        info!(
            "expiring flow table every {}s",
            self.options.expire_interval.as_secs()
        );
        let resolution = reader.resolution();
        loop {
            if self.terminated.load(Ordering::Relaxed) {
                return ExitReason::Stop;
            }
            match reader.next() {
                Ok(Next::Frame(frame)) => {
                    self.counter.rx.fetch_add(1, Ordering::Relaxed);
                    self.counter
                        .rx_bytes
                        .fetch_add(frame.caplen as u64, Ordering::Relaxed);
                    if self.process_frame(&frame, resolution).is_err() {
                        // Downstream queue closed underneath us.
                        return ExitReason::Stop;
                    }
                }
                Ok(Next::TimedOut) => continue,
                Ok(Next::End) => {
                    info!("reached end of stream");
                    return ExitReason::Done;
                }
                Err(e) => {
                    error!("{}", e);
                    return ExitReason::Error;
                }
            }
        }
    }

    fn process_frame(
        &mut self,
        frame: &Frame,
        resolution: Resolution,
    ) -> Result<(), queue::Error<PacketEvent>> {
        let dissection = match dissect(frame) {
            Ok(Some(dissection)) => dissection,
            Ok(None) => {
                self.counter.skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(e) => {
                self.counter.dissect_errors.fetch_add(1, Ordering::Relaxed);
                warn!("{}", e);
                return Ok(());
            }
        };
        // A flow already at its cutoff drops the packet before any
        // eviction work runs on its behalf.
        if self.flow_table.at_cutoff(&dissection.conn, frame.ts_sec) {
            self.counter.dropped_cutoff.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        // Capacity check before the lookup: a table left at the max_flows
        // bound by the previous packet sheds one entry before this one is
        // keyed in.
        if self.flow_table.maybe_cap_evict() {
            self.counter.flows_evicted.fetch_add(1, Ordering::Relaxed);
        }
        let packet_size = match self.flow_table.account(
            &dissection.conn,
            frame.ts_sec,
            dissection.payload_size,
            dissection.packet_size,
        ) {
            Accounting::Drop => {
                self.counter.dropped_cutoff.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Accounting::Recorded(size) => {
                if size < dissection.packet_size {
                    self.counter.truncated.fetch_add(1, Ordering::Relaxed);
                }
                size
            }
        };
        let expired = self.flow_table.maybe_expire(frame.ts_sec);
        if expired > 0 {
            self.counter
                .flows_expired
                .fetch_add(expired as u64, Ordering::Relaxed);
        }

        let captured = frame.data.len().saturating_sub(ETH_HEADER_SIZE);
        let payload_end = ETH_HEADER_SIZE + (packet_size as usize).min(captured);
        let payload = frame.data[ETH_HEADER_SIZE..payload_end].to_vec();
        let timestamp = frame.timestamp(resolution);
        self.pacer.pace(timestamp);

        let event = PacketEvent {
            id: self.next_event_id,
            conn: dissection.conn,
            payload,
            timestamp,
        };
        self.next_event_id += 1;
        self.counter.events.fetch_add(1, Ordering::Relaxed);
        self.output.send(event)
    }
}
